//! Periodic-list adapter: polls a resolved resource kind on a fixed
//! interval and emits synthetic add/update/delete events by diffing the
//! new listing against the previous snapshot, keyed by `uid`.
//!
//! Grounded on `rootsignal-scout::scheduling::scheduler`'s cadence-based
//! poll loop, generalized from "rescan a region for new sources" to
//! "relist a resource kind and diff against the last snapshot."

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::{Api, Client};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use zen_common::{Gvk, Provenance, RawEvent};
use zen_discovery::Resolver;

use crate::{Adapter, AdapterError, AdapterHealth, HealthState};

pub struct PeriodicListAdapter {
    source_name: String,
    gvk: Gvk,
    namespace: Option<String>,
    interval: Duration,
    client: Client,
    resolver: Resolver,
    config_version: u64,
    health: Arc<AdapterHealth>,
    seen: Mutex<HashMap<String, serde_json::Value>>,
}

impl PeriodicListAdapter {
    pub fn new(
        source_name: impl Into<String>,
        gvk: Gvk,
        namespace: Option<String>,
        interval_seconds: u64,
        client: Client,
        resolver: Resolver,
        config_version: u64,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            gvk,
            namespace,
            interval: Duration::from_secs(interval_seconds.max(1)),
            client,
            resolver,
            config_version,
            health: Arc::new(AdapterHealth::new()),
            seen: Mutex::new(HashMap::new()),
        }
    }

    fn raw_event(&self, obj: &serde_json::Value, deleted: bool) -> RawEvent {
        let mut payload = obj.clone();
        if deleted {
            if let Some(map) = payload.as_object_mut() {
                map.insert("_deleted".to_string(), serde_json::Value::Bool(true));
            }
        }
        RawEvent {
            source_name: self.source_name.clone(),
            received_at: chrono::Utc::now(),
            payload,
            provenance: Provenance {
                kind: Some(self.gvk.kind.clone()),
                namespace: obj.pointer("/metadata/namespace").and_then(|v| v.as_str()).map(str::to_string),
                name: obj.pointer("/metadata/name").and_then(|v| v.as_str()).map(str::to_string),
                uid: obj.pointer("/metadata/uid").and_then(|v| v.as_str()).map(str::to_string),
            },
            delivery_attempt: 1,
            config_version: self.config_version,
        }
    }

    /// Diff a fresh listing against `seen`, returning (present, removed) and
    /// updating `seen` in place.
    async fn diff_and_update(&self, listing: Vec<(String, serde_json::Value)>) -> (Vec<serde_json::Value>, Vec<serde_json::Value>) {
        let mut seen = self.seen.lock().await;
        let result = diff(&seen, &listing);
        *seen = listing.into_iter().collect();
        result
    }
}

/// Pure diff step, factored out so it's unit-testable without a running
/// adapter: every object in `listing` is reported present (new, changed, or
/// unchanged — the downstream Deduplicator is what turns a repeat listing
/// into an `occurrence_count` bump, the same way an informer's resync
/// replays its cache as adds), plus which previously-seen uids are now
/// absent from `listing`.
fn diff(
    seen: &HashMap<String, serde_json::Value>,
    listing: &[(String, serde_json::Value)],
) -> (Vec<serde_json::Value>, Vec<serde_json::Value>) {
    let mut present = Vec::with_capacity(listing.len());
    let mut current_uids = std::collections::HashSet::new();

    for (uid, obj) in listing {
        current_uids.insert(uid.clone());
        present.push(obj.clone());
    }

    let removed: Vec<serde_json::Value> = seen
        .iter()
        .filter(|(uid, _)| !current_uids.contains(*uid))
        .map(|(_, v)| v.clone())
        .collect();

    (present, removed)
}

#[async_trait]
impl Adapter for PeriodicListAdapter {
    async fn run(&self, out: mpsc::Sender<RawEvent>, cancel: CancellationToken) -> Result<(), AdapterError> {
        let resolved = match self.resolver.resolve_with_backoff(&self.gvk).await {
            Ok(r) => r,
            Err(e) => {
                self.health.mark_degraded(format!("discovery: {e}"));
                return Err(AdapterError::Fatal(e.to_string()));
            }
        };

        let ar = kube::discovery::ApiResource {
            group: resolved.group.clone(),
            version: resolved.version.clone(),
            api_version: if resolved.group.is_empty() {
                resolved.version.clone()
            } else {
                format!("{}/{}", resolved.group, resolved.version)
            },
            kind: self.gvk.kind.clone(),
            plural: resolved.resource.clone(),
        };
        let api: Api<kube::core::DynamicObject> = match (&self.namespace, resolved.namespaced) {
            (Some(ns), true) => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        };

        let mut interval = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = interval.tick() => {}
            }

            let list = match api.list(&kube::api::ListParams::default()).await {
                Ok(l) => l,
                Err(e) => {
                    self.health.mark_degraded(e.to_string());
                    warn!(source = %self.source_name, error = %e, "periodic-list poll failed");
                    continue;
                }
            };
            self.health.mark_ok();

            let listing: Vec<(String, serde_json::Value)> = list
                .items
                .iter()
                .filter_map(|obj| {
                    let value = serde_json::to_value(obj).ok()?;
                    let uid = value.pointer("/metadata/uid")?.as_str()?.to_string();
                    Some((uid, value))
                })
                .collect();

            let (present, removed) = self.diff_and_update(listing).await;
            for obj in present {
                if out.send(self.raw_event(&obj, false)).await.is_err() {
                    return Ok(());
                }
            }
            for obj in removed {
                if out.send(self.raw_event(&obj, true)).await.is_err() {
                    return Ok(());
                }
            }
        }
    }

    fn health(&self) -> HealthState {
        self.health.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_listing_reports_everything_present() {
        let seen = HashMap::new();
        let listing = vec![("uid-1".to_string(), json!({"metadata": {"uid": "uid-1"}}))];
        let (present, removed) = diff(&seen, &listing);
        assert_eq!(present.len(), 1);
        assert!(removed.is_empty());
    }

    #[test]
    fn unchanged_object_is_still_reported_present_every_poll() {
        let obj = json!({"metadata": {"uid": "uid-1"}, "spec": {"x": 1}});
        let mut seen = HashMap::new();
        seen.insert("uid-1".to_string(), obj.clone());
        let listing = vec![("uid-1".to_string(), obj)];
        let (present, removed) = diff(&seen, &listing);
        assert_eq!(present.len(), 1);
        assert!(removed.is_empty());
    }

    #[test]
    fn absent_uid_is_reported_as_removed() {
        let mut seen = HashMap::new();
        seen.insert("uid-1".to_string(), json!({"metadata": {"uid": "uid-1"}}));
        let (present, removed) = diff(&seen, &[]);
        assert!(present.is_empty());
        assert_eq!(removed.len(), 1);
    }

    #[test]
    fn item_present_across_every_poll_is_reported_each_time() {
        // Mirrors an item that survives a run of polls with varying listing
        // sizes around it (e.g. 3 -> 5 -> 5 -> 4 items): it must be reported
        // present on every single poll, not just the first, so the
        // downstream deduplicator can advance its occurrence_count.
        let obj = json!({"metadata": {"uid": "uid-1"}});
        let mut seen: HashMap<String, serde_json::Value> = HashMap::new();
        let mut times_present = 0;
        for _ in 0..4 {
            let listing = vec![("uid-1".to_string(), obj.clone())];
            let (present, _removed) = diff(&seen, &listing);
            if present.iter().any(|v| v == &obj) {
                times_present += 1;
            }
            seen = listing.into_iter().collect();
        }
        assert_eq!(times_present, 4);
    }
}
