//! Informer adapter: watches a resolved cluster resource kind and emits
//! creates/updates/deletes as `RawEvent`s, replaying the initial list sync
//! as synthetic adds. Built from the `kube::runtime::watcher` idiom;
//! lifecycle/backoff shape grounded on `rootsignal-scout::scheduling::
//! scheduler`'s cadence-with-backoff run loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use kube::runtime::watcher::{self, Event};
use kube::{Api, Client};
use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use zen_common::{Gvk, Provenance, RawEvent};
use zen_discovery::Resolver;

use crate::{Adapter, AdapterError, AdapterHealth};

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(60);
const BACKOFF_JITTER_FRACTION: f64 = 0.2;

/// Add up to `BACKOFF_JITTER_FRACTION` of `backoff` as random jitter, so a
/// fleet of informers hitting the same outage don't all retry in lockstep.
fn jittered(backoff: Duration) -> Duration {
    let jitter_millis = (backoff.as_millis() as f64 * BACKOFF_JITTER_FRACTION) as u64;
    let extra = if jitter_millis == 0 {
        0
    } else {
        rand::rng().random_range(0..=jitter_millis)
    };
    backoff + Duration::from_millis(extra)
}

pub struct InformerAdapter {
    source_name: String,
    gvk: Gvk,
    namespace: Option<String>,
    client: Client,
    resolver: Resolver,
    config_version: u64,
    health: Arc<AdapterHealth>,
}

impl InformerAdapter {
    pub fn new(
        source_name: impl Into<String>,
        gvk: Gvk,
        namespace: Option<String>,
        client: Client,
        resolver: Resolver,
        config_version: u64,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            gvk,
            namespace,
            client,
            resolver,
            config_version,
            health: Arc::new(AdapterHealth::new()),
        }
    }

    fn raw_event(&self, obj: &serde_json::Value) -> RawEvent {
        let provenance = Provenance {
            kind: Some(self.gvk.kind.clone()),
            namespace: obj
                .pointer("/metadata/namespace")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            name: obj
                .pointer("/metadata/name")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            uid: obj
                .pointer("/metadata/uid")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        };
        RawEvent {
            source_name: self.source_name.clone(),
            received_at: chrono::Utc::now(),
            payload: obj.clone(),
            provenance,
            delivery_attempt: 1,
            config_version: self.config_version,
        }
    }
}

#[async_trait]
impl Adapter for InformerAdapter {
    async fn run(&self, out: mpsc::Sender<RawEvent>, cancel: CancellationToken) -> Result<(), AdapterError> {
        let mut backoff = BACKOFF_BASE;
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let resolved = match self.resolver.resolve_with_backoff(&self.gvk).await {
                Ok(r) => r,
                Err(e) => {
                    self.health.mark_degraded(format!("discovery: {e}"));
                    return Err(AdapterError::Fatal(e.to_string()));
                }
            };

            let api: Api<kube::core::DynamicObject> = {
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
                match (&self.namespace, resolved.namespaced) {
                    (Some(ns), true) => Api::namespaced_with(self.client.clone(), ns, &ar),
                    _ => Api::all_with(self.client.clone(), &ar),
                }
            };

            let mut stream = Box::pin(watcher::watcher(api, watcher::Config::default()).boxed());

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    next = stream.next() => {
                        match next {
                            None => break,
                            Some(Ok(Event::Init)) => {}
                            Some(Ok(Event::InitApply(obj))) => {
                                self.health.mark_ok();
                                let _ = out.send(self.raw_event(&serde_json::to_value(&obj).unwrap_or_default())).await;
                            }
                            Some(Ok(Event::InitDone)) => {
                                debug!(source = %self.source_name, "informer initial cache sync complete");
                            }
                            Some(Ok(Event::Apply(obj))) => {
                                self.health.mark_ok();
                                let _ = out.send(self.raw_event(&serde_json::to_value(&obj).unwrap_or_default())).await;
                            }
                            Some(Ok(Event::Delete(obj))) => {
                                let mut value = serde_json::to_value(&obj).unwrap_or_default();
                                if let Some(map) = value.as_object_mut() {
                                    map.insert("_deleted".to_string(), serde_json::Value::Bool(true));
                                }
                                let _ = out.send(self.raw_event(&value)).await;
                            }
                            Some(Err(e)) => {
                                warn!(source = %self.source_name, error = %e, "informer watch stream error");
                                self.health.mark_degraded(e.to_string());
                                break;
                            }
                        }
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(jittered(backoff)) => {}
            }
            backoff = (backoff * 2).min(BACKOFF_CAP);
        }
    }

    fn health(&self) -> crate::HealthState {
        self.health.state()
    }
}
