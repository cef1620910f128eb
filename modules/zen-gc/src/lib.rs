//! The Garbage Collector: a periodic, per-source sweep that
//! enforces `retention.max_age_seconds` and `retention.max_per_source`
//! against the cluster's stored Observations. Runs on its own cooperative
//! task; never shares a mutex or a call path with the Pipeline Processor.
//!
//! Grounded on `rootsignal-scout-supervisor::issues::IssueStore::
//! expire_stale_issues` for the periodic age-based sweep-and-report shape,
//! and `rootsignal-domains::scraping::adapters::usaspending`'s
//! loop-until-short-page idiom for the chunked (page size 500) listing.

use std::time::Duration;

use chrono::{DateTime, Utc};
use kube::api::{Api, DeleteParams, ListParams};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use zen_common::Retention;
use zen_config_store::ConfigStore;
use zen_persist::{Observation, SOURCE_LABEL};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const GC_PAGE_SIZE: u32 = 500;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub source: String,
    pub deleted: u64,
    pub error: Option<String>,
}

pub struct GarbageCollector {
    client: kube::Client,
    namespace: String,
    config: std::sync::Arc<ConfigStore>,
}

impl GarbageCollector {
    pub fn new(client: kube::Client, namespace: impl Into<String>, config: std::sync::Arc<ConfigStore>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            config,
        }
    }

    /// Sweep every configured source once and report the outcome. Exposed
    /// separately from `run` so tests and an operator-triggered "sweep now"
    /// hook can call it without waiting on the interval.
    pub async fn sweep_once(&self) -> Vec<SweepReport> {
        let snapshot = self.config.snapshot();
        let mut reports = Vec::with_capacity(snapshot.sources.len());
        for (name, source) in &snapshot.sources {
            let report = self.sweep_source(name, &source.retention).await;
            if report.deleted > 0 {
                info!(source = %report.source, deleted = report.deleted, "gc sweep deleted observations");
            }
            if let Some(err) = &report.error {
                warn!(source = %report.source, error = %err, "gc sweep encountered an error");
            }
            reports.push(report);
        }
        reports
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = interval.tick() => {}
            }
            self.sweep_once().await;
        }
    }

    async fn sweep_source(&self, source: &str, retention: &Retention) -> SweepReport {
        let api: Api<Observation> = Api::namespaced(self.client.clone(), &self.namespace);
        let selector = format!("{SOURCE_LABEL}={source}");

        let all = match list_all_chunked(&api, &selector).await {
            Ok(items) => items,
            Err(e) => {
                return SweepReport {
                    source: source.to_string(),
                    deleted: 0,
                    error: Some(e.to_string()),
                }
            }
        };

        let now = Utc::now();
        let names_to_delete = select_for_deletion(&all, retention, now);

        let mut deleted = 0u64;
        let mut last_error = None;
        for name in &names_to_delete {
            match api.delete(name, &DeleteParams::default()).await {
                Ok(_) => deleted += 1,
                Err(kube::Error::Api(ae)) if ae.code == 404 => deleted += 1,
                Err(e) => last_error = Some(e.to_string()),
            }
        }

        SweepReport {
            source: source.to_string(),
            deleted,
            error: last_error,
        }
    }
}

async fn list_all_chunked(api: &Api<Observation>, selector: &str) -> Result<Vec<Observation>, kube::Error> {
    let mut all = Vec::new();
    let mut continue_token: Option<String> = None;
    loop {
        let mut lp = ListParams::default().labels(selector).limit(GC_PAGE_SIZE);
        if let Some(token) = &continue_token {
            lp = lp.continue_token(token);
        }
        let page = api.list(&lp).await?;
        let next_token = page.metadata.continue_.clone();
        all.extend(page.items);
        match next_token {
            Some(t) if !t.is_empty() => continue_token = Some(t),
            _ => break,
        }
    }
    Ok(all)
}

/// Age-based deletion first, then cap-based deletion among the survivors,
/// oldest-by-`last_seen_at` first — delete by age, then trim the
/// remainder down to `max_per_source`.
fn select_for_deletion(observations: &[Observation], retention: &Retention, now: DateTime<Utc>) -> Vec<String> {
    let age_cutoff = now - chrono::Duration::seconds(retention.max_age_seconds);

    let mut expired = Vec::new();
    let mut survivors: Vec<(String, DateTime<Utc>)> = Vec::new();
    for obj in observations {
        let Some(name) = obj.metadata.name.clone() else {
            continue;
        };
        let last_seen = obj
            .status
            .as_ref()
            .map(|s| s.last_seen_at.0)
            .unwrap_or(now);
        if last_seen < age_cutoff {
            expired.push(name);
        } else {
            survivors.push((name, last_seen));
        }
    }

    if survivors.len() > retention.max_per_source {
        survivors.sort_by_key(|(_, last_seen)| *last_seen);
        let excess = survivors.len() - retention.max_per_source;
        expired.extend(survivors.into_iter().take(excess).map(|(name, _)| name));
    }

    expired
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
    use std::collections::HashMap;
    use zen_persist::ObservationStatus;

    fn observation(name: &str, last_seen_secs_ago: i64) -> Observation {
        let now = Utc::now();
        let last_seen = now - chrono::Duration::seconds(last_seen_secs_ago);
        Observation {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: zen_persist::ObservationSpec {
                source: "cis-scanner".into(),
                category: "compliance".into(),
                type_: "finding".into(),
                severity: zen_common::Severity::Medium,
                priority: 0.4,
                detected_at: Time(last_seen),
                fingerprint: format!("fp-{name}"),
                subject: None,
                summary: "test".into(),
                details: serde_json::json!({}),
                labels: HashMap::new(),
                source_payload: serde_json::json!({}),
            },
            status: Some(ObservationStatus {
                first_seen_at: Time(last_seen),
                last_seen_at: Time(last_seen),
                occurrence_count: 1,
            }),
        }
    }

    fn retention(max_age_seconds: i64, max_per_source: usize) -> Retention {
        Retention {
            max_age_seconds,
            max_per_source,
        }
    }

    #[test]
    fn age_based_deletion_selects_only_expired_records() {
        let observations = vec![observation("fresh", 10), observation("stale", 10_000)];
        let deleted = select_for_deletion(&observations, &retention(3600, 1000), Utc::now());
        assert_eq!(deleted, vec!["stale".to_string()]);
    }

    #[test]
    fn cap_based_deletion_trims_oldest_survivors_beyond_the_cap() {
        let observations = vec![
            observation("oldest", 300),
            observation("middle", 200),
            observation("newest", 100),
        ];
        let deleted = select_for_deletion(&observations, &retention(3600, 2), Utc::now());
        assert_eq!(deleted, vec!["oldest".to_string()]);
    }

    #[test]
    fn nothing_is_deleted_when_within_both_bounds() {
        let observations = vec![observation("a", 10), observation("b", 20)];
        let deleted = select_for_deletion(&observations, &retention(3600, 10), Utc::now());
        assert!(deleted.is_empty());
    }
}
