//! The Persistor: the concrete `zen_pipeline::Persist` over
//! `kube::Api<Observation>`. Bounded by an outstanding-request semaphore
//! so a slow cluster API backs the pipeline's workers off instead of
//! queueing unboundedly in front of it.
//!
//! Grounded on `rootsignal-events::store::EventStore`'s retry-then-return
//! shape and `rootsignal-archive::store`'s merge-on-conflict logic,
//! generalized from a Postgres upsert to a `kube` create/get/replace loop.

mod observation_crd;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{Api, PostParams};
use tokio::sync::Semaphore;
use tracing::warn;

use zen_common::ObservationDraft;
use zen_pipeline::{Persist, PersistError};

pub use observation_crd::{Observation, ObservationSpec, ObservationStatus};

const DEFAULT_MAX_OUTSTANDING: usize = 64;
const MERGE_RETRY_ATTEMPTS: u32 = 3;

/// Stamped onto every Observation's `metadata.labels` at creation so the
/// Garbage Collector can list a source's records with a label selector
/// instead of scanning the whole namespace and filtering client-side.
pub const SOURCE_LABEL: &str = "zen.io/source";

/// Persists Observations through the cluster API. One instance is shared
/// across every source's `Processor`; the semaphore caps total outstanding
/// requests regardless of how many sources are feeding it.
pub struct Persistor {
    client: kube::Client,
    semaphore: Arc<Semaphore>,
    queue_depth: AtomicI64,
}

impl Persistor {
    pub fn new(client: kube::Client) -> Self {
        Self::with_max_outstanding(client, DEFAULT_MAX_OUTSTANDING)
    }

    pub fn with_max_outstanding(client: kube::Client, max_outstanding: usize) -> Self {
        Self {
            client,
            semaphore: Arc::new(Semaphore::new(max_outstanding.max(1))),
            queue_depth: AtomicI64::new(0),
        }
    }

    /// Outstanding (acquired-or-waiting) persist requests, for a
    /// `persist_queue_depth` gauge.
    pub fn queue_depth(&self) -> i64 {
        self.queue_depth.load(Ordering::Relaxed)
    }

    fn api(&self, namespace: &str) -> Api<Observation> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn merge_touch(
        &self,
        api: &Api<Observation>,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<(), PersistError> {
        for attempt in 1..=MERGE_RETRY_ATTEMPTS {
            let mut current = match api.get(name).await {
                Ok(obj) => obj,
                Err(e) if is_not_found(&e) => return Ok(()),
                Err(e) => return Err(classify(e)),
            };
            let status = current.status.get_or_insert(ObservationStatus {
                first_seen_at: Time(now),
                last_seen_at: Time(now),
                occurrence_count: 0,
            });
            if now > status.last_seen_at.0 {
                status.last_seen_at = Time(now);
            }
            status.occurrence_count += 1;

            match api.replace_status(
                name,
                &PostParams::default(),
                serde_json::to_vec(&current).map_err(|e| PersistError::Rejected(e.to_string()))?,
            )
            .await
            {
                Ok(_) => return Ok(()),
                Err(e) if is_conflict(&e) && attempt < MERGE_RETRY_ATTEMPTS => continue,
                Err(e) if is_not_found(&e) => return Ok(()),
                Err(e) => return Err(classify(e)),
            }
        }
        Err(PersistError::Transient(format!(
            "{name}: exhausted {MERGE_RETRY_ATTEMPTS} merge attempts on resource conflict"
        )))
    }
}

#[async_trait::async_trait]
impl Persist for Persistor {
    async fn create(&self, draft: ObservationDraft, namespace: &str) -> Result<(), PersistError> {
        self.queue_depth.fetch_add(1, Ordering::Relaxed);
        let _permit = self.semaphore.acquire().await;
        self.queue_depth.fetch_sub(1, Ordering::Relaxed);

        let name = zen_common::Observation::derive_name(&draft.source, &draft.fingerprint);
        let api = self.api(namespace);
        let detected_at = draft.detected_at;
        let obj = Observation::new_from_draft(draft, name.clone(), namespace.to_string());

        let mut created = match api.create(&PostParams::default(), &obj).await {
            Ok(created) => created,
            Err(e) if is_conflict(&e) => return self.merge_touch(&api, &name, detected_at).await,
            Err(e) => return Err(classify(e)),
        };
        created.status = Some(observation_crd::initial_status(detected_at));
        let body = serde_json::to_vec(&created).map_err(|e| PersistError::Rejected(e.to_string()))?;
        match api.replace_status(&name, &PostParams::default(), body).await {
            Ok(_) => Ok(()),
            Err(e) if is_conflict(&e) => self.merge_touch(&api, &name, detected_at).await,
            Err(e) => Err(classify(e)),
        }
    }

    async fn touch_duplicate(
        &self,
        source: &str,
        fingerprint: &str,
        namespace: &str,
        now: DateTime<Utc>,
    ) -> Result<(), PersistError> {
        self.queue_depth.fetch_add(1, Ordering::Relaxed);
        let _permit = self.semaphore.acquire().await;
        self.queue_depth.fetch_sub(1, Ordering::Relaxed);

        let name = zen_common::Observation::derive_name(source, fingerprint);
        let api = self.api(namespace);
        let result = self.merge_touch(&api, &name, now).await;
        if let Err(ref e) = result {
            warn!(source, fingerprint, error = %e, "touch_duplicate failed");
        }
        result
    }
}

fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409)
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// Maps a `kube::Error` onto the pipeline's retry/drop split: anything that
/// looks like a transport hiccup or server overload is `Transient` (worth
/// retrying with backoff), anything that looks like a permanent rejection
/// (bad request, forbidden, unprocessable) is `Rejected`.
fn classify(err: kube::Error) -> PersistError {
    match &err {
        kube::Error::Api(ae) if ae.code >= 500 => PersistError::Transient(ae.message.clone()),
        kube::Error::Api(ae) if ae.code == 429 => PersistError::Transient(ae.message.clone()),
        kube::Error::Api(ae) => PersistError::Rejected(ae.message.clone()),
        other => PersistError::Transient(other.to_string()),
    }
}
