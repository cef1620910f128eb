//! Pipeline Processor: one cooperative task per source that reads
//! `RawEvent`s off the adapter's channel, routes each by fingerprint hash
//! to a small worker pool, and runs filter/dedup/normalize/persist in
//! whichever order the Strategy Selector currently prefers.
//!
//! Grounded on `rootsignal-scout::pipeline::{mod, state, traits, router}`:
//! the precedent's `PipelineDeps` bundle (immutable, trait-object
//! dependencies threaded through handlers) becomes `CompiledSource` +
//! `Persist` here, and the event-driven handler dispatch becomes the
//! selector-chosen stage order in `stage.rs`.

mod rate_limit;
pub mod stage;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use zen_common::{DedupConfig, NormalizationMap, ObservationDraft, ProcessingHint, RawEvent};
use zen_dedup::Deduper;
use zen_filter::CompiledFilter;
use zen_strategy::{PipelineOrder, StrategySelector, TelemetryWindow};

use rate_limit::RateLimitedWarn;

pub use stage::Outcome;

const DEFAULT_WORKER_POOL_SIZE: usize = 4;
const WORKER_QUEUE_CAPACITY: usize = 256;
const EVALUATION_INTERVAL: Duration = Duration::from_secs(5);
const PERSIST_ERROR_WARN_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("transient: {0}")]
    Transient(String),
    #[error("rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("filter compile error: {0}")]
    FilterCompile(#[from] zen_filter::FilterCompileError),
}

/// The persistence boundary the Pipeline Processor depends on. Implemented
/// by `zen-persist`'s `Persistor` over `kube::Api<Observation>`; a plain
/// trait object here keeps this crate free of any cluster-API dependency,
/// the same separation `rootsignal-scout::traits::SignalStore` draws
/// between the pipeline and `rootsignal-graph::GraphWriter`.
#[async_trait]
pub trait Persist: Send + Sync {
    /// Create a new persisted record from `draft`. Implementations decide
    /// what "already exists" means (the create-conflict path is a
    /// Persistor concern, not a pipeline one).
    async fn create(&self, draft: ObservationDraft, namespace: &str) -> Result<(), PersistError>;

    /// Update `last_seen_at`/`occurrence_count` on the existing record for
    /// (source, fingerprint). Called on every dedup hit, in both pipeline
    /// orders.
    async fn touch_duplicate(
        &self,
        source: &str,
        fingerprint: &str,
        namespace: &str,
        now: DateTime<Utc>,
    ) -> Result<(), PersistError>;
}

/// The compiled, immutable form of a `SourceConfig` version: everything a
/// worker needs to process one event, with no further lookups. A new
/// config version produces a new `CompiledSource`; in-flight events keep
/// using the one they were dispatched against.
pub struct CompiledSource {
    pub version: u64,
    pub source_name: String,
    pub namespace: String,
    pub filter: CompiledFilter,
    pub dedup_key_fields: Vec<String>,
    pub normalization: NormalizationMap,
}

impl CompiledSource {
    pub fn compile(
        version: u64,
        source_name: impl Into<String>,
        namespace: impl Into<String>,
        filter_rules: &[zen_common::FilterRule],
        dedup: &DedupConfig,
        normalization: NormalizationMap,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            version,
            source_name: source_name.into(),
            namespace: namespace.into(),
            filter: zen_filter::compile(filter_rules)?,
            dedup_key_fields: dedup.key_fields.clone(),
            normalization,
        })
    }

    fn resolve_fingerprint(&self, event: &RawEvent) -> String {
        let values: Vec<Option<&serde_json::Value>> = self
            .dedup_key_fields
            .iter()
            .map(|path| zen_common::path::resolve_path(&event.payload, path))
            .collect();
        zen_common::hash::fingerprint(&event.source_name, &values)
    }
}

fn worker_index(fingerprint: &str, pool_size: usize) -> usize {
    let prefix = &fingerprint[..fingerprint.len().min(8)];
    let n = u32::from_str_radix(prefix, 16).unwrap_or(0) as usize;
    n % pool_size.max(1)
}

/// Per-source processor: owns the deduper, the atomically-swappable order,
/// and the telemetry window that feeds the Strategy Selector.
pub struct Processor<P: Persist + 'static> {
    compiled: CompiledSource,
    deduper: Arc<Deduper>,
    persist: Arc<P>,
    telemetry: Arc<TelemetryWindow>,
    order: Arc<AtomicU8>,
    pool_size: usize,
    warn_gate: Arc<RateLimitedWarn>,
    processing_hint: ProcessingHint,
}

fn order_to_u8(order: PipelineOrder) -> u8 {
    match order {
        PipelineOrder::FilterFirst => 0,
        PipelineOrder::DedupFirst => 1,
    }
}

fn order_from_u8(v: u8) -> PipelineOrder {
    if v == 1 {
        PipelineOrder::DedupFirst
    } else {
        PipelineOrder::FilterFirst
    }
}

impl<P: Persist + 'static> Processor<P> {
    pub fn new(compiled: CompiledSource, dedup: &DedupConfig, persist: Arc<P>, processing_hint: ProcessingHint) -> Self {
        let initial = match processing_hint {
            ProcessingHint::DedupFirst => PipelineOrder::DedupFirst,
            _ => PipelineOrder::FilterFirst,
        };
        Self {
            compiled,
            deduper: Arc::new(Deduper::new(dedup.window_seconds, dedup.max_entries)),
            persist,
            telemetry: Arc::new(TelemetryWindow::new()),
            order: Arc::new(AtomicU8::new(order_to_u8(initial))),
            pool_size: DEFAULT_WORKER_POOL_SIZE,
            warn_gate: Arc::new(RateLimitedWarn::new(PERSIST_ERROR_WARN_INTERVAL)),
            processing_hint,
        }
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size.max(1);
        self
    }

    pub fn current_order(&self) -> PipelineOrder {
        order_from_u8(self.order.load(Ordering::Relaxed))
    }

    pub fn telemetry(&self) -> Arc<TelemetryWindow> {
        self.telemetry.clone()
    }

    /// Consume `input`, routing each event by fingerprint hash to one of
    /// `pool_size` workers, until `cancel` fires or the channel closes.
    /// Returns once every worker has drained.
    pub async fn run(self: Arc<Self>, mut input: mpsc::Receiver<RawEvent>, cancel: CancellationToken) {
        let mut senders = Vec::with_capacity(self.pool_size);
        let mut handles = Vec::with_capacity(self.pool_size);
        for _ in 0..self.pool_size {
            let (tx, mut rx) = mpsc::channel::<(RawEvent, String)>(WORKER_QUEUE_CAPACITY);
            let this = self.clone();
            let worker_cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = worker_cancel.cancelled() => break,
                        next = rx.recv() => {
                            match next {
                                None => break,
                                Some((event, fingerprint)) => {
                                    let order = this.current_order();
                                    let outcome = stage::process_one(
                                        &event,
                                        &fingerprint,
                                        order,
                                        &this.compiled,
                                        &this.deduper,
                                        this.persist.as_ref(),
                                        &this.telemetry,
                                        &this.warn_gate,
                                    )
                                    .await;
                                    debug!(source = %this.compiled.source_name, ?outcome, "event processed");
                                }
                            }
                        }
                    }
                }
            }));
            senders.push(tx);
        }

        let strategy_handle = self.clone().spawn_strategy_loop(cancel.clone());

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = input.recv() => {
                    match next {
                        None => break,
                        Some(event) => {
                            let fingerprint = self.compiled.resolve_fingerprint(&event);
                            let idx = worker_index(&fingerprint, self.pool_size);
                            if senders[idx].send((event, fingerprint)).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }

        drop(senders);
        for handle in handles {
            let _ = handle.await;
        }
        strategy_handle.abort();
    }

    /// Every 5s, roll the telemetry window and feed it to a selector; when
    /// `processing_hint` isn't `auto` the selector never switches, so this
    /// loop degenerates to a no-op tick (cheap enough to always run).
    fn spawn_strategy_loop(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut selector = StrategySelector::new(self.processing_hint);
            let mut interval = tokio::time::interval(EVALUATION_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = interval.tick() => {}
                }
                let snapshot = self.telemetry.tick();
                if let Some(change) = selector.evaluate(&snapshot, std::time::Instant::now()) {
                    self.order.store(order_to_u8(change.to), Ordering::Relaxed);
                    info!(
                        source = %self.compiled.source_name,
                        from = ?change.from,
                        to = ?change.to,
                        cost_advantage = change.cost_advantage,
                        "strategy switch"
                    );
                }
            }
        })
    }
}
