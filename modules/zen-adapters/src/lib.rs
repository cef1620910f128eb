//! Adapter Framework: a uniform lifecycle contract over the four
//! built-in producer kinds. Each adapter owns one `SourceConfig` binding
//! and emits `RawEvent`s onto a bounded channel until stopped.
//!
//! Grounded on `rootsignal-scout::Scout` (the precedent's own run-loop
//! abstraction over heterogeneous producers) and `scheduling::scheduler`
//! for cadence/backoff; the `informer`/`webhook` variants have no direct
//! precedent analogue and are built from the `kube`/`axum` ecosystem idiom
//! documented across the retrieval pack's reference operator manifests.

pub mod health;
pub mod informer;
pub mod log_tail;
pub mod periodic_list;
pub mod webhook;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use zen_common::RawEvent;

pub use health::{AdapterHealth, HealthState};

pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;
pub const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Starting,
    Running,
    Degraded,
    Draining,
    Stopped,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("adapter transient error: {0}")]
    Transient(String),
    #[error("adapter fatal error: {0}")]
    Fatal(String),
}

/// Common contract every adapter variant implements. `run` owns the
/// adapter's full lifecycle (Starting → Running, with Degraded excursions
/// on transient failure) and returns only when `cancel` fires or a fatal
/// error is hit; the caller (Pipeline Processor's source supervisor)
/// restarts it according to `binding`-change semantics.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Run until `cancel` fires, emitting `RawEvent`s on `out`. Returning
    /// `Ok(())` means a clean stop; `Err(AdapterError::Fatal)` means the
    /// source should not be restarted without operator intervention.
    async fn run(&self, out: mpsc::Sender<RawEvent>, cancel: CancellationToken) -> Result<(), AdapterError>;

    fn health(&self) -> HealthState;
}

/// Emitted on every lifecycle transition for telemetry.
#[derive(Debug, Clone)]
pub struct LifecycleTransition {
    pub source_name: String,
    pub from: LifecycleState,
    pub to: LifecycleState,
    pub reason: Option<String>,
}

pub fn new_channel(capacity: Option<usize>) -> (mpsc::Sender<RawEvent>, mpsc::Receiver<RawEvent>) {
    mpsc::channel(capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_channel_capacity_matches_contract() {
        assert_eq!(DEFAULT_CHANNEL_CAPACITY, 1024);
    }
}
