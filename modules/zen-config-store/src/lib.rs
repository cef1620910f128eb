//! Source Configuration Store: loads `SourceConfig` records from
//! either a mounted file-set or a cluster CRD, validates them, and
//! publishes an immutable snapshot the rest of the pipeline reads through
//! an `ArcSwap`. In-flight events keep the version they started on; the
//! store itself never blocks a reader for a write in progress.
//!
//! Grounded on `rootsignal-graph::cache::SignalCache` for the swap idiom
//! (shared with `zen-discovery`) and the precedent's `scheduling::scheduler`
//! for the watch-loop/backoff shape; the CRD type and its `kube::runtime::
//! watcher` wiring have no teacher analogue and are pack enrichment.

pub mod crd;
mod file_loader;
mod kube_loader;

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use thiserror::Error;
use tokio::sync::mpsc;

pub use crd::SourceConfig as SourceConfigResource;
use zen_common::SourceConfig;

#[derive(Debug, Error)]
pub enum ConfigStoreError {
    #[error("config source io error: {0}")]
    Io(String),
    #[error("config source parse error: {0}")]
    Parse(String),
    #[error("config validation failed: {0}")]
    Invalid(String),
    #[error("duplicate source name: {0}")]
    DuplicateName(String),
}

/// An immutable, versioned view of every configured source. `version`
/// increments on every accepted reload (unrelated to a single source's
/// own `SourceConfig::version`, which mirrors the snapshot version at the
/// time that source was last (re)published).
#[derive(Debug, Clone, Default)]
pub struct SourceConfigSnapshot {
    pub version: u64,
    pub sources: HashMap<String, SourceConfig>,
}

impl SourceConfigSnapshot {
    fn from_sources(version: u64, mut sources: Vec<SourceConfig>) -> Result<Self, ConfigStoreError> {
        let mut by_name = HashMap::with_capacity(sources.len());
        for mut source in sources.drain(..) {
            source.version = version;
            if by_name.insert(source.name.clone(), source).is_some() {
                return Err(ConfigStoreError::DuplicateName(
                    by_name.keys().next().cloned().unwrap_or_default(),
                ));
            }
        }
        Ok(Self {
            version,
            sources: by_name,
        })
    }
}

/// How the store is fed. Selected once at startup from `ZEN_CONFIG_PATH`
/// (present → file-set, absent → cluster CRD) and fixed for the process
/// lifetime.
pub enum Backend {
    FileSet { dir: std::path::PathBuf },
    Cluster { client: kube::Client, namespace: String },
}

/// Change notification delivered to subscribers after a snapshot swap.
#[derive(Debug, Clone)]
pub struct SnapshotChanged {
    pub version: u64,
}

pub struct ConfigStore {
    backend: Backend,
    snapshot: Arc<ArcSwap<SourceConfigSnapshot>>,
    changed_tx: mpsc::Sender<SnapshotChanged>,
    changed_rx: tokio::sync::Mutex<Option<mpsc::Receiver<SnapshotChanged>>>,
}

impl ConfigStore {
    pub fn new(backend: Backend) -> Self {
        let (changed_tx, changed_rx) = mpsc::channel(16);
        Self {
            backend,
            snapshot: Arc::new(ArcSwap::from_pointee(SourceConfigSnapshot::default())),
            changed_tx,
            changed_rx: tokio::sync::Mutex::new(Some(changed_rx)),
        }
    }

    pub fn snapshot(&self) -> Arc<SourceConfigSnapshot> {
        self.snapshot.load_full()
    }

    /// Take the change-notification receiver. Callable exactly once; the
    /// Pipeline Processor and GC both subscribe at startup before the
    /// watch loop is spawned.
    pub async fn subscribe(&self) -> Option<mpsc::Receiver<SnapshotChanged>> {
        self.changed_rx.lock().await.take()
    }

    /// Perform the initial load synchronously so startup fails fast on a
    /// bad config (exit code 1) rather than running with an empty
    /// snapshot.
    pub async fn load_initial(&self) -> Result<(), ConfigStoreError> {
        let sources = match &self.backend {
            Backend::FileSet { dir } => file_loader::load_dir(dir).await?,
            Backend::Cluster { client, namespace } => {
                kube_loader::list_all(client, namespace).await?
            }
        };
        self.publish(sources)
    }

    fn publish(&self, sources: Vec<SourceConfig>) -> Result<(), ConfigStoreError> {
        let next_version = self.snapshot.load().version + 1;
        let snapshot = SourceConfigSnapshot::from_sources(next_version, sources)?;
        self.snapshot.store(Arc::new(snapshot));
        let _ = self.changed_tx.try_send(SnapshotChanged { version: next_version });
        Ok(())
    }

    /// Run the backend's watch loop until cancelled. Every detected change
    /// re-reads the full source set, validates it, and publishes a new
    /// snapshot only if validation passes — a single bad record never
    /// tears down an otherwise-good snapshot.
    pub async fn run(&self, cancel: tokio_util::sync::CancellationToken) {
        let result = match &self.backend {
            Backend::FileSet { dir } => file_loader::watch(dir, cancel, |sources| self.publish(sources)).await,
            Backend::Cluster { client, namespace } => {
                kube_loader::watch(client, namespace, cancel, |sources| self.publish(sources)).await
            }
        };
        if let Err(e) = result {
            tracing::error!(error = %e, "config store watch loop exited");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zen_common::{Binding, DedupConfig, NormalizationMap, ProcessingHint, Retention};

    fn sample_source(name: &str) -> SourceConfig {
        SourceConfig {
            name: name.to_string(),
            binding: Binding::Webhook {
                path: "/hooks/x".to_string(),
                required_headers: None,
                auth: None,
            },
            filter_rules: vec![],
            dedup: DedupConfig {
                window_seconds: 60,
                key_fields: vec!["summary".to_string()],
                max_entries: 1000,
            },
            normalization: NormalizationMap {
                domain: "d".to_string(),
                type_: "t".to_string(),
                field_map: HashMap::new(),
                severity_map: HashMap::new(),
                priority_map: HashMap::new(),
            },
            processing_hint: ProcessingHint::Auto,
            retention: Retention {
                max_age_seconds: 3600,
                max_per_source: 1000,
            },
            version: 0,
        }
    }

    #[test]
    fn snapshot_stamps_version_onto_every_source() {
        let snap = SourceConfigSnapshot::from_sources(7, vec![sample_source("a"), sample_source("b")]).unwrap();
        assert_eq!(snap.version, 7);
        assert_eq!(snap.sources["a"].version, 7);
        assert_eq!(snap.sources["b"].version, 7);
    }

    #[test]
    fn duplicate_source_names_are_rejected() {
        let err = SourceConfigSnapshot::from_sources(1, vec![sample_source("a"), sample_source("a")]).unwrap_err();
        assert!(matches!(err, ConfigStoreError::DuplicateName(_)));
    }

    #[tokio::test]
    async fn publish_increments_version_and_notifies_subscribers() {
        let store = ConfigStore::new(Backend::FileSet {
            dir: std::path::PathBuf::from("/nonexistent"),
        });
        let mut rx = store.subscribe().await.unwrap();
        store.publish(vec![sample_source("a")]).unwrap();
        let notice = rx.recv().await.unwrap();
        assert_eq!(notice.version, 1);
        assert_eq!(store.snapshot().version, 1);
    }
}
