//! Discovery & Resource Resolver: maps a declared `(group, version,
//! kind)` triple to the canonical `(group, version, resource)` needed to
//! address the cluster API, via a memoized cluster-discovery query.
//!
//! Grounded on `rootsignal-graph::cache::SignalCache` — a load-and-swap
//! in-memory cache — generalized from "whole-graph reload" to a per-key
//! read-through cache with TTL and invalidate-on-error.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use kube::discovery::Discovery;
use kube::Client;
use thiserror::Error;
use tracing::{debug, warn};

use zen_common::Gvk;
pub use zen_common::ResolvedResource;

const DEFAULT_TTL: Duration = Duration::from_secs(600);
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("resource not found for {0:?}")]
    NotFound(Gvk),
    #[error("transient discovery error for {gvk:?}: {reason}")]
    Transient { gvk: Gvk, reason: String },
}

#[derive(Clone)]
struct CacheEntry {
    resource: ResolvedResource,
    resolved_at: Instant,
}

/// Memoized discovery client. Cheap to clone — shares the underlying cache.
#[derive(Clone)]
pub struct Resolver {
    client: Client,
    cache: Arc<ArcSwap<HashMap<Gvk, CacheEntry>>>,
    ttl: Duration,
}

impl Resolver {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            cache: Arc::new(ArcSwap::from_pointee(HashMap::new())),
            ttl: DEFAULT_TTL,
        }
    }

    pub fn with_ttl(client: Client, ttl: Duration) -> Self {
        Self {
            client,
            cache: Arc::new(ArcSwap::from_pointee(HashMap::new())),
            ttl,
        }
    }

    /// Resolve `gvk`, serving from the memoized cache when fresh. Single
    /// attempt — callers (informer startup, periodic-list startup) are
    /// responsible for retrying `ErrTransient` with their own backoff.
    /// `ErrNotFound` is fatal for the affected source.
    pub async fn resolve(&self, gvk: &Gvk) -> Result<ResolvedResource, DiscoveryError> {
        if let Some(entry) = self.cache.load().get(gvk) {
            if entry.resolved_at.elapsed() < self.ttl {
                debug!(?gvk, "discovery cache hit");
                return Ok(entry.resource.clone());
            }
        }
        self.resolve_uncached(gvk).await
    }

    /// Convenience wrapper implementing the base-1s/cap-30s exponential
    /// backoff contract in-process, for callers that don't want to own the
    /// retry loop themselves.
    pub async fn resolve_with_backoff(&self, gvk: &Gvk) -> Result<ResolvedResource, DiscoveryError> {
        let mut delay = BACKOFF_BASE;
        loop {
            match self.resolve(gvk).await {
                Ok(resource) => return Ok(resource),
                Err(DiscoveryError::NotFound(g)) => return Err(DiscoveryError::NotFound(g)),
                Err(err @ DiscoveryError::Transient { .. }) => {
                    warn!(?gvk, delay_ms = delay.as_millis() as u64, "discovery transient error, retrying");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(BACKOFF_CAP);
                    let _ = &err;
                }
            }
        }
    }

    async fn resolve_uncached(&self, gvk: &Gvk) -> Result<ResolvedResource, DiscoveryError> {
        let discovery = Discovery::new(self.client.clone())
            .run()
            .await
            .map_err(|e| DiscoveryError::Transient {
                gvk: gvk.clone(),
                reason: e.to_string(),
            })?;

        for group in discovery.groups() {
            if group.name() != gvk.group {
                continue;
            }
            for (ar, caps) in group.recommended_resources() {
                if ar.version == gvk.version && ar.kind == gvk.kind {
                    let resolved = ResolvedResource {
                        group: ar.group.clone(),
                        version: ar.version.clone(),
                        resource: ar.plural.clone(),
                        namespaced: caps.scope == kube::discovery::Scope::Namespaced,
                    };
                    self.insert(gvk.clone(), resolved.clone());
                    return Ok(resolved);
                }
            }
        }

        // Fall back to the direct GVK resolver, which also covers the core
        // (empty-group) API that isn't always walked the same way above.
        let core_gvk = kube::core::GroupVersionKind {
            group: gvk.group.clone(),
            version: gvk.version.clone(),
            kind: gvk.kind.clone(),
        };
        if let Some((ar, caps)) = discovery.resolve_gvk(&core_gvk) {
            let resolved = ResolvedResource {
                group: ar.group.clone(),
                version: ar.version.clone(),
                resource: ar.plural.clone(),
                namespaced: caps.scope == kube::discovery::Scope::Namespaced,
            };
            self.insert(gvk.clone(), resolved.clone());
            return Ok(resolved);
        }

        // Invalidate any stale entry for this GVK — a NotFound means the
        // resource genuinely isn't there (CRD uninstalled, typo'd kind),
        // so a stale cache hit would be worse than a miss.
        self.invalidate(gvk);
        Err(DiscoveryError::NotFound(gvk.clone()))
    }

    fn insert(&self, gvk: Gvk, resource: ResolvedResource) {
        let mut next = (**self.cache.load()).clone();
        next.insert(
            gvk,
            CacheEntry {
                resource,
                resolved_at: Instant::now(),
            },
        );
        self.cache.store(Arc::new(next));
    }

    fn invalidate(&self, gvk: &Gvk) {
        let mut next = (**self.cache.load()).clone();
        next.remove(gvk);
        self.cache.store(Arc::new(next));
    }
}
