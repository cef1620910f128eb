//! Deduplicator: content-addressed sliding-window store. One deduper
//! per source; safe for parallel callers within that source's processor.
//!
//! Grounded on `rootsignal-scout::pipeline::handlers::dedup` (layered dedup
//! verdicts against stored state) and `rootsignal_common::content_hash` for
//! the fingerprint primitive; sharding is enrichment from the wider pack's
//! use of `dashmap`-style sharded maps (`Lowband21-ferrex`,
//! `hlieu5402-collab-spark2026`), since the precedent's own dedup state
//! lives in Postgres and never needed an in-process sharded structure.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use lru::LruCache;
use zen_common::DedupEntry;

const SHARD_COUNT: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckResult {
    FirstSeen,
    Duplicate {
        first_seen: DateTime<Utc>,
        occurrence_count: u64,
    },
}

struct Shard {
    cache: Mutex<LruCache<String, DedupEntry>>,
}

/// Sliding-window, content-addressed dedup cache. Memory is bounded by
/// `max_entries` across all shards (invariant: never exceeded); entries
/// older than `window` are expired on access and by the periodic sweeper.
pub struct Deduper {
    shards: Vec<Shard>,
    window: ChronoDuration,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl Deduper {
    pub fn new(window_seconds: u64, max_entries: usize) -> Self {
        let per_shard = (max_entries / SHARD_COUNT).max(1);
        let capacity = NonZeroUsize::new(per_shard).unwrap();
        let shards = (0..SHARD_COUNT)
            .map(|_| Shard {
                cache: Mutex::new(LruCache::new(capacity)),
            })
            .collect();
        Self {
            shards,
            window: ChronoDuration::seconds(window_seconds.max(1) as i64),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    fn shard_for(&self, fingerprint: &str) -> &Shard {
        // First 8 hex chars of the fingerprint (already a SHA-256 hex
        // digest) give ample spread for shard selection.
        let prefix = &fingerprint[..fingerprint.len().min(8)];
        let idx = u32::from_str_radix(prefix, 16).unwrap_or(0) as usize % SHARD_COUNT;
        &self.shards[idx]
    }

    /// Check whether `fingerprint` has been seen within the window. The
    /// first call for a fingerprint (or the first call after its prior
    /// entry expired) returns `FirstSeen`; every call within the window
    /// after that returns `Duplicate` with the updated occurrence count.
    pub fn check(&self, fingerprint: &str, now: DateTime<Utc>) -> CheckResult {
        let shard = self.shard_for(fingerprint);
        let mut cache = shard.cache.lock().expect("dedup shard mutex poisoned");

        if let Some(entry) = cache.get_mut(fingerprint) {
            if entry.expires_at > now {
                entry.last_seen = now;
                entry.occurrence_count += 1;
                entry.expires_at = now + self.window;
                return CheckResult::Duplicate {
                    first_seen: entry.first_seen,
                    occurrence_count: entry.occurrence_count,
                };
            }
            // Expired — falls through to re-admit as FirstSeen below.
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }

        let entry = DedupEntry {
            fingerprint: fingerprint.to_string(),
            first_seen: now,
            last_seen: now,
            occurrence_count: 1,
            expires_at: now + self.window,
        };
        let len_before = cache.len();
        cache.put(fingerprint.to_string(), entry);
        // `put` on a fresh key evicts the LRU tail once the shard is at
        // capacity; a same-key `put` (the get_mut-missed / put-hit expiry
        // race) never grows `len`, so the capacity check below only counts
        // genuine overflow evictions.
        if len_before == cache.cap().get() && cache.len() == cache.cap().get() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        CheckResult::FirstSeen
    }

    /// Remove every expired entry. Called by the periodic sweeper (every
    /// 10s) and safe to call opportunistically elsewhere.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut cache = shard.cache.lock().expect("dedup shard mutex poisoned");
            let expired_keys: Vec<String> = cache
                .iter()
                .filter(|(_, entry)| entry.expires_at <= now)
                .map(|(k, _)| k.clone())
                .collect();
            for key in expired_keys {
                cache.pop(&key);
                removed += 1;
            }
        }
        if removed > 0 {
            self.expirations.fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    /// Spawn the periodic sweeper task (every 10s). Returns a handle the
    /// caller can abort on shutdown.
    pub fn spawn_sweeper(self: std::sync::Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(10));
            loop {
                interval.tick().await;
                let removed = self.sweep(Utc::now());
                if removed > 0 {
                    tracing::debug!(removed, "dedup sweeper expired entries");
                }
            }
        })
    }

    pub fn total_entries(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.cache.lock().expect("dedup shard mutex poisoned").len())
            .sum()
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_call_is_first_seen_subsequent_are_duplicates() {
        let deduper = Deduper::new(60, 1000);
        let now = Utc::now();
        assert_eq!(deduper.check("abc123", now), CheckResult::FirstSeen);
        assert_eq!(
            deduper.check("abc123", now + ChronoDuration::seconds(1)),
            CheckResult::Duplicate {
                first_seen: now,
                occurrence_count: 2
            }
        );
        assert_eq!(
            deduper.check("abc123", now + ChronoDuration::seconds(2)),
            CheckResult::Duplicate {
                first_seen: now,
                occurrence_count: 3
            }
        );
    }

    #[test]
    fn entries_older_than_window_are_readmitted() {
        let deduper = Deduper::new(1, 1000);
        let now = Utc::now();
        assert_eq!(deduper.check("fp", now), CheckResult::FirstSeen);
        let later = now + ChronoDuration::seconds(3);
        assert_eq!(deduper.check("fp", later), CheckResult::FirstSeen);
    }

    #[test]
    fn cache_never_exceeds_max_entries() {
        let deduper = Deduper::new(3600, 32);
        let now = Utc::now();
        for i in 0..1000 {
            let fp = format!("{:064x}", i);
            deduper.check(&fp, now);
        }
        assert!(deduper.total_entries() <= 32);
        assert!(deduper.evictions() > 0);
    }

    #[test]
    fn sweep_removes_expired_entries() {
        let deduper = Deduper::new(1, 1000);
        let now = Utc::now();
        deduper.check("fp1", now);
        deduper.check("fp2", now);
        let removed = deduper.sweep(now + ChronoDuration::seconds(5));
        assert_eq!(removed, 2);
        assert_eq!(deduper.total_entries(), 0);
    }

    proptest::proptest! {
        #[test]
        fn occurrence_count_equals_number_of_admissions(n in 1u32..50) {
            let deduper = Deduper::new(3600, 1000);
            let now = Utc::now();
            let mut last = CheckResult::FirstSeen;
            for i in 0..n {
                last = deduper.check("stable-fp", now + ChronoDuration::seconds(i as i64));
            }
            match last {
                CheckResult::FirstSeen => prop_assert_eq!(n, 1),
                CheckResult::Duplicate { occurrence_count, .. } => {
                    prop_assert_eq!(occurrence_count as u32, n);
                }
            }
        }
    }
}
