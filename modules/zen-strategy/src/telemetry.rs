//! Rolling 60s telemetry windows per source, fed by the Pipeline Processor
//! and read by the Strategy Selector. Implemented as 12 buckets of 5s each
//! so a single evaluation tick both rotates the window and yields the
//! rates the cost model needs — no back-reference from telemetry to the
//! selector (the selector is a pull-based reader, never held by value).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

const BUCKET_COUNT: usize = 12;

#[derive(Debug, Default, Clone, Copy)]
struct Bucket {
    events: u64,
    filter_total: u64,
    filter_pass: u64,
    dedup_total_unconditional: u64,
    dedup_hit_unconditional: u64,
    dedup_total_given_pass: u64,
    dedup_hit_given_pass: u64,
    cost_filter_ns: u64,
    cost_dedup_ns: u64,
    cost_normalize_ns: u64,
    cost_persist_ns: u64,
    stage_samples: u64,
}

/// Atomic per-tick accumulators; cheap to update from pipeline workers.
#[derive(Default)]
struct Current {
    events: AtomicU64,
    filter_total: AtomicU64,
    filter_pass: AtomicU64,
    dedup_total_unconditional: AtomicU64,
    dedup_hit_unconditional: AtomicU64,
    dedup_total_given_pass: AtomicU64,
    dedup_hit_given_pass: AtomicU64,
    cost_filter_ns: AtomicU64,
    cost_dedup_ns: AtomicU64,
    cost_normalize_ns: AtomicU64,
    cost_persist_ns: AtomicU64,
    stage_samples: AtomicU64,
}

impl Current {
    fn drain_to_bucket(&self) -> Bucket {
        Bucket {
            events: self.events.swap(0, Ordering::Relaxed),
            filter_total: self.filter_total.swap(0, Ordering::Relaxed),
            filter_pass: self.filter_pass.swap(0, Ordering::Relaxed),
            dedup_total_unconditional: self.dedup_total_unconditional.swap(0, Ordering::Relaxed),
            dedup_hit_unconditional: self.dedup_hit_unconditional.swap(0, Ordering::Relaxed),
            dedup_total_given_pass: self.dedup_total_given_pass.swap(0, Ordering::Relaxed),
            dedup_hit_given_pass: self.dedup_hit_given_pass.swap(0, Ordering::Relaxed),
            cost_filter_ns: self.cost_filter_ns.swap(0, Ordering::Relaxed),
            cost_dedup_ns: self.cost_dedup_ns.swap(0, Ordering::Relaxed),
            cost_normalize_ns: self.cost_normalize_ns.swap(0, Ordering::Relaxed),
            cost_persist_ns: self.cost_persist_ns.swap(0, Ordering::Relaxed),
            stage_samples: self.stage_samples.swap(0, Ordering::Relaxed),
        }
    }
}

pub struct TelemetryWindow {
    current: Current,
    buckets: Mutex<VecDeque<Bucket>>,
}

/// Snapshot consumed by the Strategy Selector's cost model.
#[derive(Debug, Clone, Copy)]
pub struct SourceTelemetry {
    pub events_per_second: f64,
    pub filter_pass_rate: f64,
    pub dedup_hit_rate_unconditional: f64,
    pub dedup_hit_rate_given_filter_pass: f64,
    pub cost_filter_secs: f64,
    pub cost_dedup_secs: f64,
    pub cost_normalize_secs: f64,
    pub cost_persist_secs: f64,
}

impl TelemetryWindow {
    pub fn new() -> Self {
        Self {
            current: Current::default(),
            buckets: Mutex::new(VecDeque::with_capacity(BUCKET_COUNT)),
        }
    }

    pub fn record_filter(&self, admitted: bool, dedup_would_hit_given_pass: Option<bool>, cost_ns: u64) {
        self.current.events.fetch_add(1, Ordering::Relaxed);
        self.current.filter_total.fetch_add(1, Ordering::Relaxed);
        if admitted {
            self.current.filter_pass.fetch_add(1, Ordering::Relaxed);
        }
        self.current.cost_filter_ns.fetch_add(cost_ns, Ordering::Relaxed);
        if let Some(hit) = dedup_would_hit_given_pass {
            self.current.dedup_total_given_pass.fetch_add(1, Ordering::Relaxed);
            if hit {
                self.current.dedup_hit_given_pass.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn record_dedup_unconditional(&self, hit: bool, cost_ns: u64) {
        self.current.dedup_total_unconditional.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.current.dedup_hit_unconditional.fetch_add(1, Ordering::Relaxed);
        }
        self.current.cost_dedup_ns.fetch_add(cost_ns, Ordering::Relaxed);
    }

    pub fn record_normalize(&self, cost_ns: u64) {
        self.current.cost_normalize_ns.fetch_add(cost_ns, Ordering::Relaxed);
        self.current.stage_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persist(&self, cost_ns: u64) {
        self.current.cost_persist_ns.fetch_add(cost_ns, Ordering::Relaxed);
    }

    /// Rotate the current 5s accumulator into the 60s ring and return a
    /// snapshot over the full window. Called by the 5s evaluation tick.
    pub fn tick(&self) -> SourceTelemetry {
        let bucket = self.current.drain_to_bucket();
        let mut buckets = self.buckets.lock().expect("telemetry mutex poisoned");
        buckets.push_back(bucket);
        while buckets.len() > BUCKET_COUNT {
            buckets.pop_front();
        }

        let mut events = 0u64;
        let mut filter_total = 0u64;
        let mut filter_pass = 0u64;
        let mut dedup_total_u = 0u64;
        let mut dedup_hit_u = 0u64;
        let mut dedup_total_gp = 0u64;
        let mut dedup_hit_gp = 0u64;
        let mut cost_filter = 0u64;
        let mut cost_dedup = 0u64;
        let mut cost_normalize = 0u64;
        let mut cost_persist = 0u64;
        let mut stage_samples = 0u64;

        for b in buckets.iter() {
            events += b.events;
            filter_total += b.filter_total;
            filter_pass += b.filter_pass;
            dedup_total_u += b.dedup_total_unconditional;
            dedup_hit_u += b.dedup_hit_unconditional;
            dedup_total_gp += b.dedup_total_given_pass;
            dedup_hit_gp += b.dedup_hit_given_pass;
            cost_filter += b.cost_filter_ns;
            cost_dedup += b.cost_dedup_ns;
            cost_normalize += b.cost_normalize_ns;
            cost_persist += b.cost_persist_ns;
            stage_samples += b.stage_samples;
        }

        let window_secs = (buckets.len() as f64 * 5.0).max(5.0);
        let ratio = |num: u64, den: u64| if den == 0 { 0.0 } else { num as f64 / den as f64 };

        SourceTelemetry {
            events_per_second: events as f64 / window_secs,
            filter_pass_rate: ratio(filter_pass, filter_total),
            dedup_hit_rate_unconditional: ratio(dedup_hit_u, dedup_total_u),
            dedup_hit_rate_given_filter_pass: ratio(dedup_hit_gp, dedup_total_gp),
            cost_filter_secs: ratio(cost_filter, filter_total) / 1e9,
            cost_dedup_secs: ratio(cost_dedup, dedup_total_u.max(dedup_total_gp)) / 1e9,
            cost_normalize_secs: ratio(cost_normalize, stage_samples) / 1e9,
            cost_persist_secs: ratio(cost_persist, stage_samples) / 1e9,
        }
    }
}

impl Default for TelemetryWindow {
    fn default() -> Self {
        Self::new()
    }
}
