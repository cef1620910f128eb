//! Strategy Selector / Adaptive Reorderer: per-source decision of
//! whether the Pipeline Processor runs filter-then-dedup or
//! dedup-then-filter, chosen by a rolling-window cost model with
//! hysteresis so the order doesn't flap under noisy telemetry.
//!
//! Grounded on `rootsignal-scout-supervisor::budget` and
//! `rootsignal-scout-supervisor::feedback::source_penalty` — both fold a
//! rolling window of per-source outcomes into a decision that persists
//! across many intervals rather than reacting to a single sample.

pub mod telemetry;

use std::time::{Duration, Instant};

use zen_common::ProcessingHint;

pub use telemetry::{SourceTelemetry, TelemetryWindow};

const MIN_QUALIFYING_INTERVALS: u32 = 3;
const MIN_COST_ADVANTAGE: f64 = 0.15;
const MIN_SWITCH_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOrder {
    FilterFirst,
    DedupFirst,
}

impl PipelineOrder {
    fn other(self) -> PipelineOrder {
        match self {
            PipelineOrder::FilterFirst => PipelineOrder::DedupFirst,
            PipelineOrder::DedupFirst => PipelineOrder::FilterFirst,
        }
    }
}

/// Emitted when the selector commits to a new order; the Pipeline Processor
/// logs it and updates the order it uses for subsequent events.
#[derive(Debug, Clone, Copy)]
pub struct StrategyChange {
    pub from: PipelineOrder,
    pub to: PipelineOrder,
    pub cost_advantage: f64,
}

/// Estimated per-event cost, in seconds, of running the pipeline in each
/// order, given a telemetry snapshot. Filter-first only pays the dedup
/// cost on events the filter admitted; dedup-first pays dedup on every
/// event but only pays filter + downstream on events dedup didn't catch.
fn cost_filter_first(t: &SourceTelemetry) -> f64 {
    let downstream = t.cost_normalize_secs + t.cost_persist_secs;
    let after_dedup = t.dedup_hit_rate_given_filter_pass * t.cost_normalize_secs
        + (1.0 - t.dedup_hit_rate_given_filter_pass) * downstream;
    t.events_per_second * (t.cost_filter_secs + t.filter_pass_rate * (t.cost_dedup_secs + after_dedup))
}

fn cost_dedup_first(t: &SourceTelemetry) -> f64 {
    let downstream = t.cost_normalize_secs + t.cost_persist_secs;
    let after_filter = t.filter_pass_rate * downstream;
    t.events_per_second
        * (t.cost_dedup_secs + (1.0 - t.dedup_hit_rate_unconditional) * (t.cost_filter_secs + after_filter))
}

fn cost_of(order: PipelineOrder, t: &SourceTelemetry) -> f64 {
    match order {
        PipelineOrder::FilterFirst => cost_filter_first(t),
        PipelineOrder::DedupFirst => cost_dedup_first(t),
    }
}

struct Candidate {
    order: PipelineOrder,
    consecutive_intervals: u32,
}

/// One selector per source. `evaluate` is called on every 5s telemetry
/// tick; it is pure bookkeeping plus the cost comparison, so it's cheap
/// enough to run for every configured source on every tick.
pub struct StrategySelector {
    hint: ProcessingHint,
    current: PipelineOrder,
    candidate: Option<Candidate>,
    last_switch: Option<Instant>,
}

impl StrategySelector {
    pub fn new(hint: ProcessingHint) -> Self {
        let current = match hint {
            ProcessingHint::FilterFirst => PipelineOrder::FilterFirst,
            ProcessingHint::DedupFirst => PipelineOrder::DedupFirst,
            ProcessingHint::Auto => PipelineOrder::FilterFirst,
        };
        Self {
            hint,
            current,
            candidate: None,
            last_switch: None,
        }
    }

    pub fn current(&self) -> PipelineOrder {
        self.current
    }

    /// Evaluate one telemetry tick against the current order. Returns
    /// `Some(StrategyChange)` only on the tick where a switch commits.
    pub fn evaluate(&mut self, telemetry: &SourceTelemetry, now: Instant) -> Option<StrategyChange> {
        if self.hint != ProcessingHint::Auto {
            return None;
        }

        let current_cost = cost_of(self.current, telemetry);
        let other_cost = cost_of(self.current.other(), telemetry);

        if current_cost <= 0.0 && other_cost <= 0.0 {
            self.candidate = None;
            return None;
        }

        let cheaper = if other_cost < current_cost {
            self.current.other()
        } else {
            self.current
        };

        if cheaper == self.current {
            self.candidate = None;
            return None;
        }

        let expensive = current_cost.max(other_cost);
        let advantage = if expensive > 0.0 {
            (expensive - current_cost.min(other_cost)) / expensive
        } else {
            0.0
        };

        if advantage < MIN_COST_ADVANTAGE {
            self.candidate = None;
            return None;
        }

        let intervals = match &mut self.candidate {
            Some(c) if c.order == cheaper => {
                c.consecutive_intervals += 1;
                c.consecutive_intervals
            }
            _ => {
                self.candidate = Some(Candidate {
                    order: cheaper,
                    consecutive_intervals: 1,
                });
                1
            }
        };

        if intervals < MIN_QUALIFYING_INTERVALS {
            return None;
        }

        if let Some(last) = self.last_switch {
            if now.duration_since(last) < MIN_SWITCH_INTERVAL {
                return None;
            }
        }

        let from = self.current;
        self.current = cheaper;
        self.last_switch = Some(now);
        self.candidate = None;

        Some(StrategyChange {
            from,
            to: cheaper,
            cost_advantage: advantage,
        })
    }
}
