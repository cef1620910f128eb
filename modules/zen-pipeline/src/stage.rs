//! The per-event stage sequence: filter, dedup, normalize, persist,
//! run in whichever order the Strategy Selector currently prefers.
//!
//! Grounded on `rootsignal-scout::pipeline::{state, traits}`'s handler
//! shape — a bundle of immutable deps (here `CompiledSource` + `Persist`)
//! threaded through a sequence of pure-ish steps, generalized from a fixed
//! extract → dedup → create handler chain to a selector-chosen order.

use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::warn;
use zen_common::RawEvent;
use zen_dedup::{CheckResult, Deduper};
use zen_normalize::NormalizeError;
use zen_strategy::{PipelineOrder, TelemetryWindow};

use crate::rate_limit::RateLimitedWarn;
use crate::{CompiledSource, Persist, PersistError};

const PERSIST_BACKOFF_BASE: Duration = Duration::from_millis(250);
const PERSIST_BACKOFF_CAP: Duration = Duration::from_secs(10);
const PERSIST_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    FilteredOut,
    Deduplicated { occurrence_count: Option<u64> },
    Persisted,
    NormalizeFailed,
    PersistFailed,
}

/// Runs a single event end to end under `order`, recording per-stage
/// telemetry and applying the failure semantics. `fingerprint` is
/// always computed upfront from raw fields (the equivalence invariant),
/// so both orders see identical dedup identity for the same event.
pub async fn process_one<P: Persist + ?Sized>(
    event: &RawEvent,
    fingerprint: &str,
    order: PipelineOrder,
    compiled: &CompiledSource,
    deduper: &Deduper,
    persist: &P,
    telemetry: &TelemetryWindow,
    warn_gate: &RateLimitedWarn,
) -> Outcome {
    match order {
        PipelineOrder::FilterFirst => {
            process_filter_first(event, fingerprint, compiled, deduper, persist, telemetry, warn_gate).await
        }
        PipelineOrder::DedupFirst => {
            process_dedup_first(event, fingerprint, compiled, deduper, persist, telemetry, warn_gate).await
        }
    }
}

async fn process_filter_first<P: Persist + ?Sized>(
    event: &RawEvent,
    fingerprint: &str,
    compiled: &CompiledSource,
    deduper: &Deduper,
    persist: &P,
    telemetry: &TelemetryWindow,
    warn_gate: &RateLimitedWarn,
) -> Outcome {
    let t0 = Instant::now();
    let verdict = zen_filter::evaluate(event, &compiled.filter);
    let filter_cost_ns = t0.elapsed().as_nanos() as u64;

    if !verdict.is_admit() {
        // Tie-break: deny wins over a would-be dedup hit — the event is
        // never counted as a duplicate when filter_first denies it.
        telemetry.record_filter(false, None, filter_cost_ns);
        return Outcome::FilteredOut;
    }

    let now = Utc::now();
    let t1 = Instant::now();
    let dedup_result = deduper.check(fingerprint, now);
    let dedup_cost_ns = t1.elapsed().as_nanos() as u64;
    let hit = matches!(dedup_result, CheckResult::Duplicate { .. });

    telemetry.record_filter(true, Some(hit), filter_cost_ns);
    telemetry.record_dedup_unconditional(hit, dedup_cost_ns);

    match dedup_result {
        CheckResult::Duplicate { occurrence_count, .. } => {
            touch_duplicate(event, fingerprint, compiled, persist, telemetry).await;
            Outcome::Deduplicated {
                occurrence_count: Some(occurrence_count),
            }
        }
        CheckResult::FirstSeen => normalize_and_persist(event, fingerprint, compiled, persist, telemetry, warn_gate).await,
    }
}

async fn process_dedup_first<P: Persist + ?Sized>(
    event: &RawEvent,
    fingerprint: &str,
    compiled: &CompiledSource,
    deduper: &Deduper,
    persist: &P,
    telemetry: &TelemetryWindow,
    warn_gate: &RateLimitedWarn,
) -> Outcome {
    let now = Utc::now();
    let t0 = Instant::now();
    let dedup_result = deduper.check(fingerprint, now);
    let dedup_cost_ns = t0.elapsed().as_nanos() as u64;
    let hit = matches!(dedup_result, CheckResult::Duplicate { .. });
    telemetry.record_dedup_unconditional(hit, dedup_cost_ns);

    if let CheckResult::Duplicate { occurrence_count, .. } = dedup_result {
        // Deliberate asymmetry: dedup_first never re-runs the
        // filter for an already-counted duplicate, even though that
        // duplicate's *first* instance may originally have failed the
        // filter. The occurrence-count update always stands — this is
        // exactly the cost the Strategy Selector is weighing against
        // filter_first's cheaper dedup-skip-on-deny behavior.
        touch_duplicate(event, fingerprint, compiled, persist, telemetry).await;
        return Outcome::Deduplicated {
            occurrence_count: Some(occurrence_count),
        };
    }

    let t1 = Instant::now();
    let verdict = zen_filter::evaluate(event, &compiled.filter);
    let filter_cost_ns = t1.elapsed().as_nanos() as u64;
    telemetry.record_filter(verdict.is_admit(), None, filter_cost_ns);

    if !verdict.is_admit() {
        return Outcome::FilteredOut;
    }

    normalize_and_persist(event, fingerprint, compiled, persist, telemetry, warn_gate).await
}

async fn touch_duplicate<P: Persist + ?Sized>(
    event: &RawEvent,
    fingerprint: &str,
    compiled: &CompiledSource,
    persist: &P,
    telemetry: &TelemetryWindow,
) {
    let t0 = Instant::now();
    let result = persist
        .touch_duplicate(&event.source_name, fingerprint, &compiled.namespace, Utc::now())
        .await;
    telemetry.record_persist(t0.elapsed().as_nanos() as u64);
    if let Err(e) = result {
        warn!(source = %event.source_name, error = %e, "duplicate touch-update failed");
    }
}

async fn normalize_and_persist<P: Persist + ?Sized>(
    event: &RawEvent,
    fingerprint: &str,
    compiled: &CompiledSource,
    persist: &P,
    telemetry: &TelemetryWindow,
    warn_gate: &RateLimitedWarn,
) -> Outcome {
    let t0 = Instant::now();
    let draft = zen_normalize::normalize(event, &compiled.normalization, fingerprint.to_string());
    telemetry.record_normalize(t0.elapsed().as_nanos() as u64);

    let draft = match draft {
        Ok(d) => d,
        Err(NormalizeError::MissingField(field)) => {
            warn!(source = %event.source_name, field, "dropping event: normalize_error");
            return Outcome::NormalizeFailed;
        }
    };

    let mut attempt = 0u32;
    let mut backoff = PERSIST_BACKOFF_BASE;
    loop {
        attempt += 1;
        let t1 = Instant::now();
        let result = persist.create(draft.clone(), &compiled.namespace).await;
        telemetry.record_persist(t1.elapsed().as_nanos() as u64);

        match result {
            Ok(()) => return Outcome::Persisted,
            Err(PersistError::Rejected(reason)) => {
                if warn_gate.should_log() {
                    warn!(source = %event.source_name, reason, "dropping event: persist_error");
                }
                return Outcome::PersistFailed;
            }
            Err(PersistError::Transient(reason)) if attempt < PERSIST_MAX_ATTEMPTS => {
                tracing::debug!(source = %event.source_name, attempt, reason, "persist transient error, retrying");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(PERSIST_BACKOFF_CAP);
            }
            Err(PersistError::Transient(reason)) => {
                if warn_gate.should_log() {
                    warn!(source = %event.source_name, reason, attempts = attempt, "dropping event: persist_error (retries exhausted)");
                }
                return Outcome::PersistFailed;
            }
        }
    }
}
