//! End-to-end scenario tests exercising the full ingest -> filter -> dedup ->
//! normalize -> persist path through a real `zen_pipeline::Processor`, with
//! only the cluster-facing `Persist` boundary swapped for an in-memory
//! recorder. Complements the per-stage unit tests colocated in each crate.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use zen_common::{DedupConfig, FilterRule, NormalizationMap, ObservationDraft, Operator, ProcessingHint, RawEvent, Severity};
use zen_pipeline::{CompiledSource, Persist, PersistError, Processor};

struct Record {
    draft: ObservationDraft,
    occurrence_count: u64,
    first_seen_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
}

#[derive(Default)]
struct RecordingPersist {
    records: Mutex<HashMap<String, Record>>,
}

#[async_trait]
impl Persist for RecordingPersist {
    async fn create(&self, draft: ObservationDraft, _namespace: &str) -> Result<(), PersistError> {
        let now = Utc::now();
        let mut records = self.records.lock().unwrap();
        records.insert(
            draft.fingerprint.clone(),
            Record {
                draft,
                occurrence_count: 1,
                first_seen_at: now,
                last_seen_at: now,
            },
        );
        Ok(())
    }

    async fn touch_duplicate(
        &self,
        _source: &str,
        fingerprint: &str,
        _namespace: &str,
        now: DateTime<Utc>,
    ) -> Result<(), PersistError> {
        let mut records = self.records.lock().unwrap();
        if let Some(record) = records.get_mut(fingerprint) {
            record.occurrence_count += 1;
            record.last_seen_at = now;
        }
        Ok(())
    }
}

async fn run_events(
    compiled: CompiledSource,
    dedup: DedupConfig,
    hint: ProcessingHint,
    events: Vec<RawEvent>,
) -> Arc<RecordingPersist> {
    let persist = Arc::new(RecordingPersist::default());
    let processor = Arc::new(Processor::new(compiled, &dedup, persist.clone(), hint).with_pool_size(1));
    let (tx, rx) = mpsc::channel(events.len().max(1));
    for event in events {
        tx.send(event).await.unwrap();
    }
    drop(tx);
    processor.run(rx, CancellationToken::new()).await;
    persist
}

fn summary_only_map(domain: &str, type_: &str) -> NormalizationMap {
    let mut field_map = HashMap::new();
    field_map.insert("summary".to_string(), "message".to_string());
    NormalizationMap {
        domain: domain.to_string(),
        type_: type_.to_string(),
        field_map,
        severity_map: HashMap::new(),
        priority_map: HashMap::new(),
    }
}

/// Scenario 1: single informer source, 100 unique adds, all admitted,
/// `priority_map: {HIGH: 0.8}`. Expected: 100 records, each with
/// `severity=HIGH, priority=0.8, occurrence_count=1`.
#[tokio::test]
async fn single_informer_source_100_unique_adds_are_each_persisted_once() {
    let mut field_map = HashMap::new();
    field_map.insert("summary".to_string(), "message".to_string());
    field_map.insert("severity".to_string(), "level".to_string());
    let mut severity_map = HashMap::new();
    severity_map.insert("high".to_string(), Severity::High);
    let mut priority_map = HashMap::new();
    priority_map.insert("HIGH".to_string(), 0.8);
    let norm = NormalizationMap {
        domain: "k8s".to_string(),
        type_: "event".to_string(),
        field_map,
        severity_map,
        priority_map,
    };
    let dedup = DedupConfig {
        window_seconds: 3600,
        key_fields: vec!["id".to_string()],
        max_entries: 1000,
    };
    let compiled = CompiledSource::compile(1, "k8s-events", "zen-system", &[], &dedup, norm).unwrap();

    let events: Vec<RawEvent> = (0..100)
        .map(|i| RawEvent::new("k8s-events", json!({"message": "event", "level": "high", "id": i}), 1))
        .collect();

    let persist = run_events(compiled, dedup, ProcessingHint::FilterFirst, events).await;
    let records = persist.records.lock().unwrap();
    assert_eq!(records.len(), 100);
    for record in records.values() {
        assert_eq!(record.occurrence_count, 1);
        assert_eq!(record.draft.severity, Severity::High);
        assert_eq!(record.draft.priority, 0.8);
    }
}

/// Scenario 2: webhook source, the same payload replayed 10 times with
/// distinct request ids but identical `dedup.key_fields` value within the
/// window. Expected: 1 record, `occurrence_count=10`,
/// `first_seen_at <= last_seen_at`.
#[tokio::test]
async fn webhook_source_replayed_ten_times_collapses_to_one_record() {
    let dedup = DedupConfig {
        window_seconds: 60,
        key_fields: vec!["id".to_string()],
        max_entries: 1000,
    };
    let compiled = CompiledSource::compile(1, "webhook-a", "zen-system", &[], &dedup, summary_only_map("webhook", "alert")).unwrap();

    let events: Vec<RawEvent> = (0..10)
        .map(|_| RawEvent::new("webhook-a", json!({"message": "dup", "id": "same-id"}), 1))
        .collect();

    let persist = run_events(compiled, dedup, ProcessingHint::FilterFirst, events).await;
    let records = persist.records.lock().unwrap();
    assert_eq!(records.len(), 1);
    let record = records.values().next().unwrap();
    assert_eq!(record.occurrence_count, 10);
    assert!(record.first_seen_at <= record.last_seen_at);
}

/// Scenario 4: a filter admitting only `HIGH`/`CRITICAL` severities, fed
/// 85% `LOW` and 15% `HIGH` events. Expected: exactly the `HIGH` events
/// persisted.
#[tokio::test]
async fn filter_admits_only_high_and_critical_severity_events() {
    let dedup = DedupConfig {
        window_seconds: 3600,
        key_fields: vec!["id".to_string()],
        max_entries: 1000,
    };
    let rules = vec![FilterRule {
        field_path: "severity".to_string(),
        operator: Operator::In,
        values: vec![json!("HIGH"), json!("CRITICAL")],
        negate: false,
    }];
    let compiled = CompiledSource::compile(1, "scanner", "zen-system", &rules, &dedup, summary_only_map("scan", "finding")).unwrap();

    let mut events = Vec::with_capacity(100);
    for i in 0..85 {
        events.push(RawEvent::new("scanner", json!({"message": "low", "severity": "LOW", "id": format!("low-{i}")}), 1));
    }
    for i in 0..15 {
        events.push(RawEvent::new("scanner", json!({"message": "high", "severity": "HIGH", "id": format!("high-{i}")}), 1));
    }

    let persist = run_events(compiled, dedup, ProcessingHint::FilterFirst, events).await;
    assert_eq!(persist.records.lock().unwrap().len(), 15);
}

/// Same filter-admission shape as above, checked directly against the
/// Strategy Selector's cost model: with most events denied before dedup
/// ever runs, `filter_first` should be (and stay) the cheaper order, so a
/// mixed/adverse telemetry signal never tips the selector away from it.
#[test]
fn strategy_selector_stays_on_filter_first_when_filter_does_most_of_the_work() {
    use zen_strategy::telemetry::SourceTelemetry;
    use zen_strategy::{PipelineOrder, StrategySelector};

    let mostly_denied = SourceTelemetry {
        events_per_second: 100.0,
        filter_pass_rate: 0.15,
        dedup_hit_rate_unconditional: 0.02,
        dedup_hit_rate_given_filter_pass: 0.02,
        cost_filter_secs: 0.00001,
        cost_dedup_secs: 0.0005,
        cost_normalize_secs: 0.0002,
        cost_persist_secs: 0.0008,
    };

    let mut selector = StrategySelector::new(zen_common::ProcessingHint::Auto);
    let now = std::time::Instant::now();
    for i in 0..5 {
        selector.evaluate(&mostly_denied, now + Duration::from_secs(5 * i));
    }
    assert_eq!(selector.current(), PipelineOrder::FilterFirst);
}

/// Scenario 5: a periodic-list resource transitioning 3 -> 5 -> 5 -> 4 items
/// across 4 polls. Expected: 5 distinct fingerprints persisted total; the
/// items present in every poll show `occurrence_count >= 3`.
#[tokio::test]
async fn periodic_list_item_present_across_polls_accumulates_occurrence_count() {
    let dedup = DedupConfig {
        window_seconds: 3600,
        key_fields: vec!["uid".to_string()],
        max_entries: 1000,
    };
    let compiled = CompiledSource::compile(1, "periodic-list", "zen-system", &[], &dedup, summary_only_map("k8s", "resource")).unwrap();

    fn event_for(uid: &str) -> RawEvent {
        RawEvent::new("periodic-list", json!({"message": uid, "uid": uid}), 1)
    }

    // Every poll re-emits everything currently listed, per the adapter's
    // present-every-poll contract.
    let polls: Vec<Vec<&str>> = vec![
        vec!["u1", "u2", "u3"],
        vec!["u1", "u2", "u3", "u4", "u5"],
        vec!["u1", "u2", "u3", "u4", "u5"],
        vec!["u2", "u3", "u4", "u5"],
    ];
    let events: Vec<RawEvent> = polls.into_iter().flatten().map(event_for).collect();

    let persist = run_events(compiled, dedup, ProcessingHint::FilterFirst, events).await;
    let records = persist.records.lock().unwrap();
    assert_eq!(records.len(), 5);

    let occurrences = |uid: &str| -> u64 {
        records
            .values()
            .find(|r| r.draft.summary == uid)
            .map(|r| r.occurrence_count)
            .unwrap_or(0)
    };
    // u2 and u3 survive all four polls.
    assert!(occurrences("u2") >= 3);
    assert!(occurrences("u3") >= 3);
}

/// Scenario 6: a configuration swap adds a filter rule mid-stream. Events
/// received before the swap completes are processed under the old rules;
/// events after are processed under the new rules. No event is processed
/// under a mix of the two.
#[tokio::test]
async fn configuration_swap_never_mixes_old_and_new_filter_rules() {
    let dedup = DedupConfig {
        window_seconds: 3600,
        key_fields: vec!["id".to_string()],
        max_entries: 1000,
    };

    // Version 1 has no filter rules: everything is admitted.
    let compiled_v1 = CompiledSource::compile(1, "src", "zen-system", &[], &dedup, summary_only_map("d", "t")).unwrap();
    let pre_swap_events: Vec<RawEvent> = (0..5)
        .map(|i| RawEvent::new("src", json!({"message": "m", "severity": "LOW", "id": format!("pre-{i}")}), 1))
        .collect();
    let persist_v1 = run_events(compiled_v1, dedup.clone(), ProcessingHint::FilterFirst, pre_swap_events).await;
    assert_eq!(persist_v1.records.lock().unwrap().len(), 5, "pre-swap events admit under the old, rule-less config");

    // Version 2 adds a rule mid-stream that denies LOW severity.
    let rules_v2 = vec![FilterRule {
        field_path: "severity".to_string(),
        operator: Operator::Equals,
        values: vec![json!("LOW")],
        negate: true,
    }];
    let compiled_v2 = CompiledSource::compile(2, "src", "zen-system", &rules_v2, &dedup, summary_only_map("d", "t")).unwrap();
    let post_swap_events: Vec<RawEvent> = (0..5)
        .map(|i| RawEvent::new("src", json!({"message": "m", "severity": "LOW", "id": format!("post-{i}")}), 2))
        .collect();
    let persist_v2 = run_events(compiled_v2, dedup, ProcessingHint::FilterFirst, post_swap_events).await;
    assert_eq!(
        persist_v2.records.lock().unwrap().len(),
        0,
        "post-swap LOW events must be denied under the newly added rule"
    );
}
