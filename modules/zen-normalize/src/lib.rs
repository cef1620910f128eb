//! Normalizer: projects a raw event into the canonical
//! `ObservationDraft` per the source's normalization map.
//!
//! Grounded on `rootsignal-archive::semantics` / `rootsignal-archive::
//! enrichment` — declarative source-to-canonical field projection.

use std::collections::HashMap;

use chrono::Utc;
use thiserror::Error;
use zen_common::path::resolve_path;
use zen_common::{cap_source_payload, NormalizationMap, ObservationDraft, Provenance, RawEvent, Severity};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// Canonical fields resolved directly from `field_map`, beyond severity
/// (handled via `severity_map`) and subject/details (handled generically).
const SUMMARY_FIELD: &str = "summary";
const SEVERITY_FIELD: &str = "severity";

/// `fingerprint` is computed upstream by the dedup stage (it must be
/// derivable from raw fields alone) and threaded in here so the
/// Normalizer stays a pure projection with no dependency on the
/// Deduplicator.
pub fn normalize(
    event: &RawEvent,
    map: &NormalizationMap,
    fingerprint: String,
) -> Result<ObservationDraft, NormalizeError> {
    let summary_path = map
        .field_map
        .get(SUMMARY_FIELD)
        .ok_or(NormalizeError::MissingField("summary"))?;
    let summary = resolve_path(&event.payload, summary_path)
        .and_then(|v| v.as_str())
        .ok_or(NormalizeError::MissingField("summary"))?
        .to_string();

    let severity = map
        .field_map
        .get(SEVERITY_FIELD)
        .and_then(|path| resolve_path(&event.payload, path))
        .and_then(|v| v.as_str())
        .and_then(|raw| map.severity_map.get(raw).copied())
        .unwrap_or_default();

    let priority = map
        .priority_map
        .get(&format!("{severity:?}").to_uppercase())
        .copied()
        .unwrap_or(0.0);

    let mut details = serde_json::Map::new();
    let mut labels = HashMap::new();
    for (canonical, source_path) in &map.field_map {
        if canonical == SUMMARY_FIELD || canonical == SEVERITY_FIELD {
            continue;
        }
        if let Some(canonical_label) = canonical.strip_prefix("label.") {
            if let Some(v) = resolve_path(&event.payload, source_path).and_then(|v| v.as_str()) {
                labels.insert(canonical_label.to_string(), v.to_string());
            }
            continue;
        }
        if let Some(value) = resolve_path(&event.payload, source_path) {
            details.insert(canonical.clone(), value.clone());
        }
    }

    let subject = if event.provenance.kind.is_some() || event.provenance.name.is_some() {
        Some(event.provenance.clone())
    } else {
        None::<Provenance>
    };

    Ok(ObservationDraft {
        source: event.source_name.clone(),
        category: map.domain.clone(),
        type_: map.type_.clone(),
        severity,
        priority,
        detected_at: Utc::now(),
        fingerprint,
        subject,
        summary,
        details: serde_json::Value::Object(details),
        labels,
        source_payload: cap_source_payload(&event.payload),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_map() -> NormalizationMap {
        let mut field_map = HashMap::new();
        field_map.insert("summary".to_string(), "message".to_string());
        field_map.insert("severity".to_string(), "level".to_string());
        field_map.insert("label.rule".to_string(), "rule_id".to_string());

        let mut severity_map = HashMap::new();
        severity_map.insert("critical".to_string(), Severity::High);

        let mut priority_map = HashMap::new();
        priority_map.insert("HIGH".to_string(), 0.8);

        NormalizationMap {
            domain: "vulnerability".to_string(),
            type_: "cve-finding".to_string(),
            field_map,
            severity_map,
            priority_map,
        }
    }

    #[test]
    fn normalizes_severity_and_priority() {
        let map = sample_map();
        let event = RawEvent::new(
            "scanner-a",
            json!({"message": "CVE found", "level": "critical", "rule_id": "R-42"}),
            1,
        );
        let draft = normalize(&event, &map, "fp".to_string()).unwrap();
        assert_eq!(draft.severity, Severity::High);
        assert_eq!(draft.priority, 0.8);
        assert_eq!(draft.summary, "CVE found");
        assert_eq!(draft.labels.get("rule"), Some(&"R-42".to_string()));
    }

    #[test]
    fn unmapped_severity_token_defaults_info() {
        let map = sample_map();
        let event = RawEvent::new(
            "scanner-a",
            json!({"message": "noise", "level": "unknown-token"}),
            1,
        );
        let draft = normalize(&event, &map, "fp".to_string()).unwrap();
        assert_eq!(draft.severity, Severity::Info);
    }

    #[test]
    fn missing_summary_is_normalize_error() {
        let map = sample_map();
        let event = RawEvent::new("scanner-a", json!({"level": "critical"}), 1);
        assert_eq!(
            normalize(&event, &map, "fp".to_string()),
            Err(NormalizeError::MissingField("summary"))
        );
    }

    #[test]
    fn source_payload_is_size_capped() {
        let map = sample_map();
        let event = RawEvent::new(
            "scanner-a",
            json!({"message": "x", "level": "critical", "blob": "y".repeat(200_000)}),
            1,
        );
        let draft = normalize(&event, &map, "fp".to_string()).unwrap();
        assert_eq!(draft.source_payload["_truncated"], json!(true));
    }
}
