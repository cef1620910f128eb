//! Core types shared across the Zen Watcher pipeline. Domain-agnostic with
//! respect to any single adapter kind — a `SourceConfig` and its siblings
//! describe any of the four adapter variants uniformly.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Severity / priority
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Info
    }
}

impl std::str::FromStr for Severity {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INFO" => Ok(Severity::Info),
            "LOW" => Ok(Severity::Low),
            "MEDIUM" => Ok(Severity::Medium),
            "HIGH" => Ok(Severity::High),
            "CRITICAL" => Ok(Severity::Critical),
            _ => Err(()),
        }
    }
}

// ---------------------------------------------------------------------------
// GVK / GVR / resolved resource
// ---------------------------------------------------------------------------

/// A declared (group, version, kind) triple, as named in a `SourceConfig`
/// binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Gvk {
    pub group: String,
    pub version: String,
    pub kind: String,
}

/// The concrete (group, version, resource) needed to address the cluster API,
/// produced by the Discovery & Resource Resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedResource {
    pub group: String,
    pub version: String,
    pub resource: String,
    pub namespaced: bool,
}

// ---------------------------------------------------------------------------
// SourceConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdapterKind {
    Informer,
    Webhook,
    LogTail,
    PeriodicList,
}

#[derive(Debug, Clone, Copy, schemars::JsonSchema, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingHint {
    FilterFirst,
    DedupFirst,
    Auto,
}

#[derive(Debug, Clone, Copy, schemars::JsonSchema, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    None,
    Hmac,
    Bearer,
}

#[derive(Debug, Clone, schemars::JsonSchema, Serialize, Deserialize)]
pub struct WebhookAuth {
    pub kind: AuthKind,
    pub secret_ref: Option<String>,
}

#[derive(Debug, Clone, schemars::JsonSchema, Serialize, Deserialize)]
#[serde(tag = "adapter_kind", rename_all = "kebab-case")]
pub enum Binding {
    Informer {
        group: String,
        version: String,
        kind: String,
        namespace: Option<String>,
    },
    Webhook {
        path: String,
        required_headers: Option<Vec<String>>,
        auth: Option<WebhookAuth>,
    },
    LogTail {
        file_path: String,
        checkpoint_path: String,
    },
    PeriodicList {
        group: String,
        version: String,
        kind: String,
        namespace: Option<String>,
        interval_seconds: u64,
    },
}

impl Binding {
    pub fn adapter_kind(&self) -> AdapterKind {
        match self {
            Binding::Informer { .. } => AdapterKind::Informer,
            Binding::Webhook { .. } => AdapterKind::Webhook,
            Binding::LogTail { .. } => AdapterKind::LogTail,
            Binding::PeriodicList { .. } => AdapterKind::PeriodicList,
        }
    }

    pub fn gvk(&self) -> Option<Gvk> {
        match self {
            Binding::Informer {
                group,
                version,
                kind,
                ..
            }
            | Binding::PeriodicList {
                group,
                version,
                kind,
                ..
            } => Some(Gvk {
                group: group.clone(),
                version: version.clone(),
                kind: kind.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, schemars::JsonSchema, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    In,
    NotIn,
    Matches,
    Exists,
    NotExists,
    GreaterThan,
    LessThan,
    Between,
    Contains,
}

#[derive(Debug, Clone, schemars::JsonSchema, Serialize, Deserialize)]
pub struct FilterRule {
    pub field_path: String,
    pub operator: Operator,
    #[serde(default)]
    pub values: Vec<serde_json::Value>,
    #[serde(default)]
    pub negate: bool,
}

#[derive(Debug, Clone, schemars::JsonSchema, Serialize, Deserialize)]
pub struct DedupConfig {
    pub window_seconds: u64,
    pub key_fields: Vec<String>,
    pub max_entries: usize,
}

#[derive(Debug, Clone, schemars::JsonSchema, Serialize, Deserialize)]
pub struct NormalizationMap {
    pub domain: String,
    #[serde(rename = "type")]
    pub type_: String,
    /// canonical path -> source path
    pub field_map: HashMap<String, String>,
    /// raw severity token -> enum
    pub severity_map: HashMap<String, Severity>,
    /// severity enum name -> priority real in [0,1]
    pub priority_map: HashMap<String, f64>,
}

#[derive(Debug, Clone, schemars::JsonSchema, Serialize, Deserialize)]
pub struct Retention {
    pub max_age_seconds: i64,
    pub max_per_source: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub binding: Binding,
    #[serde(default)]
    pub filter_rules: Vec<FilterRule>,
    pub dedup: DedupConfig,
    pub normalization: NormalizationMap,
    #[serde(default = "default_processing_hint")]
    pub processing_hint: ProcessingHint,
    pub retention: Retention,
    /// Stamped by the Source Configuration Store on every accepted load.
    /// In-flight events keep using the version they started on.
    #[serde(default)]
    pub version: u64,
}

fn default_processing_hint() -> ProcessingHint {
    ProcessingHint::Auto
}

impl SourceConfig {
    pub fn adapter_kind(&self) -> AdapterKind {
        self.binding.adapter_kind()
    }

    /// Schema validation: no unknown operator (enforced by the enum
    /// itself), valid regex syntax, `dedup.max_entries >= 1`,
    /// `window_seconds >= 1`, non-empty `field_path`, severity_map values in
    /// the enum (enforced by the enum itself).
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".to_string());
        }
        if self.dedup.max_entries < 1 {
            return Err(format!(
                "source {}: dedup.max_entries must be >= 1",
                self.name
            ));
        }
        if self.dedup.window_seconds < 1 {
            return Err(format!(
                "source {}: dedup.window_seconds must be >= 1",
                self.name
            ));
        }
        if self.dedup.key_fields.is_empty() {
            return Err(format!(
                "source {}: dedup.key_fields must not be empty",
                self.name
            ));
        }
        for rule in &self.filter_rules {
            if rule.field_path.trim().is_empty() {
                return Err(format!(
                    "source {}: filter rule has empty field_path",
                    self.name
                ));
            }
            if rule.operator == Operator::Matches {
                for v in &rule.values {
                    if let Some(pattern) = v.as_str() {
                        if let Err(e) = regex::Regex::new(pattern) {
                            return Err(format!(
                                "source {}: invalid regex {pattern:?}: {e}",
                                self.name
                            ));
                        }
                    }
                }
            }
        }
        if let Binding::PeriodicList {
            interval_seconds, ..
        } = &self.binding
        {
            if *interval_seconds < 1 {
                return Err(format!(
                    "source {}: periodic-list interval_seconds must be >= 1",
                    self.name
                ));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RawEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, schemars::JsonSchema, Serialize, Deserialize)]
pub struct Provenance {
    pub kind: Option<String>,
    pub namespace: Option<String>,
    pub name: Option<String>,
    pub uid: Option<String>,
}

impl Default for Provenance {
    fn default() -> Self {
        Self {
            kind: None,
            namespace: None,
            name: None,
            uid: None,
        }
    }
}

/// An in-memory value produced by an adapter. Owned exclusively by the
/// pipeline for that event until a terminal outcome (persisted, filtered,
/// deduped, abandoned) destroys it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    pub source_name: String,
    pub received_at: DateTime<Utc>,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub provenance: Provenance,
    pub delivery_attempt: u32,
    /// The SourceConfig version this event started under. The pipeline never
    /// mixes a config version mid-event.
    pub config_version: u64,
}

impl RawEvent {
    pub fn new(source_name: impl Into<String>, payload: serde_json::Value, config_version: u64) -> Self {
        Self {
            source_name: source_name.into(),
            received_at: Utc::now(),
            payload,
            provenance: Provenance::default(),
            delivery_attempt: 1,
            config_version,
        }
    }
}

// ---------------------------------------------------------------------------
// Observation
// ---------------------------------------------------------------------------

/// Built by the Normalizer. Has no cluster identity yet — mirrors the
/// write-intent / read-result split the event store precedent uses
/// (`AppendEvent` vs `StoredEvent`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationDraft {
    pub source: String,
    pub category: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub severity: Severity,
    pub priority: f64,
    pub detected_at: DateTime<Utc>,
    pub fingerprint: String,
    pub subject: Option<Provenance>,
    pub summary: String,
    pub details: serde_json::Value,
    pub labels: HashMap<String, String>,
    pub source_payload: serde_json::Value,
}

/// The canonical persisted record, once round-tripped through the cluster
/// API (has a name/namespace/resource_version/uid).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub name: String,
    pub namespace: String,
    pub resource_version: Option<String>,
    pub uid: Option<Uuid>,
    pub source: String,
    pub category: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub severity: Severity,
    pub priority: f64,
    pub detected_at: DateTime<Utc>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub occurrence_count: u64,
    pub fingerprint: String,
    pub subject: Option<Provenance>,
    pub summary: String,
    pub details: serde_json::Value,
    pub labels: HashMap<String, String>,
    pub source_payload: serde_json::Value,
}

impl Observation {
    /// Record name: `<source>-<fingerprint[:16]>`. Invariant: no two
    /// records for the same (source, fingerprint) may coexist.
    pub fn derive_name(source: &str, fingerprint: &str) -> String {
        let short = &fingerprint[..fingerprint.len().min(16)];
        format!("{source}-{short}")
    }

    pub fn from_draft(draft: ObservationDraft, namespace: impl Into<String>) -> Self {
        let name = Self::derive_name(&draft.source, &draft.fingerprint);
        Self {
            name,
            namespace: namespace.into(),
            resource_version: None,
            uid: None,
            source: draft.source,
            category: draft.category,
            type_: draft.type_,
            severity: draft.severity,
            priority: draft.priority,
            detected_at: draft.detected_at,
            first_seen_at: draft.detected_at,
            last_seen_at: draft.detected_at,
            occurrence_count: 1,
            fingerprint: draft.fingerprint,
            subject: draft.subject,
            summary: draft.summary,
            details: draft.details,
            labels: draft.labels,
            source_payload: draft.source_payload,
        }
    }
}

// ---------------------------------------------------------------------------
// DedupEntry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DedupEntry {
    pub fingerprint: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub occurrence_count: u64,
    pub expires_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Payload size cap (64 KiB default, no redaction in core)
// ---------------------------------------------------------------------------

pub const SOURCE_PAYLOAD_CAP_BYTES: usize = 64 * 1024;

/// Cap a JSON payload to `SOURCE_PAYLOAD_CAP_BYTES` when serialized, replacing
/// it with a truncation marker if it overflows. Never panics on malformed
/// input.
pub fn cap_source_payload(payload: &serde_json::Value) -> serde_json::Value {
    let serialized = match serde_json::to_string(payload) {
        Ok(s) => s,
        Err(_) => return serde_json::json!({"_truncated": true, "_reason": "unserializable"}),
    };
    if serialized.len() <= SOURCE_PAYLOAD_CAP_BYTES {
        return payload.clone();
    }
    let mut truncated = serialized;
    let boundary = (0..=SOURCE_PAYLOAD_CAP_BYTES)
        .rev()
        .find(|&i| truncated.is_char_boundary(i))
        .unwrap_or(0);
    truncated.truncate(boundary);
    serde_json::json!({
        "_truncated": true,
        "_original_bytes": serialized_len_safe(payload),
        "_preview": truncated,
    })
}

fn serialized_len_safe(payload: &serde_json::Value) -> usize {
    serde_json::to_string(payload).map(|s| s.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_roundtrips_from_str() {
        assert_eq!("HIGH".parse::<Severity>().unwrap(), Severity::High);
        assert_eq!("low".parse::<Severity>().unwrap(), Severity::Low);
        assert!("bogus".parse::<Severity>().is_err());
    }

    #[test]
    fn observation_name_is_deterministic() {
        let a = Observation::derive_name("cis-scanner", "abcdef0123456789ffff");
        let b = Observation::derive_name("cis-scanner", "abcdef0123456789ffff");
        assert_eq!(a, b);
        assert_eq!(a, "cis-scanner-abcdef0123456789");
    }

    #[test]
    fn payload_cap_passes_small_payloads_through() {
        let small = serde_json::json!({"a": 1});
        assert_eq!(cap_source_payload(&small), small);
    }

    #[test]
    fn payload_cap_truncates_oversized_payloads() {
        let big = serde_json::json!({"blob": "x".repeat(SOURCE_PAYLOAD_CAP_BYTES * 2)});
        let capped = cap_source_payload(&big);
        assert_eq!(capped["_truncated"], serde_json::json!(true));
    }

    #[test]
    fn payload_cap_does_not_panic_when_the_cap_lands_mid_char() {
        // "é" is 2 bytes in UTF-8; repeating it walks the cap through every
        // possible byte offset relative to a char boundary across the loop.
        for pad in 0..4 {
            let filler = "x".repeat(SOURCE_PAYLOAD_CAP_BYTES - 1 + pad);
            let big = serde_json::json!({"blob": format!("{filler}éééé")});
            let capped = cap_source_payload(&big);
            assert_eq!(capped["_truncated"], serde_json::json!(true));
        }
    }

    #[test]
    fn source_config_rejects_bad_dedup_config() {
        let cfg = SourceConfig {
            name: "bad".into(),
            binding: Binding::LogTail {
                file_path: "/var/log/x.log".into(),
                checkpoint_path: "/var/lib/zen/x.ckpt".into(),
            },
            filter_rules: vec![],
            dedup: DedupConfig {
                window_seconds: 0,
                key_fields: vec!["id".into()],
                max_entries: 100,
            },
            normalization: NormalizationMap {
                domain: "d".into(),
                type_: "t".into(),
                field_map: HashMap::new(),
                severity_map: HashMap::new(),
                priority_map: HashMap::new(),
            },
            processing_hint: ProcessingHint::Auto,
            retention: Retention {
                max_age_seconds: 86400,
                max_per_source: 1000,
            },
            version: 0,
        };
        assert!(cfg.validate().is_err());
    }
}
