//! The `Observation` custom resource. `.spec` carries the
//! normalized, write-once fields; `.status` carries the fields a dedup
//! hit mutates (`last_seen_at`, `occurrence_count`) — the same spec/status
//! split `zen-config-store::crd` draws for `SourceConfig`'s admission
//! outcome.

use std::collections::HashMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use zen_common::{Observation as DomainObservation, ObservationDraft, Provenance, Severity};

#[derive(Debug, Clone, CustomResource, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "zen.io",
    version = "v1alpha1",
    kind = "Observation",
    plural = "observations",
    namespaced,
    status = "ObservationStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ObservationSpec {
    pub source: String,
    pub category: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub severity: Severity,
    pub priority: f64,
    pub detected_at: Time,
    pub fingerprint: String,
    pub subject: Option<Provenance>,
    pub summary: String,
    pub details: serde_json::Value,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    pub source_payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObservationStatus {
    pub first_seen_at: Time,
    pub last_seen_at: Time,
    pub occurrence_count: u64,
}

/// The status subresource means a `create` ignores any `.status` set on
/// the object passed in — the API server zeroes it. Initial status has to
/// follow with a separate `replace_status` call once the object exists.
pub fn initial_status(detected_at: chrono::DateTime<chrono::Utc>) -> ObservationStatus {
    let t = Time(detected_at);
    ObservationStatus {
        first_seen_at: t.clone(),
        last_seen_at: t,
        occurrence_count: 1,
    }
}

impl Observation {
    pub fn new_from_draft(draft: ObservationDraft, name: String, namespace: String) -> Self {
        let source = draft.source.clone();
        let mut obj = Observation::new(
            &name,
            ObservationSpec {
                source: draft.source,
                category: draft.category,
                type_: draft.type_,
                severity: draft.severity,
                priority: draft.priority,
                detected_at: Time(draft.detected_at),
                fingerprint: draft.fingerprint,
                subject: draft.subject,
                summary: draft.summary,
                details: draft.details,
                labels: draft.labels,
                source_payload: draft.source_payload,
            },
        );
        obj.metadata.namespace = Some(namespace);
        obj.metadata
            .labels
            .get_or_insert_with(HashMap::new)
            .insert(crate::SOURCE_LABEL.to_string(), source);
        obj
    }

    pub fn into_domain(self) -> Option<DomainObservation> {
        let status = self.status?;
        let namespace = self.metadata.namespace.unwrap_or_default();
        let uid = self
            .metadata
            .uid
            .as_deref()
            .and_then(|s| uuid::Uuid::parse_str(s).ok());
        Some(DomainObservation {
            name: self.metadata.name.unwrap_or_default(),
            namespace,
            resource_version: self.metadata.resource_version,
            uid,
            source: self.spec.source,
            category: self.spec.category,
            type_: self.spec.type_,
            severity: self.spec.severity,
            priority: self.spec.priority,
            detected_at: self.spec.detected_at.0,
            first_seen_at: status.first_seen_at.0,
            last_seen_at: status.last_seen_at.0,
            occurrence_count: status.occurrence_count,
            fingerprint: self.spec.fingerprint,
            subject: self.spec.subject,
            summary: self.spec.summary,
            details: self.spec.details,
            labels: self.spec.labels,
            source_payload: self.spec.source_payload,
        })
    }
}
