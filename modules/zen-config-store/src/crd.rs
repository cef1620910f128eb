//! The `SourceConfig` custom resource definition, used when the cluster
//! backend is active. Supplements the file-set backend with a
//! cluster-native equivalent — not named in the distilled contract, but
//! schemars-derived CRD schemas are standard practice wherever a `kube`
//! controller owns a custom type, so Zen Watcher carries one here too.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use zen_common::{DedupConfig, FilterRule, NormalizationMap, ProcessingHint, Retention};

/// `sourceconfigs.zen.io/v1alpha1`. The CRD's `.spec` mirrors
/// `SourceConfig` minus `name` (taken from the resource's own metadata
/// name) and `version` (stamped by the store, not persisted on the CR).
#[derive(Debug, Clone, CustomResource, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "zen.io",
    version = "v1alpha1",
    kind = "SourceConfig",
    plural = "sourceconfigs",
    namespaced,
    status = "SourceConfigStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfigSpec {
    pub binding: zen_common::Binding,
    #[serde(default)]
    pub filter_rules: Vec<FilterRule>,
    pub dedup: DedupConfig,
    pub normalization: NormalizationMap,
    #[serde(default)]
    pub processing_hint: Option<ProcessingHint>,
    pub retention: Retention,
}

/// Written back by the Source Configuration Store after a validate pass,
/// so `kubectl get sourceconfigs` shows admission outcome without the
/// operator having to tail logs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfigStatus {
    pub accepted: bool,
    pub last_validated: Option<Time>,
    pub message: Option<String>,
}

impl SourceConfig {
    pub fn into_source_config(self, name: String) -> zen_common::SourceConfig {
        zen_common::SourceConfig {
            name,
            binding: self.spec.binding,
            filter_rules: self.spec.filter_rules,
            dedup: self.spec.dedup,
            normalization: self.spec.normalization,
            processing_hint: self.spec.processing_hint.unwrap_or(ProcessingHint::Auto),
            retention: self.spec.retention,
            version: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crd_schema_generates_without_panicking() {
        let schema = schemars::schema_for!(SourceConfigSpec);
        assert!(schema.schema.object.is_some());
    }
}
