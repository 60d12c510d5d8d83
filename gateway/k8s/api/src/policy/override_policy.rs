use super::{ResourceSelector, TargetOperation};
use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// Rewrites resources in the policy's namespace.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize)]
#[kube(
    group = "policy.kcloudlabs.io",
    version = "v1alpha1",
    kind = "OverridePolicy",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct OverridePolicySpec {
    #[serde(default)]
    pub resource_selectors: Vec<ResourceSelector>,
    #[serde(default)]
    pub override_rules: Vec<OverrideRule>,
}

/// Rewrites resources in any namespace.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize)]
#[kube(
    group = "policy.kcloudlabs.io",
    version = "v1alpha1",
    kind = "ClusterOverridePolicy",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterOverridePolicySpec {
    #[serde(default)]
    pub resource_selectors: Vec<ResourceSelector>,
    #[serde(default)]
    pub override_rules: Vec<OverrideRule>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideRule {
    #[serde(default)]
    pub target_operations: Vec<TargetOperation>,
    #[serde(default)]
    pub overriders: Overriders,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Overriders {
    #[serde(default)]
    pub plaintext: Vec<PlaintextOverrider>,
}

/// A single JSON patch operation applied to the selected resource.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct PlaintextOverrider {
    pub path: String,
    pub op: PlaintextOperator,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaintextOperator {
    Add,
    Remove,
    Replace,
}

// === impl PlaintextOverrider ===

impl PlaintextOverrider {
    pub fn requires_value(&self) -> bool {
        matches!(self.op, PlaintextOperator::Add | PlaintextOperator::Replace)
    }
}
