use super::{ResourceSelector, TargetOperation};
use kube::CustomResource;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Rejects resources in any namespace that fail its rules.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize)]
#[kube(
    group = "policy.kcloudlabs.io",
    version = "v1alpha1",
    kind = "ClusterValidatePolicy",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterValidatePolicySpec {
    #[serde(default)]
    pub resource_selectors: Vec<ResourceSelector>,
    #[serde(default)]
    pub validate_rules: Vec<ValidateRule>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateRule {
    #[serde(default)]
    pub target_operations: Vec<TargetOperation>,
    pub condition: Condition,
}

/// Compares a value read from the admitted object.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub cond: Cond,
    pub data_ref: DataRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default)]
    pub affect_mode: AffectMode,
    #[serde(default)]
    pub message: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum Cond {
    Exist,
    NotExist,
    Equal,
    NotEqual,
    In,
    NotIn,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataRef {
    #[serde(default)]
    pub from: DataSource,
    /// A JSON pointer into the referenced object.
    pub path: String,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    #[default]
    Current,
    Old,
}

/// Whether a holding condition rejects the object or is required for it to be allowed.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AffectMode {
    #[default]
    Reject,
    Allow,
}

// === impl Condition ===

impl Condition {
    pub fn requires_value(&self) -> bool {
        !matches!(self.cond, Cond::Exist | Cond::NotExist)
    }

    pub fn holds(&self, current: &Value, old: Option<&Value>) -> bool {
        let doc = match self.data_ref.from {
            DataSource::Current => Some(current),
            DataSource::Old => old,
        };
        let data = doc.and_then(|doc| doc.pointer(&self.data_ref.path));

        match self.cond {
            Cond::Exist => data.is_some(),
            Cond::NotExist => data.is_none(),
            Cond::Equal => data.is_some() && data == self.value.as_ref(),
            Cond::NotEqual => data != self.value.as_ref(),
            Cond::In => self.contains(data),
            Cond::NotIn => !self.contains(data),
        }
    }

    /// Whether the object must be rejected.
    pub fn rejects(&self, current: &Value, old: Option<&Value>) -> bool {
        match self.affect_mode {
            AffectMode::Reject => self.holds(current, old),
            AffectMode::Allow => !self.holds(current, old),
        }
    }

    fn contains(&self, data: Option<&Value>) -> bool {
        match (data, self.value.as_ref()) {
            (Some(data), Some(Value::Array(values))) => values.contains(data),
            _ => false,
        }
    }
}
