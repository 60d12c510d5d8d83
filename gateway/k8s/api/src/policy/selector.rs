use crate::labels;
use kube::core::{admission::Operation, DynamicObject};
use serde::{Deserialize, Serialize};

/// Selects the resources a policy applies to.
///
/// `apiVersion` and `kind` must match; `name`, `namespace`, and `labelSelector` narrow the
/// selection when set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSelector {
    pub api_version: String,
    pub kind: String,
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub label_selector: Option<labels::Selector>,
}

/// An admission operation a rule applies to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TargetOperation {
    Create,
    Update,
    Delete,
}

// === impl ResourceSelector ===

impl ResourceSelector {
    pub fn matches(&self, object: &DynamicObject) -> bool {
        let Some(types) = object.types.as_ref() else {
            return false;
        };
        if types.api_version != self.api_version || types.kind != self.kind {
            return false;
        }

        if let Some(name) = self.name.as_deref() {
            if object.metadata.name.as_deref() != Some(name) {
                return false;
            }
        }

        if let Some(namespace) = self.namespace.as_deref() {
            if object.metadata.namespace.as_deref() != Some(namespace) {
                return false;
            }
        }

        match self.label_selector.as_ref() {
            Some(selector) => selector.matches(object.metadata.labels.as_ref()),
            None => true,
        }
    }
}

// === impl TargetOperation ===

impl TargetOperation {
    /// Rules that do not name their operations apply to these.
    pub const DEFAULTS: [TargetOperation; 2] = [TargetOperation::Create, TargetOperation::Update];

    pub fn matches(&self, operation: &Operation) -> bool {
        matches!(
            (self, operation),
            (Self::Create, Operation::Create)
                | (Self::Update, Operation::Update)
                | (Self::Delete, Operation::Delete)
        )
    }

    /// Whether a rule with `targets` applies to `operation`.
    pub fn any_matches(targets: &[TargetOperation], operation: &Operation) -> bool {
        if targets.is_empty() {
            return Self::DEFAULTS.iter().any(|t| t.matches(operation));
        }
        targets.iter().any(|t| t.matches(operation))
    }
}
