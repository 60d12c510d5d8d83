//! Contracts for the policy engines consulted while admitting a request.

use crate::PatchSet;
use anyhow::Result;
use kube::core::{admission::Operation, DynamicObject};

/// Rewrites admitted objects according to override policies.
#[async_trait::async_trait]
pub trait OverridePipeline: Send + Sync + 'static {
    /// Applies all matching override policies by writing into `object`.
    async fn apply(
        &self,
        object: &mut DynamicObject,
        old_object: Option<&DynamicObject>,
        operation: &Operation,
    ) -> Result<AppliedOverrides>;
}

/// Accepts or rejects admitted objects according to validate policies.
#[async_trait::async_trait]
pub trait ValidationPipeline: Send + Sync + 'static {
    async fn apply(
        &self,
        object: &DynamicObject,
        old_object: Option<&DynamicObject>,
        operation: &Operation,
    ) -> Result<PolicyVerdict>;
}

/// A kind-specific fast path that runs before the general pipelines.
#[async_trait::async_trait]
pub trait InterceptionGate: Send + Sync + 'static {
    /// Returns the patches for `object`, having written them into it. When non-empty, override
    /// policies are not evaluated.
    async fn on_mutate(
        &self,
        object: &mut DynamicObject,
        old_object: Option<&DynamicObject>,
        operation: &Operation,
    ) -> Result<PatchSet>;

    /// An error vetoes the request; its message is the denial reason.
    async fn on_validate(
        &self,
        object: &DynamicObject,
        old_object: Option<&DynamicObject>,
        operation: &Operation,
    ) -> Result<()>;
}

/// The names of the override policies applied to an object.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AppliedOverrides {
    pub cluster: Vec<String>,
    pub namespaced: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyVerdict {
    pub valid: bool,
    /// Only meaningful when `valid` is false.
    pub reason: String,
}

// === impl AppliedOverrides ===

impl AppliedOverrides {
    pub fn is_empty(&self) -> bool {
        self.cluster.is_empty() && self.namespaced.is_empty()
    }
}

// === impl PolicyVerdict ===

impl PolicyVerdict {
    pub fn valid() -> Self {
        Self {
            valid: true,
            reason: String::new(),
        }
    }

    pub fn invalid(reason: impl ToString) -> Self {
        Self {
            valid: false,
            reason: reason.to_string(),
        }
    }
}
