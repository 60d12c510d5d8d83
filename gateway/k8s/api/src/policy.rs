pub mod override_policy;
pub mod selector;
pub mod validate_policy;

pub use self::{
    override_policy::{
        ClusterOverridePolicy, ClusterOverridePolicySpec, OverridePolicy, OverridePolicySpec,
        OverrideRule, Overriders, PlaintextOverrider, PlaintextOperator,
    },
    selector::{ResourceSelector, TargetOperation},
    validate_policy::{
        AffectMode, ClusterValidatePolicy, ClusterValidatePolicySpec, Cond, Condition, DataRef,
        DataSource, ValidateRule,
    },
};

/// The API group of all policy resources.
pub const GROUP: &str = "policy.kcloudlabs.io";
