use super::{MutateInterceptor, ValidateInterceptor};
use admission_gateway_core::{Gvk, Operation, PatchSet};
use admission_gateway_k8s_api::{
    gvk,
    policy::{
        ClusterOverridePolicy, ClusterValidatePolicy, ClusterValidatePolicySpec, Cond,
        OverridePolicy, OverridePolicySpec, ResourceSelector, TargetOperation,
    },
    DynamicObject, ResourceExt,
};
use anyhow::{ensure, Context, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

/// Checks and normalizes `OverridePolicy` and `ClusterOverridePolicy` objects.
#[derive(Debug)]
pub struct OverridePolicyInterceptor {
    namespaced: bool,
}

/// Checks and normalizes `ClusterValidatePolicy` objects.
#[derive(Debug)]
pub struct ValidatePolicyInterceptor(());

// === impl OverridePolicyInterceptor ===

impl OverridePolicyInterceptor {
    pub fn all() -> [(Gvk, Arc<Self>); 2] {
        [
            (
                gvk::<OverridePolicy>(),
                Arc::new(Self { namespaced: true }),
            ),
            (
                gvk::<ClusterOverridePolicy>(),
                Arc::new(Self { namespaced: false }),
            ),
        ]
    }
}

#[async_trait::async_trait]
impl MutateInterceptor for OverridePolicyInterceptor {
    async fn on_mutate(
        &self,
        object: &mut DynamicObject,
        _old_object: Option<&DynamicObject>,
        _operation: &Operation,
    ) -> Result<PatchSet> {
        default_target_operations(object, "overrideRules")
    }
}

#[async_trait::async_trait]
impl ValidateInterceptor for OverridePolicyInterceptor {
    async fn on_validate(
        &self,
        object: &DynamicObject,
        _old_object: Option<&DynamicObject>,
        operation: &Operation,
    ) -> Result<()> {
        if let Operation::Delete = operation {
            return Ok(());
        }

        let spec = spec::<OverridePolicySpec>(object)?;
        check_selectors(&spec.resource_selectors)?;

        if self.namespaced {
            let namespace = object.namespace();
            for selector in &spec.resource_selectors {
                if let Some(ns) = selector.namespace.as_deref() {
                    ensure!(
                        namespace.as_deref() == Some(ns),
                        "resourceSelectors must not select namespace {ns}"
                    );
                }
            }
        }

        for overrider in spec
            .override_rules
            .iter()
            .flat_map(|rule| rule.overriders.plaintext.iter())
        {
            check_pointer(&overrider.path)?;
            ensure!(
                !overrider.requires_value() || overrider.value.is_some(),
                "{:?} of {} requires a value",
                overrider.op,
                overrider.path
            );
        }

        Ok(())
    }
}

// === impl ValidatePolicyInterceptor ===

impl ValidatePolicyInterceptor {
    pub fn registration() -> (Gvk, Arc<Self>) {
        (gvk::<ClusterValidatePolicy>(), Arc::new(Self(())))
    }
}

#[async_trait::async_trait]
impl MutateInterceptor for ValidatePolicyInterceptor {
    async fn on_mutate(
        &self,
        object: &mut DynamicObject,
        _old_object: Option<&DynamicObject>,
        _operation: &Operation,
    ) -> Result<PatchSet> {
        default_target_operations(object, "validateRules")
    }
}

#[async_trait::async_trait]
impl ValidateInterceptor for ValidatePolicyInterceptor {
    async fn on_validate(
        &self,
        object: &DynamicObject,
        _old_object: Option<&DynamicObject>,
        operation: &Operation,
    ) -> Result<()> {
        if let Operation::Delete = operation {
            return Ok(());
        }

        let spec = spec::<ClusterValidatePolicySpec>(object)?;
        check_selectors(&spec.resource_selectors)?;

        for cond in spec.validate_rules.iter().map(|rule| &rule.condition) {
            check_pointer(&cond.data_ref.path)?;
            ensure!(
                !cond.requires_value() || cond.value.is_some(),
                "{:?} condition on {} requires a value",
                cond.cond,
                cond.data_ref.path
            );
            if let Cond::In | Cond::NotIn = cond.cond {
                ensure!(
                    matches!(cond.value, Some(Value::Array(_))),
                    "{:?} condition on {} requires a list value",
                    cond.cond,
                    cond.data_ref.path
                );
            }
            ensure!(
                !cond.message.is_empty(),
                "condition on {} requires a message",
                cond.data_ref.path
            );
        }

        Ok(())
    }
}

fn spec<T: DeserializeOwned>(object: &DynamicObject) -> Result<T> {
    let spec = object
        .data
        .get("spec")
        .cloned()
        .unwrap_or_else(|| Value::Object(Default::default()));
    serde_json::from_value(spec).context("malformed spec")
}

fn check_selectors(selectors: &[ResourceSelector]) -> Result<()> {
    ensure!(!selectors.is_empty(), "resourceSelectors must not be empty");
    for selector in selectors {
        ensure!(
            !selector.api_version.is_empty() && !selector.kind.is_empty(),
            "resourceSelectors must set apiVersion and kind"
        );
    }
    Ok(())
}

fn check_pointer(path: &str) -> Result<()> {
    ensure!(path.starts_with('/'), "path {path:?} must be a JSON pointer");
    Ok(())
}

/// Makes the default target operations of each rule explicit.
fn default_target_operations(object: &mut DynamicObject, rules: &str) -> Result<PatchSet> {
    let defaults = serde_json::to_value(TargetOperation::DEFAULTS)?;
    let before = object.data.clone();

    let rules = object
        .data
        .get_mut("spec")
        .and_then(|spec| spec.get_mut(rules))
        .and_then(Value::as_array_mut);
    for rule in rules.into_iter().flatten().filter_map(Value::as_object_mut) {
        let unset = match rule.get("targetOperations") {
            None | Some(Value::Null) => true,
            Some(Value::Array(ops)) => ops.is_empty(),
            Some(_) => false,
        };
        if unset {
            rule.insert("targetOperations".to_string(), defaults.clone());
        }
    }

    Ok(json_patch::diff(&before, &object.data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::object;
    use serde_json::json;

    fn override_policy(kind: &str, spec: Value) -> DynamicObject {
        object(json!({
            "apiVersion": "policy.kcloudlabs.io/v1alpha1",
            "kind": kind,
            "metadata": { "name": "policy", "namespace": "default" },
            "spec": spec,
        }))
    }

    fn validate_policy(condition: Value) -> DynamicObject {
        object(json!({
            "apiVersion": "policy.kcloudlabs.io/v1alpha1",
            "kind": "ClusterValidatePolicy",
            "metadata": { "name": "policy" },
            "spec": {
                "resourceSelectors": [{ "apiVersion": "v1", "kind": "Pod" }],
                "validateRules": [{ "condition": condition }],
            },
        }))
    }

    fn pods(overrider: Value) -> Value {
        json!({
            "resourceSelectors": [{ "apiVersion": "v1", "kind": "Pod" }],
            "overrideRules": [{ "overriders": { "plaintext": [overrider] } }],
        })
    }

    #[tokio::test]
    async fn override_policy_checks() {
        let [(_, namespaced), (_, cluster)] = OverridePolicyInterceptor::all();
        for (interceptor, spec, expected) in [
            (
                &cluster,
                pods(json!({ "path": "/metadata/labels/a", "op": "add", "value": "b" })),
                None,
            ),
            (
                &cluster,
                pods(json!({ "path": "metadata", "op": "remove" })),
                Some("path \"metadata\" must be a JSON pointer"),
            ),
            (
                &cluster,
                pods(json!({ "path": "/spec/replicas", "op": "replace" })),
                Some("Replace of /spec/replicas requires a value"),
            ),
            (
                &cluster,
                json!({ "resourceSelectors": [{ "apiVersion": "v1", "kind": "" }] }),
                Some("resourceSelectors must set apiVersion and kind"),
            ),
            (
                &namespaced,
                json!({
                    "resourceSelectors": [{ "apiVersion": "v1", "kind": "Pod", "namespace": "other" }],
                }),
                Some("resourceSelectors must not select namespace other"),
            ),
            (
                &namespaced,
                json!({
                    "resourceSelectors": [{ "apiVersion": "v1", "kind": "Pod", "namespace": "default" }],
                }),
                None,
            ),
        ] {
            let policy = override_policy("OverridePolicy", spec);
            let res = interceptor
                .on_validate(&policy, None, &Operation::Create)
                .await;
            assert_eq!(res.err().map(|e| e.to_string()).as_deref(), expected);
        }
    }

    #[tokio::test]
    async fn deletes_are_never_vetoed() {
        let [(_, namespaced), _] = OverridePolicyInterceptor::all();
        let policy = override_policy("OverridePolicy", json!({}));
        namespaced
            .on_validate(&policy, None, &Operation::Delete)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn validate_policy_checks() {
        let (_, interceptor) = ValidatePolicyInterceptor::registration();
        for (condition, expected) in [
            (
                json!({ "cond": "Exist", "dataRef": { "path": "/spec" }, "message": "m" }),
                None,
            ),
            (
                json!({ "cond": "Equal", "dataRef": { "path": "/spec" }, "message": "m" }),
                Some("Equal condition on /spec requires a value"),
            ),
            (
                json!({ "cond": "In", "dataRef": { "path": "/spec" }, "value": "a", "message": "m" }),
                Some("In condition on /spec requires a list value"),
            ),
            (
                json!({ "cond": "Exist", "dataRef": { "path": "/spec" } }),
                Some("condition on /spec requires a message"),
            ),
        ] {
            let res = interceptor
                .on_validate(&validate_policy(condition), None, &Operation::Create)
                .await;
            assert_eq!(res.err().map(|e| e.to_string()).as_deref(), expected);
        }
    }

    #[tokio::test]
    async fn mutate_makes_target_operations_explicit() {
        let (_, cluster) = OverridePolicyInterceptor::all()[1].clone();
        let mut policy = override_policy(
            "ClusterOverridePolicy",
            json!({
                "resourceSelectors": [{ "apiVersion": "v1", "kind": "Pod" }],
                "overrideRules": [
                    { "overriders": {} },
                    { "targetOperations": ["DELETE"], "overriders": {} },
                ],
            }),
        );

        let patch = cluster
            .on_mutate(&mut policy, None, &Operation::Create)
            .await
            .unwrap();
        assert_eq!(
            serde_json::to_value(&patch).unwrap(),
            json!([{
                "op": "add",
                "path": "/spec/overrideRules/0/targetOperations",
                "value": ["CREATE", "UPDATE"],
            }])
        );
        assert_eq!(
            policy.data["spec"]["overrideRules"][1]["targetOperations"],
            json!(["DELETE"])
        );

        // Explicit operations need no patch.
        let patch = cluster
            .on_mutate(&mut policy, None, &Operation::Update)
            .await
            .unwrap();
        assert!(patch.0.is_empty());
    }
}
