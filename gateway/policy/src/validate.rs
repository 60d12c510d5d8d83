use crate::{cached, PolicyMetrics};
use admission_gateway_core::{
    pipeline::{PolicyVerdict, ValidationPipeline},
    Gvk, Lister, Operation,
};
use admission_gateway_k8s_api::{
    gvk,
    policy::{ClusterValidatePolicy, TargetOperation},
    DynamicObject, ResourceExt,
};
use anyhow::Result;
use std::sync::Arc;
use tracing::debug;

/// Evaluates cluster validate policies against admitted objects.
pub struct ValidateManager {
    lister: Arc<dyn Lister>,
    metrics: PolicyMetrics,
}

// === impl ValidateManager ===

impl ValidateManager {
    pub fn kinds() -> Vec<Gvk> {
        vec![gvk::<ClusterValidatePolicy>()]
    }

    pub fn new(lister: Arc<dyn Lister>, metrics: PolicyMetrics) -> Self {
        Self { lister, metrics }
    }
}

#[async_trait::async_trait]
impl ValidationPipeline for ValidateManager {
    async fn apply(
        &self,
        object: &DynamicObject,
        old_object: Option<&DynamicObject>,
        operation: &Operation,
    ) -> Result<PolicyVerdict> {
        let current = serde_json::to_value(object)?;
        let old = old_object.map(serde_json::to_value).transpose()?;

        for policy in cached::<ClusterValidatePolicy>(&*self.lister, &self.metrics) {
            let spec = &policy.spec;
            if !spec.resource_selectors.iter().any(|s| s.matches(object)) {
                continue;
            }

            let rejected = spec
                .validate_rules
                .iter()
                .filter(|rule| TargetOperation::any_matches(&rule.target_operations, operation))
                .find(|rule| rule.condition.rejects(&current, old.as_ref()));
            if let Some(rule) = rejected {
                debug!(policy = %policy.name_any(), "Rejected");
                return Ok(PolicyVerdict::invalid(&rule.condition.message));
            }
        }

        Ok(PolicyVerdict::valid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{object, FakeLister};
    use serde_json::{json, Value};

    fn quota(hard: Value) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "ResourceQuota",
            "metadata": { "name": "compute", "namespace": "default" },
            "spec": { "hard": hard },
        })
    }

    fn policy(name: &str, condition: Value) -> Value {
        json!({
            "apiVersion": "policy.kcloudlabs.io/v1alpha1",
            "kind": "ClusterValidatePolicy",
            "metadata": { "name": name },
            "spec": {
                "resourceSelectors": [{ "apiVersion": "v1", "kind": "ResourceQuota" }],
                "validateRules": [{ "condition": condition }],
            },
        })
    }

    fn manager(lister: FakeLister) -> ValidateManager {
        ValidateManager::new(Arc::new(lister), PolicyMetrics::default())
    }

    #[tokio::test]
    async fn denial_reason_is_the_rule_message() {
        let manager = manager(FakeLister::with([policy(
            "max-cpu",
            json!({
                "cond": "Equal",
                "dataRef": { "path": "/spec/hard/cpu" },
                "value": "64",
                "message": "quota exceeded",
            }),
        )]));

        let verdict = manager
            .apply(&object(quota(json!({ "cpu": "64" }))), None, &Operation::Create)
            .await
            .unwrap();
        assert_eq!(verdict, PolicyVerdict::invalid("quota exceeded"));

        let verdict = manager
            .apply(&object(quota(json!({ "cpu": "8" }))), None, &Operation::Create)
            .await
            .unwrap();
        assert!(verdict.valid);
    }

    #[tokio::test]
    async fn first_denial_wins() {
        let manager = manager(FakeLister::with([
            policy(
                "b",
                json!({ "cond": "Exist", "dataRef": { "path": "/spec/hard" }, "message": "second" }),
            ),
            policy(
                "a",
                json!({ "cond": "Exist", "dataRef": { "path": "/spec/hard" }, "message": "first" }),
            ),
        ]));

        let verdict = manager
            .apply(&object(quota(json!({}))), None, &Operation::Create)
            .await
            .unwrap();
        assert_eq!(verdict.reason, "first");
    }

    #[tokio::test]
    async fn rules_default_to_create_and_update() {
        let manager = manager(FakeLister::with([policy(
            "deny-all",
            json!({ "cond": "Exist", "dataRef": { "path": "/spec" }, "message": "denied" }),
        )]));
        let obj = object(quota(json!({})));

        let verdict = manager
            .apply(&obj, Some(&obj), &Operation::Update)
            .await
            .unwrap();
        assert!(!verdict.valid);

        let verdict = manager.apply(&obj, None, &Operation::Delete).await.unwrap();
        assert!(verdict.valid);
    }

    #[tokio::test]
    async fn allow_mode_requires_condition() {
        let manager = manager(FakeLister::with([policy(
            "keep-cpu",
            json!({
                "cond": "Exist",
                "dataRef": { "from": "old", "path": "/spec/hard/cpu" },
                "affectMode": "allow",
                "message": "cpu quota required",
            }),
        )]));
        let new = object(quota(json!({})));
        let old = object(quota(json!({ "cpu": "8" })));

        let verdict = manager
            .apply(&new, Some(&old), &Operation::Update)
            .await
            .unwrap();
        assert!(verdict.valid);

        let verdict = manager
            .apply(&new, Some(&new), &Operation::Update)
            .await
            .unwrap();
        assert_eq!(verdict.reason, "cpu quota required");
    }
}
