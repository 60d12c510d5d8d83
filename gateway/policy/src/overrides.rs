use crate::{cached, PolicyMetrics};
use admission_gateway_core::{
    pipeline::{AppliedOverrides, OverridePipeline},
    Gvk, Lister, Operation,
};
use admission_gateway_k8s_api::{
    gvk,
    policy::{
        ClusterOverridePolicy, OverridePolicy, OverrideRule, PlaintextOverrider, ResourceSelector,
        TargetOperation,
    },
    DynamicObject, ResourceExt,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::debug;

/// Applies cluster and namespaced override policies to admitted objects.
///
/// Cluster policies are applied first, then policies from the object's namespace. Within each
/// scope, policies apply in name order so that later policies observe earlier rewrites.
pub struct OverrideManager {
    lister: Arc<dyn Lister>,
    metrics: PolicyMetrics,
}

// === impl OverrideManager ===

impl OverrideManager {
    /// The kinds that must be cached before the manager can be used.
    pub fn kinds() -> Vec<Gvk> {
        vec![gvk::<ClusterOverridePolicy>(), gvk::<OverridePolicy>()]
    }

    pub fn new(lister: Arc<dyn Lister>, metrics: PolicyMetrics) -> Self {
        Self { lister, metrics }
    }
}

#[async_trait::async_trait]
impl OverridePipeline for OverrideManager {
    async fn apply(
        &self,
        object: &mut DynamicObject,
        _old_object: Option<&DynamicObject>,
        operation: &Operation,
    ) -> Result<AppliedOverrides> {
        let mut applied = AppliedOverrides::default();

        for policy in cached::<ClusterOverridePolicy>(&*self.lister, &self.metrics) {
            let name = policy.name_any();
            let spec = &policy.spec;
            if override_object(object, &spec.resource_selectors, &spec.override_rules, operation)
                .with_context(|| format!("failed to apply ClusterOverridePolicy {name}"))?
            {
                applied.cluster.push(name);
            }
        }

        let namespace = object.namespace();
        if namespace.is_some() {
            for policy in cached::<OverridePolicy>(&*self.lister, &self.metrics) {
                if policy.namespace() != namespace {
                    continue;
                }
                let name = policy.name_any();
                let spec = &policy.spec;
                if override_object(object, &spec.resource_selectors, &spec.override_rules, operation)
                    .with_context(|| format!("failed to apply OverridePolicy {name}"))?
                {
                    applied.namespaced.push(name);
                }
            }
        }

        if !applied.is_empty() {
            debug!(cluster = ?applied.cluster, namespaced = ?applied.namespaced, "Applied overrides");
        }
        Ok(applied)
    }
}

/// Applies the rules of one policy. Returns whether the policy selected the object.
fn override_object(
    object: &mut DynamicObject,
    selectors: &[ResourceSelector],
    rules: &[OverrideRule],
    operation: &Operation,
) -> Result<bool> {
    if !selectors.iter().any(|s| s.matches(object)) {
        return Ok(false);
    }

    let overriders = rules
        .iter()
        .filter(|rule| TargetOperation::any_matches(&rule.target_operations, operation))
        .flat_map(|rule| rule.overriders.plaintext.iter())
        .collect::<Vec<&PlaintextOverrider>>();
    if overriders.is_empty() {
        return Ok(false);
    }

    // Plaintext overriders are JSON patch operations.
    let patch: json_patch::Patch = serde_json::from_value(serde_json::to_value(&overriders)?)?;
    let mut doc = serde_json::to_value(&*object)?;
    json_patch::patch(&mut doc, &patch)?;
    *object = serde_json::from_value(doc)?;
    Ok(true)
}
