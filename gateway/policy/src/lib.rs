//! Policy engines backing the admission pipelines.
//!
//! Policies are read from a [`Lister`] on every request so that the caches maintained by the
//! resource watches are the only source of truth.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod interceptor;
mod metrics;
mod overrides;
mod validate;

#[cfg(test)]
mod test_util;

pub use self::{
    interceptor::{
        Interceptors, MutateInterceptor, OverridePolicyInterceptor, Registration,
        ValidateInterceptor, ValidatePolicyInterceptor,
    },
    metrics::PolicyMetrics,
    overrides::OverrideManager,
    validate::ValidateManager,
};

use admission_gateway_core::Lister;
use admission_gateway_k8s_api::{gvk, DynamicObject, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tracing::warn;

/// Reads every cached policy of kind `K`, ordered by namespace and name.
///
/// Policies that cannot be parsed are skipped.
fn cached<K>(lister: &dyn Lister, metrics: &PolicyMetrics) -> Vec<K>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    let gvk = gvk::<K>();
    let objects = lister.list(&gvk);
    metrics.observe(&gvk.kind, objects.len());

    let mut policies = objects
        .iter()
        .filter_map(|obj| match parse::<K>(obj) {
            Ok(policy) => Some(policy),
            Err(error) => {
                warn!(%error, kind = %gvk.kind, name = %obj.name_any(), "Ignoring malformed policy");
                None
            }
        })
        .collect::<Vec<_>>();
    policies.sort_by(|a, b| {
        (a.meta().namespace.as_deref(), a.meta().name.as_deref())
            .cmp(&(b.meta().namespace.as_deref(), b.meta().name.as_deref()))
    });
    policies
}

fn parse<K: DeserializeOwned>(obj: &DynamicObject) -> serde_json::Result<K> {
    serde_json::from_value(serde_json::to_value(obj)?)
}
