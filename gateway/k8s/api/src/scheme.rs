use crate::policy::{ClusterOverridePolicy, ClusterValidatePolicy, OverridePolicy};
use admission_gateway_core::Gvk;
use kube::core::{ApiResource, Resource};
use std::collections::HashMap;

/// Maps resource types to the API resources they are served as.
///
/// Kinds known to the scheme can be watched without consulting API discovery.
#[derive(Clone, Debug)]
pub struct Scheme {
    resources: HashMap<Gvk, ApiResource>,
}

/// Returns the type of a statically-typed resource.
pub fn gvk<K: Resource<DynamicType = ()>>() -> Gvk {
    Gvk::new(K::group(&()), K::version(&()), K::kind(&()))
}

// === impl Scheme ===

impl Default for Scheme {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheme {
    /// Returns a scheme that knows every policy kind.
    pub fn new() -> Self {
        let mut scheme = Self::empty();
        scheme.register::<OverridePolicy>();
        scheme.register::<ClusterOverridePolicy>();
        scheme.register::<ClusterValidatePolicy>();
        scheme
    }

    pub fn empty() -> Self {
        Self {
            resources: HashMap::new(),
        }
    }

    pub fn register<K: Resource<DynamicType = ()>>(&mut self) -> &mut Self {
        self.resources
            .insert(gvk::<K>(), ApiResource::erase::<K>(&()));
        self
    }

    pub fn get(&self, gvk: &Gvk) -> Option<&ApiResource> {
        self.resources.get(gvk)
    }
}
