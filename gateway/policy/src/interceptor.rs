use admission_gateway_core::{pipeline::InterceptionGate, Gvk, Operation, PatchSet};
use admission_gateway_k8s_api::DynamicObject;
use anyhow::Result;
use std::{collections::HashMap, sync::Arc};

mod policies;

pub use self::policies::{OverridePolicyInterceptor, ValidatePolicyInterceptor};

/// Rewrites objects of a specific kind before override policies are considered.
#[async_trait::async_trait]
pub trait MutateInterceptor: Send + Sync + 'static {
    async fn on_mutate(
        &self,
        object: &mut DynamicObject,
        old_object: Option<&DynamicObject>,
        operation: &Operation,
    ) -> Result<PatchSet>;
}

/// Rejects objects of a specific kind before validate policies are considered.
#[async_trait::async_trait]
pub trait ValidateInterceptor: Send + Sync + 'static {
    async fn on_validate(
        &self,
        object: &DynamicObject,
        old_object: Option<&DynamicObject>,
        operation: &Operation,
    ) -> Result<()>;
}

/// Interceptors keyed by the kind of object they handle.
#[derive(Clone, Default)]
pub struct Interceptors {
    mutating: HashMap<Gvk, Arc<dyn MutateInterceptor>>,
    validating: HashMap<Gvk, Arc<dyn ValidateInterceptor>>,
}

/// The result of looking up an interceptor.
#[derive(Debug)]
pub enum Registration<T> {
    Registered(T),
    Unregistered,
}

// === impl Interceptors ===

impl Interceptors {
    /// Returns a registry with the interceptors for every policy kind.
    pub fn for_policies() -> Self {
        let mut interceptors = Self::default();
        for (gvk, interceptor) in OverridePolicyInterceptor::all() {
            interceptors.register_mutate(gvk.clone(), interceptor.clone());
            interceptors.register_validate(gvk, interceptor);
        }
        let (gvk, interceptor) = ValidatePolicyInterceptor::registration();
        interceptors.register_mutate(gvk.clone(), interceptor.clone());
        interceptors.register_validate(gvk, interceptor);
        interceptors
    }

    pub fn register_mutate(&mut self, gvk: Gvk, interceptor: Arc<dyn MutateInterceptor>) {
        self.mutating.insert(gvk, interceptor);
    }

    pub fn register_validate(&mut self, gvk: Gvk, interceptor: Arc<dyn ValidateInterceptor>) {
        self.validating.insert(gvk, interceptor);
    }

    pub fn mutator(&self, object: &DynamicObject) -> Registration<&dyn MutateInterceptor> {
        match Gvk::of(object).and_then(|gvk| self.mutating.get(&gvk)) {
            Some(interceptor) => Registration::Registered(interceptor.as_ref()),
            None => Registration::Unregistered,
        }
    }

    pub fn validator(&self, object: &DynamicObject) -> Registration<&dyn ValidateInterceptor> {
        match Gvk::of(object).and_then(|gvk| self.validating.get(&gvk)) {
            Some(interceptor) => Registration::Registered(interceptor.as_ref()),
            None => Registration::Unregistered,
        }
    }
}

#[async_trait::async_trait]
impl InterceptionGate for Interceptors {
    async fn on_mutate(
        &self,
        object: &mut DynamicObject,
        old_object: Option<&DynamicObject>,
        operation: &Operation,
    ) -> Result<PatchSet> {
        match self.mutator(object) {
            Registration::Registered(interceptor) => {
                interceptor.on_mutate(object, old_object, operation).await
            }
            Registration::Unregistered => Ok(json_patch::Patch(Vec::new())),
        }
    }

    async fn on_validate(
        &self,
        object: &DynamicObject,
        old_object: Option<&DynamicObject>,
        operation: &Operation,
    ) -> Result<()> {
        match self.validator(object) {
            Registration::Registered(interceptor) => {
                interceptor.on_validate(object, old_object, operation).await
            }
            Registration::Unregistered => Ok(()),
        }
    }
}
