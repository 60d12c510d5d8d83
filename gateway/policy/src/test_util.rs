use admission_gateway_core::{Gvk, Lister};
use admission_gateway_k8s_api::DynamicObject;
use parking_lot::Mutex;
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};

/// A lister over a fixed set of objects.
#[derive(Default)]
pub(crate) struct FakeLister(Mutex<HashMap<Gvk, Vec<Arc<DynamicObject>>>>);

impl FakeLister {
    pub(crate) fn with(objects: impl IntoIterator<Item = Value>) -> Self {
        let lister = Self::default();
        for obj in objects {
            lister.insert(obj);
        }
        lister
    }

    pub(crate) fn insert(&self, obj: Value) {
        let obj = object(obj);
        let gvk = Gvk::of(&obj).expect("fixtures must be typed");
        self.0.lock().entry(gvk).or_default().push(Arc::new(obj));
    }
}

impl Lister for FakeLister {
    fn list(&self, gvk: &Gvk) -> Vec<Arc<DynamicObject>> {
        self.0.lock().get(gvk).cloned().unwrap_or_default()
    }
}

pub(crate) fn object(obj: Value) -> DynamicObject {
    serde_json::from_value(obj).expect("fixtures must be valid objects")
}
