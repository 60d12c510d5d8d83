use crate::core::{CacheSyncResult, DynamicObject, Gvk, Lister, ResourceWatch};
use anyhow::{bail, Result};
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// A resource watch whose kinds sync immediately unless configured otherwise.
#[derive(Default)]
pub(crate) struct FakeWatch {
    /// Kinds that fail registration.
    pub failing: Vec<Gvk>,
    /// Kinds that never sync.
    pub unsynced: Vec<Gvk>,
    /// Whether waiting for caches to sync never completes.
    pub hang: bool,
    pub registered: Mutex<Vec<Gvk>>,
    pub starts: AtomicUsize,
}

impl Lister for FakeWatch {
    fn list(&self, _: &Gvk) -> Vec<Arc<DynamicObject>> {
        Vec::new()
    }
}

#[async_trait::async_trait]
impl ResourceWatch for FakeWatch {
    async fn register(&self, kinds: &[Gvk]) -> Result<()> {
        for gvk in kinds {
            if self.failing.contains(gvk) {
                bail!("unknown kind {gvk}");
            }
            let mut registered = self.registered.lock();
            if !registered.contains(gvk) {
                registered.push(gvk.clone());
            }
        }
        Ok(())
    }

    fn start(&self) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    async fn wait_synced(&self) -> CacheSyncResult {
        if self.hang {
            futures::future::pending::<()>().await;
        }
        self.registered
            .lock()
            .iter()
            .map(|gvk| (gvk.clone(), !self.unsynced.contains(gvk)))
            .collect()
    }
}
