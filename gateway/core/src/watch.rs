use crate::Gvk;
use anyhow::Result;
use kube::core::DynamicObject;
use std::{collections::BTreeMap, sync::Arc};

/// Reads cached objects of a watched kind.
pub trait Lister: Send + Sync + 'static {
    /// Returns every cached object of `gvk`. Kinds that are not watched have no objects.
    fn list(&self, gvk: &Gvk) -> Vec<Arc<DynamicObject>>;
}

/// Maintains local caches of cluster resources.
#[async_trait::async_trait]
pub trait ResourceWatch: Lister {
    /// Registers kinds to be cached. Registering a kind twice has no effect.
    async fn register(&self, kinds: &[Gvk]) -> Result<()>;

    /// Starts watching every registered kind that is not already being watched.
    fn start(&self);

    /// Waits for the caches of all registered kinds to receive their initial listing.
    async fn wait_synced(&self) -> CacheSyncResult;
}

/// Whether each watched kind's cache holds its initial listing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheSyncResult(BTreeMap<Gvk, bool>);

// === impl CacheSyncResult ===

impl CacheSyncResult {
    pub fn insert(&mut self, gvk: Gvk, synced: bool) {
        self.0.insert(gvk, synced);
    }

    /// Unknown kinds are not synced.
    pub fn is_synced(&self, gvk: &Gvk) -> bool {
        self.0.get(gvk).copied().unwrap_or(false)
    }

    /// Returns the kinds in `required` that are not synced.
    pub fn unsynced<'a>(&'a self, required: &'a [Gvk]) -> impl Iterator<Item = &'a Gvk> + 'a {
        required.iter().filter(move |gvk| !self.is_synced(gvk))
    }
}

impl FromIterator<(Gvk, bool)> for CacheSyncResult {
    fn from_iter<T: IntoIterator<Item = (Gvk, bool)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
