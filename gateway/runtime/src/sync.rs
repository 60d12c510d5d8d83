use crate::{
    core::{
        pipeline::{OverridePipeline, ValidationPipeline},
        CacheSyncResult, Gvk, Lister, ResourceWatch,
    },
    policy::{OverrideManager, PolicyMetrics, ValidateManager},
};
use anyhow::Result;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, info_span, Instrument};

/// The caches that must be synced before admission requests are served.
pub struct Caches {
    pub watches: Arc<dyn ResourceWatch>,
    /// Reads the objects cached by `watches`.
    pub lister: Arc<dyn Lister>,
    /// Kinds cached ahead of time so that policies can reference them.
    pub precache: Vec<Gvk>,
    pub metrics: PolicyMetrics,
}

/// The policy engines built from synced caches.
pub struct Managers {
    pub overrides: Arc<dyn OverridePipeline>,
    pub validates: Arc<dyn ValidationPipeline>,
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("caches not synced: {}", join(.0))]
    Unsynced(Vec<Gvk>),
}

/// Syncs the pre-cached kinds and the policy caches concurrently.
///
/// Fails on the first sub-task to fail, dropping the others.
pub async fn sync_caches(caches: &Caches) -> Result<Managers> {
    let precache = watch_kinds(&*caches.watches, &caches.precache).instrument(info_span!("precache"));

    let overrides = async {
        watch_kinds(&*caches.watches, &OverrideManager::kinds()).await?;
        let manager = OverrideManager::new(caches.lister.clone(), caches.metrics.clone());
        Ok::<_, anyhow::Error>(Arc::new(manager) as Arc<dyn OverridePipeline>)
    }
    .instrument(info_span!("overridepolicies"));

    let validates = async {
        watch_kinds(&*caches.watches, &ValidateManager::kinds()).await?;
        let manager = ValidateManager::new(caches.lister.clone(), caches.metrics.clone());
        Ok::<_, anyhow::Error>(Arc::new(manager) as Arc<dyn ValidationPipeline>)
    }
    .instrument(info_span!("validatepolicies"));

    let ((), overrides, validates) = tokio::try_join!(precache, overrides, validates)?;
    Ok(Managers {
        overrides,
        validates,
    })
}

async fn watch_kinds(watches: &dyn ResourceWatch, kinds: &[Gvk]) -> Result<()> {
    if kinds.is_empty() {
        return Ok(());
    }

    watches.register(kinds).await?;
    watches.start();
    let synced = watches.wait_synced().await;
    ensure_synced(&synced, kinds)?;
    info!(kinds = %join(kinds), "Synced");
    Ok(())
}

/// Fails unless every kind in `required` is synced.
pub fn ensure_synced(result: &CacheSyncResult, required: &[Gvk]) -> Result<(), StartupError> {
    let unsynced = result.unsynced(required).cloned().collect::<Vec<_>>();
    if unsynced.is_empty() {
        return Ok(());
    }
    Err(StartupError::Unsynced(unsynced))
}

fn join(kinds: &[Gvk]) -> String {
    kinds
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::FakeWatch;
    use std::{sync::atomic::Ordering, time::Duration};

    fn caches(watch: Arc<FakeWatch>, precache: &[&str]) -> Caches {
        Caches {
            watches: watch.clone(),
            lister: watch,
            precache: precache.iter().map(|k| k.parse().unwrap()).collect(),
            metrics: PolicyMetrics::default(),
        }
    }

    #[tokio::test]
    async fn syncs_every_kind() {
        let watch = Arc::new(FakeWatch::default());
        sync_caches(&caches(watch.clone(), &["Pod/v1", "Deployment/apps/v1"]))
            .await
            .unwrap();

        let mut registered = watch.registered.lock().clone();
        registered.sort();
        let mut expected = vec![
            Gvk::new("", "v1", "Pod"),
            Gvk::new("apps", "v1", "Deployment"),
        ];
        expected.extend(OverrideManager::kinds());
        expected.extend(ValidateManager::kinds());
        expected.sort();
        assert_eq!(registered, expected);
        assert_eq!(watch.starts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unsynced_policies_fail() {
        let watch = Arc::new(FakeWatch {
            unsynced: ValidateManager::kinds(),
            ..Default::default()
        });
        let err = sync_caches(&caches(watch, &[])).await.err().expect("sync must fail");
        assert!(
            err.to_string().contains("ClusterValidatePolicy"),
            "{err:#}"
        );
    }

    #[tokio::test]
    async fn first_failure_cancels_pending_syncs() {
        // Registration of the pre-cached kind fails while the policy caches never sync.
        let watch = Arc::new(FakeWatch {
            failing: vec!["Widget/example.com/v1".parse().unwrap()],
            hang: true,
            ..Default::default()
        });
        let res = tokio::time::timeout(
            Duration::from_secs(10),
            sync_caches(&caches(watch, &["Widget/example.com/v1"])),
        )
        .await
        .expect("sync must not wait for pending caches");
        assert!(res.is_err());
    }

    #[test]
    fn ensure_synced_lists_missing_kinds() {
        let pods = Gvk::new("", "v1", "Pod");
        let nodes = Gvk::new("", "v1", "Node");
        let result = maplit::btreemap! { pods.clone() => true }
            .into_iter()
            .collect::<CacheSyncResult>();

        ensure_synced(&result, &[pods.clone()]).unwrap();
        let err = ensure_synced(&result, &[pods, nodes]).unwrap_err();
        assert_eq!(err.to_string(), "caches not synced: Node/v1");
    }
}
