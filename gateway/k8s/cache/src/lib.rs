#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

use admission_gateway_core::{CacheSyncResult, Gvk, Lister, ResourceWatch};
use admission_gateway_k8s_api::Scheme;
use anyhow::{Context, Result};
use futures::prelude::*;
use kube::{
    api::Api,
    core::{ApiResource, DynamicObject, GroupVersionKind},
    runtime::{
        reflector::{reflector, store::Writer, Store},
        watcher, WatchStreamExt,
    },
    Client,
};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::watch;
use tracing::{debug, info, info_span, warn, Instrument};

/// Caches objects of dynamically registered kinds.
///
/// Each registered kind is backed by a reflector store. Stores are populated once the kind's
/// watch is started and are read concurrently by listers.
pub struct Watches {
    client: Client,
    scheme: Arc<Scheme>,
    stop: watch::Receiver<bool>,
    kinds: Mutex<HashMap<Gvk, Entry>>,
}

struct Entry {
    resource: ApiResource,
    reader: Store<DynamicObject>,
    /// Taken when the kind's watch is started.
    writer: Option<Writer<DynamicObject>>,
}

// === impl Watches ===

impl Watches {
    /// Watches stop when `shutdown` is signaled.
    pub fn new(client: Client, scheme: Arc<Scheme>, shutdown: drain::Watch) -> Self {
        let (stop_tx, stop) = watch::channel(false);
        tokio::spawn(async move {
            let _release = shutdown.signaled().await;
            let _ = stop_tx.send(true);
        });

        Self {
            client,
            scheme,
            stop,
            kinds: Mutex::new(HashMap::new()),
        }
    }

    async fn resolve(&self, gvk: &Gvk) -> Result<ApiResource> {
        if let Some(resource) = self.scheme.get(gvk) {
            return Ok(resource.clone());
        }

        let (resource, _) = kube::discovery::pinned_kind(&self.client, &GroupVersionKind::from(gvk))
            .await
            .with_context(|| format!("failed to discover {gvk}"))?;
        Ok(resource)
    }
}

impl Lister for Watches {
    fn list(&self, gvk: &Gvk) -> Vec<Arc<DynamicObject>> {
        match self.kinds.lock().get(gvk) {
            Some(entry) => entry.reader.state(),
            None => Vec::new(),
        }
    }
}

#[async_trait::async_trait]
impl ResourceWatch for Watches {
    async fn register(&self, kinds: &[Gvk]) -> Result<()> {
        for gvk in kinds {
            let known = self.kinds.lock().contains_key(gvk);
            if known {
                continue;
            }

            let resource = self.resolve(gvk).await?;
            let writer = Writer::new(resource.clone());
            let reader = writer.as_reader();
            self.kinds.lock().entry(gvk.clone()).or_insert(Entry {
                resource,
                reader,
                writer: Some(writer),
            });
            debug!(kind = %gvk, "Registered");
        }
        Ok(())
    }

    fn start(&self) {
        let mut kinds = self.kinds.lock();
        for (gvk, entry) in kinds.iter_mut() {
            let Some(writer) = entry.writer.take() else {
                continue;
            };

            let api = Api::<DynamicObject>::all_with(self.client.clone(), &entry.resource);
            let stream = watcher(api, watcher::Config::default()).default_backoff();
            let objects = reflector(writer, stream)
                .applied_objects()
                .for_each(|res| {
                    if let Err(error) = res {
                        warn!(%error, "Watch failed");
                    }
                    future::ready(())
                });

            let mut stop = self.stop.clone();
            tokio::spawn(
                async move {
                    tokio::select! {
                        _ = objects => {}
                        _ = stop.wait_for(|stop| *stop) => debug!("Stopped"),
                    }
                }
                .instrument(info_span!("watch", kind = %gvk)),
            );
            info!(kind = %gvk, "Watching");
        }
    }

    async fn wait_synced(&self) -> CacheSyncResult {
        let stores = self
            .kinds
            .lock()
            .iter()
            .map(|(gvk, entry)| (gvk.clone(), entry.reader.clone(), entry.writer.is_none()))
            .collect::<Vec<_>>();

        let synced = stores.into_iter().map(|(gvk, reader, started)| async move {
            // A store that is never written never becomes ready.
            if !started {
                return (gvk, false);
            }
            let synced = reader.wait_until_ready().await.is_ok();
            (gvk, synced)
        });
        future::join_all(synced).await.into_iter().collect()
    }
}
