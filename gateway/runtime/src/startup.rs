use crate::{
    admission::Webhooks,
    core::{pipeline::InterceptionGate, Readiness},
    sync::{sync_caches, Caches},
};
use anyhow::Result;
use std::{fmt, sync::Arc};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, info_span, Instrument};

/// The startup phase of the admission server.
///
/// Phases only advance, one step at a time. Admission routes are served only once `Serving`.
#[derive(Clone, Default)]
pub enum Phase {
    #[default]
    Initializing,
    CachesSyncing,
    AwaitingCert,
    Serving(Webhooks),
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("illegal startup transition from {from} to {to}")]
pub struct TransitionError {
    pub from: &'static str,
    pub to: &'static str,
}

/// Drives the startup phase.
#[derive(Debug)]
pub struct Startup(watch::Sender<Phase>);

// === impl Phase ===

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initializing => "Initializing",
            Self::CachesSyncing => "CachesSyncing",
            Self::AwaitingCert => "AwaitingCert",
            Self::Serving(_) => "Serving",
        }
    }

    pub fn webhooks(&self) -> Option<&Webhooks> {
        match self {
            Self::Serving(webhooks) => Some(webhooks),
            _ => None,
        }
    }

    fn ordinal(&self) -> u8 {
        match self {
            Self::Initializing => 0,
            Self::CachesSyncing => 1,
            Self::AwaitingCert => 2,
            Self::Serving(_) => 3,
        }
    }
}

impl fmt::Debug for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// === impl Startup ===

impl Default for Startup {
    fn default() -> Self {
        Self::new()
    }
}

impl Startup {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Phase::Initializing);
        Self(tx)
    }

    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.0.subscribe()
    }

    pub fn phase(&self) -> &'static str {
        self.0.borrow().name()
    }

    /// Moves to `next`, which must directly follow the current phase.
    pub fn advance(&self, next: Phase) -> Result<(), TransitionError> {
        let mut result = Ok(());
        self.0.send_if_modified(|phase| {
            if next.ordinal() != phase.ordinal() + 1 {
                result = Err(TransitionError {
                    from: phase.name(),
                    to: next.name(),
                });
                return false;
            }
            info!(from = phase.name(), to = next.name(), "Advancing");
            *phase = next;
            true
        });
        result
    }
}

/// Brings the admission server from `Initializing` to `Serving`.
///
/// Caches are synced while the certificate is being provisioned. The admission routes are
/// registered only after both have completed. Returns early, without serving, if `shutdown` is
/// signaled first.
pub async fn bootstrap(
    startup: Startup,
    caches: Caches,
    gate: Arc<dyn InterceptionGate>,
    certs: Readiness,
    shutdown: drain::Watch,
) -> Result<()> {
    startup.advance(Phase::CachesSyncing)?;
    let managers = tokio::select! {
        res = sync_caches(&caches).instrument(info_span!("cache_sync")) => res?,
        _ = shutdown.clone().signaled() => return Ok(()),
    };

    startup.advance(Phase::AwaitingCert)?;
    tokio::select! {
        _ = certs.wait().instrument(info_span!("certs")) => {}
        _ = shutdown.signaled() => return Ok(()),
    }

    let webhooks = Webhooks::new(managers.overrides, managers.validates, gate);
    startup.advance(Phase::Serving(webhooks))?;
    Ok(())
}
