#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod admission;
mod args;
mod cert;
mod metrics;
mod router;
mod startup;
mod sync;

#[cfg(test)]
mod test_util;

pub use self::{
    admission::Webhooks,
    args::Args,
    cert::{SecretCertRotator, StaticCerts},
    metrics::AdmissionMetrics,
    router::Router,
    startup::{bootstrap, Phase, Startup, TransitionError},
    sync::{ensure_synced, sync_caches, Caches, Managers, StartupError},
};
pub use admission_gateway_core as core;
pub use admission_gateway_k8s_api as k8s;
pub use admission_gateway_k8s_cache as cache;
pub use admission_gateway_policy as policy;
