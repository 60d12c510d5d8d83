#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod cert;
mod decision;
mod decode;
mod gvk;
pub mod pipeline;
mod readiness;
pub mod watch;

pub use self::{
    cert::{CertOptions, CertRotator, WebhookInfo, WebhookType},
    decision::{diff, Decision},
    decode::{decode, AdmissionRequest, DecodeError, DecodedPair},
    gvk::{Gvk, InvalidGvk},
    readiness::Readiness,
    watch::{CacheSyncResult, Lister, ResourceWatch},
};
pub use json_patch::Patch as PatchSet;
pub use kube::core::{admission::Operation, DynamicObject};
