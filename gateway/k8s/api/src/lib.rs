#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod labels;
pub mod policy;
mod scheme;

pub use self::scheme::{gvk, Scheme};
pub use kube::core::{ApiResource, DynamicObject, Resource, ResourceExt};
