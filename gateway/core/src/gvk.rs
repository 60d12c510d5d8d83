use kube::core::{DynamicObject, GroupVersionKind};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Identifies a resource type by its API group, version, and kind.
///
/// The core group is represented by an empty `group`.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Gvk {
    pub group: String,
    pub version: String,
    pub kind: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("invalid gvk({0})")]
pub struct InvalidGvk(String);

// === impl Gvk ===

impl Gvk {
    pub fn new(group: impl ToString, version: impl ToString, kind: impl ToString) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
        }
    }

    /// Splits an `apiVersion` string (`group/version` or `version`) and pairs it with `kind`.
    pub fn from_api_version(api_version: &str, kind: impl ToString) -> Self {
        match api_version.split_once('/') {
            Some((group, version)) => Self::new(group, version, kind),
            None => Self::new("", api_version, kind),
        }
    }

    /// Returns the type of a decoded object, if it carries its `apiVersion` and `kind`.
    pub fn of(object: &DynamicObject) -> Option<Self> {
        let types = object.types.as_ref()?;
        if types.api_version.is_empty() || types.kind.is_empty() {
            return None;
        }
        Some(Self::from_api_version(&types.api_version, &types.kind))
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl From<&GroupVersionKind> for Gvk {
    fn from(gvk: &GroupVersionKind) -> Self {
        Self::new(&gvk.group, &gvk.version, &gvk.kind)
    }
}

impl From<&Gvk> for GroupVersionKind {
    fn from(gvk: &Gvk) -> Self {
        GroupVersionKind::gvk(&gvk.group, &gvk.version, &gvk.kind)
    }
}

/// Formats as `Kind/version` for the core group and `Kind/group/version` otherwise.
impl fmt::Display for Gvk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.kind, self.version)
        } else {
            write!(f, "{}/{}/{}", self.kind, self.group, self.version)
        }
    }
}

impl FromStr for Gvk {
    type Err = InvalidGvk;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s.split('/').collect::<Vec<_>>();
        match parts.as_slice() {
            [kind, version] if !kind.is_empty() && !version.is_empty() => {
                Ok(Self::new("", version, kind))
            }
            [kind, group, version]
                if !kind.is_empty() && !group.is_empty() && !version.is_empty() =>
            {
                Ok(Self::new(group, version, kind))
            }
            _ => Err(InvalidGvk(s.to_string())),
        }
    }
}
