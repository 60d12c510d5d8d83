use crate::PatchSet;
use http::StatusCode;
use json_patch::PatchOperation;
use kube::core::DynamicObject;
use serde_json::Value;

/// The outcome of an admission request.
#[derive(Debug)]
pub enum Decision {
    Allowed,

    /// Allowed, with a patch to apply before the object is persisted. An empty patch means the
    /// object is admitted unchanged.
    Patched(PatchSet),

    Denied(String),

    Errored {
        status: StatusCode,
        cause: anyhow::Error,
    },
}

// === impl Decision ===

impl Decision {
    pub fn bad_request(cause: impl Into<anyhow::Error>) -> Self {
        Self::Errored {
            status: StatusCode::BAD_REQUEST,
            cause: cause.into(),
        }
    }

    pub fn internal(cause: impl Into<anyhow::Error>) -> Self {
        Self::Errored {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            cause: cause.into(),
        }
    }

    /// A short label describing the outcome.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::Patched(patch) if patch.0.is_empty() => "allowed",
            Self::Patched(_) => "patched",
            Self::Denied(_) => "denied",
            Self::Errored { .. } => "errored",
        }
    }
}

/// Computes the JSON patch that turns the `original` request document into `patched`.
///
/// Decoding drops metadata fields that were sent as explicit nulls (e.g. `creationTimestamp` on
/// create). Removing a null is a no-op for the API server, so those operations are elided.
pub fn diff(original: &Value, patched: &DynamicObject) -> serde_json::Result<PatchSet> {
    let patched = serde_json::to_value(patched)?;
    let json_patch::Patch(ops) = json_patch::diff(original, &patched);
    let ops = ops
        .into_iter()
        .filter(|op| match op {
            PatchOperation::Remove(remove) => {
                original.pointer(&remove.path.to_string()) != Some(&Value::Null)
            }
            _ => true,
        })
        .collect();
    Ok(json_patch::Patch(ops))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pod() -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": "web", "namespace": "default", "creationTimestamp": null },
            "spec": { "containers": [{ "name": "app", "image": "app:v1" }] },
        })
    }

    #[test]
    fn unchanged_object_yields_empty_patch() {
        let original = pod();
        let object: DynamicObject = serde_json::from_value(original.clone()).unwrap();
        let patch = diff(&original, &object).unwrap();
        assert!(patch.0.is_empty(), "{patch:?}");
    }

    #[test]
    fn changed_field_yields_single_replace() {
        let original = pod();
        let mut object: DynamicObject = serde_json::from_value(original.clone()).unwrap();
        object.data["spec"]["containers"][0]["image"] = json!("app:v2");
        let patch = diff(&original, &object).unwrap();
        assert_eq!(
            serde_json::to_value(&patch).unwrap(),
            json!([{ "op": "replace", "path": "/spec/containers/0/image", "value": "app:v2" }])
        );
    }

    #[test]
    fn outcomes() {
        assert_eq!(Decision::Allowed.outcome(), "allowed");
        assert_eq!(Decision::Patched(json_patch::Patch(Vec::new())).outcome(), "allowed");
        assert_eq!(Decision::Denied("no".into()).outcome(), "denied");
        let errored = Decision::bad_request(anyhow::anyhow!("bad"));
        assert_eq!(errored.outcome(), "errored");
    }
}
