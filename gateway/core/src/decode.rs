use crate::Gvk;
use kube::core::{admission::Operation, DynamicObject};
use serde_json::Value;
use thiserror::Error;

/// An admission request as received from the API server.
///
/// `object` and `old_object` hold the documents exactly as they were sent so that patches can be
/// computed against the original payload.
#[derive(Clone, Debug)]
pub struct AdmissionRequest {
    pub operation: Operation,
    pub gvk: Gvk,
    pub object: Option<Value>,
    pub old_object: Option<Value>,
}

/// The objects an admission request refers to.
///
/// For a create, only `object` is set. For an update, `object` holds the new state and
/// `old_object` the prior state. For a delete, `object` holds the last known state of the deleted
/// resource.
#[derive(Clone, Debug)]
pub struct DecodedPair {
    pub object: DynamicObject,
    pub old_object: Option<DynamicObject>,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unsupported operation: {0:?}")]
    UnsupportedOperation(Operation),

    #[error("admission request missing '{0}'")]
    Missing(&'static str),

    #[error("failed to decode '{field}': {source}")]
    Invalid {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The new object of an update was decoded but its old object was not.
    #[error("{error}")]
    Partial {
        object: Box<DynamicObject>,
        error: Box<DecodeError>,
    },
}

/// Decodes the objects of an admission request according to its operation.
pub fn decode(req: &AdmissionRequest) -> Result<DecodedPair, DecodeError> {
    match req.operation {
        Operation::Create => Ok(DecodedPair {
            object: decode_field("object", req.object.as_ref())?,
            old_object: None,
        }),

        Operation::Update => {
            let object = decode_field("object", req.object.as_ref())?;
            match decode_field("oldObject", req.old_object.as_ref()) {
                Ok(old_object) => Ok(DecodedPair {
                    object,
                    old_object: Some(old_object),
                }),
                Err(error) => Err(DecodeError::Partial {
                    object: Box::new(object),
                    error: Box::new(error),
                }),
            }
        }

        // Deletions carry the deleted resource in `oldObject`.
        Operation::Delete => Ok(DecodedPair {
            object: decode_field("oldObject", req.old_object.as_ref())?,
            old_object: None,
        }),

        ref op => Err(DecodeError::UnsupportedOperation(op.clone())),
    }
}

fn decode_field(field: &'static str, raw: Option<&Value>) -> Result<DynamicObject, DecodeError> {
    let raw = raw
        .filter(|v| !v.is_null())
        .ok_or(DecodeError::Missing(field))?;
    serde_json::from_value(raw.clone()).map_err(|source| DecodeError::Invalid { field, source })
}

// === impl DecodeError ===

impl DecodeError {
    /// Returns the object that was decoded before the failure, if any.
    pub fn object(&self) -> Option<&DynamicObject> {
        match self {
            Self::Partial { object, .. } => Some(object.as_ref()),
            _ => None,
        }
    }
}
