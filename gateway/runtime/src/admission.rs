use crate::core::{
    decode, diff,
    pipeline::{InterceptionGate, OverridePipeline, ValidationPipeline},
    AdmissionRequest, Decision, DecodedPair, DynamicObject, Gvk, Operation,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, trace, warn};

pub(crate) type KubeRequest = kube::core::admission::AdmissionRequest<DynamicObject>;
pub(crate) type AdmissionResponse = kube::core::admission::AdmissionResponse;
type AdmissionReview = kube::core::admission::AdmissionReview<DynamicObject>;

/// The mutating and validating admission handlers.
#[derive(Clone)]
pub struct Webhooks {
    overrides: Arc<dyn OverridePipeline>,
    validates: Arc<dyn ValidationPipeline>,
    gate: Arc<dyn InterceptionGate>,
}

/// A parsed admission review.
#[derive(Debug)]
pub(crate) struct Review {
    /// The review's request, without its objects.
    pub request: KubeRequest,
    pub admission: AdmissionRequest,
}

// === impl Webhooks ===

impl Webhooks {
    pub fn new(
        overrides: Arc<dyn OverridePipeline>,
        validates: Arc<dyn ValidationPipeline>,
        gate: Arc<dyn InterceptionGate>,
    ) -> Self {
        Self {
            overrides,
            validates,
            gate,
        }
    }

    /// Computes the patch to apply to the admitted object.
    pub async fn mutate(&self, req: &AdmissionRequest) -> Decision {
        let DecodedPair {
            mut object,
            old_object,
        } = match decode(req) {
            Ok(pair) => pair,
            Err(error) => return Decision::bad_request(error),
        };

        // Deletions are never mutated.
        if let Operation::Delete = req.operation {
            return Decision::Allowed;
        }

        let patches = match self
            .gate
            .on_mutate(&mut object, old_object.as_ref(), &req.operation)
            .await
        {
            Ok(patches) => patches,
            Err(error) => return Decision::internal(error),
        };
        if !patches.0.is_empty() {
            debug!(patches = patches.0.len(), "Intercepted");
            return patch_against(req.object.as_ref(), &object);
        }

        match self
            .overrides
            .apply(&mut object, old_object.as_ref(), &req.operation)
            .await
        {
            Ok(applied) => debug!(
                cluster = ?applied.cluster,
                namespaced = ?applied.namespaced,
                "Override policies applied"
            ),
            Err(error) => return Decision::internal(error),
        }

        patch_against(req.object.as_ref(), &object)
    }

    /// Decides whether the admitted object is accepted.
    pub async fn validate(&self, req: &AdmissionRequest) -> Decision {
        let DecodedPair { object, old_object } = match decode(req) {
            Ok(pair) => pair,
            Err(error) => return Decision::bad_request(error),
        };

        if let Err(veto) = self
            .gate
            .on_validate(&object, old_object.as_ref(), &req.operation)
            .await
        {
            return Decision::Denied(veto.to_string());
        }

        match self
            .validates
            .apply(&object, old_object.as_ref(), &req.operation)
            .await
        {
            Ok(verdict) if verdict.valid => Decision::Allowed,
            Ok(verdict) => Decision::Denied(verdict.reason),
            Err(error) => Decision::internal(error),
        }
    }
}

impl std::fmt::Debug for Webhooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Webhooks").finish_non_exhaustive()
    }
}

fn patch_against(original: Option<&Value>, patched: &DynamicObject) -> Decision {
    let Some(original) = original else {
        return Decision::bad_request(anyhow::anyhow!("admission request missing 'object'"));
    };
    match diff(original, patched) {
        Ok(patch) => {
            trace!(?patch);
            Decision::Patched(patch)
        }
        Err(error) => Decision::internal(error),
    }
}

// === impl Review ===

impl Review {
    /// Parses an admission review, retaining its objects exactly as they were sent.
    pub(crate) fn parse(bytes: &[u8]) -> anyhow::Result<Self> {
        let mut review = serde_json::from_slice::<Value>(bytes)?;
        let object = take(&mut review, "/request/object");
        let old_object = take(&mut review, "/request/oldObject");

        let review = serde_json::from_value::<AdmissionReview>(review)?;
        let request: KubeRequest = review.try_into()?;
        let admission = AdmissionRequest {
            operation: request.operation.clone(),
            gvk: Gvk::from(&request.kind),
            object,
            old_object,
        };
        Ok(Self { request, admission })
    }
}

fn take(review: &mut Value, pointer: &str) -> Option<Value> {
    review
        .pointer_mut(pointer)
        .map(Value::take)
        .filter(|v| !v.is_null())
}

/// Converts a decision into the response sent to the API server.
pub(crate) fn respond(req: &KubeRequest, decision: Decision) -> AdmissionResponse {
    let rsp = AdmissionResponse::from(req);
    match decision {
        Decision::Allowed => rsp,
        Decision::Patched(patch) if patch.0.is_empty() => rsp,
        Decision::Patched(patch) => match rsp.with_patch(patch) {
            Ok(rsp) => rsp,
            Err(error) => {
                warn!(%error, "Failed to serialize patch");
                errored(req, http::StatusCode::INTERNAL_SERVER_ERROR, &error)
            }
        },
        Decision::Denied(reason) => rsp.deny(reason),
        Decision::Errored { status, cause } => errored(req, status, &*cause),
    }
}

fn errored(
    req: &KubeRequest,
    status: http::StatusCode,
    cause: &(dyn std::error::Error + 'static),
) -> AdmissionResponse {
    let mut rsp = AdmissionResponse::from(req).deny(cause);
    rsp.result.code = status.as_u16();
    rsp
}
