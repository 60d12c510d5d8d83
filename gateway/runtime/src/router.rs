use crate::{
    admission::{respond, AdmissionResponse, Review},
    core::Decision,
    metrics::AdmissionMetrics,
    startup::Phase,
};
use futures::future;
use http_body_util::BodyExt;
use hyper::{http, Request, Response};
use tokio::{sync::watch, time::Instant};
use tracing::{debug, info, info_span, trace, warn, Instrument};

type Body = http_body_util::Full<bytes::Bytes>;
type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Serves the admission webhooks and health probes.
///
/// Admission routes and the readiness probe are only available once startup is complete.
#[derive(Clone, Debug)]
pub struct Router {
    phase: watch::Receiver<Phase>,
    metrics: AdmissionMetrics,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read request body: {0}")]
    Body(#[source] BoxError),

    #[error("failed to encode json response: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Route {
    Healthz,
    Readyz,
    Mutate,
    Validate,
}

// === impl Router ===

impl Router {
    pub fn new(phase: watch::Receiver<Phase>, metrics: AdmissionMetrics) -> Self {
        Self { phase, metrics }
    }
}

impl<B> tower::Service<Request<B>> for Router
where
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    type Response = Response<Body>;
    type Error = Error;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        trace!(method = %req.method(), path = %req.uri().path());
        let route = match req.uri().path() {
            "/healthz" => Route::Healthz,
            "/readyz" => Route::Readyz,
            "/mutate" => Route::Mutate,
            "/validate" => Route::Validate,
            _ => return Box::pin(future::ok(status(http::StatusCode::NOT_FOUND))),
        };

        if let Route::Healthz = route {
            return Box::pin(future::ok(probe(req.method())));
        }

        // Admission routes are registered once startup completes.
        let Some(webhooks) = self.phase.borrow().webhooks().cloned() else {
            return Box::pin(future::ok(status(http::StatusCode::NOT_FOUND)));
        };

        let webhook = match route {
            Route::Mutate => "mutate",
            Route::Validate => "validate",
            _ => return Box::pin(future::ok(probe(req.method()))),
        };
        if req.method() != http::Method::POST {
            return Box::pin(future::ok(status(http::StatusCode::METHOD_NOT_ALLOWED)));
        }

        let metrics = self.metrics.clone();
        Box::pin(async move {
            let bytes = req
                .into_body()
                .collect()
                .await
                .map_err(|e| Error::Body(e.into()))?
                .to_bytes();

            let review = match Review::parse(&bytes) {
                Ok(review) => review,
                Err(error) => {
                    warn!(%error, "Invalid admission review");
                    return json_response(AdmissionResponse::invalid(error).into_review());
                }
            };

            let span = info_span!(
                "admission",
                webhook,
                kind = %review.admission.gvk,
                op = ?review.admission.operation,
                ns = review.request.namespace.as_deref().unwrap_or_default(),
                name = %review.request.name,
            );
            async move {
                let start = Instant::now();
                let decision = match route {
                    Route::Mutate => webhooks.mutate(&review.admission).await,
                    _ => webhooks.validate(&review.admission).await,
                };
                metrics.observe(webhook, &decision, start.elapsed());

                match &decision {
                    Decision::Denied(reason) => info!(%reason, "Denied"),
                    Decision::Errored { status, cause } => {
                        warn!(%status, error = %format_args!("{cause:#}"), "Failed")
                    }
                    decision => debug!(outcome = decision.outcome()),
                }
                json_response(respond(&review.request, decision).into_review())
            }
            .instrument(span)
            .await
        })
    }
}

fn probe(method: &http::Method) -> Response<Body> {
    if method == http::Method::GET || method == http::Method::HEAD {
        return Response::builder()
            .status(http::StatusCode::OK)
            .body(Body::from("ok\n"))
            .expect("probe response must be valid");
    }
    status(http::StatusCode::METHOD_NOT_ALLOWED)
}

fn status(code: http::StatusCode) -> Response<Body> {
    Response::builder()
        .status(code)
        .body(Body::default())
        .expect("status response must be valid")
}

fn json_response(
    rsp: kube::core::admission::AdmissionReview<kube::core::DynamicObject>,
) -> Result<Response<Body>, Error> {
    let bytes = serde_json::to_vec(&rsp)?;
    Ok(Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .expect("admission review response must be valid"))
}
