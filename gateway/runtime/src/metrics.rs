use crate::core::Decision;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, histogram::Histogram},
    registry::{Registry, Unit},
};
use tokio::time::Duration;

#[derive(Clone, Debug)]
pub struct AdmissionMetrics {
    requests: Family<RequestLabels, Counter>,
    durations: Family<WebhookLabels, Histogram>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct RequestLabels {
    webhook: &'static str,
    outcome: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct WebhookLabels {
    webhook: &'static str,
}

// === impl AdmissionMetrics ===

impl AdmissionMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let requests = Family::<RequestLabels, Counter>::default();
        reg.register(
            "requests",
            "Total number of admission requests by outcome",
            requests.clone(),
        );

        let durations = Family::<WebhookLabels, Histogram>::new_with_constructor(|| {
            // The API server times out webhook calls after 10s by default.
            Histogram::new([0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0])
        });
        reg.register_with_unit(
            "request_duration",
            "Time taken to decide admission requests",
            Unit::Seconds,
            durations.clone(),
        );

        Self {
            requests,
            durations,
        }
    }

    pub(crate) fn observe(&self, webhook: &'static str, decision: &Decision, elapsed: Duration) {
        self.requests
            .get_or_create(&RequestLabels {
                webhook,
                outcome: decision.outcome(),
            })
            .inc();
        self.durations
            .get_or_create(&WebhookLabels { webhook })
            .observe(elapsed.as_secs_f64());
    }
}
