use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{family::Family, gauge::Gauge},
    registry::Registry,
};

/// Tracks the number of cached policies of each kind.
#[derive(Clone, Debug, Default)]
pub struct PolicyMetrics {
    policies: Family<KindLabels, Gauge>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct KindLabels {
    kind: String,
}

// === impl PolicyMetrics ===

impl PolicyMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let policies = Family::<KindLabels, Gauge>::default();
        reg.register(
            "policies",
            "Number of cached policies by kind",
            policies.clone(),
        );
        Self { policies }
    }

    pub(crate) fn observe(&self, kind: &str, count: usize) {
        let labels = KindLabels {
            kind: kind.to_string(),
        };
        self.policies
            .get_or_create(&labels)
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::encoding::text::encode;

    #[test]
    fn reports_latest_count() {
        let mut reg = Registry::default();
        let metrics = PolicyMetrics::register(&mut reg);
        metrics.observe("OverridePolicy", 3);
        metrics.observe("OverridePolicy", 2);

        let mut out = String::new();
        encode(&mut out, &reg).unwrap();
        assert!(out.contains("policies{kind=\"OverridePolicy\"} 2"), "{out}");
    }
}
