use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::error::AppError;

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub checkpoint_graphs_total: IntCounterVec,
    pub tokens_issued_total: IntCounterVec,
    pub token_validations_total: IntCounterVec,
    pub verifications_total: IntCounterVec,
    pub deliveries_completed_total: IntCounter,
    pub deliveries_active: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let checkpoint_graphs_total = IntCounterVec::new(
            Opts::new(
                "checkpoint_graphs_total",
                "Checkpoint graph builds by outcome (created/existing/error)",
            ),
            &["outcome"],
        )
        .expect("valid checkpoint_graphs_total metric");

        let tokens_issued_total = IntCounterVec::new(
            Opts::new(
                "tokens_issued_total",
                "Delivery location token requests by outcome (issued/reused)",
            ),
            &["outcome"],
        )
        .expect("valid tokens_issued_total metric");

        let token_validations_total = IntCounterVec::new(
            Opts::new(
                "token_validations_total",
                "Token validations by outcome (granted/denied)",
            ),
            &["outcome"],
        )
        .expect("valid token_validations_total metric");

        let verifications_total = IntCounterVec::new(
            Opts::new(
                "verifications_total",
                "Verification rows written by resulting status",
            ),
            &["status"],
        )
        .expect("valid verifications_total metric");

        let deliveries_completed_total = IntCounter::new(
            "deliveries_completed_total",
            "Deliveries closed out by the completion check",
        )
        .expect("valid deliveries_completed_total metric");

        let deliveries_active = IntGauge::new(
            "deliveries_active",
            "Deliveries created and not yet completed",
        )
        .expect("valid deliveries_active metric");

        registry
            .register(Box::new(checkpoint_graphs_total.clone()))
            .expect("register checkpoint_graphs_total");
        registry
            .register(Box::new(tokens_issued_total.clone()))
            .expect("register tokens_issued_total");
        registry
            .register(Box::new(token_validations_total.clone()))
            .expect("register token_validations_total");
        registry
            .register(Box::new(verifications_total.clone()))
            .expect("register verifications_total");
        registry
            .register(Box::new(deliveries_completed_total.clone()))
            .expect("register deliveries_completed_total");
        registry
            .register(Box::new(deliveries_active.clone()))
            .expect("register deliveries_active");

        Self {
            registry,
            checkpoint_graphs_total,
            tokens_issued_total,
            token_validations_total,
            verifications_total,
            deliveries_completed_total,
            deliveries_active,
        }
    }

    /// Text exposition of every registered family.
    pub fn encode(&self) -> Result<String, AppError> {
        let mut exposition = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut exposition)
            .map_err(|err| AppError::Internal(format!("metrics encoding: {err}")))?;

        String::from_utf8(exposition)
            .map_err(|err| AppError::Internal(format!("metrics exposition: {err}")))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::Metrics;

    #[test]
    fn exposition_lists_labelled_series_once_touched() {
        let metrics = Metrics::new();
        metrics.verifications_total.with_label_values(&["complete"]).inc();
        metrics.deliveries_active.set(2);

        let text = metrics.encode().unwrap();
        assert!(text.contains("verifications_total{status=\"complete\"} 1"));
        assert!(text.contains("deliveries_active 2"));
        assert!(!text.contains("tokens_issued_total{"));
    }
}
