use prometheus::{
    opts, register_int_counter_vec_with_registry, register_int_gauge_with_registry,
    IntCounterVec, IntGauge, Registry,
};

const METRICS_NAMESPACE: &str = "optimistic_tx";

fn namespaced(name: &str) -> String {
    format!("{}_{}", METRICS_NAMESPACE, name)
}

/// Metrics for the optimistic transaction coordinator
#[derive(Clone, Debug)]
pub struct CoordinatorMetrics {
    /// Metrics registry for adding new metrics and gathering reports
    registry: Registry,

    pub in_flight_requests: IntGauge,
    pub optimistic_keys: IntGauge,

    // with a label for the outcome, e.g. "confirmed", "reverted", "submission_failed"
    pub outcomes: IntCounterVec,
    // with a label for the callback, "on_submitted", "on_confirmed" or "on_failed"
    pub callback_failures: IntCounterVec,

    /// Time between submission and the last terminal status, in milliseconds
    pub last_confirmation_latency_ms: IntGauge,
}

impl CoordinatorMetrics {
    pub fn new(registry: Registry) -> eyre::Result<Self> {
        let in_flight_requests = register_int_gauge_with_registry!(
            opts!(
                namespaced("in_flight_requests"),
                "The number of requests between submission start and terminal outcome",
            ),
            registry.clone()
        )?;
        let optimistic_keys = register_int_gauge_with_registry!(
            opts!(
                namespaced("optimistic_keys"),
                "The number of keys currently held in the optimistic overlay",
            ),
            registry.clone()
        )?;
        let outcomes = register_int_counter_vec_with_registry!(
            opts!(
                namespaced("outcomes"),
                "The number of requests that reached each terminal outcome",
            ),
            &["outcome"],
            registry.clone()
        )?;
        let callback_failures = register_int_counter_vec_with_registry!(
            opts!(
                namespaced("callback_failures"),
                "The number of caller callbacks that returned an error",
            ),
            &["callback"],
            registry.clone()
        )?;
        let last_confirmation_latency_ms = register_int_gauge_with_registry!(
            opts!(
                namespaced("last_confirmation_latency_ms"),
                "Milliseconds between submission and terminal status of the latest request",
            ),
            registry.clone()
        )?;
        Ok(Self {
            registry,
            in_flight_requests,
            optimistic_keys,
            outcomes,
            callback_failures,
            last_confirmation_latency_ms,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn update_outcome_metric(&self, outcome: &str) {
        self.outcomes.with_label_values(&[outcome]).inc();
    }

    pub fn update_callback_failure_metric(&self, callback: &str) {
        self.callback_failures.with_label_values(&[callback]).inc();
    }

    pub fn set_optimistic_keys(&self, keys: usize) {
        self.optimistic_keys
            .set(i64::try_from(keys).unwrap_or(i64::MAX));
    }

    pub fn set_in_flight_requests(&self, requests: usize) {
        self.in_flight_requests
            .set(i64::try_from(requests).unwrap_or(i64::MAX));
    }

    pub fn set_confirmation_latency(&self, latency: std::time::Duration) {
        self.last_confirmation_latency_ms
            .set(i64::try_from(latency.as_millis()).unwrap_or(i64::MAX));
    }

    /// Metrics registered against a throwaway registry
    pub fn dummy_instance() -> Self {
        // registering into a fresh registry only fails on duplicate names, which we don't have
        #[allow(clippy::unwrap_used)]
        Self::new(Registry::new()).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcomes_are_labelled() {
        let metrics = CoordinatorMetrics::dummy_instance();
        metrics.update_outcome_metric("confirmed");
        metrics.update_outcome_metric("confirmed");
        metrics.update_outcome_metric("reverted");

        assert_eq!(metrics.outcomes.with_label_values(&["confirmed"]).get(), 2);
        assert_eq!(metrics.outcomes.with_label_values(&["reverted"]).get(), 1);
        assert!(!metrics.registry().gather().is_empty());
    }
}
