use opentelemetry::metrics::{Meter, ObservableGauge};
use opentelemetry::Key;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{event, instrument, Level};

#[cfg(test)]
use mockall::mock;

const NODE_DRAIN_FAILED_METRIC: &str = "nodekeeper_node_drain_failed";
const POLICY_KEY: Key = Key::from_static_str("policy");

/// Sink for the signals the drain controller raises about failing node drains.
pub trait DrainMetrics: Send + Sync {
    /// Marks drains governed by the given upgrade policy as failing.
    fn node_drain_failed(&self, policy_name: &str);
    /// Clears a failure previously raised for the given upgrade policy.
    fn reset_node_drain_failed(&self, policy_name: &str);
}

#[cfg(test)]
mock! {
    pub DrainMetrics {}
    impl DrainMetrics for DrainMetrics {
        fn node_drain_failed(&self, policy_name: &str);
        fn reset_node_drain_failed(&self, policy_name: &str);
    }
}

/// Exposes drain failures as the `nodekeeper_node_drain_failed` gauge, one series per upgrade policy.
pub struct NodeKeeperMetrics {
    drain_failures: Arc<Mutex<HashMap<String, u64>>>,
    _drain_failed_observer: ObservableGauge<u64>,
}

impl NodeKeeperMetrics {
    #[instrument(skip(meter))]
    pub fn new(meter: Meter) -> Self {
        let drain_failures: Arc<Mutex<HashMap<String, u64>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let drain_failures_for_observer = Arc::clone(&drain_failures);

        let drain_failed_observer = meter
            .u64_observable_gauge(NODE_DRAIN_FAILED_METRIC)
            .with_description("Whether node drains under an upgrade policy are failing")
            .with_callback(move |observer| {
                if let Ok(failures) = drain_failures_for_observer.lock() {
                    for (policy_name, value) in failures.iter() {
                        observer.observe(*value, &[POLICY_KEY.string(policy_name.clone())]);
                    }
                }
            })
            .init();

        NodeKeeperMetrics {
            drain_failures,
            _drain_failed_observer: drain_failed_observer,
        }
    }

    fn record(&self, policy_name: &str, value: u64) {
        match self.drain_failures.lock() {
            Ok(mut failures) => {
                failures.insert(policy_name.to_string(), value);
            }
            Err(_) => event!(
                Level::WARN,
                policy = policy_name,
                "Drain failure metric state is poisoned; dropping update."
            ),
        }
    }

    #[cfg(test)]
    fn value(&self, policy_name: &str) -> Option<u64> {
        self.drain_failures
            .lock()
            .ok()
            .and_then(|failures| failures.get(policy_name).copied())
    }
}

impl DrainMetrics for NodeKeeperMetrics {
    fn node_drain_failed(&self, policy_name: &str) {
        self.record(policy_name, 1);
    }

    fn reset_node_drain_failed(&self, policy_name: &str) {
        self.record(policy_name, 0);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use opentelemetry::metrics::MeterProvider;
    use opentelemetry_sdk::metrics::SdkMeterProvider;

    #[test]
    fn test_failure_and_reset_per_policy() {
        let provider = SdkMeterProvider::default();
        let metrics = NodeKeeperMetrics::new(provider.meter("test"));

        assert_eq!(metrics.value("managed-upgrade"), None);

        metrics.node_drain_failed("managed-upgrade");
        metrics.node_drain_failed("other-policy");
        assert_eq!(metrics.value("managed-upgrade"), Some(1));

        metrics.reset_node_drain_failed("managed-upgrade");
        assert_eq!(metrics.value("managed-upgrade"), Some(0));
        assert_eq!(metrics.value("other-policy"), Some(1));
    }
}
