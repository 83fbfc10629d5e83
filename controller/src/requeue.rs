//! Per-node retry delays for failed reconciliations.
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tokio::time::Duration;
use tokio_retry::strategy::ExponentialBackoff;

const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(5 * 60);

/// Doubles a node's requeue delay after every consecutive failure, up to a cap. A successful
/// reconciliation resets the node to the base delay.
#[derive(Debug)]
pub struct RequeueBackoff {
    max_delay: Duration,
    strategy: ExponentialBackoff,
    node_strategies: Mutex<HashMap<String, ExponentialBackoff>>,
}

impl Default for RequeueBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}

impl RequeueBackoff {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        // `from_millis(2)` yields 2, 4, 8, ...ms; the factor scales the first delay to `base_delay`.
        let factor = (base_delay.as_millis() as u64 / 2).max(1);
        RequeueBackoff {
            max_delay,
            strategy: ExponentialBackoff::from_millis(2)
                .factor(factor)
                .max_delay(max_delay),
            node_strategies: Mutex::new(HashMap::new()),
        }
    }

    /// Records a failed reconciliation of `node_name` and returns how long to wait before retrying.
    pub fn on_failure(&self, node_name: &str) -> Duration {
        self.node_strategies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(node_name.to_string())
            .or_insert_with(|| self.strategy.clone())
            .next()
            .unwrap_or(self.max_delay)
    }

    /// Forgets the failure history of `node_name`.
    pub fn on_success(&self, node_name: &str) {
        self.node_strategies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(node_name);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let backoff = RequeueBackoff::default();
        let delays: Vec<u64> = (0..10)
            .map(|_| backoff.on_failure("node-a").as_secs())
            .collect();

        assert_eq!(delays, vec![5, 10, 20, 40, 80, 160, 300, 300, 300, 300]);
    }

    #[test]
    fn test_backoff_is_per_node_and_resets() {
        let backoff = RequeueBackoff::default();
        backoff.on_failure("node-a");
        backoff.on_failure("node-a");

        assert_eq!(backoff.on_failure("node-b"), Duration::from_secs(5));
        assert_eq!(backoff.on_failure("node-a"), Duration::from_secs(20));

        backoff.on_success("node-a");
        assert_eq!(backoff.on_failure("node-a"), Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_survives_many_failures() {
        let backoff = RequeueBackoff::default();
        for _ in 0..100 {
            backoff.on_failure("node-a");
        }
        assert_eq!(backoff.on_failure("node-a"), DEFAULT_MAX_DELAY);
    }

    #[test]
    fn test_custom_base_delay() {
        let backoff = RequeueBackoff::new(Duration::from_secs(1), Duration::from_secs(3));
        let delays: Vec<Duration> = (0..3).map(|_| backoff.on_failure("node-a")).collect();

        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(3)
            ]
        );
    }
}
