use tokio::time::Duration;

/// Merges the administrator's baseline drain timeout with the disruption budget override.
///
/// The override only applies while a blocking PodDisruptionBudget protects pods on the draining node;
/// in that case the longer of the two wins. Otherwise the baseline alone applies.
pub fn effective_grace_period(baseline: Duration, budget_override: Option<Duration>) -> Duration {
    match budget_override {
        Some(budget_override) => baseline.max(budget_override),
        None => baseline,
    }
}
