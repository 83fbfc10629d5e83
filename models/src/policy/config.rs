use serde::{Deserialize, Serialize};
use tokio::time::Duration;
use validator::Validate;

/// Administrator configuration for the drain keeper, stored as YAML in the operator's ConfigMap:
///
/// ```yaml
/// nodeDrain:
///   timeoutMinutes: 30
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize, Eq, PartialEq, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NodeKeeperConfig {
    #[validate]
    pub node_drain: NodeDrain,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, Eq, PartialEq, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NodeDrain {
    /// Minutes a node may remain draining before its workloads are removed forcibly.
    #[serde(alias = "timeOut")]
    #[validate(range(min = 0, max = 120))]
    pub timeout_minutes: i64,
}

impl NodeKeeperConfig {
    /// The baseline drain timeout. Only meaningful once the configuration has been validated.
    pub fn node_drain_timeout(&self) -> Duration {
        Duration::from_secs(self.node_drain.timeout_minutes.max(0) as u64 * 60)
    }
}
