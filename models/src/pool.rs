//! Detects whether a machine pool is in the middle of rolling out an upgrade.
use crate::client::{ClientError, ClusterClient};

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use tracing::{event, instrument, Level};

// Test-only override, honoured only by builds with the `fake-upgrade-state` feature.
const UPGRADING_ENV_VAR: &str = "UPGRADING";

pub type Result<T> = std::result::Result<T, PoolError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PoolError {
    #[snafu(display("Unable to read machine pool '{}': '{}'", pool_name, source))]
    FetchMachinePool {
        source: ClientError,
        pool_name: String,
    },
}

impl PoolError {
    pub fn client_error(&self) -> &ClientError {
        match self {
            Self::FetchMachinePool { source, .. } => source,
        }
    }
}

/// The subset of a `MachineConfigPool` the drain keeper reads. The resource itself is owned by the
/// machine config operator; only its rollout counters matter here.
#[derive(Clone, CustomResource, Serialize, Deserialize, Debug, Default, Eq, PartialEq, JsonSchema)]
#[kube(
    derive = "Default",
    derive = "PartialEq",
    group = "machineconfiguration.openshift.io",
    kind = "MachineConfigPool",
    plural = "machineconfigpools",
    singular = "machineconfigpool",
    status = "MachineConfigPoolStatus",
    version = "v1"
)]
pub struct MachineConfigPoolSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, Eq, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineConfigPoolStatus {
    /// Total number of machines in the pool.
    #[serde(default)]
    pub machine_count: i64,
    /// Number of machines already running the pool's target configuration.
    #[serde(default)]
    pub updated_machine_count: i64,
}

impl MachineConfigPool {
    /// A pool is upgrading while some of its machines have not yet received the target configuration.
    /// A pool that reports no status is treated as settled.
    pub fn is_upgrading(&self) -> bool {
        self.status.as_ref().map_or(false, |status| {
            status.machine_count != status.updated_machine_count
        })
    }
}

/// Answers "is the cluster mid-upgrade?" by inspecting a named machine pool.
#[derive(Clone, Debug)]
pub struct UpgradeStateDetector {
    pool_name: String,
    forced_upgrading: bool,
}

impl UpgradeStateDetector {
    pub fn new<S: Into<String>>(pool_name: S) -> Self {
        UpgradeStateDetector {
            pool_name: pool_name.into(),
            forced_upgrading: false,
        }
    }

    /// Creates a detector for the given pool, honouring the test-only `UPGRADING=true` override when
    /// the `fake-upgrade-state` feature is compiled in. Production builds always read the pool.
    pub fn from_environment<S: Into<String>>(pool_name: S) -> Self {
        let mut detector = Self::new(pool_name);
        detector.forced_upgrading = forced_upgrading_from_env();
        if detector.forced_upgrading {
            event!(
                Level::WARN,
                "Upgrade detection is forced on by the {} environment variable.",
                UPGRADING_ENV_VAR
            );
        }
        detector
    }

    /// Reports every cluster as upgrading without reading the machine pool.
    #[cfg(any(test, feature = "fake-upgrade-state"))]
    pub fn forced_upgrading(mut self) -> Self {
        self.forced_upgrading = true;
        self
    }

    /// Returns true iff the pool's total and updated machine counts differ.
    #[instrument(skip(self, client), fields(pool = %self.pool_name), err)]
    pub async fn is_upgrading<C: ClusterClient>(&self, client: &C) -> Result<bool> {
        if self.forced_upgrading {
            return Ok(true);
        }

        let pool = client
            .get_machine_pool(&self.pool_name)
            .await
            .context(FetchMachinePoolSnafu {
                pool_name: self.pool_name.clone(),
            })?;

        Ok(pool.is_upgrading())
    }
}

#[cfg(feature = "fake-upgrade-state")]
fn forced_upgrading_from_env() -> bool {
    std::env::var(UPGRADING_ENV_VAR).map_or(false, |value| value == "true")
}

#[cfg(not(feature = "fake-upgrade-state"))]
fn forced_upgrading_from_env() -> bool {
    false
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::client::{error::NotFoundSnafu, MockClusterClient};
    use kube::api::ObjectMeta;

    pub(crate) fn fake_pool(name: &str, total: i64, updated: i64) -> MachineConfigPool {
        MachineConfigPool {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: MachineConfigPoolSpec::default(),
            status: Some(MachineConfigPoolStatus {
                machine_count: total,
                updated_machine_count: updated,
            }),
        }
    }

    #[tokio::test]
    async fn test_is_upgrading() {
        let test_cases = vec![(3, 3, false), (3, 1, true), (0, 0, false), (2, 3, true)];

        for (total, updated, upgrading) in test_cases {
            let mut client = MockClusterClient::new();
            client
                .expect_get_machine_pool()
                .withf(|name: &str| name == "worker")
                .returning(move |name| Ok(fake_pool(name, total, updated)))
                .times(1);

            let detector = UpgradeStateDetector::new("worker");
            assert_eq!(detector.is_upgrading(&client).await.unwrap(), upgrading);
        }
    }

    #[tokio::test]
    async fn test_statusless_pool_is_not_upgrading() {
        let mut client = MockClusterClient::new();
        client
            .expect_get_machine_pool()
            .returning(|_| Ok(MachineConfigPool::new("worker", MachineConfigPoolSpec::default())))
            .times(1);

        let detector = UpgradeStateDetector::new("worker");
        assert!(!detector.is_upgrading(&client).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_pool_is_not_found() {
        let mut client = MockClusterClient::new();
        client
            .expect_get_machine_pool()
            .returning(|name| {
                NotFoundSnafu {
                    kind: "MachineConfigPool",
                    name,
                }
                .fail()
            })
            .times(1);

        let detector = UpgradeStateDetector::new("worker");
        let err = detector.is_upgrading(&client).await.unwrap_err();
        assert!(err.client_error().is_not_found());
    }

    #[tokio::test]
    async fn test_forced_upgrade_skips_pool() {
        let mut client = MockClusterClient::new();
        client.expect_get_machine_pool().times(0);

        let detector = UpgradeStateDetector::new("worker").forced_upgrading();
        assert!(detector.is_upgrading(&client).await.unwrap());
    }
}
