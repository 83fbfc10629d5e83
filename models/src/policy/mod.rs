//! Administrator-controlled drain deadlines: the baseline node drain timeout and the override that
//! applies while a PodDisruptionBudget blocks eviction.
mod config;
pub mod grace;

pub use self::config::{NodeDrain, NodeKeeperConfig};

use crate::client::{ClientError, PolicySource};

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use tokio::time::Duration;
use tracing::{event, instrument, Level};
use validator::Validate;

// We can't use this const inside the derive macro below.
pub const K8S_UPGRADE_POLICY_KIND: &str = "UpgradePolicy";

pub type Result<T> = std::result::Result<T, PolicyError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PolicyError {
    #[snafu(display(
        "Unable to load node keeper configuration from namespace '{}': '{}'",
        namespace,
        source
    ))]
    LoadConfig {
        source: ClientError,
        namespace: String,
    },

    #[snafu(display("Node keeper configuration is invalid: '{}'", source))]
    InvalidConfig {
        source: validator::ValidationErrors,
    },

    #[snafu(display(
        "Unable to read the upgrade policy in namespace '{}': '{}'",
        namespace,
        source
    ))]
    FetchUpgradePolicy {
        source: ClientError,
        namespace: String,
    },
}

impl PolicyError {
    /// The underlying API error, if this failure came from the cluster rather than from validation.
    pub fn client_error(&self) -> Option<&ClientError> {
        match self {
            Self::LoadConfig { source, .. } | Self::FetchUpgradePolicy { source, .. } => {
                Some(source)
            }
            Self::InvalidConfig { .. } => None,
        }
    }
}

/// The `UpgradePolicy` records how an administrator wants upgrades to treat workloads protected by
/// PodDisruptionBudgets. A single policy object is expected in the operator namespace.
#[derive(Clone, CustomResource, Serialize, Deserialize, Debug, Default, Eq, PartialEq, JsonSchema)]
#[kube(
    derive = "Default",
    derive = "PartialEq",
    group = "nodekeeper.upgrade.io",
    kind = "UpgradePolicy",
    namespaced,
    plural = "upgradepolicies",
    shortname = "up",
    singular = "upgradepolicy",
    version = "v1alpha1",
    printcolumn = r#"{"name":"PDB Force Drain Timeout", "type":"integer", "jsonPath":".spec.pdbForceDrainTimeoutMinutes"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct UpgradePolicySpec {
    /// Minutes a node may remain draining while a PodDisruptionBudget blocks eviction of its pods.
    pub pdb_force_drain_timeout_minutes: u32,
}

impl UpgradePolicy {
    pub fn pdb_force_drain_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.spec.pdb_force_drain_timeout_minutes) * 60)
    }
}

/// The disruption budget override timeout, along with the policy it was read from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForceDrainTimeout {
    pub policy_name: String,
    pub timeout: Duration,
}

/// Loads the node keeper configuration and validates it.
///
/// An out-of-range baseline timeout is reported as an error rather than clamped.
#[instrument(skip(source), err)]
pub async fn load_node_keeper_config<P: PolicySource>(
    source: &P,
    namespace: &str,
) -> Result<NodeKeeperConfig> {
    let config = source
        .node_keeper_config(namespace)
        .await
        .context(LoadConfigSnafu { namespace })?;
    config.validate().context(InvalidConfigSnafu)?;

    event!(
        Level::DEBUG,
        timeout_minutes = config.node_drain.timeout_minutes,
        "Loaded node drain configuration."
    );
    Ok(config)
}

/// Reads the override timeout from the single upgrade policy in `namespace`.
///
/// A missing policy is an error, not a zero timeout.
#[instrument(skip(source), err)]
pub async fn force_drain_timeout<P: PolicySource>(
    source: &P,
    namespace: &str,
) -> Result<ForceDrainTimeout> {
    let policy = source
        .upgrade_policy(namespace)
        .await
        .context(FetchUpgradePolicySnafu { namespace })?;

    Ok(ForceDrainTimeout {
        policy_name: policy.name_any(),
        timeout: policy.pdb_force_drain_timeout(),
    })
}
