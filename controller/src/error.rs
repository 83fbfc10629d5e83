use models::budget::BudgetError;
use models::client::ClientError;
use models::evict::EvictError;
use models::node::DrainStateError;
use models::policy::PolicyError;
use models::pool::PoolError;

use snafu::Snafu;

/// The crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// The crate-wide error type.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Unable to determine whether the cluster is upgrading: '{}'", source))]
    UpgradeState { source: PoolError },

    #[snafu(display("Unable to read Node '{}': '{}'", node_name, source))]
    FetchNode {
        source: ClientError,
        node_name: String,
    },

    #[snafu(display("Unable to determine when the drain started: '{}'", source))]
    DrainSignal { source: DrainStateError },

    #[snafu(display("Unable to load the node drain configuration: '{}'", source))]
    LoadConfig { source: PolicyError },

    #[snafu(display("Unable to evaluate PodDisruptionBudgets: '{}'", source))]
    BlockingBudget { source: BudgetError },

    #[snafu(display("Unable to determine the PodDisruptionBudget drain timeout: '{}'", source))]
    ForceDrainTimeout { source: PolicyError },

    #[snafu(display("Unable to find evictable Pods: '{}'", source))]
    EvictableWorkloads { source: DrainStateError },

    #[snafu(display(
        "Node '{}' is draining but has no Pods which could be evicted",
        node_name
    ))]
    AnomalousState { node_name: String },

    #[snafu(display("Unable to remove Pod from Node '{}': '{}'", node_name, source))]
    ForceRemove {
        source: EvictError,
        node_name: String,
    },
}

/// Coarse classification of a failed reconciliation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// A required object does not exist.
    NotFound,
    /// Configuration or a stored object failed validation.
    Validation,
    /// The Kubernetes API failed or did not answer in time. Retrying may succeed.
    TransientBackend,
    /// A cordoned Node carries no usable `NoSchedule` taint.
    MissingDrainSignal,
    /// A Pod kept its finalizers after they were cleared.
    FinalizerRemovalFailed,
    /// A draining Node has nothing left to drain.
    AnomalousState,
}

fn client_kind(err: &ClientError) -> ErrorKind {
    if err.is_not_found() {
        ErrorKind::NotFound
    } else if err.is_transient() {
        ErrorKind::TransientBackend
    } else {
        ErrorKind::Validation
    }
}

fn policy_kind(err: &PolicyError) -> ErrorKind {
    err.client_error().map_or(ErrorKind::Validation, client_kind)
}

fn drain_state_kind(err: &DrainStateError) -> ErrorKind {
    match err {
        DrainStateError::MissingDrainSignal { .. } => ErrorKind::MissingDrainSignal,
        DrainStateError::FindTargetPods { source, .. } => client_kind(source),
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UpgradeState { source } => client_kind(source.client_error()),
            Self::FetchNode { source, .. } => client_kind(source),
            Self::DrainSignal { source } | Self::EvictableWorkloads { source } => {
                drain_state_kind(source)
            }
            Self::LoadConfig { source } | Self::ForceDrainTimeout { source } => policy_kind(source),
            Self::BlockingBudget { source } => client_kind(source.client_error()),
            Self::AnomalousState { .. } => ErrorKind::AnomalousState,
            Self::ForceRemove { source, .. } => source
                .client_error()
                .map_or(ErrorKind::FinalizerRemovalFailed, client_kind),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use kube::error::ErrorResponse;
    use models::budget::selector::SelectorError;
    use models::client::error::{ConflictSnafu, InvalidSelectorSnafu, NotFoundSnafu, TimeoutSnafu};
    use snafu::IntoError;
    use tokio::time::Duration;

    fn not_found() -> ClientError {
        NotFoundSnafu {
            kind: "Node",
            name: "node-a",
        }
        .build()
    }

    fn timed_out() -> ClientError {
        TimeoutSnafu {
            operation: "get",
            kind: "Node",
            name: "node-a",
            timeout: Duration::from_secs(30),
        }
        .build()
    }

    fn conflict() -> ClientError {
        ConflictSnafu {
            kind: "Pod",
            name: "web/db-0",
        }
        .into_error(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "the object has been modified".to_string(),
            reason: "Conflict".to_string(),
            code: 409,
        }))
    }

    fn invalid_selector() -> ClientError {
        InvalidSelectorSnafu.into_error(SelectorError::UnsupportedOperator {
            key: "app".to_string(),
            operator: "Matches".to_string(),
        })
    }

    #[test]
    fn test_error_kind() {
        let test_cases = vec![
            (
                Error::FetchNode {
                    source: not_found(),
                    node_name: "node-a".to_string(),
                },
                ErrorKind::NotFound,
            ),
            (
                Error::FetchNode {
                    source: timed_out(),
                    node_name: "node-a".to_string(),
                },
                ErrorKind::TransientBackend,
            ),
            (
                Error::ForceRemove {
                    source: EvictError::UpdateFinalizers {
                        source: conflict(),
                        pod: "web/db-0".to_string(),
                    },
                    node_name: "node-a".to_string(),
                },
                ErrorKind::TransientBackend,
            ),
            (
                Error::EvictableWorkloads {
                    source: DrainStateError::FindTargetPods {
                        source: invalid_selector(),
                        node_name: "node-a".to_string(),
                    },
                },
                ErrorKind::Validation,
            ),
            (
                Error::DrainSignal {
                    source: DrainStateError::MissingDrainSignal {
                        node_name: "node-a".to_string(),
                    },
                },
                ErrorKind::MissingDrainSignal,
            ),
            (
                Error::ForceDrainTimeout {
                    source: PolicyError::FetchUpgradePolicy {
                        source: not_found(),
                        namespace: "operator".to_string(),
                    },
                },
                ErrorKind::NotFound,
            ),
            (
                Error::ForceRemove {
                    source: EvictError::FinalizerRemovalFailed {
                        pod: "web/db-0".to_string(),
                        remaining: vec!["example.com/protect".to_string()],
                    },
                    node_name: "node-a".to_string(),
                },
                ErrorKind::FinalizerRemovalFailed,
            ),
            (
                Error::AnomalousState {
                    node_name: "node-a".to_string(),
                },
                ErrorKind::AnomalousState,
            ),
        ];

        for (err, kind) in test_cases {
            assert_eq!(err.kind(), kind, "{}", err);
        }
    }
}
