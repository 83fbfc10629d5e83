use super::error::{self, Result};
use super::metrics::DrainMetrics;

use models::budget::{find_blocking_budget, selector_pods_on_node};
use models::client::{ClusterClient, PolicySource};
use models::evict::force_remove;
use models::node::drain::{
    drain_deadline, drain_started_at, evictable_workloads, is_draining, is_past_deadline,
};
use models::policy::{force_drain_timeout, grace::effective_grace_period, load_node_keeper_config};
use models::pool::UpgradeStateDetector;
use models::workload::WorkloadKey;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::ResourceExt;
use snafu::{ensure, ResultExt};
use tokio::time::Duration;
use tracing::{event, instrument, Level};

/// Which rule set a drain deadline was computed from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DrainPath {
    /// A blocking PodDisruptionBudget protects Pods on the Node; its override timeout applies.
    DisruptionBudget,
    /// No blocking budget protects Pods on the Node; the baseline timeout applies.
    Standard,
}

/// The result of a successful reconciliation of one Node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The worker pool is not upgrading. Nothing was inspected.
    NotUpgrading,
    /// The Node no longer exists.
    NodeGone,
    /// The Node is not draining.
    NotDraining,
    /// The Node is draining, but its grace period has not elapsed yet.
    AwaitingDeadline {
        path: DrainPath,
        deadline: Option<DateTime<Utc>>,
    },
    /// The grace period elapsed and the listed Pods were removed.
    Drained {
        path: DrainPath,
        removed: Vec<WorkloadKey>,
    },
}

/// Decides, for one Node at a time, whether a stalled drain must be forced, and forces it.
///
/// Every decision is made from state read fresh from the cluster. The taint recording when the
/// Node was cordoned is the only record of the drain, so the controller holds no per-Node state
/// and may reconcile different Nodes concurrently.
pub struct NodeKeeperController<C, P, M> {
    cluster_client: C,
    policy_source: P,
    metrics: M,
    upgrade_detector: UpgradeStateDetector,
    operator_namespace: String,
}

impl<C, P, M> NodeKeeperController<C, P, M>
where
    C: ClusterClient,
    P: PolicySource,
    M: DrainMetrics,
{
    pub fn new(
        cluster_client: C,
        policy_source: P,
        metrics: M,
        upgrade_detector: UpgradeStateDetector,
        operator_namespace: &str,
    ) -> Self {
        NodeKeeperController {
            cluster_client,
            policy_source,
            metrics,
            upgrade_detector,
            operator_namespace: operator_namespace.to_string(),
        }
    }

    /// Reconciles the named Node against the current time.
    pub async fn reconcile_node(&self, node_name: &str) -> Result<DrainOutcome> {
        self.reconcile_node_at(node_name, Utc::now()).await
    }

    /// Reconciles the named Node as if the current time were `now`.
    #[instrument(skip(self), err)]
    pub async fn reconcile_node_at(
        &self,
        node_name: &str,
        now: DateTime<Utc>,
    ) -> Result<DrainOutcome> {
        let upgrading = self
            .upgrade_detector
            .is_upgrading(&self.cluster_client)
            .await
            .context(error::UpgradeStateSnafu)?;
        if !upgrading {
            event!(Level::DEBUG, "Cluster is not upgrading.");
            return Ok(DrainOutcome::NotUpgrading);
        }

        let node = match self.cluster_client.get_node(node_name).await {
            Ok(node) => node,
            Err(err) if err.is_not_found() => {
                event!(Level::INFO, "Node no longer exists.");
                return Ok(DrainOutcome::NodeGone);
            }
            Err(err) => return Err(err).context(error::FetchNodeSnafu { node_name }),
        };

        if !is_draining(&node) {
            event!(Level::DEBUG, "Node is not draining.");
            return Ok(DrainOutcome::NotDraining);
        }
        event!(Level::INFO, "Node is draining.");

        let mut policy_name = None;
        let outcome = self.drain_node(&node, now, &mut policy_name).await;
        self.report_drain(&outcome, policy_name).await;
        outcome
    }

    async fn drain_node(
        &self,
        node: &Node,
        now: DateTime<Utc>,
        policy_name: &mut Option<String>,
    ) -> Result<DrainOutcome> {
        let node_name = node.name_any();
        let started_at = drain_started_at(node).context(error::DrainSignalSnafu)?;

        let config = load_node_keeper_config(&self.policy_source, &self.operator_namespace)
            .await
            .context(error::LoadConfigSnafu)?;
        let baseline = config.node_drain_timeout();

        if let Some(budget) = find_blocking_budget(&self.cluster_client)
            .await
            .context(error::BlockingBudgetSnafu)?
        {
            let protected = selector_pods_on_node(&self.cluster_client, &budget, &node_name)
                .await
                .context(error::BlockingBudgetSnafu)?;

            if !protected.is_empty() {
                let timeout = force_drain_timeout(&self.policy_source, &self.operator_namespace)
                    .await
                    .context(error::ForceDrainTimeoutSnafu)?;
                *policy_name = Some(timeout.policy_name);

                let grace_period = effective_grace_period(baseline, Some(timeout.timeout));
                return self
                    .drain_after_deadline(
                        &node_name,
                        DrainPath::DisruptionBudget,
                        &protected,
                        started_at,
                        grace_period,
                        now,
                    )
                    .await;
            }

            event!(
                Level::INFO,
                budget = %budget.name,
                "Blocking PodDisruptionBudget selects no Pods on this Node."
            );
        }

        let grace_period = effective_grace_period(baseline, None);
        let targets = evictable_workloads(&self.cluster_client, &node_name)
            .await
            .context(error::EvictableWorkloadsSnafu)?;
        ensure!(!targets.is_empty(), error::AnomalousStateSnafu { node_name });

        self.drain_after_deadline(
            &node_name,
            DrainPath::Standard,
            &targets,
            started_at,
            grace_period,
            now,
        )
        .await
    }

    async fn drain_after_deadline(
        &self,
        node_name: &str,
        path: DrainPath,
        pods: &[Pod],
        started_at: DateTime<Utc>,
        grace_period: Duration,
        now: DateTime<Utc>,
    ) -> Result<DrainOutcome> {
        let deadline = drain_deadline(started_at, grace_period);
        event!(
            Level::INFO,
            ?path,
            %started_at,
            grace_period_minutes = grace_period.as_secs_f64() / 60.0,
            ?deadline,
            %now,
            "Evaluated drain deadline."
        );

        if !is_past_deadline(started_at, grace_period, now) {
            event!(Level::INFO, "Drain deadline has not passed yet.");
            return Ok(DrainOutcome::AwaitingDeadline { path, deadline });
        }

        let removed = self.force_remove_all(node_name, pods).await?;
        Ok(DrainOutcome::Drained { path, removed })
    }

    /// Removes the given Pods one at a time. The first failure abandons the remaining Pods;
    /// Pods already removed stay removed.
    async fn force_remove_all(&self, node_name: &str, pods: &[Pod]) -> Result<Vec<WorkloadKey>> {
        let mut removed = Vec::with_capacity(pods.len());
        for pod in pods {
            let key = WorkloadKey::from_pod(pod);
            let removal = force_remove(&self.cluster_client, pod)
                .await
                .context(error::ForceRemoveSnafu { node_name })?;
            event!(Level::INFO, pod = %key, ?removal, "Removed Pod from draining Node.");
            removed.push(key);
        }
        Ok(removed)
    }

    /// Raises the node drain failure signal for failed or forced drains, and clears it once a drain
    /// completes under the standard timeout.
    async fn report_drain(&self, outcome: &Result<DrainOutcome>, policy_name: Option<String>) {
        let failed = match outcome {
            Ok(DrainOutcome::Drained {
                path: DrainPath::Standard,
                ..
            }) => false,
            Ok(DrainOutcome::Drained {
                path: DrainPath::DisruptionBudget,
                ..
            })
            | Err(_) => true,
            Ok(_) => return,
        };

        let policy_name = match policy_name {
            Some(policy_name) => policy_name,
            None => match self
                .policy_source
                .upgrade_policy(&self.operator_namespace)
                .await
            {
                Ok(policy) => policy.name_any(),
                Err(err) => {
                    event!(
                        Level::WARN,
                        %err,
                        "Unable to attribute drain result to an upgrade policy; not recording it."
                    );
                    return;
                }
            },
        };

        if failed {
            self.metrics.node_drain_failed(&policy_name);
        } else {
            self.metrics.reset_node_drain_failed(&policy_name);
        }
    }
}
