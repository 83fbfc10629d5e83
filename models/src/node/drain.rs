//! Detects whether a Node is draining and selects the Pods a forced drain would remove.
//!
//! Draining in Kubernetes is done client side: `kubectl drain` first "cordons" a Node by marking it
//! as unschedulable, and the Node then carries a `NoSchedule` taint. The `timeAdded` of that taint is
//! the only durable record of when the drain began; no separate drain state is persisted anywhere.
//!
//! A forced drain removes every Pod bound to the Node except those that belong solely to a
//! DaemonSet, as the DaemonSet controller ignores node cordons and would simply recreate them.
use super::error::{self, Result};
use crate::client::ClusterClient;
use crate::constants::{DAEMONSET_KIND, NO_SCHEDULE_EFFECT};
use crate::workload::pods_on_node;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Node, Pod, Taint};
use kube::ResourceExt;
use snafu::{OptionExt, ResultExt};
use tokio::time::Duration;
use tracing::{event, instrument, Level};

fn no_schedule_taints(node: &Node) -> impl Iterator<Item = &Taint> {
    node.spec
        .as_ref()
        .and_then(|spec| spec.taints.as_ref())
        .into_iter()
        .flatten()
        .filter(|taint| taint.effect == NO_SCHEDULE_EFFECT)
}

/// A Node is draining iff it is marked unschedulable and carries at least one `NoSchedule` taint.
pub fn is_draining(node: &Node) -> bool {
    let unschedulable = node
        .spec
        .as_ref()
        .and_then(|spec| spec.unschedulable)
        .unwrap_or(false);

    unschedulable && no_schedule_taints(node).next().is_some()
}

/// Returns the time at which the Node's drain began.
///
/// When several `NoSchedule` taints carry a `timeAdded`, the earliest one is authoritative, so that
/// the elapsed drain time is never understated.
pub fn drain_started_at(node: &Node) -> Result<DateTime<Utc>> {
    no_schedule_taints(node)
        .filter_map(|taint| taint.time_added.as_ref())
        .map(|time_added| time_added.0)
        .min()
        .context(error::MissingDrainSignalSnafu {
            node_name: node.name_any(),
        })
}

/// The instant after which a drain that began at `started_at` may be forced, if representable.
pub fn drain_deadline(started_at: DateTime<Utc>, grace_period: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(grace_period)
        .ok()
        .and_then(|grace_period| started_at.checked_add_signed(grace_period))
}

/// Returns true iff `now` is strictly later than `started_at + grace_period`.
///
/// A deadline too far in the future to be represented is never considered past.
pub fn is_past_deadline(
    started_at: DateTime<Utc>,
    grace_period: Duration,
    now: DateTime<Utc>,
) -> bool {
    drain_deadline(started_at, grace_period).map_or(false, |deadline| now > deadline)
}

/// Returns whether every owner of the Pod is a DaemonSet.
///
/// Pods without any owner are not DaemonSet Pods. Pods owned by a DaemonSet *and* some other
/// controller remain candidates for eviction.
pub fn is_daemonset_only(pod: &Pod) -> bool {
    match pod.metadata.owner_references.as_deref() {
        Some(owners) if !owners.is_empty() => {
            owners.iter().all(|reference| reference.kind == DAEMONSET_KIND)
        }
        _ => false,
    }
}

/// Given a list of Pods, keeps those bound to `node_name` which a forced drain should remove.
pub fn filter_evictable<I>(pods: I, node_name: &str) -> Vec<Pod>
where
    I: IntoIterator<Item = Pod>,
{
    let evictable = pods.into_iter().filter(|pod| {
        if is_daemonset_only(pod) {
            event!(
                Level::DEBUG,
                "Not draining Pod '{}': Pod is member of a DaemonSet",
                pod.name_any()
            );
            return false;
        }
        true
    });

    pods_on_node(evictable, node_name)
}

/// Finds all Pods on a given Node that are targeted for removal during a forced drain.
/// See [`filter_evictable`] for more information about which Pods are selected.
#[instrument(skip(client), err)]
pub async fn evictable_workloads<C: ClusterClient>(client: &C, node_name: &str) -> Result<Vec<Pod>> {
    let node_pods = client
        .list_pods_on_node(node_name)
        .await
        .context(error::FindTargetPodsSnafu { node_name })?;

    Ok(filter_evictable(node_pods, node_name))
}
