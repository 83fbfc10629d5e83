//! Identity and placement helpers for the pods the drain logic acts on.
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::fmt;

const DEFAULT_NAMESPACE: &str = "default";

/// Uniquely identifies a pod within the cluster.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkloadKey {
    pub namespace: String,
    pub name: String,
}

impl WorkloadKey {
    pub fn from_pod(pod: &Pod) -> Self {
        WorkloadKey {
            namespace: pod
                .namespace()
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            name: pod.name_any(),
        }
    }
}

impl fmt::Display for WorkloadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Returns whether the scheduler has bound the pod to the given node.
pub fn is_on_node(pod: &Pod, node_name: &str) -> bool {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.node_name.as_deref())
        .map_or(false, |bound_to| bound_to == node_name)
}

/// Keeps the pods bound to `node_name`, collapsing duplicates of the same pod.
///
/// The result is ordered by namespace and name so that batches are processed in a stable order.
pub fn pods_on_node<I>(pods: I, node_name: &str) -> Vec<Pod>
where
    I: IntoIterator<Item = Pod>,
{
    pods.into_iter()
        .filter(|pod| is_on_node(pod, node_name))
        // kube-rs doesn't implement Ord or Hash on ObjectMeta, so we store these in a map indexed by identity.
        .map(|pod| (WorkloadKey::from_pod(&pod), pod))
        .collect::<BTreeMap<_, _>>()
        .into_values()
        .collect()
}
