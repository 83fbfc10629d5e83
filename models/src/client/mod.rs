//! Capability traits through which the drain logic reads and writes cluster state.
//!
//! Every drain decision is computed from objects fetched through these traits, which keeps the
//! decision code free of any direct dependency on a live cluster. `K8SClusterClient` is the
//! implementation backed by the Kubernetes API.
pub mod error;
mod k8s;

pub use self::error::Error as ClientError;
pub use self::k8s::K8SClusterClient;
use self::error::Result;

use crate::policy::{NodeKeeperConfig, UpgradePolicy};
use crate::pool::MachineConfigPool;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use std::sync::Arc;

#[cfg(any(feature = "mockall", test))]
use mockall::{mock, predicate::*};

#[async_trait]
/// Typed access to the cluster objects the drain logic inspects or mutates. This is provided as
/// a trait in order to allow mocks to be used for testing purposes.
pub trait ClusterClient: Send + Sync {
    /// Fetch a cluster-scoped machine pool by name.
    async fn get_machine_pool(&self, name: &str) -> Result<MachineConfigPool>;
    /// Fetch a node by name.
    async fn get_node(&self, name: &str) -> Result<Node>;
    /// List every PodDisruptionBudget in the cluster, in the order the API returns them.
    async fn list_disruption_budgets(&self) -> Result<Vec<PodDisruptionBudget>>;
    /// List the pods the scheduler has bound to the given node.
    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>>;
    /// List the pods in any namespace whose labels satisfy the given selector.
    async fn list_pods_matching(&self, selector: &LabelSelector) -> Result<Vec<Pod>>;
    /// Fetch a single pod.
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod>;
    /// Overwrite a pod. The write is rejected with a conflict if the pod's `resourceVersion` is stale.
    async fn replace_pod(&self, pod: &Pod) -> Result<Pod>;
    /// Delete a pod.
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;
}

#[async_trait]
/// Access to the administrator's drain configuration and upgrade policy.
pub trait PolicySource: Send + Sync {
    /// Read the (unvalidated) node keeper configuration stored in the given namespace.
    async fn node_keeper_config(&self, namespace: &str) -> Result<NodeKeeperConfig>;
    /// Read the single upgrade policy stored in the given namespace.
    async fn upgrade_policy(&self, namespace: &str) -> Result<UpgradePolicy>;
}

#[cfg(any(feature = "mockall", test))]
mock! {
    /// A Mock ClusterClient for use in tests.
    pub ClusterClient {}
    #[async_trait]
    impl ClusterClient for ClusterClient {
        async fn get_machine_pool(&self, name: &str) -> Result<MachineConfigPool>;
        async fn get_node(&self, name: &str) -> Result<Node>;
        async fn list_disruption_budgets(&self) -> Result<Vec<PodDisruptionBudget>>;
        async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>>;
        async fn list_pods_matching(&self, selector: &LabelSelector) -> Result<Vec<Pod>>;
        async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod>;
        async fn replace_pod(&self, pod: &Pod) -> Result<Pod>;
        async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;
    }
}

#[cfg(any(feature = "mockall", test))]
mock! {
    /// A Mock PolicySource for use in tests.
    pub PolicySource {}
    #[async_trait]
    impl PolicySource for PolicySource {
        async fn node_keeper_config(&self, namespace: &str) -> Result<NodeKeeperConfig>;
        async fn upgrade_policy(&self, namespace: &str) -> Result<UpgradePolicy>;
    }
}

#[async_trait]
impl<T> ClusterClient for Arc<T>
where
    T: ClusterClient,
{
    async fn get_machine_pool(&self, name: &str) -> Result<MachineConfigPool> {
        (**self).get_machine_pool(name).await
    }

    async fn get_node(&self, name: &str) -> Result<Node> {
        (**self).get_node(name).await
    }

    async fn list_disruption_budgets(&self) -> Result<Vec<PodDisruptionBudget>> {
        (**self).list_disruption_budgets().await
    }

    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>> {
        (**self).list_pods_on_node(node_name).await
    }

    async fn list_pods_matching(&self, selector: &LabelSelector) -> Result<Vec<Pod>> {
        (**self).list_pods_matching(selector).await
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        (**self).get_pod(namespace, name).await
    }

    async fn replace_pod(&self, pod: &Pod) -> Result<Pod> {
        (**self).replace_pod(pod).await
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        (**self).delete_pod(namespace, name).await
    }
}

#[async_trait]
impl<T> PolicySource for Arc<T>
where
    T: PolicySource,
{
    async fn node_keeper_config(&self, namespace: &str) -> Result<NodeKeeperConfig> {
        (**self).node_keeper_config(namespace).await
    }

    async fn upgrade_policy(&self, namespace: &str) -> Result<UpgradePolicy> {
        (**self).upgrade_policy(namespace).await
    }
}
