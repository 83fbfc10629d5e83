use super::error::{self, classify, Result};
use super::{ClusterClient, PolicySource};
use crate::budget::selector::render_label_selector;
use crate::constants::{CONFIG_MAP_KEY, CONFIG_MAP_NAME};
use crate::policy::{NodeKeeperConfig, UpgradePolicy, K8S_UPGRADE_POLICY_KIND};
use crate::pool::MachineConfigPool;
use crate::workload::WorkloadKey;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Node, Pod};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use snafu::{OptionExt, ResultExt};
use std::future::Future;
use tokio::time::{timeout, Duration};
use tracing::instrument;

// Upper bound on any single call to the Kubernetes API. A stalled apiserver surfaces as a
// transient error instead of wedging the reconciliation.
const API_CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
/// Concrete implementation of the `ClusterClient` and `PolicySource` traits. This implementation
/// will almost certainly be used in any case that isn't a unit test.
pub struct K8SClusterClient {
    k8s_client: kube::client::Client,
}

impl K8SClusterClient {
    pub fn new(k8s_client: kube::client::Client) -> Self {
        K8SClusterClient { k8s_client }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.k8s_client.clone(), namespace)
    }
}

/// Runs a single API call under `API_CALL_TIMEOUT` and classifies its failure.
async fn bounded<T, F>(operation: &'static str, kind: &'static str, name: &str, call: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, kube::Error>>,
{
    match timeout(API_CALL_TIMEOUT, call).await {
        Ok(result) => result.map_err(|err| classify(err, operation, kind, name)),
        Err(_) => error::TimeoutSnafu {
            operation,
            kind,
            name,
            timeout: API_CALL_TIMEOUT,
        }
        .fail(),
    }
}

#[async_trait]
impl ClusterClient for K8SClusterClient {
    #[instrument(skip(self), err)]
    async fn get_machine_pool(&self, name: &str) -> Result<MachineConfigPool> {
        let pools: Api<MachineConfigPool> = Api::all(self.k8s_client.clone());
        bounded("get", "MachineConfigPool", name, pools.get(name)).await
    }

    #[instrument(skip(self), err)]
    async fn get_node(&self, name: &str) -> Result<Node> {
        let nodes: Api<Node> = Api::all(self.k8s_client.clone());
        bounded("get", "Node", name, nodes.get(name)).await
    }

    #[instrument(skip(self), err)]
    async fn list_disruption_budgets(&self) -> Result<Vec<PodDisruptionBudget>> {
        let budgets: Api<PodDisruptionBudget> = Api::all(self.k8s_client.clone());
        let list = bounded(
            "list",
            "PodDisruptionBudget",
            "*",
            budgets.list(&ListParams::default()),
        )
        .await?;
        Ok(list.items)
    }

    #[instrument(skip(self), err)]
    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>> {
        let pods: Api<Pod> = Api::all(self.k8s_client.clone());
        let params = ListParams::default().fields(&format!("spec.nodeName={}", node_name));
        let list = bounded("list", "Pod", node_name, pods.list(&params)).await?;
        Ok(list.items)
    }

    #[instrument(skip(self), err)]
    async fn list_pods_matching(&self, selector: &LabelSelector) -> Result<Vec<Pod>> {
        let rendered = render_label_selector(selector).context(error::InvalidSelectorSnafu)?;
        let pods: Api<Pod> = Api::all(self.k8s_client.clone());
        let params = ListParams::default().labels(&rendered);
        let list = bounded("list", "Pod", &rendered, pods.list(&params)).await?;
        Ok(list.items)
    }

    #[instrument(skip(self), err)]
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        let key = format!("{}/{}", namespace, name);
        bounded("get", "Pod", &key, self.pods(namespace).get(name)).await
    }

    #[instrument(skip(self, pod), fields(pod = %WorkloadKey::from_pod(pod)), err)]
    async fn replace_pod(&self, pod: &Pod) -> Result<Pod> {
        let key = WorkloadKey::from_pod(pod);
        bounded(
            "replace",
            "Pod",
            &key.to_string(),
            self.pods(&key.namespace)
                .replace(&key.name, &PostParams::default(), pod),
        )
        .await
    }

    #[instrument(skip(self), err)]
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let key = format!("{}/{}", namespace, name);
        bounded(
            "delete",
            "Pod",
            &key,
            self.pods(namespace).delete(name, &DeleteParams::default()),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PolicySource for K8SClusterClient {
    #[instrument(skip(self), err)]
    async fn node_keeper_config(&self, namespace: &str) -> Result<NodeKeeperConfig> {
        let config_maps: Api<ConfigMap> = Api::namespaced(self.k8s_client.clone(), namespace);
        let config_map = bounded(
            "get",
            "ConfigMap",
            CONFIG_MAP_NAME,
            config_maps.get(CONFIG_MAP_NAME),
        )
        .await?;

        let raw = config_map
            .data
            .as_ref()
            .and_then(|data| data.get(CONFIG_MAP_KEY))
            .context(error::NotFoundSnafu {
                kind: "ConfigMap key",
                name: format!("{}/{}", CONFIG_MAP_NAME, CONFIG_MAP_KEY),
            })?;

        serde_yaml::from_str(raw).context(error::DecodeSnafu {
            kind: "ConfigMap",
            name: CONFIG_MAP_NAME,
        })
    }

    #[instrument(skip(self), err)]
    async fn upgrade_policy(&self, namespace: &str) -> Result<UpgradePolicy> {
        let policies: Api<UpgradePolicy> = Api::namespaced(self.k8s_client.clone(), namespace);
        let list = bounded(
            "list",
            K8S_UPGRADE_POLICY_KIND,
            namespace,
            policies.list(&ListParams::default()),
        )
        .await?;

        list.items
            .into_iter()
            .next()
            .context(error::NotFoundSnafu {
                kind: K8S_UPGRADE_POLICY_KIND,
                name: namespace,
            })
    }
}
