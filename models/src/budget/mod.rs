//! Evaluates PodDisruptionBudgets to decide whether normal eviction is currently blocked.
//!
//! A budget is blocking when its status reports zero allowed disruptions: any eviction of a pod it
//! selects would be refused by the API server. Only the first blocking budget found is acted on
//! per reconciliation, in the order the list call returns them.
pub mod selector;

use crate::client::{ClientError, ClusterClient};
use crate::workload::pods_on_node;

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::ResourceExt;
use snafu::{ResultExt, Snafu};
use tracing::{event, instrument, Level};

pub type Result<T> = std::result::Result<T, BudgetError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum BudgetError {
    #[snafu(display("Unable to list PodDisruptionBudgets: '{}'", source))]
    ListBudgets { source: ClientError },

    #[snafu(display(
        "Unable to list pods selected by PodDisruptionBudget '{}' on Node '{}': '{}'",
        budget,
        node_name,
        source
    ))]
    ListSelectedPods {
        source: ClientError,
        budget: String,
        node_name: String,
    },
}

impl BudgetError {
    pub fn client_error(&self) -> &ClientError {
        match self {
            Self::ListBudgets { source } | Self::ListSelectedPods { source, .. } => source,
        }
    }
}

/// A PodDisruptionBudget that currently allows no disruptions.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockingBudget {
    /// `namespace/name` of the budget.
    pub name: String,
    pub selector: Option<LabelSelector>,
}

/// Returns whether the budget currently refuses every disruption.
///
/// A budget whose status has not been computed yet does not report an allowed-disruption count
/// and is therefore not considered blocking.
pub fn is_blocking(budget: &PodDisruptionBudget) -> bool {
    budget
        .status
        .as_ref()
        .map_or(false, |status| status.disruptions_allowed == 0)
}

/// Picks the first blocking budget in iteration order.
pub fn first_blocking<I>(budgets: I) -> Option<BlockingBudget>
where
    I: IntoIterator<Item = PodDisruptionBudget>,
{
    budgets
        .into_iter()
        .find(is_blocking)
        .map(|budget| BlockingBudget {
            name: format!(
                "{}/{}",
                budget.namespace().unwrap_or_default(),
                budget.name_any()
            ),
            selector: budget.spec.and_then(|spec| spec.selector),
        })
}

/// Scans every PodDisruptionBudget in the cluster and returns the first one that is blocking, if any.
#[instrument(skip(client), err)]
pub async fn find_blocking_budget<C: ClusterClient>(client: &C) -> Result<Option<BlockingBudget>> {
    let budgets = client
        .list_disruption_budgets()
        .await
        .context(ListBudgetsSnafu)?;
    let blocking = first_blocking(budgets);

    if let Some(budget) = blocking.as_ref() {
        event!(
            Level::INFO,
            budget = %budget.name,
            selector = ?budget.selector,
            "Found PodDisruptionBudget allowing no disruptions."
        );
    }
    Ok(blocking)
}

/// Lists the pods selected by a blocking budget that are bound to the given node.
///
/// Pods are listed cluster-wide by label and then filtered by node on the client side, which
/// selects the same set as a server-side `spec.nodeName` field selector would. A budget without
/// a selector selects no pods.
#[instrument(skip(client, budget), fields(budget = %budget.name), err)]
pub async fn selector_pods_on_node<C: ClusterClient>(
    client: &C,
    budget: &BlockingBudget,
    node_name: &str,
) -> Result<Vec<Pod>> {
    let selector = match budget.selector.as_ref() {
        Some(selector) => selector,
        None => return Ok(Vec::new()),
    };

    let selected = client
        .list_pods_matching(selector)
        .await
        .context(ListSelectedPodsSnafu {
            budget: budget.name.clone(),
            node_name,
        })?;

    Ok(pods_on_node(selected, node_name))
}
