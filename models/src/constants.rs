/// Helper macro to avoid retyping the base domain-like name of our system when creating further
/// string constants from it. When given no parameters, this returns the base domain-like name of
/// the system. When given a string literal parameter it adds `/parameter` to the end.
#[macro_export]
macro_rules! nodekeeper_domain {
    () => {
        "nodekeeper.upgrade.io"
    };
    ($s:literal) => {
        concat!(nodekeeper_domain!(), "/", $s)
    };
}

pub const API_VERSION: &str = nodekeeper_domain!("v1alpha1");
pub const NODEKEEPER_DOMAIN_LIKE_NAME: &str = nodekeeper_domain!();

// The machine pool whose rollout signals that the cluster is upgrading.
pub const WORKER_POOL_NAME: &str = "worker";

// Nodes carrying this label are never handed to the drain controller.
pub const MASTER_NODE_LABEL: &str = "node-role.kubernetes.io/master";

// Administrator configuration lives in this ConfigMap, in the operator namespace.
pub const CONFIG_MAP_NAME: &str = "nodekeeper-config";
pub const CONFIG_MAP_KEY: &str = "config.yaml";

// Kubernetes object kinds and values the drain logic inspects.
pub const DAEMONSET_KIND: &str = "DaemonSet";
pub const NO_SCHEDULE_EFFECT: &str = "NoSchedule";

// controller constants
pub const CONTROLLER: &str = "nodekeeper-controller";
pub const CONTROLLER_INTERNAL_PORT: i32 = 8080; // The internal port on which the metrics endpoint is hosted.
