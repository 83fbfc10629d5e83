//! Cluster-facing building blocks for the node drain keeper: the capability traits used to talk to
//! the Kubernetes API, the custom resources it reads, and the individual drain decisions.
pub mod budget;
pub mod client;
pub mod constants;
pub mod evict;
pub mod node;
pub mod policy;
pub mod pool;
pub mod telemetry;
pub mod workload;
