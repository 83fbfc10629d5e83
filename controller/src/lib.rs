pub mod error;
pub mod metrics;
pub mod reconciler;
pub mod requeue;
pub mod telemetry;

pub use crate::error::{Error, ErrorKind};
pub use crate::metrics::{DrainMetrics, NodeKeeperMetrics};
pub use crate::reconciler::{DrainOutcome, DrainPath, NodeKeeperController};
pub use crate::requeue::RequeueBackoff;
