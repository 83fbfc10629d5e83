use crate::client::ClientError;

use snafu::Snafu;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display(
        "Node '{}' is cordoned but has no NoSchedule taint with a recorded timeAdded",
        node_name
    ))]
    MissingDrainSignal { node_name: String },

    #[snafu(display("Unable to find drainable Pods for Node '{}': '{}'", node_name, source))]
    FindTargetPods {
        source: ClientError,
        node_name: String,
    },
}
