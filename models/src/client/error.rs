use crate::budget::selector::SelectorError;

use kube::error::ErrorResponse;
use snafu::Snafu;
use tokio::time::Duration;

const STATUS_CODE_404_NOT_FOUND: u16 = 404;
const STATUS_CODE_409_CONFLICT: u16 = 409;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("{} '{}' does not exist", kind, name))]
    NotFound { kind: &'static str, name: String },

    #[snafu(display(
        "Write to {} '{}' conflicted with a concurrent update: '{}'",
        kind,
        name,
        source
    ))]
    Conflict {
        source: kube::Error,
        kind: &'static str,
        name: String,
    },

    #[snafu(display(
        "Kubernetes API call '{}' for {} '{}' failed: '{}'",
        operation,
        kind,
        name,
        source
    ))]
    Backend {
        source: kube::Error,
        operation: &'static str,
        kind: &'static str,
        name: String,
    },

    #[snafu(display(
        "Kubernetes API call '{}' for {} '{}' did not complete within {:.2}s",
        operation,
        kind,
        name,
        timeout.as_secs_f64()
    ))]
    Timeout {
        operation: &'static str,
        kind: &'static str,
        name: String,
        timeout: Duration,
    },

    #[snafu(display("Unable to parse {} '{}': '{}'", kind, name, source))]
    Decode {
        source: serde_yaml::Error,
        kind: &'static str,
        name: String,
    },

    #[snafu(display("Unable to build a list selector: '{}'", source))]
    InvalidSelector { source: SelectorError },
}

impl Error {
    /// The requested object is absent from the cluster.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// A write lost an optimistic concurrency race and may succeed from a fresh read.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// The backend could not be reached or answered in time; retrying later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Backend { .. } | Self::Timeout { .. } | Self::Conflict { .. }
        )
    }
}

/// Sorts a raw `kube::Error` into the categories the drain logic reacts to.
pub(crate) fn classify(
    err: kube::Error,
    operation: &'static str,
    kind: &'static str,
    name: &str,
) -> Error {
    match err {
        kube::Error::Api(ErrorResponse {
            code: STATUS_CODE_404_NOT_FOUND,
            ..
        }) => Error::NotFound {
            kind,
            name: name.to_string(),
        },
        kube::Error::Api(ErrorResponse {
            code: STATUS_CODE_409_CONFLICT,
            ..
        }) => Error::Conflict {
            source: err,
            kind,
            name: name.to_string(),
        },
        _ => Error::Backend {
            source: err,
            operation,
            kind,
            name: name.to_string(),
        },
    }
}
