//! Forcibly removes a Pod from the cluster once its Node's drain deadline has passed.
//!
//! A Pod carrying finalizers cannot complete deletion until every finalizer is cleared, so for such
//! Pods the finalizers are stripped instead. That allows the deletion which is already pending on the
//! Pod (from the original drain) to finish; no further delete call is issued. Pods without
//! finalizers are deleted directly, including Pods whose finalizers were already gone by the time
//! they were re-read.
//!
//! Removal is idempotent: a Pod which has already disappeared is reported as such and is not an error.
use crate::client::{ClientError, ClusterClient};
use crate::workload::WorkloadKey;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use snafu::{ResultExt, Snafu};
use tokio::time::Duration;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    RetryIf,
};
use tracing::{event, instrument, Level};

// Finalizer updates race against the Pod's own controllers. On a write conflict the update is retried
// from a fresh read, with these bounds on the backoff.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(2);
const NUM_RETRIES: usize = 5;

pub type Result<T> = std::result::Result<T, EvictError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum EvictError {
    #[snafu(display("Unable to read Pod '{}' before clearing finalizers: '{}'", pod, source))]
    ReadPod { source: ClientError, pod: String },

    #[snafu(display("Unable to clear finalizers of Pod '{}': '{}'", pod, source))]
    UpdateFinalizers { source: ClientError, pod: String },

    #[snafu(display(
        "Pod '{}' still carries finalizers {:?} after they were cleared",
        pod,
        remaining
    ))]
    FinalizerRemovalFailed { pod: String, remaining: Vec<String> },

    #[snafu(display("Unable to delete Pod '{}': '{}'", pod, source))]
    DeletePod { source: ClientError, pod: String },
}

impl EvictError {
    /// The underlying API error, if the removal failed talking to the cluster.
    pub fn client_error(&self) -> Option<&ClientError> {
        match self {
            Self::ReadPod { source, .. }
            | Self::UpdateFinalizers { source, .. }
            | Self::DeletePod { source, .. } => Some(source),
            Self::FinalizerRemovalFailed { .. } => None,
        }
    }

    fn should_retry(&self) -> bool {
        matches!(self, Self::UpdateFinalizers { source, .. } if source.is_conflict())
    }
}

/// How a Pod left the cluster.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Removal {
    /// The Pod's finalizers were cleared, releasing its pending deletion.
    FinalizersCleared,
    /// The Pod was deleted.
    Deleted,
    /// The Pod no longer existed.
    AlreadyGone,
}

/// Wrapper struct to provide retry configurations for finalizer updates.
struct RetryStrategy {}
impl RetryStrategy {
    fn retry_strategy() -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(RETRY_BASE_DELAY.as_millis() as u64)
            .max_delay(RETRY_MAX_DELAY)
            .map(jitter)
            .take(NUM_RETRIES)
    }
}

impl tokio_retry::Condition<EvictError> for RetryStrategy {
    fn should_retry(&mut self, error: &EvictError) -> bool {
        error.should_retry()
    }
}

/// Removes the given Pod, stripping its finalizers if it has any and deleting it otherwise.
#[instrument(skip(client, pod), fields(pod = %WorkloadKey::from_pod(pod)), err)]
pub async fn force_remove<C: ClusterClient>(client: &C, pod: &Pod) -> Result<Removal> {
    let key = WorkloadKey::from_pod(pod);

    if pod.finalizers().is_empty() {
        return delete(client, &key).await;
    }

    RetryIf::spawn(
        RetryStrategy::retry_strategy(),
        || clear_finalizers(client, &key),
        RetryStrategy {},
    )
    .await
}

async fn delete<C: ClusterClient>(client: &C, key: &WorkloadKey) -> Result<Removal> {
    match client.delete_pod(&key.namespace, &key.name).await {
        Ok(()) => {
            event!(Level::INFO, "Deleted Pod '{}'.", key);
            Ok(Removal::Deleted)
        }
        Err(err) if err.is_not_found() => {
            event!(Level::INFO, "Pod '{}' was already gone.", key);
            Ok(Removal::AlreadyGone)
        }
        Err(err) => Err(err).context(DeletePodSnafu {
            pod: key.to_string(),
        }),
    }
}

/// One read-modify-write attempt at clearing a Pod's finalizers, followed by a re-read to confirm.
async fn clear_finalizers<C: ClusterClient>(client: &C, key: &WorkloadKey) -> Result<Removal> {
    let mut current = match client.get_pod(&key.namespace, &key.name).await {
        Ok(pod) => pod,
        Err(err) if err.is_not_found() => return Ok(Removal::AlreadyGone),
        Err(err) => {
            return Err(err).context(ReadPodSnafu {
                pod: key.to_string(),
            })
        }
    };

    if current.finalizers().is_empty() {
        event!(
            Level::INFO,
            "Pod '{}' has no finalizers left. Deleting it instead.",
            key
        );
        return delete(client, key).await;
    }

    event!(
        Level::INFO,
        finalizers = ?current.finalizers(),
        "Clearing finalizers of Pod '{}'.",
        key
    );
    current.metadata.finalizers = Some(Vec::new());
    match client.replace_pod(&current).await {
        Ok(_) => {}
        Err(err) if err.is_not_found() => return Ok(Removal::AlreadyGone),
        Err(err) => {
            if err.is_conflict() {
                event!(
                    Level::WARN,
                    "Pod '{}' changed while clearing its finalizers. Retrying from a fresh read.",
                    key
                );
            }
            return Err(err).context(UpdateFinalizersSnafu {
                pod: key.to_string(),
            });
        }
    }

    // Once its finalizers are gone, a Pod with a pending deletion disappears; NotFound is success.
    let remaining = match client.get_pod(&key.namespace, &key.name).await {
        Ok(pod) => pod.finalizers().to_vec(),
        Err(err) if err.is_not_found() => Vec::new(),
        Err(err) => {
            return Err(err).context(ReadPodSnafu {
                pod: key.to_string(),
            })
        }
    };

    if !remaining.is_empty() {
        return FinalizerRemovalFailedSnafu {
            pod: key.to_string(),
            remaining,
        }
        .fail();
    }

    event!(Level::INFO, "Cleared finalizers of Pod '{}'.", key);
    Ok(Removal::FinalizersCleared)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::client::error::{test::api_error, ConflictSnafu, NotFoundSnafu};
    use crate::client::MockClusterClient;
    use crate::workload::test::fake_pod;
    use mockall::Sequence;

    fn with_finalizers(mut pod: Pod, finalizers: &[&str]) -> Pod {
        pod.metadata.finalizers = Some(finalizers.iter().map(|f| f.to_string()).collect());
        pod
    }

    fn pod_not_found<T>(namespace: &str, name: &str) -> crate::client::error::Result<T> {
        NotFoundSnafu {
            kind: "Pod",
            name: format!("{}/{}", namespace, name),
        }
        .fail()
    }

    #[tokio::test]
    async fn test_delete_without_finalizers() {
        let mut client = MockClusterClient::new();
        client
            .expect_delete_pod()
            .withf(|namespace: &str, name: &str| namespace == "web" && name == "frontend")
            .returning(|_, _| Ok(()))
            .times(1);
        client.expect_get_pod().times(0);
        client.expect_replace_pod().times(0);

        let pod = fake_pod("web", "frontend", "node-a");
        assert_eq!(force_remove(&client, &pod).await.unwrap(), Removal::Deleted);
    }

    #[tokio::test]
    async fn test_removal_is_idempotent() {
        let mut client = MockClusterClient::new();
        let mut seq = Sequence::new();
        client
            .expect_delete_pod()
            .returning(|_, _| Ok(()))
            .times(1)
            .in_sequence(&mut seq);
        client
            .expect_delete_pod()
            .returning(|namespace, name| pod_not_found(namespace, name))
            .times(1)
            .in_sequence(&mut seq);

        let pod = fake_pod("web", "frontend", "node-a");
        assert_eq!(force_remove(&client, &pod).await.unwrap(), Removal::Deleted);
        assert_eq!(
            force_remove(&client, &pod).await.unwrap(),
            Removal::AlreadyGone
        );
    }

    #[tokio::test]
    async fn test_finalizers_cleared_without_delete() {
        let pod = with_finalizers(
            fake_pod("web", "db-0", "node-a"),
            &["example.com/protect", "example.com/backup"],
        );

        let mut client = MockClusterClient::new();
        let mut seq = Sequence::new();
        let stored = pod.clone();
        client
            .expect_get_pod()
            .returning(move |_, _| Ok(stored.clone()))
            .times(1)
            .in_sequence(&mut seq);
        client
            .expect_replace_pod()
            .withf(|pod: &Pod| pod.finalizers().is_empty())
            .returning(|pod| Ok(pod.clone()))
            .times(1)
            .in_sequence(&mut seq);
        client
            .expect_get_pod()
            .returning(|namespace, name| Ok(fake_pod(namespace, name, "node-a")))
            .times(1)
            .in_sequence(&mut seq);
        client.expect_delete_pod().times(0);

        assert_eq!(
            force_remove(&client, &pod).await.unwrap(),
            Removal::FinalizersCleared
        );
    }

    #[tokio::test]
    async fn test_conflict_retries_from_fresh_read() {
        let pod = with_finalizers(fake_pod("web", "db-0", "node-a"), &["example.com/protect"]);

        let client = conflict_then_update(&pod, fake_pod("web", "db-0", "node-a"));

        assert_eq!(
            force_remove(&client, &pod).await.unwrap(),
            Removal::FinalizersCleared
        );
    }

    #[tokio::test]
    async fn test_finalizer_readded_after_conflict_fails() {
        let pod = with_finalizers(fake_pod("web", "db-0", "node-a"), &["example.com/protect"]);
        let client = conflict_then_update(&pod, pod.clone());

        match force_remove(&client, &pod).await.unwrap_err() {
            EvictError::FinalizerRemovalFailed { remaining, .. } => {
                assert_eq!(remaining, vec!["example.com/protect".to_string()]);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    /// A client whose first finalizer update hits a write conflict and whose second one succeeds.
    /// The read confirming the second update returns `confirmed`.
    fn conflict_then_update(pod: &Pod, confirmed: Pod) -> MockClusterClient {
        let mut client = MockClusterClient::new();
        let mut seq = Sequence::new();

        let stored = pod.clone();
        client
            .expect_get_pod()
            .returning(move |_, _| Ok(stored.clone()))
            .times(1)
            .in_sequence(&mut seq);
        client
            .expect_replace_pod()
            .returning(|_| {
                Err(api_error(409, "Conflict")).context(ConflictSnafu {
                    kind: "Pod",
                    name: "web/db-0",
                })
            })
            .times(1)
            .in_sequence(&mut seq);

        let stored = pod.clone();
        client
            .expect_get_pod()
            .returning(move |_, _| Ok(stored.clone()))
            .times(1)
            .in_sequence(&mut seq);
        client
            .expect_replace_pod()
            .withf(|pod: &Pod| pod.finalizers().is_empty())
            .returning(|pod| Ok(pod.clone()))
            .times(1)
            .in_sequence(&mut seq);
        client
            .expect_get_pod()
            .returning(move |_, _| Ok(confirmed.clone()))
            .times(1)
            .in_sequence(&mut seq);
        client.expect_delete_pod().times(0);

        client
    }

    #[tokio::test]
    async fn test_finalizers_gone_on_fresh_read_deletes() {
        let pod = with_finalizers(fake_pod("web", "db-0", "node-a"), &["example.com/protect"]);

        let mut client = MockClusterClient::new();
        let mut seq = Sequence::new();
        client
            .expect_get_pod()
            .returning(|namespace, name| Ok(fake_pod(namespace, name, "node-a")))
            .times(1)
            .in_sequence(&mut seq);
        client
            .expect_delete_pod()
            .withf(|namespace: &str, name: &str| namespace == "web" && name == "db-0")
            .returning(|_, _| Ok(()))
            .times(1)
            .in_sequence(&mut seq);
        client.expect_replace_pod().times(0);

        assert_eq!(force_remove(&client, &pod).await.unwrap(), Removal::Deleted);
    }

    #[tokio::test]
    async fn test_remaining_finalizers_fail() {
        let pod = with_finalizers(fake_pod("web", "db-0", "node-a"), &["example.com/protect"]);

        let mut client = MockClusterClient::new();
        let stored = pod.clone();
        client
            .expect_get_pod()
            .returning(move |_, _| Ok(stored.clone()))
            .times(2);
        client
            .expect_replace_pod()
            .returning(|pod| Ok(pod.clone()))
            .times(1);
        client.expect_delete_pod().times(0);

        match force_remove(&client, &pod).await.unwrap_err() {
            EvictError::FinalizerRemovalFailed { remaining, .. } => {
                assert_eq!(remaining, vec!["example.com/protect".to_string()]);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_vanished_pod_with_finalizers_is_already_gone() {
        let pod = with_finalizers(fake_pod("web", "db-0", "node-a"), &["example.com/protect"]);

        let mut client = MockClusterClient::new();
        client
            .expect_get_pod()
            .returning(|namespace, name| pod_not_found(namespace, name))
            .times(1);
        client.expect_replace_pod().times(0);
        client.expect_delete_pod().times(0);

        assert_eq!(
            force_remove(&client, &pod).await.unwrap(),
            Removal::AlreadyGone
        );
    }

    #[tokio::test]
    async fn test_backend_failure_is_not_retried() {
        let pod = with_finalizers(fake_pod("web", "db-0", "node-a"), &["example.com/protect"]);

        let mut client = MockClusterClient::new();
        let stored = pod.clone();
        client
            .expect_get_pod()
            .returning(move |_, _| Ok(stored.clone()))
            .times(1);
        client
            .expect_replace_pod()
            .returning(|_| {
                Err(crate::client::error::classify(
                    api_error(503, "ServiceUnavailable"),
                    "replace",
                    "Pod",
                    "web/db-0",
                ))
            })
            .times(1);

        let err = force_remove(&client, &pod).await.unwrap_err();
        assert!(matches!(err, EvictError::UpdateFinalizers { .. }));
        assert!(err.client_error().unwrap().is_transient());
    }
}
