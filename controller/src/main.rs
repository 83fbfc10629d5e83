use std::{convert::TryFrom, env, sync::Arc};

use controller::{
    telemetry::vending_metrics, DrainOutcome, NodeKeeperController, NodeKeeperMetrics,
    RequeueBackoff,
};
use models::{
    client::K8SClusterClient,
    constants::{CONTROLLER, CONTROLLER_INTERNAL_PORT, MASTER_NODE_LABEL, WORKER_POOL_NAME},
    pool::UpgradeStateDetector,
    telemetry,
};

use actix_web::{web::Data, App, HttpServer};
use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use kube::{
    api::Api,
    runtime::{controller::Action, watcher, Controller},
    ResourceExt,
};
use opentelemetry::global;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use snafu::ResultExt;
use tokio::time::Duration;
use tracing::{event, Level};

/// The module-wide result type.
type Result<T> = std::result::Result<T, controller_error::Error>;

type NodeKeeper = NodeKeeperController<K8SClusterClient, K8SClusterClient, NodeKeeperMetrics>;

// A drain awaiting its deadline is revisited no sooner than this, even if the deadline is imminent.
const MIN_DEADLINE_REQUEUE: Duration = Duration::from_secs(1);

struct ReconcileContext {
    node_keeper: NodeKeeper,
    backoff: RequeueBackoff,
}

async fn reconcile(
    node: Arc<Node>,
    context: Arc<ReconcileContext>,
) -> std::result::Result<Action, controller::Error> {
    let node_name = node.name_any();
    let outcome = context.node_keeper.reconcile_node(&node_name).await?;
    context.backoff.on_success(&node_name);

    event!(Level::DEBUG, node = %node_name, ?outcome, "Reconciled node.");
    Ok(match outcome {
        // Without a further change to the Node, wake up once the drain deadline passes.
        DrainOutcome::AwaitingDeadline {
            deadline: Some(deadline),
            ..
        } => Action::requeue(
            (deadline - Utc::now())
                .to_std()
                .unwrap_or_default()
                .max(MIN_DEADLINE_REQUEUE),
        ),
        _ => Action::await_change(),
    })
}

fn error_policy(node: Arc<Node>, err: &controller::Error, context: Arc<ReconcileContext>) -> Action {
    let node_name = node.name_any();
    let delay = context.backoff.on_failure(&node_name);
    event!(
        Level::ERROR,
        node = %node_name,
        kind = ?err.kind(),
        %err,
        "Node reconciliation failed. Retrying in {:.2}s.",
        delay.as_secs_f64()
    );
    Action::requeue(delay)
}

#[actix_web::main]
async fn main() -> Result<()> {
    telemetry::init_telemetry_from_env().context(controller_error::TelemetryInitSnafu)?;

    let incluster_config =
        kube::Config::incluster_dns().context(controller_error::ConfigCreateSnafu)?;

    // Use the incluster config to infer the namespace
    let namespace = incluster_config.default_namespace.to_string();

    let k8s_client = kube::client::Client::try_from(incluster_config)
        .context(controller_error::ClientCreateSnafu)?;
    let cluster_client = K8SClusterClient::new(k8s_client.clone());

    // The exporter has to be registered before any instruments are created on the global meter.
    let registry = prometheus::Registry::new();
    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()
        .context(controller_error::PrometheusExporterSnafu)?;
    let meter_provider = SdkMeterProvider::builder().with_reader(exporter).build();
    global::set_meter_provider(meter_provider);
    let metrics = NodeKeeperMetrics::new(global::meter(CONTROLLER));

    let node_keeper = NodeKeeperController::new(
        cluster_client.clone(),
        cluster_client,
        metrics,
        UpgradeStateDetector::from_environment(WORKER_POOL_NAME),
        &namespace,
    );
    let context = Arc::new(ReconcileContext {
        node_keeper,
        backoff: RequeueBackoff::default(),
    });

    // Control plane nodes are never drained by this controller.
    let nodes: Api<Node> = Api::all(k8s_client);
    let controller_runner = Controller::new(
        nodes,
        watcher::Config::default().labels(&format!("!{}", MASTER_NODE_LABEL)),
    )
    .run(reconcile, error_policy, context)
    .for_each(|result| async move {
        match result {
            Ok((node, _)) => {
                event!(Level::TRACE, node = %node.name, "Processed a k8s event for a Node.")
            }
            Err(err) => event!(Level::WARN, %err, "Node controller event failed."),
        }
    });

    let k8s_service_addr = env::var("KUBERNETES_SERVICE_HOST")
        .context(controller_error::MissingClusterIPFamilySnafu)?;
    let bindaddress = if k8s_service_addr.contains(':') {
        // IPv6 format
        "[::]"
    } else {
        // IPv4 format
        "0.0.0.0"
    };

    // Setup Http server to vend prometheus metrics
    let prometheus_server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(registry.clone()))
            .service(vending_metrics)
    })
    .bind(format!("{}:{}", bindaddress, CONTROLLER_INTERNAL_PORT))
    .context(controller_error::PrometheusServerSnafu)?
    .run();

    tokio::select! {
        _ = controller_runner => {
            event!(Level::ERROR, "node controller exited");
        },
        server = prometheus_server => {
            event!(Level::ERROR, "metric server exited");
            server.context(controller_error::PrometheusServerSnafu)?
        }
    };
    Ok(())
}

pub mod controller_error {
    use models::telemetry;
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub))]
    pub enum Error {
        #[snafu(display("Unable to create Kubernetes client config: '{}'", source))]
        ConfigCreate {
            source: kube::config::InClusterError,
        },

        #[snafu(display("Unable to create Kubernetes client: '{}'", source))]
        ClientCreate { source: kube::Error },

        #[snafu(display("Error determining the cluster server address: '{}'", source))]
        MissingClusterIPFamily { source: std::env::VarError },

        #[snafu(display("Unable to create the prometheus exporter: '{}'", source))]
        PrometheusExporter {
            source: opentelemetry::metrics::MetricsError,
        },

        #[snafu(display("Error running prometheus HTTP server: '{}'", source))]
        PrometheusServer { source: std::io::Error },

        #[snafu(display("Error configuring telemetry: '{}'", source))]
        TelemetryInit {
            source: telemetry::TelemetryConfigError,
        },
    }
}
