use actix_web::{get, web::Data, HttpResponse};
use opentelemetry::{global, metrics::MetricsError};
use prometheus::{Encoder, Registry, TextEncoder};

/// Renders every metric gathered by the controller's registry in the Prometheus text format.
#[get("/metrics")]
pub async fn vending_metrics(registry: Data<Registry>) -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buf = Vec::new();
    if let Err(err) = encoder.encode(&metric_families[..], &mut buf) {
        global::handle_error(MetricsError::Other(err.to_string()));
    }

    let body = String::from_utf8(buf).unwrap_or_default();
    HttpResponse::Ok()
        .insert_header((actix_web::http::header::CONTENT_TYPE, prometheus::TEXT_FORMAT))
        .body(body)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::metrics::{DrainMetrics, NodeKeeperMetrics};
    use actix_web::{body::to_bytes, test, App};
    use opentelemetry::metrics::MeterProvider;
    use opentelemetry_sdk::metrics::SdkMeterProvider;

    #[actix_web::test]
    async fn test_vending_metrics_exposes_drain_failures() {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .without_target_info()
            .without_scope_info()
            .build()
            .unwrap();
        let provider = SdkMeterProvider::builder().with_reader(exporter).build();
        let metrics = NodeKeeperMetrics::new(provider.meter("test"));
        metrics.node_drain_failed("managed-upgrade");

        let app = test::init_service(
            App::new()
                .app_data(Data::new(registry.clone()))
                .service(vending_metrics),
        )
        .await;
        let req = test::TestRequest::get().uri("/metrics").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let body = to_bytes(resp.into_body()).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("nodekeeper_node_drain_failed{policy=\"managed-upgrade\"} 1"));
    }
}
