use std::sync::Arc;
use std::time::Duration;

use axum::{routing, Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tower_http::timeout::TimeoutLayer;

use fio_common::health::HealthRegistry;
use fio_common::metrics;
use fio_common::store::RecordStore;

use super::people;

#[derive(Serialize)]
struct Pong {
    pong: bool,
}

pub fn app(
    store: Arc<dyn RecordStore>,
    liveness: HealthRegistry,
    metrics: Option<PrometheusHandle>,
    request_timeout: Duration,
) -> Router {
    Router::new()
        .route("/", routing::get(index))
        .route("/ping", routing::get(ping))
        .route(
            "/_liveness",
            routing::get(move || std::future::ready(liveness.get_status())),
        )
        .route(
            "/metrics",
            routing::get(move || match metrics {
                Some(ref recorder_handle) => std::future::ready(recorder_handle.render()),
                None => std::future::ready("no metrics recorder installed".to_owned()),
            }),
        )
        .route("/people", routing::get(people::get).with_state(store))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(axum::middleware::from_fn(metrics::track_metrics))
}

pub async fn index() -> &'static str {
    "fio service"
}

async fn ping() -> Json<Pong> {
    Json(Pong { pong: true })
}
