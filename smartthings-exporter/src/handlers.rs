use axum::{routing, Router};
use health::HealthRegistry;
use serve_metrics::{setup_metrics_routes, MetricsRenderer};

pub fn app(liveness: HealthRegistry, renderer: MetricsRenderer) -> Router {
    let router = Router::new().route("/", routing::get(index)).route(
        "/_liveness",
        routing::get(move || std::future::ready(liveness.get_status())),
    );

    setup_metrics_routes(router, renderer)
}

pub async fn index() -> &'static str {
    "smartthings exporter"
}
