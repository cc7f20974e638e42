use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body, extract::MatchedPath, http::Request, middleware::Next, response::IntoResponse,
    routing::get, Router,
};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use prometheus::{Encoder, Registry, TextEncoder};

/// Bind a `TcpListener` on the provided bind address to serve a `Router` on it,
/// until `shutdown` resolves.
pub async fn serve<F>(router: Router, bind: &str, shutdown: F) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("serving metrics on {}", bind);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

/// Install the process-wide recorder backing the `metrics` facade, used for
/// the exporter's own operational metrics.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    const BUCKETS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(BUCKETS)?
        .install_recorder()
}

/// Renders the exposition body: gauges held in an explicit `prometheus::Registry`,
/// followed by whatever the `metrics` recorder collected.
#[derive(Clone)]
pub struct MetricsRenderer {
    registry: Registry,
    recorder: Option<PrometheusHandle>,
}

impl MetricsRenderer {
    pub fn new(registry: Registry, recorder: Option<PrometheusHandle>) -> Self {
        Self { registry, recorder }
    }

    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::error!("failed to encode registry metrics: {}", e);
            buffer.clear();
        }

        let mut body = String::from_utf8(buffer).unwrap_or_default();
        if let Some(recorder) = &self.recorder {
            body.push_str(&recorder.render());
        }
        body
    }
}

/// Add the prometheus endpoint and middleware to a router, should be called last.
pub fn setup_metrics_routes(router: Router, renderer: MetricsRenderer) -> Router {
    let renderer = Arc::new(renderer);

    router
        .route(
            "/metrics",
            get(move || std::future::ready(renderer.render())),
        )
        .layer(axum::middleware::from_fn(track_metrics))
}

/// Middleware to record some common HTTP metrics
pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    let path = if let Some(matched_path) = req.extensions().get::<MatchedPath>() {
        matched_path.as_str().to_owned()
    } else {
        req.uri().path().to_owned()
    };

    let method = req.method().clone();

    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    let labels = [
        ("method", method.to_string()),
        ("path", path),
        ("status", status),
    ];

    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_requests_duration_seconds", &labels).record(latency);

    response
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use http_body_util::BodyExt;
    use prometheus::{GaugeVec, Opts};
    use tower::ServiceExt;

    use super::*;

    #[tokio::test]
    async fn renders_registry_gauges() {
        let registry = Registry::new();
        let gauge = GaugeVec::new(Opts::new("smartthings_level", "level"), &["device"]).unwrap();
        registry.register(Box::new(gauge.clone())).unwrap();
        gauge.with_label_values(&["lamp"]).set(50.0);

        let app = setup_metrics_routes(Router::new(), MetricsRenderer::new(registry, None));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("smartthings_level{device=\"lamp\"} 50"));
    }

    #[test]
    fn empty_registry_renders_nothing() {
        let renderer = MetricsRenderer::new(Registry::new(), None);
        assert_eq!(renderer.render(), "");
    }
}
