//! Poll one SmartThings device and serve its status attributes as Prometheus gauges.
use std::sync::Arc;
use std::time::Duration;

use eyre::Result;
use health::HealthRegistry;
use prometheus::Registry;
use serve_metrics::{serve, setup_metrics_recorder, MetricsRenderer};
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use smartthings_exporter::config::Config;
use smartthings_exporter::device::SmartThingsClient;
use smartthings_exporter::exposition::PrometheusExposition;
use smartthings_exporter::worker::stop_worker;
use smartthings_exporter::{handlers, metrics, Worker};

/// How long a cancelled worker may keep running before it is aborted.
const WORKER_STOP_GRACE: Duration = Duration::from_secs(5);

async fn wait_for_shutdown_signal(mut sigterm: Signal) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!("invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let sigterm = signal(SignalKind::terminate())?;

    let recorder = setup_metrics_recorder()?;
    metrics::register_metrics();

    // Device gauges live in their own registry, rendered next to the recorder's metrics
    let registry = Registry::new();
    let exposition = Arc::new(PrometheusExposition::new(registry.clone()));

    let client = SmartThingsClient::new(
        &config.smartthings_api_url,
        &config.smartthings_token,
        config.request_timeout.0,
    )?;
    let device = client.device(&config.device_id).await.inspect_err(|e| {
        error!("failed to open device {}: {}", config.device_id, e);
    })?;

    let liveness = HealthRegistry::new("liveness");
    let worker_liveness = liveness.register("worker", config.liveness_deadline());

    let shutdown = CancellationToken::new();
    let mut worker = Worker::new(device, exposition, config.worker_config(), shutdown.clone())
        .with_liveness(worker_liveness);
    let worker_task = tokio::spawn(async move { worker.run().await });

    let app = handlers::app(liveness, MetricsRenderer::new(registry, Some(recorder)));
    let bind = config.bind();
    let server_shutdown = shutdown.clone();
    let mut server = tokio::spawn(async move {
        serve(app, &bind, async move { server_shutdown.cancelled().await }).await
    });

    let server_exited = tokio::select! {
        _ = wait_for_shutdown_signal(sigterm) => None,
        result = &mut server => Some(result),
    };

    info!("shutting down");
    shutdown.cancel();

    stop_worker(worker_task, WORKER_STOP_GRACE).await;

    let server_result = match server_exited {
        Some(result) => result,
        None => server.await,
    };
    match server_result {
        Ok(Ok(())) => {
            info!("exporter stopped");
            Ok(())
        }
        Ok(Err(e)) => {
            error!("failed to serve metrics: {}", e);
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}
