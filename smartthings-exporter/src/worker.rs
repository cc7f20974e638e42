use std::sync::Arc;
use std::time;

use health::HealthHandle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::StalenessPolicy;
use crate::device::DeviceStatus;
use crate::error::{DeviceError, WorkerError};
use crate::exposition::Exposition;
use crate::metrics;
use crate::registry::MetricRegistry;
use crate::time::{SystemTime, TimeSource};

/// Settings of one worker, taken from the exporter configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub device_label: String,
    pub field_keys: Vec<String>,
    pub metric_prefix: String,
    pub poll_interval: time::Duration,
    pub expiration_threshold: ::time::Duration,
    pub staleness_policy: StalenessPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Constructed, `run` not called yet.
    Idle,
    /// Polling until the shutdown token is cancelled.
    Running,
    /// Loop exited and the device session was released. Terminal.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Success,
    Failure,
}

impl PollOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            PollOutcome::Success => "success",
            PollOutcome::Failure => "failure",
        }
    }
}

/// What one poll cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub outcome: PollOutcome,
    /// Metrics whose exposed value changed.
    pub updated: usize,
    /// Metrics hidden by the expiration sweep.
    pub cleared: usize,
}

/// Polls one device and keeps its gauges in line with the reported status.
pub struct Worker<D> {
    /// The device session, released when the loop exits.
    device: Option<D>,
    registry: MetricRegistry,
    field_keys: Vec<String>,
    poll_interval: time::Duration,
    expiration_threshold: ::time::Duration,
    staleness_policy: StalenessPolicy,
    time_source: Arc<dyn TimeSource + Send + Sync>,
    shutdown: CancellationToken,
    liveness: Option<HealthHandle>,
    state: WorkerState,
}

impl<D: DeviceStatus> Worker<D> {
    pub fn new(
        device: D,
        exposition: Arc<dyn Exposition>,
        config: WorkerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            device: Some(device),
            registry: MetricRegistry::new(exposition, &config.metric_prefix, &config.device_label),
            field_keys: config.field_keys,
            poll_interval: config.poll_interval,
            expiration_threshold: config.expiration_threshold,
            staleness_policy: config.staleness_policy,
            time_source: Arc::new(SystemTime {}),
            shutdown,
            liveness: None,
            state: WorkerState::Idle,
        }
    }

    pub fn with_time_source(mut self, time_source: Arc<dyn TimeSource + Send + Sync>) -> Self {
        self.time_source = time_source;
        self
    }

    /// Report healthy on `liveness` after every cycle.
    pub fn with_liveness(mut self, liveness: HealthHandle) -> Self {
        self.liveness = Some(liveness);
        self
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn registry(&self) -> &MetricRegistry {
        &self.registry
    }

    /// Poll until the shutdown token is cancelled.
    ///
    /// The token is only checked between cycles: an in-flight cycle and the
    /// sleep that follows it always complete, so shutdown can take up to one
    /// poll interval plus one request timeout.
    pub async fn run(&mut self) -> Result<(), WorkerError> {
        if self.state == WorkerState::Stopped {
            warn!("refusing to restart a stopped worker");
            return Err(WorkerError::AlreadyStopped);
        }

        self.state = WorkerState::Running;
        info!(
            "polling {} field(s) every {:?}",
            self.field_keys.len(),
            self.poll_interval
        );

        while !self.shutdown.is_cancelled() {
            let report = self.poll_once().await;
            debug!("poll cycle done: {:?}", report);

            if let Some(liveness) = &self.liveness {
                liveness.report_healthy();
            }

            tokio::time::sleep(self.poll_interval).await;
        }

        self.state = WorkerState::Stopped;
        // Release the device session
        self.device = None;
        info!("worker stopped");

        Ok(())
    }

    /// Refresh the device status, update the configured metrics, then clear expired ones.
    ///
    /// Never fails: a refresh error is logged and leaves every metric as it was,
    /// and the expiration sweep runs regardless.
    pub async fn poll_once(&mut self) -> CycleReport {
        let start = tokio::time::Instant::now();
        let mut report = CycleReport {
            outcome: PollOutcome::Failure,
            updated: 0,
            cleared: 0,
        };

        let refreshed = match self.device.as_mut() {
            Some(device) => device.refresh().await.map(|_| device),
            None => Err(DeviceError::SessionClosed),
        };

        match refreshed {
            Ok(device) => {
                let now = self.time_source.now();
                for field_key in &self.field_keys {
                    let value = device.get(field_key);
                    if let Some(metric) = self.registry.resolve(field_key) {
                        if metric.set(value, now, self.staleness_policy) {
                            report.updated += 1;
                        }
                    }
                }
                report.outcome = PollOutcome::Success;
            }
            Err(e) => error!("Error processing payload: {}", e),
        }

        report.cleared = self.clear_expired_metrics();

        metrics::record_cycle(
            report.outcome.as_str(),
            start.elapsed().as_secs_f64(),
            self.registry.len(),
            report.cleared,
        );

        report
    }

    /// Clear the metrics that have not been updated for more than the expiration threshold.
    pub fn clear_expired_metrics(&mut self) -> usize {
        let now = self.time_source.now();
        let mut cleared = 0;

        for metric in self.registry.iter_mut() {
            if metric.is_expired(now, self.expiration_threshold) {
                metric.clear(now);
                info!("Cleared expired metric {}", metric.exposed_name());
                cleared += 1;
            }
        }

        cleared
    }
}

/// Wait up to `grace` for a cancelled worker task to exit, aborting it past that.
///
/// The poll loop only notices cancellation after its sleep, which can outlast
/// the grace period a process gets on SIGTERM. Returns true if the worker
/// stopped by itself.
pub async fn stop_worker(
    mut task: JoinHandle<Result<(), WorkerError>>,
    grace: time::Duration,
) -> bool {
    match tokio::time::timeout(grace, &mut task).await {
        Ok(Ok(Ok(()))) => true,
        Ok(Ok(Err(e))) => {
            error!("worker exited with an error: {}", e);
            true
        }
        Ok(Err(e)) => {
            error!("worker task failed: {}", e);
            true
        }
        Err(_) => {
            warn!("worker still running after {:?}, aborting it", grace);
            task.abort();
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    error!("worker task failed: {}", e);
                }
            }
            false
        }
    }
}
