use std::sync::Arc;

use prometheus::{GaugeVec, Opts, Registry};
use tracing::debug;

use crate::error::MetricError;

/// Label carrying the device display name on every device gauge.
pub const DEVICE_LABEL: &str = "device";

/// One named gauge family in the exposition layer.
///
/// Implementations must tolerate scrapes reading the gauge while the poller writes it.
pub trait PublishedGauge: Send + Sync {
    /// Set the series identified by `label` to `value`, creating it if needed.
    fn publish(&self, label: &str, value: f64);
    /// Drop the series identified by `label` so scrapes no longer report it.
    fn hide(&self, label: &str);
}

/// Factory for gauge families, backed by whatever registry the scrape endpoint renders.
pub trait Exposition: Send + Sync {
    fn gauge(&self, name: &str, help: &str) -> Result<Arc<dyn PublishedGauge>, MetricError>;
}

/// Exposition over an explicitly constructed `prometheus::Registry`.
#[derive(Clone)]
pub struct PrometheusExposition {
    registry: Registry,
}

impl PrometheusExposition {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Exposition for PrometheusExposition {
    fn gauge(&self, name: &str, help: &str) -> Result<Arc<dyn PublishedGauge>, MetricError> {
        let gauge = GaugeVec::new(Opts::new(name, help), &[DEVICE_LABEL])?;
        self.registry.register(Box::new(gauge.clone()))?;

        Ok(Arc::new(PrometheusGauge { gauge }))
    }
}

struct PrometheusGauge {
    gauge: GaugeVec,
}

impl PublishedGauge for PrometheusGauge {
    fn publish(&self, label: &str, value: f64) {
        self.gauge.with_label_values(&[label]).set(value);
    }

    fn hide(&self, label: &str) {
        // Hiding a series that was never published is fine
        if let Err(e) = self.gauge.remove_label_values(&[label]) {
            debug!("no series to hide for {}: {}", label, e);
        }
    }
}
