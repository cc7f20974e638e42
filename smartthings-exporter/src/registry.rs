use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::exposition::Exposition;
use crate::metric::DeviceMetric;

/// The gauges of one device, keyed by the status attribute they export.
///
/// Metrics are created the first time their field key is resolved and live as
/// long as the registry. Keying is per device: exporting several devices would
/// need one registry each, or a `(device_id, field_key)` key.
pub struct MetricRegistry {
    exposition: Arc<dyn Exposition>,
    prefix: String,
    device_label: String,
    metrics: Vec<DeviceMetric>,
    index: HashMap<String, usize>,
}

impl MetricRegistry {
    pub fn new(exposition: Arc<dyn Exposition>, prefix: &str, device_label: &str) -> Self {
        Self {
            exposition,
            prefix: prefix.to_owned(),
            device_label: device_label.to_owned(),
            metrics: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Find the metric exporting `field_key`, creating it if this is the first time
    /// the key is seen.
    ///
    /// Returns `None` if the gauge cannot be created; creation is attempted again
    /// on the next call.
    pub fn resolve(&mut self, field_key: &str) -> Option<&mut DeviceMetric> {
        if let Some(&position) = self.index.get(field_key) {
            debug!("Found metric linked to {}", field_key);
            return self.metrics.get_mut(position);
        }

        debug!("Cannot find metric linked to {}. Creating new metric", field_key);
        match DeviceMetric::new(
            self.exposition.as_ref(),
            &self.prefix,
            field_key,
            &self.device_label,
        ) {
            Ok(metric) => {
                info!(
                    "Created new metric from payload key {} -> {}",
                    metric.field_key(),
                    metric.exposed_name()
                );
                let position = self.metrics.len();
                self.metrics.push(metric);
                self.index.insert(field_key.to_owned(), position);
                self.metrics.get_mut(position)
            }
            Err(e) => {
                error!("failed to create metric for {}: {}", field_key, e);
                None
            }
        }
    }

    pub fn get(&self, field_key: &str) -> Option<&DeviceMetric> {
        self.index
            .get(field_key)
            .and_then(|&position| self.metrics.get(position))
    }

    /// All metrics, in creation order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut DeviceMetric> {
        self.metrics.iter_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceMetric> {
        self.metrics.iter()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::*;
    use crate::config::StalenessPolicy;
    use crate::exposition::PrometheusExposition;
    use crate::metric::tests::RecordingExposition;

    fn registry(exposition: &RecordingExposition) -> MetricRegistry {
        MetricRegistry::new(Arc::new(exposition.clone()), "smartthings_", "lamp")
    }

    #[test]
    fn resolve_is_lookup_or_create() {
        let exposition = RecordingExposition::default();
        let mut registry = registry(&exposition);

        registry.resolve("switch").unwrap().set(
            Some(1.0),
            OffsetDateTime::UNIX_EPOCH,
            StalenessPolicy::OnChange,
        );
        // Same handle: the second lookup sees the state set through the first
        let again = registry.resolve("switch").unwrap();
        assert_eq!(again.current_value(), Some(1.0));
        assert_eq!(registry.len(), 1);

        let level = registry.resolve("level").unwrap();
        assert_eq!(level.exposed_name(), "smartthings_level");
        assert_eq!(registry.len(), 2);

        assert_eq!(
            *exposition.names.lock().unwrap(),
            vec!["smartthings_switch", "smartthings_level"]
        );
    }

    #[test]
    fn creation_order_is_kept() {
        let exposition = RecordingExposition::default();
        let mut registry = registry(&exposition);

        for key in ["power", "switch", "level", "switch"] {
            registry.resolve(key);
        }

        let keys: Vec<&str> = registry.iter().map(DeviceMetric::field_key).collect();
        assert_eq!(keys, vec!["power", "switch", "level"]);
    }

    #[test]
    fn failed_creation_is_retried() {
        let exposition = RecordingExposition::default();
        let mut registry = registry(&exposition);

        assert!(registry.resolve("power-meter").is_none());
        assert!(registry.resolve("power-meter").is_none());
        assert!(registry.is_empty());
        assert!(registry.get("power-meter").is_none());
    }

    #[test]
    fn prometheus_backed_registry_does_not_double_register() {
        let exposition = PrometheusExposition::new(prometheus::Registry::new());
        let mut registry = MetricRegistry::new(Arc::new(exposition), "smartthings_", "lamp");

        assert!(registry.resolve("level").is_some());
        // A second registration of the same gauge name would fail
        assert!(registry.resolve("level").is_some());
        assert!(registry.resolve("bad key").is_none());
        assert_eq!(registry.len(), 1);
    }
}
