use std::sync::Arc;

use time::{Duration, OffsetDateTime};
use tracing::debug;

use crate::config::StalenessPolicy;
use crate::error::MetricError;
use crate::exposition::{Exposition, PublishedGauge};

/// One device status attribute published as a gauge.
///
/// The handle remembers the last published value so that unchanged readings
/// are not republished, and when it last changed so that the worker can hide
/// readings the device stopped reporting.
pub struct DeviceMetric {
    field_key: String,
    device_label: String,
    exposed_name: String,
    gauge: Arc<dyn PublishedGauge>,
    current_value: Option<f64>,
    last_update: Option<OffsetDateTime>,
    visible: bool,
}

/// Name of the gauge exported for `field_key`.
pub fn exposed_name(prefix: &str, field_key: &str) -> String {
    format!("{prefix}{field_key}")
}

impl DeviceMetric {
    pub fn new(
        exposition: &dyn Exposition,
        prefix: &str,
        field_key: &str,
        device_label: &str,
    ) -> Result<Self, MetricError> {
        if field_key.is_empty() {
            return Err(MetricError::InvalidFieldKey(field_key.to_owned()));
        }

        let exposed_name = exposed_name(prefix, field_key);
        let gauge = exposition.gauge(
            &exposed_name,
            &format!("value from API object key {field_key}"),
        )?;

        Ok(Self {
            field_key: field_key.to_owned(),
            device_label: device_label.to_owned(),
            exposed_name,
            gauge,
            current_value: None,
            last_update: None,
            visible: false,
        })
    }

    pub fn field_key(&self) -> &str {
        &self.field_key
    }

    pub fn exposed_name(&self) -> &str {
        &self.exposed_name
    }

    pub fn current_value(&self) -> Option<f64> {
        self.current_value
    }

    pub fn last_update(&self) -> Option<OffsetDateTime> {
        self.last_update
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Record an observation. Returns true if the exposed value changed.
    ///
    /// A `None` observation means the device stopped reporting the attribute,
    /// and hides the series.
    pub fn set(&mut self, value: Option<f64>, now: OffsetDateTime, policy: StalenessPolicy) -> bool {
        debug!("Set {} = {:?}", self.exposed_name, value);

        if self.current_value == value {
            if let (StalenessPolicy::OnObservation, Some(v)) = (policy, value) {
                self.last_update = Some(now);
                // Reported again after expiring
                if !self.visible {
                    self.gauge.publish(&self.device_label, v);
                    self.visible = true;
                    return true;
                }
            }
            return false;
        }

        let changed = match value {
            Some(v) => {
                self.gauge.publish(&self.device_label, v);
                self.visible = true;
                true
            }
            None => {
                let was_visible = self.visible;
                if was_visible {
                    self.gauge.hide(&self.device_label);
                }
                self.visible = false;
                was_visible
            }
        };
        self.current_value = value;
        self.last_update = Some(now);
        changed
    }

    /// Hide the series. The last value is kept: under `OnChange` only a different
    /// reading brings the series back.
    pub fn clear(&mut self, now: OffsetDateTime) {
        debug!("Clear {}", self.exposed_name);

        self.gauge.hide(&self.device_label);
        self.last_update = Some(now);
        self.visible = false;
    }

    /// Whether the published value has outlived `threshold`. Hidden series never expire.
    pub fn is_expired(&self, now: OffsetDateTime, threshold: Duration) -> bool {
        match self.last_update {
            Some(last_update) if self.visible => now - last_update > threshold,
            _ => false,
        }
    }
}
