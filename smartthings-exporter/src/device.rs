use std::collections::HashMap;
use std::time;

use async_trait::async_trait;
use reqwest::header;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::DeviceError;

/// Component of a SmartThings device whose attributes are exported.
pub const MAIN_COMPONENT: &str = "main";

/// Source of the device status snapshot read by the poller.
#[async_trait]
pub trait DeviceStatus: Send {
    /// Fetch a fresh status snapshot. On failure the previous snapshot is kept.
    async fn refresh(&mut self) -> Result<(), DeviceError>;

    /// Numeric value of `field_key` in the latest snapshot, if the device reports one.
    fn get(&self, field_key: &str) -> Option<f64>;
}

/// Authenticated client for the SmartThings REST API.
#[derive(Clone)]
pub struct SmartThingsClient {
    api_url: String,
    client: reqwest::Client,
}

impl SmartThingsClient {
    pub fn new(api_url: &str, token: &str, timeout: time::Duration) -> Result<Self, DeviceError> {
        let mut headers = header::HeaderMap::new();
        let mut auth = header::HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| DeviceError::InvalidToken)?;
        auth.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent("smartthings-exporter")
            .timeout(timeout)
            .build()
            .map_err(DeviceError::ClientError)?;

        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_owned(),
            client,
        })
    }

    /// Open a session on one device, checking it exists and the token can read it.
    pub async fn device(&self, device_id: &str) -> Result<SmartThingsDevice, DeviceError> {
        let url = format!("{}/devices/{}", self.api_url, device_id);
        let description: DeviceDescription = self.get_json(&url).await?;

        info!(
            "opened session on device {} ({})",
            description.device_id,
            description.label.as_deref().unwrap_or("no label")
        );

        Ok(SmartThingsDevice {
            client: self.clone(),
            status_url: format!("{url}/status"),
            description,
            values: HashMap::new(),
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, DeviceError> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeviceError::StatusError { status, body });
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescription {
    pub device_id: String,
    pub label: Option<String>,
}

/// `GET /devices/{id}/status` body: component -> capability -> attribute.
#[derive(Debug, Deserialize)]
struct DeviceStatusResponse {
    #[serde(default)]
    components: HashMap<String, HashMap<String, HashMap<String, AttributeState>>>,
}

#[derive(Debug, Deserialize)]
struct AttributeState {
    #[serde(default)]
    value: Value,
}

/// A session on one SmartThings device, holding the latest status snapshot.
pub struct SmartThingsDevice {
    client: SmartThingsClient,
    status_url: String,
    description: DeviceDescription,
    values: HashMap<String, Value>,
}

impl SmartThingsDevice {
    pub fn description(&self) -> &DeviceDescription {
        &self.description
    }
}

#[async_trait]
impl DeviceStatus for SmartThingsDevice {
    async fn refresh(&mut self) -> Result<(), DeviceError> {
        let status: DeviceStatusResponse = self.client.get_json(&self.status_url).await?;
        self.values = flatten_component(status, MAIN_COMPONENT);
        debug!(
            "refreshed {} attributes of device {}",
            self.values.len(),
            self.description.device_id
        );
        Ok(())
    }

    fn get(&self, field_key: &str) -> Option<f64> {
        self.values.get(field_key).and_then(numeric_value)
    }
}

impl Drop for SmartThingsDevice {
    fn drop(&mut self) {
        info!("closed session on device {}", self.description.device_id);
    }
}

/// Flatten one component's capabilities into an attribute -> value map.
fn flatten_component(status: DeviceStatusResponse, component: &str) -> HashMap<String, Value> {
    status
        .components
        .into_iter()
        .filter(|(name, _)| name == component)
        .flat_map(|(_, capabilities)| capabilities.into_values())
        .flat_map(|attributes| attributes.into_iter())
        .map(|(attribute, state)| (attribute, state.value))
        .collect()
}

/// Interpret an attribute value as a gauge reading.
pub fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "on" | "open" | "active" | "true" => Some(1.0),
            "off" | "closed" | "inactive" | "false" => Some(0.0),
            other => other.parse::<f64>().ok().filter(|v| v.is_finite()),
        },
        _ => None,
    }
}
