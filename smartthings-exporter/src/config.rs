use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

use crate::error::ConfigError;
use crate::worker::WorkerConfig;

/// Upper bound on every duration setting, keeping deadline arithmetic in range.
pub const MAX_SETTING_DURATION: time::Duration = time::Duration::from_secs(30 * 24 * 3600);

/// Margin added to the worst-case cycle duration before the worker is reported stalled.
pub const LIVENESS_MARGIN: time::Duration = time::Duration::from_secs(30);

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "DEVICE_ID")]
    pub device_id: String,

    #[envconfig(from = "DEVICE_NAME")]
    pub device_name: Option<String>,

    #[envconfig(from = "DEVICE_METRICS")]
    pub device_metrics: FieldKeys,

    #[envconfig(from = "SMARTTHINGS_TOKEN")]
    pub smartthings_token: String,

    #[envconfig(
        from = "SMARTTHINGS_API_URL",
        default = "https://api.smartthings.com/v1"
    )]
    pub smartthings_api_url: String,

    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "EXPORTER_PORT", default = "9090")]
    pub port: u16,

    #[envconfig(from = "COLLECTING_INTERVAL", default = "30")]
    pub collecting_interval: EnvSecsDuration,

    #[envconfig(from = "EXPIRATION_THRESHOLD", default = "300")]
    pub expiration_threshold: EnvSecsDuration,

    #[envconfig(from = "REQUEST_TIMEOUT_MS", default = "10000")]
    pub request_timeout: EnvMsDuration,

    #[envconfig(from = "METRIC_PREFIX", default = "smartthings_")]
    pub metric_prefix: String,

    #[envconfig(from = "STALENESS_POLICY", default = "on_change")]
    pub staleness_policy: StalenessPolicy,
}

impl Config {
    /// Load and validate the configuration from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::init_from_env()?.validate()
    }

    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.device_metrics.0.is_empty() {
            return Err(ConfigError::NoFieldKeys);
        }
        if self.collecting_interval.0.is_zero() {
            return Err(ConfigError::ZeroDuration("COLLECTING_INTERVAL"));
        }
        for (name, duration) in [
            ("COLLECTING_INTERVAL", self.collecting_interval.0),
            ("EXPIRATION_THRESHOLD", self.expiration_threshold.0),
            ("REQUEST_TIMEOUT_MS", self.request_timeout.0),
        ] {
            if duration > MAX_SETTING_DURATION {
                return Err(ConfigError::DurationTooLong(name));
            }
        }
        Ok(self)
    }

    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The label attached to every gauge, falling back to the device id.
    pub fn device_label(&self) -> &str {
        self.device_name.as_deref().unwrap_or(&self.device_id)
    }

    pub fn expiration_threshold(&self) -> ::time::Duration {
        saturating_duration(self.expiration_threshold.0)
    }

    /// How long the worker may go without reporting before liveness fails:
    /// one interval, one request timeout and a margin.
    pub fn liveness_deadline(&self) -> ::time::Duration {
        saturating_duration(
            self.collecting_interval
                .0
                .saturating_add(self.request_timeout.0)
                .saturating_add(LIVENESS_MARGIN),
        )
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            device_label: self.device_label().to_owned(),
            field_keys: self.device_metrics.0.clone(),
            metric_prefix: self.metric_prefix.clone(),
            poll_interval: self.collecting_interval.0,
            expiration_threshold: self.expiration_threshold(),
            staleness_policy: self.staleness_policy,
        }
    }
}

fn saturating_duration(duration: time::Duration) -> ::time::Duration {
    ::time::Duration::try_from(duration).unwrap_or(::time::Duration::MAX)
}

#[derive(Debug, Clone, Copy)]
pub struct EnvSecsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvDurationError;

impl FromStr for EnvSecsDuration {
    type Err = ParseEnvDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let secs = s.parse::<u64>().map_err(|_| ParseEnvDurationError)?;

        Ok(EnvSecsDuration(time::Duration::from_secs(secs)))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

impl FromStr for EnvMsDuration {
    type Err = ParseEnvDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

/// Ordered, de-duplicated list of device status attributes to export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldKeys(pub Vec<String>);

impl FromStr for FieldKeys {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut keys: Vec<String> = Vec::new();
        for key in s.split(',').map(str::trim).filter(|k| !k.is_empty()) {
            if !keys.iter().any(|k| k == key) {
                keys.push(key.to_owned());
            }
        }
        Ok(FieldKeys(keys))
    }
}

/// Whether reporting an unchanged value counts as a fresh update for expiration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StalenessPolicy {
    /// Only a changed value resets the expiration timer: a value reported
    /// unchanged for longer than the threshold gets cleared.
    #[default]
    OnChange,
    /// Every observation resets the expiration timer.
    OnObservation,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseStalenessPolicyError(String);

impl FromStr for StalenessPolicy {
    type Err = ParseStalenessPolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "on_change" => Ok(StalenessPolicy::OnChange),
            "on_observation" => Ok(StalenessPolicy::OnObservation),
            other => Err(ParseStalenessPolicyError(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn required_env() -> HashMap<String, String> {
        HashMap::from([
            ("DEVICE_ID".to_owned(), "abc-123".to_owned()),
            ("DEVICE_METRICS".to_owned(), "switch,level".to_owned()),
            ("SMARTTHINGS_TOKEN".to_owned(), "secret".to_owned()),
        ])
    }

    #[test]
    fn defaults() {
        let config = Config::init_from_hashmap(&required_env())
            .unwrap()
            .validate()
            .unwrap();

        assert_eq!(config.device_label(), "abc-123");
        assert_eq!(config.device_metrics.0, vec!["switch", "level"]);
        assert_eq!(config.collecting_interval.0, time::Duration::from_secs(30));
        assert_eq!(config.expiration_threshold(), ::time::Duration::seconds(300));
        assert_eq!(config.bind(), "0.0.0.0:9090");
        assert_eq!(config.metric_prefix, "smartthings_");
        assert_eq!(config.staleness_policy, StalenessPolicy::OnChange);
        assert_eq!(config.liveness_deadline(), ::time::Duration::seconds(70));

        let worker = config.worker_config();
        assert_eq!(worker.device_label, "abc-123");
        assert_eq!(worker.field_keys, vec!["switch", "level"]);
        assert_eq!(worker.poll_interval, time::Duration::from_secs(30));
    }

    #[test]
    fn device_name_overrides_label() {
        let mut env = required_env();
        env.insert("DEVICE_NAME".to_owned(), "Living room lamp".to_owned());

        let config = Config::init_from_hashmap(&env).unwrap();
        assert_eq!(config.device_label(), "Living room lamp");
    }

    #[test]
    fn missing_required_setting() {
        let mut env = required_env();
        env.remove("SMARTTHINGS_TOKEN");

        let err = Config::init_from_hashmap(&env).err().unwrap();
        assert!(matches!(
            err,
            envconfig::Error::EnvVarMissing {
                name: "SMARTTHINGS_TOKEN"
            }
        ));
    }

    #[test]
    fn blank_field_keys_are_rejected() {
        let mut env = required_env();
        env.insert("DEVICE_METRICS".to_owned(), " , ,".to_owned());

        let config = Config::init_from_hashmap(&env).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::NoFieldKeys)));
    }

    #[test]
    fn oversized_durations_are_rejected() {
        let mut env = required_env();
        env.insert(
            "COLLECTING_INTERVAL".to_owned(),
            u64::MAX.to_string(),
        );
        let config = Config::init_from_hashmap(&env).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DurationTooLong("COLLECTING_INTERVAL"))
        ));

        let mut env = required_env();
        env.insert("EXPIRATION_THRESHOLD".to_owned(), "2592001".to_owned());
        let config = Config::init_from_hashmap(&env).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DurationTooLong("EXPIRATION_THRESHOLD"))
        ));

        // The bound itself is accepted, and deadlines stay in range
        let mut env = required_env();
        env.insert("COLLECTING_INTERVAL".to_owned(), "2592000".to_owned());
        env.insert("REQUEST_TIMEOUT_MS".to_owned(), "2592000000".to_owned());
        let config = Config::init_from_hashmap(&env)
            .unwrap()
            .validate()
            .unwrap();
        assert_eq!(
            config.liveness_deadline(),
            ::time::Duration::seconds(2 * 2_592_000 + 30)
        );
        assert!(::time::OffsetDateTime::now_utc()
            .checked_add(config.liveness_deadline())
            .is_some());
    }

    #[test]
    fn field_keys_are_trimmed_and_deduplicated() {
        let keys: FieldKeys = "switch, level,switch,,power".parse().unwrap();
        assert_eq!(keys.0, vec!["switch", "level", "power"]);
    }

    #[test]
    fn parse_staleness_policy() {
        assert_eq!(
            "ON_OBSERVATION".parse::<StalenessPolicy>(),
            Ok(StalenessPolicy::OnObservation)
        );
        assert!("sometimes".parse::<StalenessPolicy>().is_err());
    }
}
