use reqwest::StatusCode;
use thiserror::Error;

/// Enumeration of errors raised while talking to the SmartThings API.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("failed to build the SmartThings http client: {0}")]
    ClientError(reqwest::Error),
    #[error("SMARTTHINGS_TOKEN is not a valid header value")]
    InvalidToken,
    #[error("request to the SmartThings API failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("SmartThings API responded with {status}: {body}")]
    StatusError { status: StatusCode, body: String },
    #[error("failed to parse SmartThings API response: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("the device session was already released")]
    SessionClosed,
}

/// Enumeration of errors raised while creating a device gauge.
#[derive(Error, Debug)]
pub enum MetricError {
    #[error("{0:?} cannot be used as a metric name")]
    InvalidFieldKey(String),
    #[error("failed to register gauge: {0}")]
    RegistrationError(#[from] prometheus::Error),
}

/// Enumeration of errors ending a worker run.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("a stopped worker cannot be restarted")]
    AlreadyStopped,
}

/// Enumeration of errors in the exporter configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    EnvError(#[from] envconfig::Error),
    #[error("DEVICE_METRICS must list at least one field key")]
    NoFieldKeys,
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("{0} must be at most 30 days")]
    DurationTooLong(&'static str),
}
