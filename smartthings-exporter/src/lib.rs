//! Export the status attributes of a SmartThings device as Prometheus gauges.
pub mod config;
pub mod device;
pub mod error;
pub mod exposition;
pub mod handlers;
pub mod metric;
pub mod metrics;
pub mod registry;
pub mod time;
pub mod worker;

pub use config::Config;
pub use worker::{Worker, WorkerConfig};
