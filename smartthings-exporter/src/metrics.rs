use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

// Operational metrics of the exporter itself, rendered next to the device gauges
pub const METRIC_POLL_CYCLES: &str = "smartthings_exporter_poll_cycles_total";
pub const METRIC_POLL_DURATION: &str = "smartthings_exporter_poll_duration_seconds";
pub const METRIC_TRACKED: &str = "smartthings_exporter_tracked_metrics";
pub const METRIC_CLEARED: &str = "smartthings_exporter_metrics_cleared_total";

/// Register all metrics with descriptions
pub fn register_metrics() {
    describe_counter!(
        METRIC_POLL_CYCLES,
        "Number of poll cycles run, by device status refresh outcome"
    );
    describe_histogram!(
        METRIC_POLL_DURATION,
        "Time spent refreshing the device status and updating gauges"
    );
    describe_gauge!(
        METRIC_TRACKED,
        "Number of device status attributes with a gauge"
    );
    describe_counter!(
        METRIC_CLEARED,
        "Number of device gauges hidden after expiring"
    );
}

/// Record the outcome of one poll cycle
pub fn record_cycle(outcome: &'static str, elapsed_secs: f64, tracked: usize, cleared: usize) {
    counter!(METRIC_POLL_CYCLES, "outcome" => outcome).increment(1);
    histogram!(METRIC_POLL_DURATION).record(elapsed_secs);
    gauge!(METRIC_TRACKED).set(tracked as f64);
    if cleared > 0 {
        counter!(METRIC_CLEARED).increment(cleared as u64);
    }
}
