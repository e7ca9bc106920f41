use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};
use std::time::Instant;

use crate::models::Severity;
use crate::{Result, ScopeError};

lazy_static! {
    // Live feed metrics
    pub static ref FEED_CONNECTED: IntGauge = register_int_gauge!(
        "systemscope_feed_connected",
        "Whether the live feed is connected (1) or not (0)"
    ).unwrap();

    pub static ref FEED_CONNECT_FAILURES: IntCounter = register_int_counter!(
        "systemscope_feed_connect_failures_total",
        "Total number of failed live feed connection attempts"
    ).unwrap();

    pub static ref SAMPLES_INGESTED: IntCounter = register_int_counter!(
        "systemscope_samples_ingested_total",
        "Total number of samples ingested from the live feed"
    ).unwrap();

    pub static ref MALFORMED_SAMPLES: IntCounter = register_int_counter!(
        "systemscope_malformed_samples_total",
        "Total number of feed messages dropped because they could not be parsed"
    ).unwrap();

    pub static ref ALERTS_RAISED: IntCounterVec = register_int_counter_vec!(
        "systemscope_alerts_raised_total",
        "Total number of samples that produced an alert",
        &["severity"]
    ).unwrap();

    // History metrics
    pub static ref HISTORY_FETCHES: IntCounter = register_int_counter!(
        "systemscope_history_fetches_total",
        "Total number of history sync requests"
    ).unwrap();

    pub static ref HISTORY_FETCH_FAILURES: IntCounter = register_int_counter!(
        "systemscope_history_fetch_failures_total",
        "Total number of failed history sync requests"
    ).unwrap();

    pub static ref HISTORY_FETCH_DURATION: Histogram = register_histogram!(
        "systemscope_history_fetch_duration_seconds",
        "History fetch round trip in seconds",
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0]
    ).unwrap();
}

pub fn init_metrics() {
    // Set initial values
    FEED_CONNECTED.set(0);
    lazy_static::initialize(&SAMPLES_INGESTED);
    lazy_static::initialize(&MALFORMED_SAMPLES);
    lazy_static::initialize(&FEED_CONNECT_FAILURES);
    lazy_static::initialize(&HISTORY_FETCHES);
    lazy_static::initialize(&HISTORY_FETCH_FAILURES);
    lazy_static::initialize(&HISTORY_FETCH_DURATION);
}

/// Times one history fetch; the duration is recorded on drop.
pub struct FetchTimer {
    start: Instant,
}

impl FetchTimer {
    pub fn new() -> Self {
        HISTORY_FETCHES.inc();
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for FetchTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FetchTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        HISTORY_FETCH_DURATION.observe(duration);
    }
}

pub fn set_feed_connected(connected: bool) {
    FEED_CONNECTED.set(if connected { 1 } else { 0 });
}

pub fn record_feed_connect_failure() {
    FEED_CONNECT_FAILURES.inc();
}

pub fn record_sample() {
    SAMPLES_INGESTED.inc();
}

pub fn record_malformed_sample() {
    MALFORMED_SAMPLES.inc();
}

pub fn record_alert(severity: Severity) {
    let label = match severity {
        Severity::Critical => "critical",
        Severity::Warning => "warning",
    };
    ALERTS_RAISED.with_label_values(&[label]).inc();
}

pub fn record_history_failure() {
    HISTORY_FETCH_FAILURES.inc();
}

/// Renders the default registry in the Prometheus text format.
pub fn render() -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|e| ScopeError::Internal(format!("Failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| ScopeError::Internal(format!("Metrics are not valid UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_registered_metrics() {
        init_metrics();
        record_sample();
        record_alert(Severity::Warning);

        let text = render().unwrap();
        assert!(text.contains("systemscope_samples_ingested_total"));
        assert!(text.contains("systemscope_alerts_raised_total{severity=\"warning\"}"));
        assert!(text.contains("systemscope_feed_connected"));
    }

    #[test]
    fn test_fetch_timer_observes_on_drop() {
        let before = HISTORY_FETCH_DURATION.get_sample_count();
        let fetches = HISTORY_FETCHES.get();
        drop(FetchTimer::new());
        assert!(HISTORY_FETCH_DURATION.get_sample_count() > before);
        assert!(HISTORY_FETCHES.get() > fetches);
    }
}
