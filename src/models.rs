use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Result;

/// Layout of the text timestamps served by the history endpoint.
pub const HISTORY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Server-assigned sample identifier.
///
/// The live feed sends fractional epoch seconds while the history endpoint
/// sends formatted wall-clock labels. Both are kept as received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    Epoch(f64),
    Label(String),
}

impl Timestamp {
    /// Interprets the timestamp as a UTC instant, if it has a known shape.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Timestamp::Epoch(secs) => {
                if !secs.is_finite() {
                    return None;
                }
                Utc.timestamp_millis_opt((secs * 1000.0).round() as i64)
                    .single()
            }
            Timestamp::Label(text) => NaiveDateTime::parse_from_str(text, HISTORY_TIMESTAMP_FORMAT)
                .ok()
                .map(|naive| Utc.from_utc_datetime(&naive)),
        }
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Timestamp::Epoch(0.0)
    }
}

impl From<f64> for Timestamp {
    fn from(secs: f64) -> Self {
        Timestamp::Epoch(secs)
    }
}

impl From<&str> for Timestamp {
    fn from(label: &str) -> Self {
        Timestamp::Label(label.to_string())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timestamp::Epoch(secs) => write!(f, "{}", secs),
            Timestamp::Label(text) => f.write_str(text),
        }
    }
}

/// One observation from the live feed or the history endpoint.
///
/// `Default` is the all-zero sample shown before anything has arrived.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: Timestamp,
    /// Percent, not clamped.
    pub cpu_usage: f64,
    /// Percent, not clamped.
    pub memory_usage: f64,
    /// Milliseconds.
    pub network_latency: f64,
    /// MB/s.
    pub disk_io: f64,
}

impl MetricSample {
    /// Parses one feed message. Every field is required.
    pub fn from_json(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Critical,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Critical => f.write_str("CRITICAL"),
            Severity::Warning => f.write_str("WARNING"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub severity: Severity,
    pub message: String,
}

impl Alert {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}
