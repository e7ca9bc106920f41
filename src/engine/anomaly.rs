use serde::{Deserialize, Serialize};

use crate::models::{Alert, MetricSample, Severity};

pub const DEFAULT_MEMORY_CRITICAL: f64 = 90.0;
pub const DEFAULT_LATENCY_WARNING: f64 = 200.0;

pub const LATENCY_WARNING_MESSAGE: &str = "WARNING: High Network Latency";

/// Alert thresholds. Both comparisons are strict.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Memory percent above which a sample is critical.
    pub memory_critical: f64,
    /// Latency in milliseconds above which a sample is a warning.
    pub latency_warning: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            memory_critical: DEFAULT_MEMORY_CRITICAL,
            latency_warning: DEFAULT_LATENCY_WARNING,
        }
    }
}

/// Evaluates one sample in isolation. The memory rule wins over the latency
/// rule; no match clears the alert.
pub fn evaluate(sample: &MetricSample, thresholds: &Thresholds) -> Option<Alert> {
    if sample.memory_usage > thresholds.memory_critical {
        return Some(Alert::new(
            Severity::Critical,
            format!("CRITICAL: RAM Usage > {}%", thresholds.memory_critical),
        ));
    }

    if sample.network_latency > thresholds.latency_warning {
        return Some(Alert::new(Severity::Warning, LATENCY_WARNING_MESSAGE));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(memory_usage: f64, network_latency: f64) -> MetricSample {
        MetricSample {
            memory_usage,
            network_latency,
            ..Default::default()
        }
    }

    fn check(memory_usage: f64, network_latency: f64) -> Option<Alert> {
        evaluate(&reading(memory_usage, network_latency), &Thresholds::default())
    }

    #[test]
    fn test_memory_dominates_latency() {
        let alert = check(95.0, 250.0).unwrap();
        assert_eq!(alert.severity, Severity::Critical);
        assert_eq!(alert.message, "CRITICAL: RAM Usage > 90%");
    }

    #[test]
    fn test_latency_warning() {
        let alert = check(50.0, 250.0).unwrap();
        assert_eq!(alert.severity, Severity::Warning);
        assert_eq!(alert.message, "WARNING: High Network Latency");
    }

    #[test]
    fn test_healthy_sample_has_no_alert() {
        assert_eq!(check(50.0, 50.0), None);
    }

    #[test]
    fn test_boundaries_are_strict() {
        assert_eq!(check(90.0, 0.0), None);
        assert_eq!(check(90.1, 0.0).map(|a| a.severity), Some(Severity::Critical));
        assert_eq!(check(0.0, 200.0), None);
        assert_eq!(check(0.0, 200.1).map(|a| a.severity), Some(Severity::Warning));
    }

    #[test]
    fn test_nan_readings_do_not_alert() {
        assert_eq!(check(f64::NAN, f64::NAN), None);
    }

    #[test]
    fn test_custom_thresholds() {
        let thresholds = Thresholds {
            memory_critical: 75.5,
            latency_warning: 20.0,
        };
        let alert = evaluate(&reading(80.0, 0.0), &thresholds).unwrap();
        assert_eq!(alert.message, "CRITICAL: RAM Usage > 75.5%");
        assert!(evaluate(&reading(10.0, 25.0), &thresholds).is_some());
    }
}
