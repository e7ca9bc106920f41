use std::iter;
use std::sync::Arc;

use crate::models::MetricSample;

/// Number of samples kept for the live chart.
pub const LIVE_BUFFER_CAPACITY: usize = 30;

/// Capacity-bounded, oldest-first window of recent samples.
///
/// Every push builds a new shared slice, so a snapshot handed out earlier
/// never changes.
#[derive(Debug, Clone)]
pub struct LiveBuffer {
    samples: Arc<[MetricSample]>,
    capacity: usize,
}

impl LiveBuffer {
    pub fn new() -> Self {
        Self::with_capacity(LIVE_BUFFER_CAPACITY)
    }

    /// A zero capacity is raised to one so the latest sample is always kept.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Arc::from(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, sample: MetricSample) {
        let evict = (self.samples.len() + 1).saturating_sub(self.capacity);
        self.samples = self
            .samples
            .iter()
            .skip(evict)
            .cloned()
            .chain(iter::once(sample))
            .collect();
    }

    pub fn snapshot(&self) -> Arc<[MetricSample]> {
        Arc::clone(&self.samples)
    }

    pub fn last(&self) -> Option<&MetricSample> {
        self.samples.last()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for LiveBuffer {
    fn default() -> Self {
        Self::new()
    }
}
