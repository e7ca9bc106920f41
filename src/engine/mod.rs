//! Live metric stream engine.
//!
//! Owns the rolling sample window and the current alert. The engine is driven
//! through explicit feed event handlers (`on_open`, `on_message`, `on_close`)
//! and publishes a [`LiveSnapshot`] after every state change.

pub mod anomaly;
pub mod buffer;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    metrics,
    models::{Alert, MetricSample},
    Result, ScopeError,
};

pub use anomaly::Thresholds;
pub use buffer::{LiveBuffer, LIVE_BUFFER_CAPACITY};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// What the presentation layer renders from.
#[derive(Debug, Clone, Serialize)]
pub struct LiveSnapshot {
    pub state: ConnectionState,
    pub samples: Arc<[MetricSample]>,
    pub alert: Option<Alert>,
    pub latest: MetricSample,
    pub ingested: u64,
}

pub struct StreamEngine {
    state: ConnectionState,
    buffer: LiveBuffer,
    alert: Option<Alert>,
    thresholds: Thresholds,
    ingested: u64,
    updates: watch::Sender<LiveSnapshot>,
}

impl StreamEngine {
    pub fn new(thresholds: Thresholds) -> Self {
        let buffer = LiveBuffer::new();
        let (updates, _) = watch::channel(LiveSnapshot {
            state: ConnectionState::Disconnected,
            samples: buffer.snapshot(),
            alert: None,
            latest: MetricSample::default(),
            ingested: 0,
        });

        Self {
            state: ConnectionState::Disconnected,
            buffer,
            alert: None,
            thresholds,
            ingested: 0,
            updates,
        }
    }

    /// Receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<LiveSnapshot> {
        self.updates.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn buffer(&self) -> Arc<[MetricSample]> {
        self.buffer.snapshot()
    }

    pub fn alert(&self) -> Option<&Alert> {
        self.alert.as_ref()
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Most recent sample, or the all-zero sample before the first one.
    pub fn latest(&self) -> MetricSample {
        self.buffer.last().cloned().unwrap_or_default()
    }

    pub fn snapshot(&self) -> LiveSnapshot {
        LiveSnapshot {
            state: self.state,
            samples: self.buffer.snapshot(),
            alert: self.alert.clone(),
            latest: self.latest(),
            ingested: self.ingested,
        }
    }

    pub fn on_open(&mut self) {
        if self.is_connected() {
            return;
        }
        info!("Live feed connected");
        self.state = ConnectionState::Connected;
        metrics::set_feed_connected(true);
        self.publish();
    }

    /// Parses and ingests one feed message.
    ///
    /// A malformed payload, or any message while disconnected, is dropped and
    /// leaves buffer and alert untouched.
    pub fn on_message(&mut self, payload: &str) -> Result<()> {
        if !self.is_connected() {
            debug!("Dropping feed message received while disconnected");
            return Err(ScopeError::NotConnected);
        }

        let sample = MetricSample::from_json(payload).map_err(|e| {
            metrics::record_malformed_sample();
            warn!("Dropping malformed feed message: {}", e);
            e
        })?;

        self.ingest(sample);
        Ok(())
    }

    /// Buffer and alert are kept as they were.
    pub fn on_close(&mut self, reason: Option<&str>) {
        if !self.is_connected() {
            return;
        }
        match reason {
            Some(reason) => info!("Live feed disconnected: {}", reason),
            None => info!("Live feed disconnected"),
        }
        self.state = ConnectionState::Disconnected;
        metrics::set_feed_connected(false);
        self.publish();
    }

    pub fn ingest(&mut self, sample: MetricSample) {
        self.alert = anomaly::evaluate(&sample, &self.thresholds);
        if let Some(alert) = &self.alert {
            debug!("Sample {} raised alert: {}", sample.timestamp, alert);
            metrics::record_alert(alert.severity);
        }

        self.buffer.push(sample);
        self.ingested += 1;
        metrics::record_sample();
        self.publish();
    }

    fn publish(&self) {
        self.updates.send_replace(self.snapshot());
    }
}

impl Default for StreamEngine {
    fn default() -> Self {
        Self::new(Thresholds::default())
    }
}
