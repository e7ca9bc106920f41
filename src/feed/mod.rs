//! Live feed transport and the driver that feeds the engine.

pub mod ws;

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::{engine::StreamEngine, metrics, Result};

pub use ws::WsFeed;

/// Events a transport delivers to the engine, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Open,
    Message(String),
    Close(Option<String>),
}

#[async_trait]
pub trait FeedTransport: Send + Sync {
    async fn connect(&self) -> Result<FeedSubscription>;
}

/// One open feed connection.
///
/// The connection is released on `close()` or drop, whichever comes first.
pub struct FeedSubscription {
    events: mpsc::Receiver<FeedEvent>,
    release: Option<oneshot::Sender<()>>,
}

impl FeedSubscription {
    pub fn new(events: mpsc::Receiver<FeedEvent>, release: oneshot::Sender<()>) -> Self {
        Self {
            events,
            release: Some(release),
        }
    }

    /// In-memory subscription, used by tests and local replays.
    pub fn channel(
        capacity: usize,
    ) -> (mpsc::Sender<FeedEvent>, oneshot::Receiver<()>, FeedSubscription) {
        let (tx, rx) = mpsc::channel(capacity);
        let (release_tx, release_rx) = oneshot::channel();
        (tx, release_rx, FeedSubscription::new(rx, release_tx))
    }

    pub async fn next(&mut self) -> Option<FeedEvent> {
        self.events.recv().await
    }

    /// Returns `true` only for the call that actually released the connection.
    pub fn close(&mut self) -> bool {
        match self.release.take() {
            Some(release) => {
                let _ = release.send(());
                self.events.close();
                true
            }
            None => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.release.is_none()
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

/// What to do after the feed drops. Disabled by default: a dropped or refused
/// connection ends the session's feed.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: None,
        }
    }

    pub fn exponential(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            enabled: true,
            initial_delay,
            max_delay,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Delay before reconnect number `attempt` (zero-based), or `None` to give up.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if !self.enabled {
            return None;
        }
        if let Some(max) = self.max_attempts {
            if attempt >= max {
                return None;
            }
        }
        let factor = 2u32.saturating_pow(attempt.min(16));
        Some(self.initial_delay.saturating_mul(factor).min(self.max_delay))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

enum SessionEnd {
    Shutdown,
    Dropped { opened: bool },
}

fn shutdown_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

/// Drives `engine` from `transport` until shutdown, or until the feed drops and
/// the policy gives up. The engine is left `Disconnected` on return.
pub async fn run_feed<T>(
    transport: &T,
    engine: &mut StreamEngine,
    policy: &ReconnectPolicy,
    mut shutdown: watch::Receiver<bool>,
) where
    T: FeedTransport + ?Sized,
{
    let mut attempt = 0;

    loop {
        if shutdown_requested(&shutdown) {
            break;
        }

        let connected = tokio::select! {
            result = transport.connect() => result,
            _ = shutdown.changed() => break,
        };

        match connected {
            Ok(mut subscription) => {
                let end = pump(&mut subscription, engine, &mut shutdown).await;
                if subscription.close() {
                    debug!("Released live feed subscription");
                }
                engine.on_close(None);
                match end {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Dropped { opened: true } => attempt = 0,
                    SessionEnd::Dropped { opened: false } => {}
                }
            }
            Err(e) => {
                metrics::record_feed_connect_failure();
                warn!("Failed to connect to live feed: {}", e);
            }
        }

        let Some(delay) = policy.delay_for(attempt) else {
            info!("Live feed closed, not reconnecting");
            break;
        };
        attempt += 1;
        info!("Reconnecting to live feed in {:?} (attempt {})", delay, attempt);

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }

    engine.on_close(None);
}

async fn pump(
    subscription: &mut FeedSubscription,
    engine: &mut StreamEngine,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let mut opened = false;
    loop {
        let event = tokio::select! {
            event = subscription.next() => event,
            _ = shutdown.changed() => return SessionEnd::Shutdown,
        };

        match event {
            Some(FeedEvent::Open) => {
                opened = true;
                engine.on_open();
            }
            Some(FeedEvent::Message(payload)) => {
                // Already counted and logged by the engine.
                let _ = engine.on_message(&payload);
            }
            Some(FeedEvent::Close(reason)) => {
                engine.on_close(reason.as_deref());
                return SessionEnd::Dropped { opened };
            }
            None => return SessionEnd::Dropped { opened },
        }
    }
}
