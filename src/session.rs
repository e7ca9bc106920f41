use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::{
    engine::{LiveSnapshot, StreamEngine, Thresholds},
    feed::{run_feed, FeedTransport, ReconnectPolicy},
    history::{HistorySource, HistorySync},
    Result, ScopeError,
};

/// One open dashboard: a live feed driving its own engine, plus an
/// independent history client.
pub struct DashboardSession {
    live: watch::Receiver<LiveSnapshot>,
    history: Arc<HistorySync>,
    shutdown: watch::Sender<bool>,
    feed_task: Option<JoinHandle<StreamEngine>>,
}

impl DashboardSession {
    /// Spawns the feed driver. Must be called inside a tokio runtime.
    pub fn start<T>(
        transport: T,
        history_source: Arc<dyn HistorySource>,
        thresholds: Thresholds,
        policy: ReconnectPolicy,
    ) -> Self
    where
        T: FeedTransport + 'static,
    {
        let mut engine = StreamEngine::new(thresholds);
        let live = engine.subscribe();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let feed_task = tokio::spawn(async move {
            run_feed(&transport, &mut engine, &policy, shutdown_rx).await;
            engine
        });

        Self {
            live,
            history: Arc::new(HistorySync::new(history_source)),
            shutdown,
            feed_task: Some(feed_task),
        }
    }

    pub fn live(&self) -> watch::Receiver<LiveSnapshot> {
        self.live.clone()
    }

    pub fn history(&self) -> Arc<HistorySync> {
        Arc::clone(&self.history)
    }

    /// Stops the feed and the history client, returning the final engine.
    pub async fn shutdown(mut self) -> Result<StreamEngine> {
        debug!("Shutting down dashboard session");
        self.history.close();
        // The driver may already have exited on its own.
        let _ = self.shutdown.send(true);
        let feed_task = self
            .feed_task
            .take()
            .ok_or_else(|| ScopeError::Internal("Feed task already joined".to_string()))?;
        feed_task
            .await
            .map_err(|e| ScopeError::Internal(format!("Feed task failed: {}", e)))
    }
}

impl Drop for DashboardSession {
    fn drop(&mut self) {
        self.history.close();
        let _ = self.shutdown.send(true);
    }
}
