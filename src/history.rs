//! On-demand history sync.
//!
//! The dataset lives beside the live buffer and is never merged into it. A
//! failed sync keeps the previous dataset and records the error for display.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{
    metrics::{self, FetchTimer},
    models::MetricSample,
    Result, ScopeError,
};

#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn fetch_history(&self) -> Result<Vec<MetricSample>>;
}

/// `GET`s the history endpoint; one round trip, no retry.
pub struct HttpHistorySource {
    client: reqwest::Client,
    url: String,
}

impl HttpHistorySource {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ScopeError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl HistorySource for HttpHistorySource {
    async fn fetch_history(&self) -> Result<Vec<MetricSample>> {
        debug!("Fetching history from {}", self.url);

        let resp = self.client.get(&self.url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ScopeError::History(format!(
                "history endpoint returned {}",
                status
            )));
        }

        let body = resp.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| ScopeError::History(format!("malformed history payload: {}", e)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryDataset {
    pub samples: Arc<[MetricSample]>,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl Default for HistoryDataset {
    fn default() -> Self {
        Self {
            samples: Arc::from(Vec::new()),
            fetched_at: None,
        }
    }
}

impl HistoryDataset {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HistoryView {
    pub dataset: HistoryDataset,
    pub last_error: Option<String>,
    pub in_flight: bool,
}

struct SyncState {
    view: HistoryView,
    issued: u64,
    applied: u64,
    outstanding: usize,
}

pub struct HistorySync {
    source: Arc<dyn HistorySource>,
    state: RwLock<SyncState>,
    closed: AtomicBool,
}

/// Marks one sync as outstanding until it finishes or is dropped mid-fetch.
struct InFlight<'a> {
    state: &'a RwLock<SyncState>,
}

impl<'a> InFlight<'a> {
    fn begin(state: &'a RwLock<SyncState>) -> (Self, u64) {
        let mut guard = state.write();
        guard.issued += 1;
        guard.outstanding += 1;
        guard.view.in_flight = true;
        let ticket = guard.issued;
        drop(guard);
        (Self { state }, ticket)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut state = self.state.write();
        state.outstanding -= 1;
        if state.outstanding == 0 {
            state.view.in_flight = false;
        }
    }
}

impl HistorySync {
    pub fn new(source: Arc<dyn HistorySource>) -> Self {
        Self {
            source,
            state: RwLock::new(SyncState {
                view: HistoryView::default(),
                issued: 0,
                applied: 0,
                outstanding: 0,
            }),
            closed: AtomicBool::new(false),
        }
    }

    /// Fetches and replaces the dataset.
    ///
    /// A response older than the one already applied returns the current
    /// dataset unchanged. Dropping a sync mid-fetch leaves no trace.
    pub async fn sync(&self) -> Result<HistoryDataset> {
        if self.is_closed() {
            return Err(ScopeError::Closed);
        }

        let (_in_flight, ticket) = InFlight::begin(&self.state);

        let result = {
            let _timer = FetchTimer::new();
            self.source.fetch_history().await
        };

        let mut state = self.state.write();
        if self.is_closed() {
            debug!("Ignoring history response received after teardown");
            return Err(ScopeError::Closed);
        }

        if ticket < state.applied {
            debug!("Discarding superseded history response #{}", ticket);
            return match result {
                Ok(_) => Ok(state.view.dataset.clone()),
                Err(e) => Err(e),
            };
        }
        state.applied = ticket;

        match result {
            Ok(samples) => {
                let dataset = HistoryDataset {
                    samples: samples.into(),
                    fetched_at: Some(Utc::now()),
                };
                info!("Synced {} history records", dataset.len());
                state.view.dataset = dataset.clone();
                state.view.last_error = None;
                Ok(dataset)
            }
            Err(e) => {
                metrics::record_history_failure();
                warn!("History sync failed: {}", e);
                state.view.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    pub fn dataset(&self) -> HistoryDataset {
        self.state.read().view.dataset.clone()
    }

    pub fn view(&self) -> HistoryView {
        self.state.read().view.clone()
    }

    /// Later responses are ignored and further syncs refused.
    pub fn close(&self) {
        // Taken so a sync holding the lock either finishes first or sees the flag.
        // Set under the write lock: a sync applying a response either finished first or sees the flag.
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("History sync closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Timestamp;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Semaphore;
    use tokio_test::{assert_err, assert_ok};

    const HISTORY_BODY: &str = r#"[
        {"timestamp": "2024-06-10 06:13:20", "cpu_usage": 3.5, "memory_usage": 61.0, "disk_io": 10.25, "network_latency": 18.0},
        {"timestamp": "2024-06-10 06:13:21", "cpu_usage": 4.0, "memory_usage": 62.0, "disk_io": 10.5, "network_latency": 999}
    ]"#;

    fn http_sync(server: &mockito::ServerGuard) -> HistorySync {
        let source =
            HttpHistorySource::new(&format!("{}/history", server.url()), Duration::from_secs(5))
                .unwrap();
        HistorySync::new(Arc::new(source))
    }

    #[tokio::test]
    async fn test_sync_replaces_dataset() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/history")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(HISTORY_BODY)
            .expect(2)
            .create_async()
            .await;
        let sync = http_sync(&server);
        assert!(sync.dataset().is_empty());

        let first = assert_ok!(sync.sync().await);
        assert_eq!(first.len(), 2);
        assert_eq!(first.samples[0].timestamp, Timestamp::from("2024-06-10 06:13:20"));
        assert_eq!(first.samples[1].network_latency, 999.0);

        let second = assert_ok!(sync.sync().await);
        assert_eq!(sync.dataset().len(), 2);
        assert!(second.fetched_at >= first.fetched_at);
        assert!(!sync.view().in_flight);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_sync_keeps_previous_dataset() {
        let mut server = mockito::Server::new_async().await;
        let ok = server
            .mock("GET", "/history")
            .with_status(200)
            .with_body(HISTORY_BODY)
            .create_async()
            .await;
        let sync = http_sync(&server);
        let before = assert_ok!(sync.sync().await);
        ok.remove_async().await;

        server
            .mock("GET", "/history")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let err = assert_err!(sync.sync().await);
        assert!(matches!(err, ScopeError::History(_)));
        assert!(err.to_string().contains("500"));

        let view = sync.view();
        assert_eq!(view.dataset, before);
        assert!(view.last_error.unwrap().contains("500"));
    }

    #[tokio::test]
    async fn test_malformed_history_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/history")
            .with_status(200)
            .with_body(r#"[{"timestamp": 1, "cpu_usage": 1}]"#)
            .create_async()
            .await;
        let sync = http_sync(&server);

        let err = assert_err!(sync.sync().await);
        assert!(err.to_string().contains("malformed history payload"));
        assert!(sync.dataset().is_empty());
    }

    /// Holds the n-th fetch until its gate opens, then answers with `records[n]` samples.
    struct GatedSource {
        gates: Vec<Semaphore>,
        records: Vec<usize>,
        calls: AtomicUsize,
    }

    impl GatedSource {
        fn new(records: &[usize]) -> Arc<Self> {
            Arc::new(Self {
                gates: records.iter().map(|_| Semaphore::new(0)).collect(),
                records: records.to_vec(),
                calls: AtomicUsize::new(0),
            })
        }

        fn open(&self, call: usize) {
            self.gates[call].add_permits(1);
        }
    }

    #[async_trait]
    impl HistorySource for GatedSource {
        async fn fetch_history(&self) -> Result<Vec<MetricSample>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.gates[call]
                .acquire()
                .await
                .map_err(|e| ScopeError::Internal(e.to_string()))?
                .forget();
            Ok(vec![MetricSample::default(); self.records[call]])
        }
    }

    #[tokio::test]
    async fn test_response_after_close_is_ignored() {
        let source = GatedSource::new(&[3]);
        let sync = HistorySync::new(source.clone());

        let mut pending = Box::pin(sync.sync());
        assert!(futures::poll!(&mut pending).is_pending());
        assert!(sync.view().in_flight);

        sync.close();
        source.open(0);

        assert!(matches!(pending.await, Err(ScopeError::Closed)));
        assert!(sync.dataset().is_empty());
        assert!(!sync.view().in_flight);
        assert!(matches!(sync.sync().await, Err(ScopeError::Closed)));
    }

    #[tokio::test]
    async fn test_older_response_after_newer_does_not_replace() {
        let source = GatedSource::new(&[2, 4]);
        let sync = HistorySync::new(source.clone());

        let mut older = Box::pin(sync.sync());
        assert!(futures::poll!(&mut older).is_pending());
        let mut newer = Box::pin(sync.sync());
        assert!(futures::poll!(&mut newer).is_pending());

        source.open(1);
        let newer = assert_ok!(newer.await);
        assert_eq!(newer.len(), 4);
        assert!(sync.view().in_flight);

        source.open(0);
        let older = assert_ok!(older.await);
        assert_eq!(older, newer);
        assert_eq!(sync.dataset(), newer);
        assert!(!sync.view().in_flight);
    }

    #[tokio::test]
    async fn test_older_response_applies_when_newer_is_cancelled() {
        let source = GatedSource::new(&[5, 1]);
        let sync = HistorySync::new(source.clone());

        let mut older = Box::pin(sync.sync());
        assert!(futures::poll!(&mut older).is_pending());
        let mut newer = Box::pin(sync.sync());
        assert!(futures::poll!(&mut newer).is_pending());
        drop(newer);
        assert!(sync.view().in_flight);

        source.open(0);
        let older = assert_ok!(older.await);
        assert_eq!(older.len(), 5);
        assert_eq!(sync.dataset().len(), 5);
        assert!(!sync.view().in_flight);
    }

    #[tokio::test]
    async fn test_cancelled_sync_clears_in_flight() {
        let source = GatedSource::new(&[3, 2]);
        let sync = HistorySync::new(source.clone());

        let mut pending = Box::pin(sync.sync());
        assert!(futures::poll!(&mut pending).is_pending());
        assert!(sync.view().in_flight);
        drop(pending);

        let view = sync.view();
        assert!(!view.in_flight);
        assert!(view.dataset.is_empty());
        assert_eq!(view.last_error, None);

        source.open(1);
        assert_eq!(assert_ok!(sync.sync().await).len(), 2);
    }
}
