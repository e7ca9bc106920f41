//! WebSocket live feed.

use async_trait::async_trait;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{FeedEvent, FeedSubscription, FeedTransport};
use crate::{metrics, Result, ScopeError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const EVENT_BUFFER: usize = 64;

pub struct WsFeed {
    url: String,
}

impl WsFeed {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn read_loop(
        mut stream: WsStream,
        tx: mpsc::Sender<FeedEvent>,
        mut release: oneshot::Receiver<()>,
    ) {
        loop {
            let frame = tokio::select! {
                frame = stream.next() => frame,
                _ = &mut release => {
                    if let Err(e) = stream.close(None).await {
                        debug!("WebSocket close handshake failed: {}", e);
                    }
                    break;
                }
            };

            let event = match frame {
                Some(Ok(Message::Text(text))) => FeedEvent::Message(text),
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => FeedEvent::Message(text),
                    Err(e) => {
                        metrics::record_malformed_sample();
                        warn!("Dropping binary feed frame that is not UTF-8: {}", e);
                        continue;
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.into_owned())
                        .filter(|reason| !reason.is_empty());
                    let _ = tx.send(FeedEvent::Close(reason)).await;
                    break;
                }
                Some(Ok(_)) => continue, // ping/pong handled by tungstenite
                Some(Err(e)) => {
                    warn!("WebSocket receive error: {}", e);
                    let _ = tx.send(FeedEvent::Close(Some(e.to_string()))).await;
                    break;
                }
                None => {
                    let _ = tx.send(FeedEvent::Close(None)).await;
                    break;
                }
            };

            if tx.send(event).await.is_err() {
                break;
            }
        }
        debug!("WebSocket read loop finished");
    }
}

#[async_trait]
impl FeedTransport for WsFeed {
    async fn connect(&self) -> Result<FeedSubscription> {
        info!("Connecting to live feed at {}", self.url);

        let (stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| ScopeError::Feed(format!("Failed to connect to {}: {}", self.url, e)))?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let (release_tx, release_rx) = oneshot::channel();

        tx.send(FeedEvent::Open)
            .await
            .map_err(|e| ScopeError::Internal(format!("Failed to queue open event: {}", e)))?;
        tokio::spawn(Self::read_loop(stream, tx, release_rx));

        Ok(FeedSubscription::new(rx, release_tx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::ws::{Message as ServerMessage, WebSocket, WebSocketUpgrade},
        response::IntoResponse,
        routing::get,
        Router,
    };
    use std::time::Duration;
    use tokio::net::TcpListener;

    const VALID_SAMPLE: &str = r#"{"timestamp": 2.0, "cpu_usage": 1.0, "memory_usage": 20.0, "disk_io": 0.1, "network_latency": 5.0}"#;

    async fn send_frames(mut socket: WebSocket) {
        let mut invalid = br#"{"timestamp": ""#.to_vec();
        invalid.push(0xFF);
        invalid.extend_from_slice(
            br#"", "cpu_usage": 1.0, "memory_usage": 95.0, "disk_io": 0.1, "network_latency": 5.0}"#,
        );

        let frames = vec![
            ServerMessage::Binary(invalid),
            ServerMessage::Binary(VALID_SAMPLE.as_bytes().to_vec()),
            ServerMessage::Close(None),
        ];
        for frame in frames {
            if socket.send(frame).await.is_err() {
                return;
            }
        }
    }

    async fn binary_feed(ws: WebSocketUpgrade) -> impl IntoResponse {
        ws.on_upgrade(send_frames)
    }

    #[tokio::test]
    async fn test_binary_frame_with_invalid_utf8_is_dropped() {
        metrics::init_metrics();
        let before = metrics::MALFORMED_SAMPLES.get();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/ws/metrics", get(binary_feed));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let feed = WsFeed::new(&format!("ws://{}/ws/metrics", addr));
        let mut subscription = feed.connect().await.unwrap();

        let mut events = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(event) = subscription.next().await {
                let done = matches!(event, FeedEvent::Close(_));
                events.push(event);
                if done {
                    break;
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], FeedEvent::Open));
        assert!(matches!(&events[1], FeedEvent::Message(text) if text == VALID_SAMPLE));
        assert!(matches!(events[2], FeedEvent::Close(None)));
        assert!(metrics::MALFORMED_SAMPLES.get() > before);
    }

    #[tokio::test]
    async fn test_connect_refused_is_feed_error() {
        // Nothing listens on the discard port on a test host.
        let feed = WsFeed::new("ws://127.0.0.1:9/ws/metrics");
        let err = feed.connect().await.err().unwrap();
        assert!(matches!(err, ScopeError::Feed(_)));
        assert!(err.to_string().contains("127.0.0.1:9"));
    }

    #[test]
    fn test_url_is_kept() {
        let feed = WsFeed::new("ws://localhost:8000/ws/metrics");
        assert_eq!(feed.url(), "ws://localhost:8000/ws/metrics");
    }
}
