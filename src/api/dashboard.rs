use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    engine::{ConnectionState, LiveSnapshot},
    history::{HistoryDataset, HistorySync, HistoryView},
    metrics,
    models::{Alert, MetricSample},
    Result, ScopeError,
};

#[derive(Clone)]
pub struct DashboardState {
    pub live: watch::Receiver<LiveSnapshot>,
    pub history: Arc<HistorySync>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub service: String,
    pub version: String,
    pub feed: ConnectionState,
    pub live_samples: usize,
    pub history_samples: usize,
}

pub fn dashboard_router(state: DashboardState) -> Router {
    Router::new()
        .route("/", get(status))
        .route("/live", get(live))
        .route("/live/latest", get(latest))
        .route("/alert", get(alert))
        .route("/history", get(history))
        .route("/history/sync", post(sync_history))
        .route("/metrics", get(prometheus_metrics))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn status(State(state): State<DashboardState>) -> Json<StatusResponse> {
    let (feed, live_samples) = {
        let live = state.live.borrow();
        (live.state, live.samples.len())
    };

    Json(StatusResponse {
        service: "systemscope".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        feed,
        live_samples,
        history_samples: state.history.dataset().len(),
    })
}

async fn live(State(state): State<DashboardState>) -> Json<LiveSnapshot> {
    Json(state.live.borrow().clone())
}

async fn latest(State(state): State<DashboardState>) -> Json<MetricSample> {
    Json(state.live.borrow().latest.clone())
}

async fn alert(State(state): State<DashboardState>) -> Json<Option<Alert>> {
    Json(state.live.borrow().alert.clone())
}

async fn history(State(state): State<DashboardState>) -> Json<HistoryView> {
    Json(state.history.view())
}

async fn sync_history(State(state): State<DashboardState>) -> Result<Json<HistoryDataset>> {
    info!("History sync requested");
    let dataset = state.history.sync().await?;
    Ok(Json(dataset))
}

async fn prometheus_metrics() -> Result<impl IntoResponse> {
    let body = metrics::render()?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}

/// Serves the dashboard API until `shutdown` resolves.
pub async fn serve<F>(addr: SocketAddr, state: DashboardState, shutdown: F) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let app = dashboard_router(state);
    info!("Starting dashboard API on {}", addr);

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        ScopeError::Internal(format!("Failed to bind to address: {}", e))
    })?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ScopeError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}
