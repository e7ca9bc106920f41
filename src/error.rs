use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScopeError {
    #[error("Malformed sample: {0}")]
    MalformedSample(String),

    #[error("Feed is not connected")]
    NotConnected,

    #[error("Feed error: {0}")]
    Feed(String),

    #[error("History sync failed: {0}")]
    History(String),

    #[error("Session closed")]
    Closed,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for ScopeError {
    fn from(err: serde_json::Error) -> Self {
        ScopeError::MalformedSample(err.to_string())
    }
}

impl From<reqwest::Error> for ScopeError {
    fn from(err: reqwest::Error) -> Self {
        ScopeError::History(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ScopeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ScopeError::Feed(err.to_string())
    }
}

impl IntoResponse for ScopeError {
    fn into_response(self) -> Response {
        let status = match self {
            ScopeError::MalformedSample(_) => StatusCode::BAD_REQUEST,
            ScopeError::History(_) | ScopeError::Feed(_) => StatusCode::BAD_GATEWAY,
            ScopeError::NotConnected | ScopeError::Closed => StatusCode::SERVICE_UNAVAILABLE,
            ScopeError::Config(_) | ScopeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ScopeError>;
