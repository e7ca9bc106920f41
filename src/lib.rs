pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod feed;
pub mod history;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod session;

pub use error::{Result, ScopeError};
