use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::{engine::Thresholds, feed::ReconnectPolicy, Result, ScopeError};

pub const DEFAULT_FEED_URL: &str = "ws://localhost:8000/ws/metrics";
pub const DEFAULT_HISTORY_URL: &str = "http://localhost:8000/history";
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8090";
pub const DEFAULT_HISTORY_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct Config {
    pub feed_url: String,
    pub history_url: String,
    pub bind_addr: SocketAddr,
    pub history_timeout: Duration,
    pub thresholds: Thresholds,
    pub reconnect: ReconnectPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; unset keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let feed_url = lookup("SYSTEMSCOPE_FEED_URL").unwrap_or_else(|| DEFAULT_FEED_URL.to_string());
        let history_url =
            lookup("SYSTEMSCOPE_HISTORY_URL").unwrap_or_else(|| DEFAULT_HISTORY_URL.to_string());

        let bind_addr = parse_or(&lookup, "SYSTEMSCOPE_BIND", DEFAULT_BIND_ADDR.parse().ok())?;
        let history_timeout = Duration::from_secs(parse_or(
            &lookup,
            "SYSTEMSCOPE_HISTORY_TIMEOUT_SECS",
            Some(DEFAULT_HISTORY_TIMEOUT_SECS),
        )?);

        let defaults = Thresholds::default();
        let thresholds = Thresholds {
            memory_critical: parse_or(
                &lookup,
                "SYSTEMSCOPE_MEMORY_CRITICAL",
                Some(defaults.memory_critical),
            )?,
            latency_warning: parse_or(
                &lookup,
                "SYSTEMSCOPE_LATENCY_WARNING",
                Some(defaults.latency_warning),
            )?,
        };

        let reconnect = if parse_or(&lookup, "SYSTEMSCOPE_RECONNECT", Some(false))? {
            let policy = ReconnectPolicy::exponential(Duration::from_secs(1), Duration::from_secs(30));
            match lookup("SYSTEMSCOPE_RECONNECT_MAX_ATTEMPTS") {
                Some(_) => policy.with_max_attempts(parse_or(
                    &lookup,
                    "SYSTEMSCOPE_RECONNECT_MAX_ATTEMPTS",
                    None,
                )?),
                None => policy,
            }
        } else {
            ReconnectPolicy::disabled()
        };

        Ok(Self {
            feed_url,
            history_url,
            bind_addr,
            history_timeout,
            thresholds,
            reconnect,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed_url: DEFAULT_FEED_URL.to_string(),
            history_url: DEFAULT_HISTORY_URL.to_string(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8090)),
            history_timeout: Duration::from_secs(DEFAULT_HISTORY_TIMEOUT_SECS),
            thresholds: Thresholds::default(),
            reconnect: ReconnectPolicy::disabled(),
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: Option<T>) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ScopeError::Config(format!("invalid {} {:?}: {}", key, raw, e))),
        None => default.ok_or_else(|| ScopeError::Config(format!("{} is not set", key))),
    }
}
