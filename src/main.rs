use std::sync::Arc;
use tracing::{error, info};

use systemscope::{
    api::{self, DashboardState},
    config::Config,
    feed::WsFeed,
    history::HttpHistorySource,
    logging, metrics,
    session::DashboardSession,
    Result,
};

#[tokio::main]
async fn main() {
    if let Err(e) = logging::init_logger() {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    if let Err(e) = run().await {
        error!("systemscope failed: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = Config::from_env()?;
    metrics::init_metrics();

    info!(
        "Live feed {}, history {}, reconnect {}",
        config.feed_url,
        config.history_url,
        if config.reconnect.enabled { "on" } else { "off" }
    );

    let history = HttpHistorySource::new(&config.history_url, config.history_timeout)?;
    let session = DashboardSession::start(
        WsFeed::new(&config.feed_url),
        Arc::new(history),
        config.thresholds,
        config.reconnect.clone(),
    );

    let state = DashboardState {
        live: session.live(),
        history: session.history(),
    };
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let served = api::serve(config.bind_addr, state, shutdown).await;

    info!("Shutting down");
    let engine = session.shutdown().await?;
    info!("Ingested {} samples this session", engine.snapshot().ingested);

    served
}
