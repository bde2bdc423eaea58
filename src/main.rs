//! SSE ETF Option Premium Monitor
//!
//! Polls the SSE option chain and Sina live quotes, computes the
//! premium/discount per (underlying, month, strike) via put-call parity, and
//! keeps a date-keyed CSV history under optimistic concurrency.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

use sse_etf_premium::config::{
    auto_refresh_default, history_path, save_on_refresh_enabled, REFRESH_INTERVAL_SECS, UNDERLYINGS,
    WORKER_POOL_SIZE,
};
use sse_etf_premium::market::SseMarketClient;
use sse_etf_premium::pipeline::PremiumPipeline;
use sse_etf_premium::scheduler::RefreshScheduler;
use sse_etf_premium::storage::{LocalFileStore, SnapshotStore};
use sse_etf_premium::types::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Logging to stdout and a local file
    let file_appender = tracing_appender::rolling::never(".", "premium-monitor.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("sse_etf_premium=info".parse().expect("valid directive"));

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);
    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    dotenvy::dotenv().ok();

    info!("SSE ETF Option Premium Monitor");
    info!("   Underlyings: {}", UNDERLYINGS.iter().map(|u| u.display_code).collect::<Vec<_>>().join(", "));
    info!("   Refresh interval: {}s | worker pool: {}", REFRESH_INTERVAL_SECS, WORKER_POOL_SIZE);
    info!("   History file: {}", history_path());
    info!("   Auto-refresh: {}", auto_refresh_default());
    if save_on_refresh_enabled() {
        info!("   Saving a snapshot after every successful refresh");
    }

    let feed = Arc::new(SseMarketClient::new()?);
    let state = Arc::new(AppState::new(auto_refresh_default()));
    let pipeline = Arc::new(PremiumPipeline::new(feed));
    let store = Arc::new(LocalFileStore::new("."));
    let snapshots = Arc::new(SnapshotStore::new(store, history_path()));

    // Initial render: populate the display on startup regardless of the
    // trading window, as if the page had just been opened.
    state.request_manual_refresh();

    let scheduler = RefreshScheduler::new(pipeline, state, snapshots);
    scheduler.run().await;

    Ok(())
}
