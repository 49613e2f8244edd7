// =============================================================================
// Candle Feed — Main Entry Point
// =============================================================================
//
// Boot order: config, history (disk or synthetic), first live candle, driver,
// HTTP/WebSocket server. Ctrl+C saves every timeframe before exit.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod feed;
mod market_data;
mod persistence;
mod runtime_config;
mod subscribers;
mod types;

use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::feed::PriceFeed;
use crate::market_data::PriceGenerator;
use crate::runtime_config::RuntimeConfig;

const CONFIG_PATH: &str = "candle_feed.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Candle Feed — starting up");

    let mut config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });
    config.apply_env();
    config.sanitize();

    info!(
        bind_addr = %config.bind_addr,
        data_dir = %config.data_dir,
        max_candles = config.max_candles,
        update_ms = config.update_interval_ms,
        candle_ms = config.candle_interval_ms,
        "configuration ready"
    );

    // ── 2. History ───────────────────────────────────────────────────────
    let generator = match config.price_seed {
        Some(seed) => {
            info!(seed, "using seeded price generator");
            PriceGenerator::with_seed(seed)
        }
        None => PriceGenerator::new(),
    };
    let feed = Arc::new(PriceFeed::new(&config, generator));

    match feed.load_all() {
        Ok(loaded) => info!(timeframes = loaded, "history restored from disk"),
        Err(e) => {
            warn!(error = %e, "no usable history on disk — generating synthetic history");
            feed.seed_synthetic(config.seed_base_price, config.seed_volatility);
        }
    }

    // ── 3. Live candle & driver ──────────────────────────────────────────
    feed.start_new_candle();

    tokio::spawn(crate::feed::run_driver(
        feed.clone(),
        config.update_interval(),
        config.candle_interval(),
    ));

    // ── 4. API server ────────────────────────────────────────────────────
    let state = Arc::new(AppState::new(config.clone(), feed.clone()));
    let bind_addr = config.bind_addr.clone();

    tokio::spawn(async move {
        let app = api::rest::router(state);
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .expect("Failed to bind API server");
        info!(addr = %bind_addr, "API server listening");
        axum::serve(listener, app)
            .await
            .expect("API server failed");
    });

    info!("Candle feed running. Press Ctrl+C to stop.");

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — saving history");

    let saved = tokio::task::spawn_blocking(move || feed.save_all()).await?;
    info!(saved, "Candle feed shut down complete.");
    Ok(())
}
