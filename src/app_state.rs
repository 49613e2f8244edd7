// =============================================================================
// Central Application State — Candle Feed
// =============================================================================
//
// Shared by every HTTP and WebSocket handler via `Arc<AppState>`. The feed
// owns its own interior mutability; the config is frozen at startup.
// =============================================================================

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::feed::PriceFeed;
use crate::runtime_config::RuntimeConfig;
use crate::subscribers::SubscriberInfo;

pub struct AppState {
    pub runtime_config: RuntimeConfig,
    pub feed: Arc<PriceFeed>,
    pub start_time: Instant,
}

/// Body of `GET /api/health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub subscribers: usize,
    pub uptime_secs: u64,
    pub server_time: i64,
    pub has_current_candle: bool,
    /// One entry per live connection.
    pub clients: Vec<SubscriberInfo>,
}

impl AppState {
    pub fn new(runtime_config: RuntimeConfig, feed: Arc<PriceFeed>) -> Self {
        Self {
            runtime_config,
            feed,
            start_time: Instant::now(),
        }
    }

    pub fn health(&self) -> HealthSnapshot {
        let clients = self.feed.subscribers().list();
        HealthSnapshot {
            status: "ok",
            subscribers: clients.len(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            server_time: chrono::Utc::now().timestamp_millis(),
            has_current_candle: self.feed.current_candle().is_some(),
            clients,
        }
    }
}
