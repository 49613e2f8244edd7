// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// Everything lives under `/api/`. History reads are served straight from the
// feed's store; nothing here mutates candle state.
//
// CORS is permissive: the feed is meant to be charted from any origin.
// =============================================================================

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::debug;

use crate::app_state::AppState;
use crate::market_data::Timeframe;
use crate::types::{HistoryQuery, TimeframeData};

/// Error half of every fallible handler: status plus `{"error": "..."}`.
pub type ApiError = (StatusCode, Json<Value>);

pub fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": message.into() })),
    )
}

// =============================================================================
// Router construction
// =============================================================================

/// Build the full API router (REST and WebSocket) with CORS and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health))
        .route("/api/prices/history", get(history))
        .route("/api/prices/timeframes", get(timeframes))
        // ── Live feed ───────────────────────────────────────────────
        .route("/api/prices/live", get(crate::api::ws::ws_handler))
        .route(
            "/api/prices/live/:timeframe",
            get(crate::api::ws::ws_timeframe_handler),
        )
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health
// =============================================================================

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.health())
}

// =============================================================================
// Timeframes
// =============================================================================

async fn timeframes() -> impl IntoResponse {
    Json(Timeframe::ALL.to_vec())
}

// =============================================================================
// History
// =============================================================================

/// Raw query string values; parsed by hand so a bad value yields a JSON
/// error naming the parameter instead of axum's plain-text rejection.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    timeframe: Option<String>,
    from: Option<String>,
    to: Option<String>,
    limit: Option<String>,
}

impl HistoryParams {
    fn parse(&self) -> Result<(Timeframe, HistoryQuery), ApiError> {
        let timeframe = match non_empty(&self.timeframe) {
            Some(raw) => Timeframe::from_str(raw).map_err(|e| bad_request(e.to_string()))?,
            None => Timeframe::BASE,
        };
        let from: i64 = parse_param(&self.from, "from")?;
        let to: i64 = parse_param(&self.to, "to")?;
        let limit: usize = parse_param(&self.limit, "limit")?;

        Ok((timeframe, HistoryQuery::from_raw(from, to, limit)))
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_param<T: FromStr + Default>(value: &Option<String>, name: &str) -> Result<T, ApiError> {
    match non_empty(value) {
        Some(raw) => raw
            .parse()
            .map_err(|_| bad_request(format!("Invalid '{name}' parameter"))),
        None => Ok(T::default()),
    }
}

async fn history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<TimeframeData>, ApiError> {
    let (timeframe, query) = params.parse()?;
    let candles = state.feed.history(timeframe, &query);
    debug!(timeframe = %timeframe, count = candles.len(), "history served");

    Ok(Json(TimeframeData { timeframe, candles }))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::PriceFeed;
    use crate::market_data::{Candle, PriceGenerator};
    use crate::runtime_config::RuntimeConfig;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    const T0: i64 = 1_700_000_100_000;

    fn state_with_history(dir: &std::path::Path) -> Arc<AppState> {
        let config = RuntimeConfig {
            data_dir: dir.to_string_lossy().into_owned(),
            ..RuntimeConfig::default()
        };
        let feed = Arc::new(PriceFeed::new(&config, PriceGenerator::with_seed(9)));
        let base: Vec<Candle> = (0..10)
            .map(|i| Candle {
                timestamp: T0 + i * 60_000,
                ohlc: [100.0, 101.0, 99.0, 100.5],
                volume: 2.0,
                is_complete: true,
            })
            .collect();
        feed.initialize(base);
        Arc::new(AppState::new(config, feed))
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn timeframes_lists_all_six() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = get_json(router(state_with_history(dir.path())), "/api/prices/timeframes").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!(["1m", "5m", "15m", "1h", "4h", "1d"]));
    }

    #[tokio::test]
    async fn history_defaults_to_base_timeframe() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = get_json(router(state_with_history(dir.path())), "/api/prices/history").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["timeframe"], "1m");
        assert_eq!(body["candles"].as_array().unwrap().len(), 10);
        assert_eq!(body["candles"][0]["x"], T0);
        assert_eq!(body["candles"][0]["isComplete"], true);
    }

    #[tokio::test]
    async fn history_applies_window_and_limit() {
        let dir = tempfile::tempdir().unwrap();
        let uri = format!(
            "/api/prices/history?timeframe=1m&from={}&to={}&limit=2",
            T0 + 60_000,
            T0 + 5 * 60_000
        );
        let (status, body) = get_json(router(state_with_history(dir.path())), &uri).await;
        assert_eq!(status, StatusCode::OK);
        let stamps: Vec<i64> = body["candles"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["x"].as_i64().unwrap())
            .collect();
        assert_eq!(stamps, vec![T0 + 4 * 60_000, T0 + 5 * 60_000]);
    }

    #[tokio::test]
    async fn history_of_derived_timeframe() {
        let dir = tempfile::tempdir().unwrap();
        let (_, body) = get_json(
            router(state_with_history(dir.path())),
            "/api/prices/history?timeframe=5m",
        )
        .await;
        assert_eq!(body["timeframe"], "5m");
        assert_eq!(body["candles"].as_array().unwrap().len(), 2);
        assert_eq!(body["candles"][0]["volume"], 10.0);
    }

    #[tokio::test]
    async fn bad_parameters_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_history(dir.path());

        let (status, body) = get_json(router(state.clone()), "/api/prices/history?timeframe=2m").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("2m"));

        let (status, body) = get_json(router(state.clone()), "/api/prices/history?from=yesterday").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid 'from' parameter");

        let (status, body) = get_json(router(state), "/api/prices/history?limit=-1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid 'limit' parameter");
    }

    #[tokio::test]
    async fn health_reports_feed_state() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_history(dir.path());
        state.feed.start_new_candle();

        let (status, body) = get_json(router(state), "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["subscribers"], 0);
        assert_eq!(body["has_current_candle"], true);
        assert_eq!(body["clients"], json!([]));
    }

    #[tokio::test]
    async fn health_lists_connected_clients() {
        use crate::subscribers::ChannelSink;

        let dir = tempfile::tempdir().unwrap();
        let state = state_with_history(dir.path());
        let (sink, _rx, _shutdown) = ChannelSink::channel(4);
        let id = state.feed.subscribers().register(Arc::new(sink), Timeframe::Hour4);

        let (_, body) = get_json(router(state), "/api/health").await;
        assert_eq!(body["subscribers"], 1);
        assert_eq!(body["clients"][0]["id"], id.to_string());
        assert_eq!(body["clients"][0]["timeframe"], "4h");
        assert_eq!(body["clients"][0]["connected_secs"], 0);
    }
}
