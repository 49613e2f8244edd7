// =============================================================================
// WebSocket Handler — Live candle stream
// =============================================================================
//
// Clients connect to `/api/prices/live` or `/api/prices/live/<tf>` and:
//   1. Receive the current base candle first (base timeframe only).
//   2. Receive every "new"/"update" event the feed broadcasts, for all
//      timeframes, in emission order.
//   3. May send `{"timeframe": "1h", "from": .., "to": .., "limit": ..}` at any
//      time and get `{"timeframe": "1h", "candles": [...]}` back.
//
// Broadcast payloads reach the socket through a bounded per-connection queue.
// A connection whose queue fills up is dropped by the registry, which also
// wakes this task so it can close the socket.
// =============================================================================

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::rest::bad_request;
use crate::app_state::AppState;
use crate::market_data::Timeframe;
use crate::subscribers::ChannelSink;
use crate::types::{HistoryQuery, TimeframeData, TimeframeRequest};

// =============================================================================
// WebSocket upgrade handlers
// =============================================================================

/// Upgrade on the default (base) timeframe.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    upgrade(ws, state, Timeframe::BASE)
}

/// Upgrade on the timeframe named in the path. Unknown names are rejected
/// before the upgrade.
pub async fn ws_timeframe_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> Response {
    match Timeframe::from_str(&raw) {
        Ok(timeframe) => upgrade(ws, state, timeframe),
        Err(e) => {
            warn!(timeframe = %raw, "WebSocket connection rejected: unknown timeframe");
            bad_request(e.to_string()).into_response()
        }
    }
}

fn upgrade(ws: WebSocketUpgrade, state: Arc<AppState>, timeframe: Timeframe) -> Response {
    info!(timeframe = %timeframe, "WebSocket connection accepted — upgrading");
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state, timeframe))
        .into_response()
}

// =============================================================================
// Connection handler
// =============================================================================

/// Manages a single WebSocket connection lifecycle.
///
/// `tokio::select!` over three sources:
///   1. **Outbound queue**: broadcast payloads forwarded to the socket.
///   2. **Shutdown**: the registry dropped this subscriber.
///   3. **Inbound**: timeframe requests, Ping/Pong, Close.
async fn handle_ws_connection(socket: WebSocket, state: Arc<AppState>, timeframe: Timeframe) {
    let registry = state.feed.subscribers().clone();
    let (sink, mut outbound, shutdown) = ChannelSink::channel(state.runtime_config.subscriber_buffer);
    // The current candle, if any, is queued ahead of every later event.
    let id = state.feed.subscribe(Arc::new(sink), timeframe);

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            // ── Outbound: broadcast events ──────────────────────────────
            Some(payload) = outbound.recv() => {
                if let Err(e) = sender.send(Message::Text(payload)).await {
                    debug!(subscriber = %id, error = %e, "WebSocket send failed — disconnecting");
                    break;
                }
            }

            // ── Registry dropped us ─────────────────────────────────────
            _ = shutdown.notified() => {
                info!(subscriber = %id, "subscriber closed by registry");
                let _ = sender.send(Message::Close(None)).await;
                break;
            }

            // ── Inbound: client messages ────────────────────────────────
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = timeframe_reply(&state, id, &text);
                        if let Err(e) = sender.send(Message::Text(reply)).await {
                            debug!(subscriber = %id, error = %e, "failed to send history — disconnecting");
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        debug!("WebSocket Ping received — sending Pong");
                        if let Err(e) = sender.send(Message::Pong(data)).await {
                            debug!(error = %e, "Failed to send Pong — disconnecting");
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        info!(subscriber = %id, "WebSocket Close frame received — disconnecting");
                        break;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        debug!("WebSocket binary message ignored");
                    }
                    Some(Err(e)) => {
                        warn!(subscriber = %id, error = %e, "WebSocket receive error — disconnecting");
                        break;
                    }
                    None => {
                        info!(subscriber = %id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    registry.unregister(id);
}

// =============================================================================
// Helpers
// =============================================================================

/// Answer a client timeframe request with that timeframe's history, or with
/// `{"error": ..}` when the message is not a valid request.
fn timeframe_reply(state: &AppState, id: Uuid, text: &str) -> String {
    let request: TimeframeRequest = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(e) => {
            debug!(subscriber = %id, error = %e, "unparseable timeframe request");
            return json!({ "error": format!("invalid timeframe request: {e}") }).to_string();
        }
    };

    state.feed.subscribers().set_timeframe(id, request.timeframe);
    let data = TimeframeData {
        timeframe: request.timeframe,
        candles: state.feed.history(request.timeframe, &HistoryQuery::from(&request)),
    };
    debug!(subscriber = %id, timeframe = %data.timeframe, count = data.candles.len(), "history sent");

    serde_json::to_string(&data)
        .unwrap_or_else(|e| json!({ "error": format!("failed to encode history: {e}") }).to_string())
}

// =============================================================================
// Tests
// =============================================================================
