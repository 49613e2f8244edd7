// =============================================================================
// Subscriber Registry & Broadcaster
// =============================================================================
//
// Tracks every live WebSocket connection and fans candle events out to them.
//
// Delivery never blocks: each subscriber is fed through a bounded channel with
// `try_send`, so a slow client cannot stall the candle driver. A subscriber
// whose channel is full or closed is dropped from the registry and its
// connection is told to shut down; delivery to everyone else continues.
//
// The registry has its own lock, independent of the candle store.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::market_data::Timeframe;
use crate::types::UpdateMessage;

// =============================================================================
// Sink abstraction
// =============================================================================

/// Why a payload could not be handed to a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// The subscriber is not keeping up.
    Full,
    /// The connection is gone.
    Closed,
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "subscriber queue full"),
            Self::Closed => write!(f, "subscriber connection closed"),
        }
    }
}

impl std::error::Error for SendError {}

/// Outbound half of a live connection as seen by the broadcaster.
pub trait SubscriberSink: Send + Sync {
    /// Queue `payload` for delivery without blocking.
    fn try_send(&self, payload: &str) -> Result<(), SendError>;

    /// Ask the connection to shut down.
    fn close(&self);
}

/// Channel-backed sink: the WebSocket task drains the receiver and watches
/// the shutdown signal.
pub struct ChannelSink {
    tx: mpsc::Sender<String>,
    shutdown: Arc<Notify>,
}

impl ChannelSink {
    /// Create a sink with room for `buffer` queued messages, returning the
    /// receiving end and the shutdown signal for the connection task.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<String>, Arc<Notify>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let shutdown = Arc::new(Notify::new());
        (
            Self {
                tx,
                shutdown: shutdown.clone(),
            },
            rx,
            shutdown,
        )
    }
}

impl SubscriberSink for ChannelSink {
    fn try_send(&self, payload: &str) -> Result<(), SendError> {
        self.tx.try_send(payload.to_owned()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    fn close(&self) {
        // `notify_one` stores a permit, so the signal is not lost if the
        // connection task is busy when it fires.
        self.shutdown.notify_one();
    }
}

// =============================================================================
// Registry
// =============================================================================

struct Subscriber {
    sink: Arc<dyn SubscriberSink>,
    /// Timeframe the client last asked for. Diagnostic only; every event is
    /// delivered to every subscriber.
    timeframe: Timeframe,
    connected_at: Instant,
}

/// Summary of one subscriber for diagnostics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SubscriberInfo {
    pub id: Uuid,
    pub timeframe: Timeframe,
    pub connected_secs: u64,
}

#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: RwLock<HashMap<Uuid, Subscriber>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a live connection and return its id.
    pub fn register(&self, sink: Arc<dyn SubscriberSink>, timeframe: Timeframe) -> Uuid {
        let id = Uuid::new_v4();
        let total = {
            let mut subs = self.subscribers.write();
            subs.insert(
                id,
                Subscriber {
                    sink,
                    timeframe,
                    connected_at: Instant::now(),
                },
            );
            subs.len()
        };
        info!(subscriber = %id, timeframe = %timeframe, total, "subscriber registered");
        id
    }

    /// Remove a connection and close its transport. Returns `false` if it was
    /// already gone.
    pub fn unregister(&self, id: Uuid) -> bool {
        let removed = self.subscribers.write().remove(&id);
        match removed {
            Some(sub) => {
                sub.sink.close();
                info!(subscriber = %id, remaining = self.len(), "subscriber unregistered");
                true
            }
            None => false,
        }
    }

    /// Record the timeframe a subscriber most recently requested.
    pub fn set_timeframe(&self, id: Uuid, timeframe: Timeframe) {
        if let Some(sub) = self.subscribers.write().get_mut(&id) {
            sub.timeframe = timeframe;
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }

    #[cfg(test)]
    pub fn contains(&self, id: Uuid) -> bool {
        self.subscribers.read().contains_key(&id)
    }

    pub fn list(&self) -> Vec<SubscriberInfo> {
        self.subscribers
            .read()
            .iter()
            .map(|(id, sub)| SubscriberInfo {
                id: *id,
                timeframe: sub.timeframe,
                connected_secs: sub.connected_at.elapsed().as_secs(),
            })
            .collect()
    }

    /// Serialize `message` once and deliver it to every subscriber.
    ///
    /// Returns the number of subscribers that accepted it. Subscribers that
    /// fail are removed and closed.
    pub fn broadcast(&self, message: &UpdateMessage) -> usize {
        if self.is_empty() {
            return 0;
        }
        let payload = match serde_json::to_string(message) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to serialise candle event");
                return 0;
            }
        };

        let mut delivered = 0;
        let mut failed: Vec<(Uuid, SendError)> = Vec::new();
        {
            let subs = self.subscribers.read();
            for (id, sub) in subs.iter() {
                match sub.sink.try_send(&payload) {
                    Ok(()) => delivered += 1,
                    Err(e) => failed.push((*id, e)),
                }
            }
        }

        for (id, reason) in failed {
            warn!(subscriber = %id, error = %reason, "dropping subscriber after failed send");
            self.unregister(id);
        }

        debug!(
            kind = %message.kind,
            timeframe = %message.timeframe,
            delivered,
            "event broadcast"
        );
        delivered
    }

    /// Broadcast a batch of events, preserving their order.
    pub fn broadcast_all(&self, messages: &[UpdateMessage]) {
        for message in messages {
            self.broadcast(message);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
