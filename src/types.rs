// =============================================================================
// Wire types shared by the feed, the broadcaster and the API layer
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::market_data::{Candle, Timeframe};

/// Kind of live event pushed to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// A candle was opened.
    New,
    /// An existing candle changed (including its final, complete state).
    Update,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Update => write!(f, "update"),
        }
    }
}

/// `{"type": "new"|"update", "candle": {...}, "timeframe": "5m"}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateMessage {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub candle: Candle,
    pub timeframe: Timeframe,
}

impl UpdateMessage {
    pub fn new_candle(timeframe: Timeframe, candle: Candle) -> Self {
        Self {
            kind: EventKind::New,
            candle,
            timeframe,
        }
    }

    pub fn update(timeframe: Timeframe, candle: Candle) -> Self {
        Self {
            kind: EventKind::Update,
            candle,
            timeframe,
        }
    }
}

/// A snapshot of one timeframe's history: `{"timeframe": "1h", "candles": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeframeData {
    pub timeframe: Timeframe,
    pub candles: Vec<Candle>,
}

/// Client request to switch the live view to another timeframe.
///
/// `from`/`to` are inclusive millisecond bounds; `0` or absent means
/// unbounded. `limit` keeps only the most recent entries; `0` means all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeframeRequest {
    pub timeframe: Timeframe,
    #[serde(default)]
    pub from: i64,
    #[serde(default)]
    pub to: i64,
    #[serde(default)]
    pub limit: usize,
}

/// Time window and size cap for a history read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryQuery {
    pub from: Option<i64>,
    pub to: Option<i64>,
    pub limit: Option<usize>,
}

impl HistoryQuery {
    /// Build a query where `0` stands for "not set", as clients send it.
    pub fn from_raw(from: i64, to: i64, limit: usize) -> Self {
        Self {
            from: (from != 0).then_some(from),
            to: (to != 0).then_some(to),
            limit: (limit != 0).then_some(limit),
        }
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        self.from.map_or(true, |from| timestamp >= from) && self.to.map_or(true, |to| timestamp <= to)
    }
}

impl From<&TimeframeRequest> for HistoryQuery {
    fn from(req: &TimeframeRequest) -> Self {
        Self::from_raw(req.from, req.to, req.limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_message_wire_shape() {
        let msg = UpdateMessage::new_candle(Timeframe::Hour4, Candle::opening(0, 5.0, 0.0));
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], "new");
        assert_eq!(v["timeframe"], "4h");
        assert_eq!(v["candle"]["y"][0], 5.0);
    }

    #[test]
    fn timeframe_request_optional_fields() {
        let req: TimeframeRequest = serde_json::from_str(r#"{"timeframe": "15m"}"#).unwrap();
        assert_eq!(req.timeframe, Timeframe::Min15);
        assert_eq!(HistoryQuery::from(&req), HistoryQuery::default());

        let req: TimeframeRequest =
            serde_json::from_str(r#"{"timeframe": "1d", "from": 10, "to": 20, "limit": 5}"#).unwrap();
        let q = HistoryQuery::from(&req);
        assert_eq!(q.from, Some(10));
        assert_eq!(q.limit, Some(5));
        assert!(q.contains(10) && q.contains(20));
        assert!(!q.contains(9) && !q.contains(21));
    }

    #[test]
    fn unknown_timeframe_is_rejected() {
        assert!(serde_json::from_str::<TimeframeRequest>(r#"{"timeframe": "3m"}"#).is_err());
        assert!(serde_json::from_str::<TimeframeRequest>(r#"{"from": 1}"#).is_err());
    }
}
