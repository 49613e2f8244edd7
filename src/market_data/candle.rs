use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Candle
// ---------------------------------------------------------------------------

/// A single OHLCV candle for one time bucket.
///
/// The wire/file shape is `{"x": ts, "y": [open, high, low, close],
/// "volume": v, "isComplete": b}` so chart clients can consume it directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bucket start in milliseconds since the epoch.
    #[serde(rename = "x")]
    pub timestamp: i64,
    /// `[open, high, low, close]`.
    #[serde(rename = "y")]
    pub ohlc: [f64; 4],
    #[serde(default)]
    pub volume: f64,
    #[serde(rename = "isComplete", default)]
    pub is_complete: bool,
}

impl Candle {
    /// A flat, still-open candle where every price equals `price`.
    pub fn opening(timestamp: i64, price: f64, volume: f64) -> Self {
        Self {
            timestamp,
            ohlc: [price, price, price, price],
            volume,
            is_complete: false,
        }
    }

    pub fn open(&self) -> f64 {
        self.ohlc[0]
    }

    pub fn high(&self) -> f64 {
        self.ohlc[1]
    }

    pub fn low(&self) -> f64 {
        self.ohlc[2]
    }

    pub fn close(&self) -> f64 {
        self.ohlc[3]
    }

    /// Move the close to `price`, widening high/low when it breaks out.
    pub fn apply_tick(&mut self, price: f64, added_volume: f64) {
        self.ohlc[3] = price;
        if price > self.ohlc[1] {
            self.ohlc[1] = price;
        }
        if price < self.ohlc[2] {
            self.ohlc[2] = price;
        }
        self.volume += added_volume.max(0.0);
    }

    /// Fold a later candle of the same bucket into this one.
    ///
    /// The open is kept, high/low take the extrema, close is overwritten with
    /// the later candle's close and volume accumulates.
    pub fn absorb(&mut self, later: &Candle) {
        if later.high() > self.ohlc[1] {
            self.ohlc[1] = later.high();
        }
        if later.low() < self.ohlc[2] {
            self.ohlc[2] = later.low();
        }
        self.ohlc[3] = later.close();
        self.volume += later.volume;
    }

    /// `low <= min(open, close)` and `high >= max(open, close)`.
    pub fn is_consistent(&self) -> bool {
        let [open, high, low, close] = self.ohlc;
        low <= open.min(close) && high >= open.max(close) && low <= high
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
