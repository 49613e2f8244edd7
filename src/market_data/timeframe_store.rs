use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::market_data::aggregator::{self, push_bounded};
use crate::market_data::{Candle, PriceGenerator, Timeframe};
use crate::types::{HistoryQuery, UpdateMessage};

// ---------------------------------------------------------------------------
// Results handed back to the caller
// ---------------------------------------------------------------------------

/// Everything a base-candle finalization produced, in emission order.
#[derive(Debug, Clone)]
pub struct Finalization {
    /// The base candle that was just completed.
    pub finalized: Candle,
    /// Base final update first, then each derived timeframe's events.
    pub events: Vec<UpdateMessage>,
    /// Derived timeframes in which a candle became complete.
    pub completed: Vec<Timeframe>,
}

/// Derived candles completed by a wall-clock sweep.
#[derive(Debug, Clone, Default)]
pub struct Expiry {
    pub events: Vec<UpdateMessage>,
    pub completed: Vec<Timeframe>,
}

// ---------------------------------------------------------------------------
// TimeframeStore
// ---------------------------------------------------------------------------

struct StoreInner {
    series: HashMap<Timeframe, VecDeque<Candle>>,
    /// The in-progress base candle; kept outside the bounded base series
    /// until it is finalized.
    current: Option<Candle>,
}

impl StoreInner {
    fn series_mut(&mut self, tf: Timeframe, capacity: usize) -> &mut VecDeque<Candle> {
        self.series
            .entry(tf)
            .or_insert_with(|| VecDeque::with_capacity(capacity + 1))
    }
}

/// Thread-safe owner of every candle series.
///
/// One `RwLock` guards the per-timeframe series and the current base candle:
/// history reads share it, every mutation takes it exclusively. Callers only
/// ever receive clones.
pub struct TimeframeStore {
    inner: RwLock<StoreInner>,
    max_candles: usize,
}

impl TimeframeStore {
    /// Create an empty store that keeps at most `max_candles` candles per
    /// timeframe (plus the current base candle).
    pub fn new(max_candles: usize) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                series: HashMap::new(),
                current: None,
            }),
            max_candles: max_candles.max(1),
        }
    }

    pub fn max_candles(&self) -> usize {
        self.max_candles
    }

    // ── Seeding ─────────────────────────────────────────────────────────

    /// Seed the base series with `base` and derive every higher timeframe
    /// from it. Derived buckets built this way are all complete.
    pub fn initialize(&self, mut base: Vec<Candle>) {
        base.sort_by_key(|c| c.timestamp);

        let derived: Vec<(Timeframe, Vec<Candle>)> = Timeframe::DERIVED
            .iter()
            .map(|&tf| (tf, aggregator::rollup_history(&base, tf)))
            .collect();

        let mut inner = self.inner.write();
        inner
            .series
            .insert(Timeframe::BASE, self.bounded(base.into_iter()));
        for (tf, candles) in derived {
            inner.series.insert(tf, self.bounded(candles.into_iter()));
        }

        for tf in Timeframe::ALL {
            debug!(
                timeframe = %tf,
                count = inner.series.get(&tf).map_or(0, VecDeque::len),
                "series seeded"
            );
        }
    }

    /// Replace one timeframe's series wholesale (used when loading from
    /// disk). Returns the number of candles kept after truncation.
    pub fn replace_series(&self, tf: Timeframe, mut candles: Vec<Candle>) -> usize {
        candles.sort_by_key(|c| c.timestamp);
        let ring = self.bounded(candles.into_iter());
        let kept = ring.len();
        self.inner.write().series.insert(tf, ring);
        kept
    }

    fn bounded(&self, candles: impl DoubleEndedIterator<Item = Candle>) -> VecDeque<Candle> {
        let mut newest_first: Vec<Candle> = candles.rev().take(self.max_candles).collect();
        newest_first.reverse();
        VecDeque::from(newest_first)
    }

    // ── Base candle lifecycle ───────────────────────────────────────────

    /// Open a new current base candle and return its "new" event.
    ///
    /// The open follows the last finalized close (or `default_price` when
    /// there is none). The timestamp is the base bucket of `now_ms`, pushed
    /// forward one bucket at a time past the previous candle if the clock
    /// would make it collide or go backwards.
    pub fn start_new_candle(
        &self,
        generator: &mut PriceGenerator,
        now_ms: i64,
        default_price: f64,
    ) -> UpdateMessage {
        let tf = Timeframe::BASE;
        let step = tf.duration_ms();
        let mut inner = self.inner.write();

        let (last_close, mut last_ts) = match inner.series.get(&tf).and_then(|s| s.back()) {
            Some(last) => (last.close(), last.timestamp),
            None => (default_price, tf.bucket_start(now_ms) - step),
        };

        if let Some(stale) = inner.current.take() {
            warn!(
                timestamp = stale.timestamp,
                "starting a new candle while one is still open — discarding it"
            );
            last_ts = last_ts.max(stale.timestamp);
        }

        let mut timestamp = tf.bucket_start(now_ms);
        if timestamp <= last_ts {
            timestamp = last_ts + step;
        }

        let open = generator.next_open(last_close);
        let candle = Candle::opening(timestamp, open, generator.opening_volume());
        inner.current = Some(candle.clone());

        debug!(timestamp, open, "started new base candle");
        UpdateMessage::new_candle(tf, candle)
    }

    /// Apply one price tick to the current candle.
    ///
    /// Returns `None` when there is no current candle; the caller decides
    /// whether to open one.
    pub fn update_current_candle(&self, generator: &mut PriceGenerator) -> Option<UpdateMessage> {
        let mut inner = self.inner.write();
        let current = inner.current.as_mut()?;

        let price = generator.next_tick(current.close());
        current.apply_tick(price, generator.tick_volume());

        Some(UpdateMessage::update(Timeframe::BASE, current.clone()))
    }

    /// Complete the current candle, append it to the base series and roll it
    /// into every derived timeframe. `None` when there is no current candle.
    pub fn finalize_current_candle(&self, now_ms: i64) -> Option<Finalization> {
        let max = self.max_candles;
        let mut inner = self.inner.write();
        let mut finalized = inner.current.take()?;
        finalized.is_complete = true;

        push_bounded(
            inner.series_mut(Timeframe::BASE, max),
            finalized.clone(),
            max,
        );

        let mut events = vec![UpdateMessage::update(Timeframe::BASE, finalized.clone())];
        let mut completed = Vec::new();

        for tf in Timeframe::DERIVED {
            let outcome =
                aggregator::fold_finalized(inner.series_mut(tf, max), tf, &finalized, now_ms, max);
            events.extend(outcome.events);
            if outcome.completed {
                completed.push(tf);
            }
        }

        info!(
            timestamp = finalized.timestamp,
            open = finalized.open(),
            close = finalized.close(),
            "finalized base candle"
        );

        Some(Finalization {
            finalized,
            events,
            completed,
        })
    }

    /// Complete every derived bucket whose end is at or before `now_ms`,
    /// except one the current base candle has yet to fold into.
    pub fn complete_expired(&self, now_ms: i64) -> Expiry {
        let mut inner = self.inner.write();
        let pending = inner.current.as_ref().map(|c| c.timestamp);
        let mut expiry = Expiry::default();

        for tf in Timeframe::DERIVED {
            let Some(series) = inner.series.get_mut(&tf) else {
                continue;
            };
            if let Some(event) = aggregator::expire_open_bucket(series, tf, now_ms, pending) {
                expiry.events.push(event);
                expiry.completed.push(tf);
            }
        }

        expiry
    }

    // ── Reads ───────────────────────────────────────────────────────────

    /// Copy of the history for `tf`, filtered by `query`.
    ///
    /// For the base timeframe the current candle, if any, is appended before
    /// filtering so live readers see it.
    pub fn history(&self, tf: Timeframe, query: &HistoryQuery) -> Vec<Candle> {
        let inner = self.inner.read();

        let stored = inner.series.get(&tf).into_iter().flatten();
        let current = inner.current.iter().filter(|_| tf.is_base());

        let mut candles: Vec<Candle> = stored
            .chain(current)
            .filter(|c| query.contains(c.timestamp))
            .cloned()
            .collect();

        if let Some(limit) = query.limit {
            let skip = candles.len().saturating_sub(limit);
            candles.drain(..skip);
        }

        candles
    }

    /// Copy of the bounded series for `tf`, without the current candle.
    pub fn snapshot(&self, tf: Timeframe) -> Vec<Candle> {
        self.inner
            .read()
            .series
            .get(&tf)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn current_candle(&self) -> Option<Candle> {
        self.inner.read().current.clone()
    }

    /// Number of stored candles for `tf` (the current candle not included).
    #[cfg(test)]
    pub fn len(&self, tf: Timeframe) -> usize {
        self.inner.read().series.get(&tf).map_or(0, VecDeque::len)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
