// =============================================================================
// Aggregation Engine — roll base candles up into derived timeframes
// =============================================================================
//
// Two entry points:
//
//   * `rollup_history` groups a historical base series into complete buckets
//     of a derived timeframe (used once when the store is seeded).
//   * `fold_finalized` applies one freshly finalized base candle to a derived
//     series: it closes a stale open bucket, creates or extends the bucket the
//     candle belongs to, and completes that bucket once wall-clock time has
//     passed its end.
//
// Both operate on plain series owned by the caller; locking is the store's job.
// The events they produce are returned in emission order.
// =============================================================================

use std::collections::{BTreeMap, VecDeque};

use tracing::{debug, info};

use crate::market_data::{Candle, Timeframe};
use crate::types::UpdateMessage;

/// Outcome of applying one base candle to one derived series.
#[derive(Debug, Default)]
pub struct FoldOutcome {
    /// Events in the order they must be broadcast.
    pub events: Vec<UpdateMessage>,
    /// Whether any candle of this series became complete.
    pub completed: bool,
}

/// Group `base` candles into complete `tf` buckets, oldest first.
///
/// Open = first candle's open, close = last candle's close, high/low are the
/// group extrema, volume is the sum. Input order does not matter.
pub fn rollup_history(base: &[Candle], tf: Timeframe) -> Vec<Candle> {
    let mut ordered: Vec<&Candle> = base.iter().collect();
    ordered.sort_by_key(|c| c.timestamp);

    let mut buckets: BTreeMap<i64, Candle> = BTreeMap::new();
    for candle in ordered {
        let bucket = tf.bucket_start(candle.timestamp);
        buckets
            .entry(bucket)
            .and_modify(|agg| agg.absorb(candle))
            .or_insert_with(|| Candle {
                timestamp: bucket,
                ohlc: candle.ohlc,
                volume: candle.volume,
                is_complete: true,
            });
    }

    buckets.into_values().collect()
}

/// Fold a finalized base candle into the derived series for `tf`.
///
/// `now_ms` is the wall clock used for time-based completion. `max_candles`
/// bounds the series; the oldest entry is evicted first.
pub fn fold_finalized(
    series: &mut VecDeque<Candle>,
    tf: Timeframe,
    finalized: &Candle,
    now_ms: i64,
    max_candles: usize,
) -> FoldOutcome {
    let mut out = FoldOutcome::default();
    let bucket = tf.bucket_start(finalized.timestamp);

    // A new bucket has begun: close the previous open one first.
    if let Some(last) = series.back_mut() {
        if !last.is_complete && last.timestamp != bucket {
            last.is_complete = true;
            out.events.push(UpdateMessage::update(tf, last.clone()));
            out.completed = true;
            info!(timeframe = %tf, timestamp = last.timestamp, "bucket rolled over — candle completed");
        }
    }

    match series.iter().rposition(|c| c.timestamp == bucket) {
        None => {
            let candle = Candle {
                timestamp: bucket,
                ohlc: finalized.ohlc,
                volume: finalized.volume,
                is_complete: false,
            };
            push_bounded(series, candle.clone(), max_candles);
            out.events.push(UpdateMessage::new_candle(tf, candle));
        }
        Some(idx) => {
            let is_last = idx + 1 == series.len();
            let entry = &mut series[idx];
            if entry.is_complete {
                // Seeded history marks its trailing bucket complete even when
                // that bucket is still running; only such a bucket reopens.
                if !is_last || now_ms >= tf.bucket_end(bucket) {
                    debug!(
                        timeframe = %tf,
                        bucket,
                        "bucket already complete — base candle not folded"
                    );
                    return out;
                }
                entry.is_complete = false;
            }
            entry.absorb(finalized);
            out.events.push(UpdateMessage::update(tf, entry.clone()));
        }
    }

    // Time-based completion for the bucket we just touched.
    if let Some(last) = series.back_mut() {
        if last.timestamp == bucket && !last.is_complete && now_ms >= tf.bucket_end(bucket) {
            last.is_complete = true;
            out.events.push(UpdateMessage::update(tf, last.clone()));
            out.completed = true;
            info!(timeframe = %tf, timestamp = bucket, "bucket expired — candle completed");
        }
    }

    out
}

/// Complete the trailing open bucket of `series` when its end has passed.
///
/// `pending_base` is the timestamp of the base candle still in progress. A
/// bucket that candle will fold into stays open until it has been folded,
/// whatever the wall clock says.
///
/// Returns the completion event, if any.
pub fn expire_open_bucket(
    series: &mut VecDeque<Candle>,
    tf: Timeframe,
    now_ms: i64,
    pending_base: Option<i64>,
) -> Option<UpdateMessage> {
    let last = series.back_mut()?;
    if last.is_complete || now_ms < tf.bucket_end(last.timestamp) {
        return None;
    }
    if pending_base.is_some_and(|ts| tf.bucket_start(ts) <= last.timestamp) {
        debug!(timeframe = %tf, timestamp = last.timestamp, "bucket past its end still awaits a base candle");
        return None;
    }
    last.is_complete = true;
    info!(timeframe = %tf, timestamp = last.timestamp, "bucket expired on tick — candle completed");
    Some(UpdateMessage::update(tf, last.clone()))
}

/// Append `candle`, evicting from the front until `max_candles` remain.
pub fn push_bounded(series: &mut VecDeque<Candle>, candle: Candle, max_candles: usize) {
    series.push_back(candle);
    while series.len() > max_candles.max(1) {
        series.pop_front();
    }
}

// =============================================================================
// Tests
// =============================================================================
