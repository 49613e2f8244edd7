// =============================================================================
// Price Generator — synthetic random walk
// =============================================================================
//
// Source of all synthetic price movement. Every price it hands out is rounded
// to cents and clamped to `MIN_PRICE`, so downstream code can divide by a
// price without a zero guard.
// =============================================================================

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::market_data::{Candle, Timeframe};

/// Floor applied to every generated price.
pub const MIN_PRICE: f64 = 0.01;

/// Full width of the perturbation applied to the previous close when a new
/// candle opens (the open lands within ±half of this).
pub const OPEN_JITTER: f64 = 1.0;

/// Upper bound of the per-tick volatility. Each tick draws its own volatility
/// in `[0, MAX_TICK_VOLATILITY)` and moves the close by up to half of it.
pub const MAX_TICK_VOLATILITY: f64 = 10.0;

/// Upper bound of the volume a candle starts with.
const OPENING_VOLUME: f64 = 1.0;
/// Upper bound of the volume added per tick.
const TICK_VOLUME: f64 = 0.05;
/// Upper bound of the volume of a seeded history candle.
const HISTORY_VOLUME: f64 = 1_000.0;

fn round_cents(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn floor_price(v: f64) -> f64 {
    let rounded = round_cents(v);
    if rounded < MIN_PRICE || !rounded.is_finite() {
        MIN_PRICE
    } else {
        rounded
    }
}

pub struct PriceGenerator {
    rng: StdRng,
}

impl PriceGenerator {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic generator, used by tests and reproducible seeding.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Open price for a new candle: previous close plus a small jitter.
    pub fn next_open(&mut self, last_close: f64) -> f64 {
        let change = (self.rng.gen::<f64>() - 0.5) * OPEN_JITTER;
        floor_price(last_close + change)
    }

    /// Intra-candle move of the close, with a volatility drawn per tick.
    pub fn next_tick(&mut self, current: f64) -> f64 {
        let volatility = self.rng.gen::<f64>() * MAX_TICK_VOLATILITY;
        let change = (self.rng.gen::<f64>() - 0.5) * volatility;
        floor_price(current + change)
    }

    /// Volume a freshly opened candle starts with.
    pub fn opening_volume(&mut self) -> f64 {
        round_cents(self.rng.gen::<f64>() * OPENING_VOLUME)
    }

    /// Volume accumulated by one tick.
    pub fn tick_volume(&mut self) -> f64 {
        round_cents(self.rng.gen::<f64>() * TICK_VOLUME)
    }

    /// Generate `count` complete base candles, oldest first, the last one
    /// sitting in the base bucket that contains `end_ms`.
    ///
    /// Each candle opens near the previous close and moves by up to
    /// `volatility / 2`; high/low extend past the body by up to the same.
    pub fn generate_history(
        &mut self,
        count: usize,
        end_ms: i64,
        start_price: f64,
        volatility: f64,
    ) -> Vec<Candle> {
        let tf = Timeframe::BASE;
        let step = tf.duration_ms();
        let last_bucket = tf.bucket_start(end_ms);
        let volatility = volatility.abs();
        let wick = volatility * 0.5;

        let mut last_close = floor_price(start_price);
        let mut candles = Vec::with_capacity(count);

        for i in 0..count {
            let buckets_ago = (count - 1 - i) as i64;
            let timestamp = last_bucket - buckets_ago * step;

            let close = floor_price(last_close + (self.rng.gen::<f64>() - 0.5) * volatility);
            let open = floor_price(last_close + (self.rng.gen::<f64>() - 0.5) * volatility * 0.1);
            let high = round_cents(open.max(close) + self.rng.gen::<f64>() * wick);
            let low = floor_price(open.min(close) - self.rng.gen::<f64>() * wick).min(open.min(close));
            let volume = round_cents(self.rng.gen::<f64>() * HISTORY_VOLUME);

            candles.push(Candle {
                timestamp,
                ohlc: [open, high, low, close],
                volume,
                is_complete: true,
            });
            last_close = close;
        }

        candles
    }
}

impl Default for PriceGenerator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_open_stays_near_last_close() {
        let mut gen = PriceGenerator::with_seed(1);
        for _ in 0..1_000 {
            let open = gen.next_open(200.0);
            assert!((open - 200.0).abs() <= OPEN_JITTER / 2.0 + 0.01, "open {open}");
        }
    }

    #[test]
    fn prices_never_drop_below_floor() {
        let mut gen = PriceGenerator::with_seed(2);
        let mut price = 0.5;
        for _ in 0..5_000 {
            price = gen.next_tick(price);
            assert!(price >= MIN_PRICE);
        }
        assert!(gen.next_open(0.0) >= MIN_PRICE);
        assert!(gen.next_open(-50.0) >= MIN_PRICE);
    }

    #[test]
    fn tick_moves_are_bounded() {
        let mut gen = PriceGenerator::with_seed(3);
        for _ in 0..1_000 {
            let next = gen.next_tick(500.0);
            assert!((next - 500.0).abs() <= MAX_TICK_VOLATILITY / 2.0 + 0.01);
        }
    }

    #[test]
    fn volumes_are_non_negative_and_bounded() {
        let mut gen = PriceGenerator::with_seed(4);
        for _ in 0..500 {
            let open_v = gen.opening_volume();
            let tick_v = gen.tick_volume();
            assert!((0.0..=OPENING_VOLUME).contains(&open_v));
            assert!((0.0..=TICK_VOLUME).contains(&tick_v));
        }
    }

    #[test]
    fn history_is_contiguous_and_consistent() {
        let mut gen = PriceGenerator::with_seed(5);
        let end = 1_700_000_000_123;
        let candles = gen.generate_history(100, end, 200.0, 10.0);

        assert_eq!(candles.len(), 100);
        assert_eq!(candles[99].timestamp, Timeframe::BASE.bucket_start(end));
        for pair in candles.windows(2) {
            assert_eq!(pair[1].timestamp - pair[0].timestamp, 60_000);
        }
        for c in &candles {
            assert!(c.is_complete);
            assert!(c.is_consistent(), "inconsistent candle {c:?}");
            assert!(c.low() >= MIN_PRICE);
            assert!(c.volume >= 0.0);
        }
    }

    #[test]
    fn seeded_generators_are_reproducible() {
        let a = PriceGenerator::with_seed(9).generate_history(10, 0, 100.0, 5.0);
        let b = PriceGenerator::with_seed(9).generate_history(10, 0, 100.0, 5.0);
        assert_eq!(a, b);
    }
}
