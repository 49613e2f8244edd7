// =============================================================================
// Timeframe Calendar
// =============================================================================
//
// The six supported bucket sizes and the pure mapping from a raw timestamp to
// the start of its containing bucket. Boundaries are computed on UTC epoch
// milliseconds, so the daily bucket starts at UTC midnight.
// =============================================================================

use std::str::FromStr;

use serde::{Deserialize, Serialize};

const MINUTE_MS: i64 = 60_000;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;

/// Candle granularity. `Min1` is the base granularity driven by the price
/// generator; every other granularity is derived from it.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    Min1,
    #[serde(rename = "5m")]
    Min5,
    #[serde(rename = "15m")]
    Min15,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "4h")]
    Hour4,
    #[serde(rename = "1d")]
    Day1,
}

impl Timeframe {
    pub const BASE: Timeframe = Timeframe::Min1;

    /// All granularities, finest first.
    pub const ALL: [Timeframe; 6] = [
        Timeframe::Min1,
        Timeframe::Min5,
        Timeframe::Min15,
        Timeframe::Hour1,
        Timeframe::Hour4,
        Timeframe::Day1,
    ];

    /// Granularities rolled up from the base series.
    pub const DERIVED: [Timeframe; 5] = [
        Timeframe::Min5,
        Timeframe::Min15,
        Timeframe::Hour1,
        Timeframe::Hour4,
        Timeframe::Day1,
    ];

    /// Bucket length in milliseconds.
    pub fn duration_ms(self) -> i64 {
        match self {
            Self::Min1 => MINUTE_MS,
            Self::Min5 => 5 * MINUTE_MS,
            Self::Min15 => 15 * MINUTE_MS,
            Self::Hour1 => HOUR_MS,
            Self::Hour4 => 4 * HOUR_MS,
            Self::Day1 => DAY_MS,
        }
    }

    /// Start of the bucket containing `ts` (milliseconds since the epoch).
    ///
    /// Idempotent and monotonic. Negative timestamps round towards negative
    /// infinity, so pre-epoch instants still land on a boundary.
    pub fn bucket_start(self, ts: i64) -> i64 {
        ts - ts.rem_euclid(self.duration_ms())
    }

    /// Exclusive end of the bucket that starts at `bucket_start`.
    pub fn bucket_end(self, bucket_start: i64) -> i64 {
        bucket_start.saturating_add(self.duration_ms())
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Min1 => "1m",
            Self::Min5 => "5m",
            Self::Min15 => "15m",
            Self::Hour1 => "1h",
            Self::Hour4 => "4h",
            Self::Day1 => "1d",
        }
    }

    pub fn is_base(self) -> bool {
        self == Self::BASE
    }
}

impl Default for Timeframe {
    fn default() -> Self {
        Self::BASE
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tf| tf.label() == s.trim())
            .ok_or_else(|| anyhow::anyhow!("unknown timeframe '{s}'"))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn bucket_start_truncates() {
        // 2023-11-14 22:13:20.123 UTC
        let ts = 1_700_000_000_123;
        assert_eq!(Timeframe::Min1.bucket_start(ts), 1_699_999_980_000);
        assert_eq!(Timeframe::Min5.bucket_start(ts), 1_699_999_800_000);
        assert_eq!(Timeframe::Hour1.bucket_start(ts), 1_699_999_200_000);
        assert_eq!(Timeframe::Hour4.bucket_start(ts), 1_699_992_000_000);
        assert_eq!(Timeframe::Day1.bucket_start(ts), 1_699_920_000_000);
    }

    #[test]
    fn bucket_start_idempotent_and_monotonic() {
        let mut rng = StdRng::seed_from_u64(7);
        for tf in Timeframe::ALL {
            let mut samples: Vec<i64> = (0..2_000)
                .map(|_| rng.gen_range(-10_000_000_000i64..4_000_000_000_000))
                .collect();
            samples.sort_unstable();

            let mut prev = i64::MIN;
            for ts in samples {
                let b = tf.bucket_start(ts);
                assert_eq!(tf.bucket_start(b), b, "{tf} not idempotent at {ts}");
                assert!(b <= ts && ts < tf.bucket_end(b));
                assert!(b >= prev, "{tf} not monotonic at {ts}");
                prev = b;
            }
        }
    }

    #[test]
    fn durations_are_ordered() {
        let durations: Vec<i64> = Timeframe::ALL.iter().map(|tf| tf.duration_ms()).collect();
        assert!(durations.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(Timeframe::Day1.duration_ms(), 86_400_000);
    }

    #[test]
    fn labels_parse_and_serialise() {
        for tf in Timeframe::ALL {
            assert_eq!(tf.label().parse::<Timeframe>().unwrap(), tf);
            assert_eq!(serde_json::to_string(&tf).unwrap(), format!("\"{}\"", tf.label()));
        }
        assert!("2m".parse::<Timeframe>().is_err());
        assert!(Timeframe::DERIVED.iter().all(|tf| !tf.is_base()));
    }
}
