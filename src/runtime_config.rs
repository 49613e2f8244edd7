// =============================================================================
// Runtime Configuration — service settings with env overrides
// =============================================================================
//
// Every tunable parameter of the candle feed lives here. Settings come from
// an optional JSON file, then environment variables (a `.env` file is loaded
// first by main) override the operational ones.
//
// All fields carry `#[serde(default)]` so that adding new fields never breaks
// loading an older config file.
//
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Lower bound for both driver intervals.
const MIN_INTERVAL_MS: u64 = 10;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_max_candles() -> usize {
    100
}

fn default_update_interval_ms() -> u64 {
    1_000
}

fn default_candle_interval_ms() -> u64 {
    60_000
}

fn default_start_price() -> f64 {
    200.0
}

fn default_seed_volatility() -> f64 {
    10.0
}

fn default_base_save_every_minutes() -> u32 {
    15
}

fn default_subscriber_buffer() -> usize {
    64
}

// =============================================================================
// RuntimeConfig
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Server --------------------------------------------------------------

    /// Address the HTTP/WebSocket server binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Directory holding one history file per timeframe.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    // --- Series --------------------------------------------------------------

    /// Maximum number of stored candles per timeframe.
    #[serde(default = "default_max_candles")]
    pub max_candles: usize,

    // --- Driver --------------------------------------------------------------

    /// How often the current candle receives a price tick.
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,

    /// How often the current candle is finalized and a new one opened.
    #[serde(default = "default_candle_interval_ms")]
    pub candle_interval_ms: u64,

    // --- Price generation ----------------------------------------------------

    /// Open reference when no base candle exists yet.
    #[serde(default = "default_start_price")]
    pub default_start_price: f64,

    /// First price of synthetically generated history.
    #[serde(default = "default_start_price")]
    pub seed_base_price: f64,

    /// Per-candle volatility of synthetically generated history.
    #[serde(default = "default_seed_volatility")]
    pub seed_volatility: f64,

    /// Fixed RNG seed for a reproducible price walk; entropy when absent.
    #[serde(default)]
    pub price_seed: Option<u64>,

    // --- Persistence & fan-out -----------------------------------------------

    /// The base timeframe is saved when a finalized candle's minute-of-hour
    /// is a multiple of this. `0` disables periodic base saves.
    #[serde(default = "default_base_save_every_minutes")]
    pub base_save_every_minutes: u32,

    /// Per-subscriber queue length before a client counts as failed.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            data_dir: default_data_dir(),
            max_candles: default_max_candles(),
            update_interval_ms: default_update_interval_ms(),
            candle_interval_ms: default_candle_interval_ms(),
            default_start_price: default_start_price(),
            seed_base_price: default_start_price(),
            seed_volatility: default_seed_volatility(),
            price_seed: None,
            base_save_every_minutes: default_base_save_every_minutes(),
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        info!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Apply `CANDLE_FEED_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = lookup("CANDLE_FEED_BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Some(dir) = lookup("CANDLE_FEED_DATA_DIR") {
            self.data_dir = dir;
        }
        override_parsed(&lookup, "CANDLE_FEED_MAX_CANDLES", &mut self.max_candles);
        override_parsed(&lookup, "CANDLE_FEED_UPDATE_MS", &mut self.update_interval_ms);
        override_parsed(&lookup, "CANDLE_FEED_CANDLE_MS", &mut self.candle_interval_ms);
        if let Some(raw) = lookup("CANDLE_FEED_SEED") {
            match raw.trim().parse() {
                Ok(seed) => self.price_seed = Some(seed),
                Err(_) => warn!(key = "CANDLE_FEED_SEED", value = %raw, "ignoring unparsable environment override"),
            }
        }
    }

    /// Clamp values that would make the service misbehave.
    pub fn sanitize(&mut self) {
        if self.max_candles == 0 {
            warn!("max_candles must be at least 1 — using 1");
            self.max_candles = 1;
        }
        if self.update_interval_ms < MIN_INTERVAL_MS {
            warn!(value = self.update_interval_ms, "update_interval_ms too small — clamping");
            self.update_interval_ms = MIN_INTERVAL_MS;
        }
        if self.candle_interval_ms < MIN_INTERVAL_MS {
            warn!(value = self.candle_interval_ms, "candle_interval_ms too small — clamping");
            self.candle_interval_ms = MIN_INTERVAL_MS;
        }
        if !(self.default_start_price.is_finite() && self.default_start_price > 0.0) {
            warn!("default_start_price must be positive — using default");
            self.default_start_price = default_start_price();
        }
        if !(self.seed_base_price.is_finite() && self.seed_base_price > 0.0) {
            self.seed_base_price = self.default_start_price;
        }
        if self.subscriber_buffer == 0 {
            self.subscriber_buffer = 1;
        }
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    pub fn candle_interval(&self) -> Duration {
        Duration::from_millis(self.candle_interval_ms)
    }
}

fn override_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(_) => warn!(key, value = %raw, "ignoring unparsable environment override"),
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080");
        assert_eq!(cfg.data_dir, "data");
        assert_eq!(cfg.max_candles, 100);
        assert_eq!(cfg.update_interval(), Duration::from_secs(1));
        assert_eq!(cfg.candle_interval(), Duration::from_secs(60));
        assert!((cfg.default_start_price - 200.0).abs() < f64::EPSILON);
        assert_eq!(cfg.base_save_every_minutes, 15);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "max_candles": 500, "data_dir": "/var/lib/feed" }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.max_candles, 500);
        assert_eq!(cfg.data_dir, "/var/lib/feed");
        assert_eq!(cfg.candle_interval_ms, 60_000);
        assert_eq!(cfg.subscriber_buffer, 64);
    }

    #[test]
    fn env_overrides_apply_and_bad_values_are_ignored() {
        let vars: HashMap<&str, &str> = [
            ("CANDLE_FEED_BIND_ADDR", "127.0.0.1:9000"),
            ("CANDLE_FEED_MAX_CANDLES", "250"),
            ("CANDLE_FEED_CANDLE_MS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut cfg = RuntimeConfig::default();
        cfg.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.bind_addr, "127.0.0.1:9000");
        assert_eq!(cfg.max_candles, 250);
        assert_eq!(cfg.candle_interval_ms, 60_000);
        assert_eq!(cfg.data_dir, "data");
        assert_eq!(cfg.price_seed, None);
    }

    #[test]
    fn seed_comes_from_file_or_env() {
        let cfg: RuntimeConfig = serde_json::from_str(r#"{ "price_seed": 7 }"#).unwrap();
        assert_eq!(cfg.price_seed, Some(7));

        let mut cfg = RuntimeConfig::default();
        cfg.apply_overrides(|k| (k == "CANDLE_FEED_SEED").then(|| "1234".to_string()));
        assert_eq!(cfg.price_seed, Some(1234));
    }

    #[test]
    fn sanitize_clamps_degenerate_values() {
        let mut cfg = RuntimeConfig {
            max_candles: 0,
            update_interval_ms: 0,
            candle_interval_ms: 1,
            default_start_price: -3.0,
            seed_base_price: 0.0,
            subscriber_buffer: 0,
            ..RuntimeConfig::default()
        };
        cfg.sanitize();
        assert_eq!(cfg.max_candles, 1);
        assert_eq!(cfg.update_interval_ms, MIN_INTERVAL_MS);
        assert_eq!(cfg.candle_interval_ms, MIN_INTERVAL_MS);
        assert!((cfg.default_start_price - 200.0).abs() < f64::EPSILON);
        assert!((cfg.seed_base_price - 200.0).abs() < f64::EPSILON);
        assert_eq!(cfg.subscriber_buffer, 1);
    }

    #[test]
    fn load_missing_file_errors() {
        assert!(RuntimeConfig::load("/definitely/not/here.json").is_err());
    }
}
