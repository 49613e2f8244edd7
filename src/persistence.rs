// =============================================================================
// Persistence Gateway — one JSON file per timeframe
// =============================================================================
//
// Layout: `<data_dir>/price_history_<tf>.json`, each holding a JSON array of
// candles ordered oldest-first.
//
// Writes go to a uniquely named staging file in the same directory which is
// then renamed over the target, so a reader sees either the old file or the
// new one, never a partial write. Saves of the same timeframe are serialised.
// =============================================================================

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::market_data::{Candle, Timeframe};

pub struct HistoryFiles {
    dir: PathBuf,
    write_locks: HashMap<Timeframe, Mutex<()>>,
}

impl HistoryFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_locks: Timeframe::ALL.into_iter().map(|tf| (tf, Mutex::new(()))).collect(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing `tf`.
    pub fn path_for(&self, tf: Timeframe) -> PathBuf {
        self.dir.join(format!("price_history_{}.json", tf.label()))
    }

    /// Atomically replace the file for `tf` with `candles`.
    pub fn save(&self, tf: Timeframe, candles: &[Candle]) -> Result<()> {
        let _guard = self.write_locks.get(&tf).map(|lock| lock.lock());

        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create data directory {}", self.dir.display()))?;

        let path = self.path_for(tf);
        let content = serde_json::to_vec(candles)
            .with_context(|| format!("failed to serialise {tf} candles"))?;

        let tmp_path = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()));

        if let Err(e) = std::fs::write(&tmp_path, &content) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e).with_context(|| format!("failed to write staging file {}", tmp_path.display()));
        }

        if let Err(e) = std::fs::rename(&tmp_path, &path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e).with_context(|| format!("failed to move staging file onto {}", path.display()));
        }

        debug!(timeframe = %tf, count = candles.len(), path = %path.display(), "timeframe saved");
        Ok(())
    }

    /// Read the file for `tf`. A missing file is `Ok(None)`.
    pub fn load(&self, tf: Timeframe) -> Result<Option<Vec<Candle>>> {
        let path = self.path_for(tf);

        let content = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(timeframe = %tf, path = %path.display(), "no history file");
                return Ok(None);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        };

        let mut candles: Vec<Candle> = serde_json::from_slice(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;

        let total = candles.len();
        candles.retain(Candle::is_consistent);
        if candles.len() < total {
            warn!(
                timeframe = %tf,
                dropped = total - candles.len(),
                "skipping candles with inconsistent OHLC"
            );
        }

        info!(timeframe = %tf, count = candles.len(), "history file loaded");
        Ok(Some(candles))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| Candle {
                timestamp: i as i64 * 300_000,
                ohlc: [1.0 + i as f64, 2.5 + i as f64, 0.5, 1.25 + i as f64],
                volume: 10.5 * i as f64,
                is_complete: i + 1 < n,
            })
            .collect()
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let files = HistoryFiles::new(dir.path());
        let candles = sample(5);

        files.save(Timeframe::Min5, &candles).unwrap();
        let loaded = files.load(Timeframe::Min5).unwrap();

        assert_eq!(loaded, Some(candles));
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let files = HistoryFiles::new(dir.path());
        assert_eq!(files.load(Timeframe::Day1).unwrap(), None);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let files = HistoryFiles::new(dir.path());
        std::fs::write(files.path_for(Timeframe::Hour1), b"[{\"x\": 1,").unwrap();
        assert!(files.load(Timeframe::Hour1).is_err());
    }

    #[test]
    fn inconsistent_candles_are_dropped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let files = HistoryFiles::new(dir.path());
        let json = r#"[
            {"x": 0, "y": [10.0, 12.0, 9.0, 11.0], "volume": 1.0, "isComplete": true},
            {"x": 60000, "y": [10.0, 9.0, 11.0, 10.5], "volume": 1.0, "isComplete": true},
            {"x": 120000, "y": [11.0, 11.5, 10.5, 11.2], "volume": 2.0, "isComplete": false}
        ]"#;
        std::fs::write(files.path_for(Timeframe::BASE), json).unwrap();

        let loaded = files.load(Timeframe::BASE).unwrap().unwrap();
        let stamps: Vec<i64> = loaded.iter().map(|c| c.timestamp).collect();
        assert_eq!(stamps, vec![0, 120_000]);
    }

    #[test]
    fn save_replaces_and_leaves_no_staging_files() {
        let dir = tempfile::tempdir().unwrap();
        let files = HistoryFiles::new(dir.path().join("nested"));

        files.save(Timeframe::BASE, &sample(3)).unwrap();
        files.save(Timeframe::BASE, &sample(1)).unwrap();

        assert_eq!(files.load(Timeframe::BASE).unwrap().unwrap().len(), 1);
        let names: Vec<String> = std::fs::read_dir(files.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["price_history_1m.json".to_string()]);
    }

    #[test]
    fn file_names_follow_labels() {
        let files = HistoryFiles::new("data");
        assert_eq!(
            files.path_for(Timeframe::Hour4),
            PathBuf::from("data").join("price_history_4h.json")
        );
    }
}
