// =============================================================================
// Price Feed — candle lifecycle, fan-out and persistence
// =============================================================================
//
// Ties the candle store to its collaborators:
//
//   * every store mutation returns the events it produced; they are broadcast
//     in order after the store lock is released,
//   * any timeframe in which a candle completed is saved in the background,
//   * the driver loop ticks the current candle and rolls it over on two
//     independent timers.
//
// The feed is the only writer of the store. HTTP and WebSocket handlers read
// through `history` / `current_candle`.
//
// Store mutation and the broadcast of its events happen under one publish
// lock, and new subscribers are admitted under the same lock. A client thus
// sees its initial snapshot followed only by strictly later events.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::Utc;
use parking_lot::Mutex;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::market_data::{Candle, PriceGenerator, Timeframe, TimeframeStore};
use crate::persistence::HistoryFiles;
use crate::runtime_config::RuntimeConfig;
use crate::subscribers::{SubscriberRegistry, SubscriberSink};
use crate::types::{HistoryQuery, UpdateMessage};

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub struct PriceFeed {
    store: Arc<TimeframeStore>,
    /// Held across "mutate store, broadcast events" and across subscriber
    /// admission.
    publish: Mutex<()>,
    generator: Mutex<PriceGenerator>,
    subscribers: Arc<SubscriberRegistry>,
    files: Arc<HistoryFiles>,
    default_start_price: f64,
    base_save_every_minutes: u32,
}

impl PriceFeed {
    pub fn new(config: &RuntimeConfig, generator: PriceGenerator) -> Self {
        Self {
            store: Arc::new(TimeframeStore::new(config.max_candles)),
            publish: Mutex::new(()),
            generator: Mutex::new(generator),
            subscribers: Arc::new(SubscriberRegistry::new()),
            files: Arc::new(HistoryFiles::new(&config.data_dir)),
            default_start_price: config.default_start_price,
            base_save_every_minutes: config.base_save_every_minutes,
        }
    }

    #[cfg(test)]
    pub fn store(&self) -> &Arc<TimeframeStore> {
        &self.store
    }

    pub fn subscribers(&self) -> &Arc<SubscriberRegistry> {
        &self.subscribers
    }

    // ── History bootstrap ───────────────────────────────────────────────

    /// Seed the store from a caller-supplied base series.
    pub fn initialize(&self, base: Vec<Candle>) {
        self.store.initialize(base);
    }

    /// Generate a full base series ending one bucket before now, derive the
    /// higher timeframes from it and save everything.
    pub fn seed_synthetic(&self, start_price: f64, volatility: f64) {
        let end = now_ms() - Timeframe::BASE.duration_ms();
        let count = self.store.max_candles();
        let base = self
            .generator
            .lock()
            .generate_history(count, end, start_price, volatility);

        info!(count, start_price, "generated synthetic base history");
        self.initialize(base);
        self.save_all();
    }

    /// Load every timeframe from disk. Succeeds when at least one file
    /// loaded; missing or unreadable files are skipped.
    pub fn load_all(&self) -> Result<usize> {
        let mut loaded = 0;
        for tf in Timeframe::ALL {
            match self.files.load(tf) {
                Ok(Some(candles)) => {
                    let kept = self.store.replace_series(tf, candles);
                    info!(timeframe = %tf, count = kept, "timeframe restored");
                    loaded += 1;
                }
                Ok(None) => {}
                Err(e) => warn!(timeframe = %tf, error = %e, "failed to load timeframe"),
            }
        }

        if loaded == 0 {
            bail!("no history files found in {}", self.files.dir().display());
        }
        Ok(loaded)
    }

    /// Synchronously save one timeframe. Returns the number of candles
    /// written.
    pub fn save_timeframe(&self, tf: Timeframe) -> Result<usize> {
        let candles = self.store.snapshot(tf);
        if candles.is_empty() {
            bail!("no data for timeframe {tf}");
        }
        self.files.save(tf, &candles)?;
        Ok(candles.len())
    }

    /// Save every timeframe; a failure on one does not stop the others.
    /// Returns how many were written.
    pub fn save_all(&self) -> usize {
        let mut saved = 0;
        for tf in Timeframe::ALL {
            match self.save_timeframe(tf) {
                Ok(count) => {
                    debug!(timeframe = %tf, count, "timeframe saved");
                    saved += 1;
                }
                Err(e) => warn!(timeframe = %tf, error = %e, "failed to save timeframe"),
            }
        }
        info!(saved, "history saved");
        saved
    }

    /// Save `tf` off the calling task. The series is read when the job runs,
    /// so back-to-back requests persist the latest state.
    fn persist_async(&self, tf: Timeframe) {
        let store = self.store.clone();
        let files = self.files.clone();
        let job = move || {
            let candles = store.snapshot(tf);
            if candles.is_empty() {
                return;
            }
            if let Err(e) = files.save(tf, &candles) {
                warn!(timeframe = %tf, error = %e, "background save failed");
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(job);
            }
            Err(_) => job(),
        }
    }

    // ── Candle lifecycle ────────────────────────────────────────────────

    pub fn start_new_candle(&self) -> UpdateMessage {
        self.start_new_candle_at(now_ms())
    }

    /// Open a new current candle and broadcast it.
    pub fn start_new_candle_at(&self, now: i64) -> UpdateMessage {
        let _publishing = self.publish.lock();
        self.open_candle(now)
    }

    fn open_candle(&self, now: i64) -> UpdateMessage {
        let event = {
            let mut generator = self.generator.lock();
            self.store
                .start_new_candle(&mut generator, now, self.default_start_price)
        };
        info!(
            timestamp = event.candle.timestamp,
            open = event.candle.open(),
            "started new base candle"
        );
        self.subscribers.broadcast(&event);
        event
    }

    /// Tick the current candle, opening one first if none exists.
    pub fn update_current_candle(&self) -> UpdateMessage {
        let _publishing = self.publish.lock();
        let event = {
            let mut generator = self.generator.lock();
            self.store.update_current_candle(&mut generator)
        };
        match event {
            Some(event) => {
                self.subscribers.broadcast(&event);
                event
            }
            None => self.open_candle(now_ms()),
        }
    }

    pub fn finalize_current_candle(&self) -> Option<Candle> {
        self.finalize_current_candle_at(now_ms())
    }

    /// Finalize the current candle, broadcast the base and derived events in
    /// order and schedule saves. `None` when there was nothing to finalize.
    pub fn finalize_current_candle_at(&self, now: i64) -> Option<Candle> {
        let fin = {
            let _publishing = self.publish.lock();
            let fin = self.store.finalize_current_candle(now)?;
            self.subscribers.broadcast_all(&fin.events);
            fin
        };

        for &tf in &fin.completed {
            self.persist_async(tf);
        }
        if self.is_base_save_due(&fin.finalized) {
            self.persist_async(Timeframe::BASE);
        }

        Some(fin.finalized)
    }

    /// Close the current candle and immediately open its successor.
    pub fn roll_candle(&self) -> UpdateMessage {
        self.finalize_current_candle();
        self.start_new_candle()
    }

    /// Complete derived buckets whose window has passed even if no base
    /// candle arrived to close them.
    pub fn complete_expired_at(&self, now: i64) -> usize {
        let expiry = {
            let _publishing = self.publish.lock();
            let expiry = self.store.complete_expired(now);
            self.subscribers.broadcast_all(&expiry.events);
            expiry
        };
        for &tf in &expiry.completed {
            self.persist_async(tf);
        }
        expiry.completed.len()
    }

    fn is_base_save_due(&self, finalized: &Candle) -> bool {
        if self.base_save_every_minutes == 0 {
            return false;
        }
        let minute_of_hour = finalized.timestamp.div_euclid(60_000).rem_euclid(60);
        minute_of_hour % i64::from(self.base_save_every_minutes) == 0
    }

    // ── Subscribers ─────────────────────────────────────────────────────

    /// Admit a live subscriber. Base-timeframe subscribers get the current
    /// candle queued first as an "update".
    pub fn subscribe(&self, sink: Arc<dyn SubscriberSink>, timeframe: Timeframe) -> Uuid {
        let _publishing = self.publish.lock();

        if timeframe.is_base() {
            if let Some(candle) = self.store.current_candle() {
                let event = UpdateMessage::update(Timeframe::BASE, candle);
                match serde_json::to_string(&event) {
                    Ok(json) => {
                        if let Err(e) = sink.try_send(&json) {
                            debug!(error = %e, "could not queue current candle for new subscriber");
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to serialise current candle"),
                }
            }
        }

        self.subscribers.register(sink, timeframe)
    }

    // ── Reads ───────────────────────────────────────────────────────────

    pub fn history(&self, tf: Timeframe, query: &HistoryQuery) -> Vec<Candle> {
        self.store.history(tf, query)
    }

    pub fn current_candle(&self) -> Option<Candle> {
        self.store.current_candle()
    }
}

// =============================================================================
// Driver
// =============================================================================

/// Periodic driver: ticks the current candle every `update_every` (and
/// sweeps expired derived buckets), and rolls the candle over every
/// `roll_every`. Runs forever; there is exactly one driver per feed.
pub async fn run_driver(feed: Arc<PriceFeed>, update_every: Duration, roll_every: Duration) {
    let start = Instant::now();
    let mut update_tick = interval_at(start + update_every, update_every);
    let mut roll_tick = interval_at(start + roll_every, roll_every);
    update_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    roll_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        update_ms = update_every.as_millis() as u64,
        roll_ms = roll_every.as_millis() as u64,
        "candle driver started"
    );

    loop {
        tokio::select! {
            _ = update_tick.tick() => {
                feed.update_current_candle();
                feed.complete_expired_at(now_ms());
            }
            _ = roll_tick.tick() => {
                feed.roll_candle();
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
