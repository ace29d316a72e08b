use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDateTime, Timelike, Utc};
use futures_util::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use common::{
    Candle, ClockTime, Error, MarketDataSource, Resolution, Result, Settings, Signal, SignalPlan,
};
use strategy::SignalGenerator;
use watchlist::{Rollup, WatchlistStateMachine};

use crate::journal::SignalJournal;

/// Shared handle to the single watchlist. The scheduler is its only mutator;
/// status readers lock briefly to take snapshots.
pub type SharedWatchlist = Arc<Mutex<WatchlistStateMachine>>;

/// The three jobs driven off the minute tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Monitor,
    Scan,
    Rollup,
}

/// What a single tick did.
#[derive(Debug, Default)]
pub struct TickReport {
    pub fired: Vec<Cadence>,
    pub opened: Vec<Signal>,
    pub resolved: Vec<Resolution>,
    pub rollup: Option<Rollup>,
}

/// Drives scanning, monitoring and the daily rollover from a one-minute tick.
pub struct Scheduler {
    settings: Settings,
    generator: SignalGenerator,
    market: Arc<dyn MarketDataSource>,
    watchlist: SharedWatchlist,
    journal: Option<SignalJournal>,
    fetch_timeout: Duration,
    offset: FixedOffset,
    last_monitor: Option<NaiveDateTime>,
    last_scan: Option<NaiveDateTime>,
    last_rollup: Option<NaiveDateTime>,
}

impl Scheduler {
    pub fn new(
        settings: Settings,
        market: Arc<dyn MarketDataSource>,
        watchlist: SharedWatchlist,
        fetch_timeout: Duration,
    ) -> Result<Self> {
        let offset = FixedOffset::east_opt(settings.utc_offset_hours * 3600).ok_or_else(|| {
            Error::Config(format!("utc_offset_hours {} out of range", settings.utc_offset_hours))
        })?;
        Ok(Self {
            generator: SignalGenerator::new(settings.rules.clone()),
            settings,
            market,
            watchlist,
            journal: None,
            fetch_timeout,
            offset,
            last_monitor: None,
            last_scan: None,
            last_rollup: None,
        })
    }

    pub fn with_journal(mut self, journal: SignalJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn watchlist(&self) -> SharedWatchlist {
        self.watchlist.clone()
    }

    /// Run forever, ticking once per wall-clock minute. Call from `tokio::spawn`.
    pub async fn run(mut self) {
        info!(
            symbols = self.settings.symbols.len(),
            scan_minutes = ?self.settings.scan_minutes,
            active_from = %self.settings.active_from,
            active_until = %self.settings.active_until,
            rollover = %self.settings.rollover,
            "Scheduler running"
        );
        loop {
            let report = self.tick(Utc::now()).await;
            if !report.fired.is_empty() {
                debug!(
                    fired = ?report.fired,
                    opened = report.opened.len(),
                    resolved = report.resolved.len(),
                    "Tick complete"
                );
            }
            tokio::time::sleep(until_next_minute(Utc::now())).await;
        }
    }

    /// Fire whatever is due at `now`. Each cadence fires at most once per
    /// local minute, so repeated calls within a minute are no-ops.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> TickReport {
        let local = now.with_timezone(&self.offset);
        let minute = minute_key(&local);
        let mut report = TickReport::default();

        if self.monitor_due(&local) && self.last_monitor != Some(minute) {
            self.last_monitor = Some(minute);
            report.fired.push(Cadence::Monitor);
            report.resolved = self.monitor(now).await;
        }

        if self.scan_due(&local) && self.last_scan != Some(minute) {
            self.last_scan = Some(minute);
            report.fired.push(Cadence::Scan);
            report.opened = self.scan(now).await;
        }

        if self.rollup_due(&local) && self.last_rollup != Some(minute) {
            self.last_rollup = Some(minute);
            report.fired.push(Cadence::Rollup);
            report.rollup = Some(self.rollup(now).await);
        }

        report
    }

    pub fn scan_due(&self, local: &DateTime<FixedOffset>) -> bool {
        self.settings.scan_minutes.contains(&local.minute()) && self.in_active_hours(local)
    }

    pub fn monitor_due(&self, local: &DateTime<FixedOffset>) -> bool {
        local.minute() % self.settings.monitor_every_minutes == 0
    }

    pub fn rollup_due(&self, local: &DateTime<FixedOffset>) -> bool {
        ClockTime::of(local) == self.settings.rollover
    }

    /// Inclusive at both ends; a window whose start is after its end wraps midnight.
    pub fn in_active_hours(&self, local: &DateTime<FixedOffset>) -> bool {
        let t = ClockTime::of(local);
        let (from, until) = (self.settings.active_from, self.settings.active_until);
        if from <= until {
            from <= t && t <= until
        } else {
            t >= from || t <= until
        }
    }

    /// Score every eligible symbol and register the plans that qualify.
    async fn scan(&self, now: DateTime<Utc>) -> Vec<Signal> {
        let candidates: Vec<String> = {
            let wl = self.watchlist.lock().await;
            self.settings
                .symbols
                .iter()
                .filter(|s| wl.accepts(s, now))
                .cloned()
                .collect()
        };
        if candidates.is_empty() {
            debug!("Scan skipped: every symbol is open or cooling down");
            return Vec::new();
        }

        // Fetch everything before touching state.
        let fetched = join_all(candidates.iter().map(|s| self.fetch_candles(s))).await;

        let mut plans: Vec<SignalPlan> = Vec::new();
        for (symbol, result) in candidates.iter().zip(fetched) {
            match result.and_then(|candles| self.generator.evaluate(symbol, &candles)) {
                Ok(plan) if plan.is_eligible() => plans.push(plan),
                Ok(plan) => debug!(symbol = %symbol, score = plan.score, "No signal"),
                Err(e @ Error::InsufficientData { .. }) => {
                    info!(symbol = %symbol, error = %e, "Skipping symbol this cycle")
                }
                Err(e) => warn!(symbol = %symbol, error = %e, "Skipping symbol this cycle"),
            }
        }

        let mut opened = Vec::new();
        {
            let mut wl = self.watchlist.lock().await;
            for plan in &plans {
                match wl.register(plan, now) {
                    Ok(signal) => opened.push(signal),
                    Err(reason) => info!(symbol = %plan.symbol, %reason, "Plan not registered"),
                }
            }
        }

        if let Some(journal) = &self.journal {
            for signal in &opened {
                if let Err(e) = journal.record_opened(signal).await {
                    error!(id = signal.id, error = %e, "Failed to journal opened signal");
                }
            }
        }

        info!(
            candidates = candidates.len(),
            eligible = plans.len(),
            opened = opened.len(),
            "Scan complete"
        );
        opened
    }

    /// Re-price every open signal and resolve the ones that crossed a level.
    async fn monitor(&self, now: DateTime<Utc>) -> Vec<Resolution> {
        let symbols = self.watchlist.lock().await.open_symbols();
        if symbols.is_empty() {
            return Vec::new();
        }

        let prices = join_all(symbols.iter().map(|s| self.fetch_price(s))).await;

        let mut resolved = Vec::new();
        {
            let mut wl = self.watchlist.lock().await;
            for (symbol, price) in symbols.iter().zip(prices) {
                match price {
                    Ok(price) => {
                        if let Some(resolution) = wl.evaluate(symbol, price, now) {
                            resolved.push(resolution);
                        }
                    }
                    Err(e) => warn!(symbol = %symbol, error = %e, "Price unavailable, signal stays open"),
                }
            }
        }

        if let Some(journal) = &self.journal {
            for resolution in &resolved {
                if let Err(e) = journal.record_resolved(resolution).await {
                    error!(id = resolution.signal.id, error = %e, "Failed to journal resolution");
                }
            }
        }
        resolved
    }

    async fn rollup(&self, now: DateTime<Utc>) -> Rollup {
        let rollup = self.watchlist.lock().await.rollup();
        info!(
            total = rollup.stats.total_signals,
            wins = rollup.stats.wins,
            losses = rollup.stats.losses,
            profit_percent = rollup.stats.profit_percent,
            discarded = rollup.expired.len(),
            "Daily rollover"
        );
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.record_expired(&rollup.expired, now).await {
                error!(error = %e, "Failed to journal expired signals");
            }
        }
        rollup
    }

    async fn fetch_candles(&self, symbol: &str) -> Result<Vec<Candle>> {
        let request = self.market.candles(
            symbol,
            &self.settings.interval,
            self.settings.candle_limit,
        );
        let candles = tokio::time::timeout(self.fetch_timeout, request)
            .await
            .map_err(|_| self.timed_out(symbol))??;
        if candles.is_empty() {
            return Err(Error::DataSourceUnavailable(format!("{symbol}: no candles")));
        }
        Ok(candles)
    }

    async fn fetch_price(&self, symbol: &str) -> Result<f64> {
        tokio::time::timeout(self.fetch_timeout, self.market.latest_price(symbol))
            .await
            .map_err(|_| self.timed_out(symbol))?
    }

    fn timed_out(&self, symbol: &str) -> Error {
        Error::DataSourceUnavailable(format!(
            "{symbol}: no response within {:?}",
            self.fetch_timeout
        ))
    }
}

fn minute_key(local: &DateTime<FixedOffset>) -> NaiveDateTime {
    let naive = local.naive_local();
    naive
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(naive)
}

/// Sleep target: one second past the next minute boundary.
fn until_next_minute(now: DateTime<Utc>) -> Duration {
    let into_minute = now.second() as u64 * 1000 + now.timestamp_subsec_millis() as u64 % 1000;
    Duration::from_millis(61_000 - into_minute.min(60_000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use chrono::TimeZone;
    use common::{Direction, SignalEvent};
    use tokio::sync::mpsc;

    /// In-memory market: fixed candle series and mutable latest prices.
    #[derive(Default)]
    struct FakeMarket {
        candles: HashMap<String, Vec<Candle>>,
        prices: StdMutex<HashMap<String, f64>>,
        failing: HashSet<String>,
        slow: HashSet<String>,
        candle_calls: StdMutex<Vec<String>>,
    }

    impl FakeMarket {
        fn set_price(&self, symbol: &str, price: f64) {
            self.prices.lock().unwrap().insert(symbol.into(), price);
        }

        fn candle_calls(&self) -> Vec<String> {
            self.candle_calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MarketDataSource for FakeMarket {
        async fn candles(&self, symbol: &str, _interval: &str, _limit: usize) -> Result<Vec<Candle>> {
            self.candle_calls.lock().unwrap().push(symbol.to_string());
            if self.slow.contains(symbol) {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            if self.failing.contains(symbol) {
                return Err(Error::DataSourceUnavailable(format!("{symbol}: boom")));
            }
            Ok(self.candles.get(symbol).cloned().unwrap_or_default())
        }

        async fn latest_price(&self, symbol: &str) -> Result<f64> {
            self.prices
                .lock()
                .unwrap()
                .get(symbol)
                .copied()
                .ok_or_else(|| Error::DataSourceUnavailable(format!("{symbol}: no price")))
        }
    }

    fn series(closes: &[f64], range: f64) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle {
                open: c,
                high: c + range / 2.0,
                low: c - range / 2.0,
                close: c,
                volume: 1.0,
                open_time: start + chrono::Duration::minutes(15 * i as i64),
            })
            .collect()
    }

    /// Uptrend then pullback: LONG at 169, stop 166, first target 172.
    fn long_setup() -> Vec<Candle> {
        let mut closes: Vec<f64> = (0..90).map(|i| 100.0 + i as f64).collect();
        closes.extend((1..=10).map(|i| 189.0 - i as f64 * 2.0));
        series(&closes, 2.0)
    }

    /// Steady uptrend, RSI pinned high: no setup.
    fn no_setup() -> Vec<Candle> {
        let closes: Vec<f64> = (0..100).map(|i| 100.0 + i as f64).collect();
        series(&closes, 1.0)
    }

    fn settings(symbols: &[&str]) -> Settings {
        Settings {
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            ..Settings::default()
        }
    }

    fn at(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, hour, minute, second).unwrap()
    }

    struct Harness {
        scheduler: Scheduler,
        market: Arc<FakeMarket>,
        events: mpsc::Receiver<SignalEvent>,
    }

    fn harness(settings: Settings, market: FakeMarket) -> Harness {
        let (tx, events) = mpsc::channel(64);
        let watchlist = Arc::new(Mutex::new(WatchlistStateMachine::new(settings.cooldown(), tx)));
        let market = Arc::new(market);
        let scheduler = Scheduler::new(
            settings,
            market.clone(),
            watchlist,
            Duration::from_millis(200),
        )
        .unwrap();
        Harness { scheduler, market, events }
    }

    fn drain(rx: &mut mpsc::Receiver<SignalEvent>) -> Vec<SignalEvent> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push(e);
        }
        out
    }

    #[tokio::test]
    async fn scan_opens_exactly_one_signal_for_the_setup() {
        let mut market = FakeMarket::default();
        market.candles.insert("BTCUSDT".into(), long_setup());
        market.candles.insert("ETHUSDT".into(), no_setup());
        let mut h = harness(settings(&["BTCUSDT", "ETHUSDT"]), market);

        let report = h.scheduler.tick(at(9, 1, 0)).await;

        assert_eq!(report.fired, vec![Cadence::Scan]);
        assert_eq!(report.opened.len(), 1);
        let signal = &report.opened[0];
        assert_eq!(signal.symbol, "BTCUSDT");
        assert_eq!(signal.direction, Direction::Long);
        assert_eq!(signal.entry, 169.0);
        assert!((signal.stop_loss - 166.0).abs() < 1e-9);
        assert_eq!(signal.sequence_today, 1);

        let events = drain(&mut h.events);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], SignalEvent::NewSignal { symbol, .. } if symbol == "BTCUSDT"));

        let wl = h.scheduler.watchlist();
        let wl = wl.lock().await;
        assert_eq!(wl.stats().total_signals, 1);
        assert!(wl.is_open("BTCUSDT"));
    }

    #[tokio::test]
    async fn each_cadence_fires_once_per_minute() {
        let mut market = FakeMarket::default();
        market.candles.insert("BTCUSDT".into(), no_setup());
        let mut h = harness(settings(&["BTCUSDT"]), market);

        let first = h.scheduler.tick(at(9, 1, 0)).await;
        let again = h.scheduler.tick(at(9, 1, 40)).await;
        assert_eq!(first.fired, vec![Cadence::Scan]);
        assert!(again.fired.is_empty());
        assert_eq!(h.market.candle_calls().len(), 1);

        let next = h.scheduler.tick(at(9, 16, 0)).await;
        assert_eq!(next.fired, vec![Cadence::Scan]);
    }

    #[tokio::test]
    async fn no_scan_outside_scan_minutes_or_active_hours() {
        let mut market = FakeMarket::default();
        market.candles.insert("BTCUSDT".into(), long_setup());
        let mut h = harness(settings(&["BTCUSDT"]), market);

        for (hour, minute) in [(9, 2), (4, 46), (21, 46), (22, 1)] {
            let report = h.scheduler.tick(at(hour, minute, 0)).await;
            assert!(!report.fired.contains(&Cadence::Scan), "{hour}:{minute}");
        }
        assert!(h.market.candle_calls().is_empty());

        // Window edges are inclusive.
        let s = &h.scheduler;
        let local = |hh, mm| at(hh, mm, 0).with_timezone(&s.offset);
        assert!(s.in_active_hours(&local(5, 0)));
        assert!(s.in_active_hours(&local(21, 31)));
        assert!(!s.in_active_hours(&local(21, 32)));
        assert!(!s.in_active_hours(&local(4, 59)));
    }

    #[tokio::test]
    async fn active_hours_follow_the_utc_offset() {
        let mut market = FakeMarket::default();
        market.candles.insert("BTCUSDT".into(), no_setup());
        let s = Settings {
            utc_offset_hours: 3,
            ..settings(&["BTCUSDT"])
        };
        let mut h = harness(s, market);

        // 02:01 UTC is 05:01 local.
        let report = h.scheduler.tick(at(2, 1, 0)).await;
        assert_eq!(report.fired, vec![Cadence::Scan]);
        // 20:00 UTC is 23:00 local.
        let report = h.scheduler.tick(at(20, 0, 0)).await;
        assert_eq!(report.fired, vec![Cadence::Monitor, Cadence::Rollup]);
    }

    #[tokio::test]
    async fn failing_symbol_does_not_block_the_others() {
        let mut market = FakeMarket::default();
        market.candles.insert("BTCUSDT".into(), long_setup());
        market.failing.insert("ETHUSDT".into());
        market.slow.insert("SOLUSDT".into());
        market.candles.insert("XRPUSDT".into(), long_setup()[..20].to_vec());
        let mut h = harness(settings(&["ETHUSDT", "SOLUSDT", "XRPUSDT", "BTCUSDT"]), market);

        let report = h.scheduler.tick(at(9, 1, 0)).await;

        assert_eq!(report.opened.len(), 1);
        assert_eq!(report.opened[0].symbol, "BTCUSDT");
        assert_eq!(h.market.candle_calls().len(), 4);
    }

    #[tokio::test]
    async fn open_and_cooling_symbols_are_not_fetched() {
        let mut market = FakeMarket::default();
        market.candles.insert("BTCUSDT".into(), long_setup());
        let mut h = harness(settings(&["BTCUSDT"]), market);

        h.scheduler.tick(at(9, 1, 0)).await;
        let report = h.scheduler.tick(at(9, 16, 0)).await;
        assert!(report.opened.is_empty());
        assert_eq!(h.market.candle_calls().len(), 1);
    }

    #[tokio::test]
    async fn monitor_resolves_on_first_target() {
        let mut market = FakeMarket::default();
        market.candles.insert("BTCUSDT".into(), long_setup());
        let mut h = harness(settings(&["BTCUSDT"]), market);
        h.scheduler.tick(at(9, 1, 0)).await;
        drain(&mut h.events);

        h.market.set_price("BTCUSDT", 170.0);
        let report = h.scheduler.tick(at(9, 5, 0)).await;
        assert_eq!(report.fired, vec![Cadence::Monitor]);
        assert!(report.resolved.is_empty());

        h.market.set_price("BTCUSDT", 172.5);
        let report = h.scheduler.tick(at(9, 10, 0)).await;
        assert_eq!(report.resolved.len(), 1);
        assert_eq!(report.resolved[0].outcome, common::Outcome::Won);

        let events = drain(&mut h.events);
        assert!(matches!(events.as_slice(), [SignalEvent::SignalResolved { .. }]));
        assert_eq!(h.scheduler.watchlist().lock().await.stats().wins, 1);
    }

    #[tokio::test]
    async fn stop_out_is_silent() {
        let mut market = FakeMarket::default();
        market.candles.insert("BTCUSDT".into(), long_setup());
        let mut h = harness(settings(&["BTCUSDT"]), market);
        h.scheduler.tick(at(9, 1, 0)).await;
        drain(&mut h.events);

        h.market.set_price("BTCUSDT", 165.0);
        let report = h.scheduler.tick(at(9, 5, 0)).await;
        assert_eq!(report.resolved[0].outcome, common::Outcome::Lost);
        assert!(drain(&mut h.events).is_empty());
        assert_eq!(h.scheduler.watchlist().lock().await.stats().losses, 1);
    }

    #[tokio::test]
    async fn missing_price_keeps_signal_open() {
        let mut market = FakeMarket::default();
        market.candles.insert("BTCUSDT".into(), long_setup());
        let mut h = harness(settings(&["BTCUSDT"]), market);
        h.scheduler.tick(at(9, 1, 0)).await;

        let report = h.scheduler.tick(at(9, 5, 0)).await;
        assert!(report.resolved.is_empty());
        assert!(h.scheduler.watchlist().lock().await.is_open("BTCUSDT"));
    }

    #[tokio::test]
    async fn rollover_summarises_and_resets() {
        let mut market = FakeMarket::default();
        market.candles.insert("BTCUSDT".into(), long_setup());
        let mut h = harness(settings(&["BTCUSDT"]), market);
        h.scheduler.tick(at(9, 1, 0)).await;
        drain(&mut h.events);

        let report = h.scheduler.tick(at(23, 0, 0)).await;
        assert_eq!(report.fired, vec![Cadence::Monitor, Cadence::Rollup]);
        let rollup = report.rollup.unwrap();
        assert_eq!(rollup.stats.total_signals, 1);
        assert_eq!(rollup.expired.len(), 1);

        let events = drain(&mut h.events);
        assert!(matches!(
            events.as_slice(),
            [SignalEvent::DailySummary { total_signals: 1, wins: 0, losses: 0, .. }]
        ));
        let wl = h.scheduler.watchlist();
        let wl = wl.lock().await;
        assert!(wl.active_signals().is_empty());
        assert_eq!(wl.stats(), common::DailyStats::default());
    }

    #[tokio::test]
    async fn journal_follows_the_lifecycle() {
        let mut market = FakeMarket::default();
        market.candles.insert("BTCUSDT".into(), long_setup());
        market.candles.insert("ETHUSDT".into(), long_setup());
        let journal = crate::journal::in_memory().await;
        let mut h = harness(settings(&["BTCUSDT", "ETHUSDT"]), market);
        h.scheduler = h.scheduler.with_journal(journal.clone());

        h.scheduler.tick(at(9, 1, 0)).await;
        h.market.set_price("BTCUSDT", 172.0);
        h.market.set_price("ETHUSDT", 170.0);
        h.scheduler.tick(at(9, 5, 0)).await;
        h.scheduler.tick(at(23, 0, 0)).await;

        let rows = journal.recent(10).await.unwrap();
        let status: HashMap<_, _> = rows
            .iter()
            .map(|r| (r.symbol.as_str(), r.status.as_str()))
            .collect();
        assert_eq!(status["BTCUSDT"], "won");
        assert_eq!(status["ETHUSDT"], "expired");
    }

    #[test]
    fn sleeps_to_just_past_the_next_minute() {
        assert_eq!(until_next_minute(at(9, 1, 0)), Duration::from_secs(61));
        assert_eq!(until_next_minute(at(9, 1, 59)), Duration::from_secs(2));
        assert_eq!(until_next_minute(at(9, 1, 30)), Duration::from_secs(31));
    }
}
