use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use common::{
    DailyStats, Outcome, Resolution, Signal, SignalEvent, SignalId, SignalPlan, SignalStatus,
};

/// Why `register` refused a plan. State is untouched in every case.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    #[error("plan score {score} is not eligible")]
    NotEligible { score: u8 },

    #[error("signal #{id} is still open")]
    AlreadyOpen { id: SignalId },

    #[error("cooling down until {until}")]
    CoolingDown { until: DateTime<Utc> },

    #[error("invalid plan: {0}")]
    InvalidPlan(String),
}

/// Signals dropped by a rollup together with the stats that were reported.
#[derive(Debug, Clone, PartialEq)]
pub struct Rollup {
    pub stats: DailyStats,
    pub expired: Vec<Signal>,
}

/// Owner of every open signal and of the daily statistics.
///
/// One OPEN signal per symbol. A symbol that received a signal may not
/// receive another until its cooldown elapses, whatever happened to the
/// first one. Resolution is driven by the first target or the stop; the
/// stop wins when a gapped price crosses both.
///
/// Every mutation updates stats before the corresponding event is queued.
/// Events go out through a bounded channel with `try_send` so the state
/// machine never waits on delivery.
pub struct WatchlistStateMachine {
    cooldown: Duration,
    active: HashMap<String, Signal>,
    /// Symbol → instant after which a new signal may be registered.
    cooldowns: HashMap<String, DateTime<Utc>>,
    stats: DailyStats,
    next_id: SignalId,
    event_tx: mpsc::Sender<SignalEvent>,
}

impl WatchlistStateMachine {
    pub fn new(cooldown: Duration, event_tx: mpsc::Sender<SignalEvent>) -> Self {
        Self {
            cooldown,
            active: HashMap::new(),
            cooldowns: HashMap::new(),
            stats: DailyStats::default(),
            next_id: 1,
            event_tx,
        }
    }

    /// Continue id allocation after ids already handed out (e.g. from the journal).
    pub fn with_first_id(mut self, id: SignalId) -> Self {
        self.next_id = id.max(1);
        self
    }

    /// Promote an eligible plan to an OPEN signal.
    pub fn register(&mut self, plan: &SignalPlan, now: DateTime<Utc>) -> Result<Signal, Rejection> {
        if !plan.is_eligible() {
            return Err(Rejection::NotEligible { score: plan.score });
        }
        if let Some(open) = self.active.get(&plan.symbol) {
            return Err(Rejection::AlreadyOpen { id: open.id });
        }
        if let Some(&until) = self.cooldowns.get(&plan.symbol) {
            if now < until {
                return Err(Rejection::CoolingDown { until });
            }
        }
        let Some(direction) = plan.direction else {
            return Err(Rejection::NotEligible { score: plan.score });
        };
        if !plan.has_valid_levels() {
            warn!(
                symbol = %plan.symbol,
                entry = plan.entry,
                stop = plan.stop_loss,
                targets = ?plan.targets,
                "Plan with invalid levels rejected"
            );
            return Err(Rejection::InvalidPlan(format!(
                "risk {} with targets {:?}",
                plan.risk(),
                plan.targets
            )));
        }

        let id = self.next_id;
        self.next_id += 1;
        self.stats.total_signals += 1;

        let cooldown_until = now + self.cooldown;
        let signal = Signal {
            id,
            symbol: plan.symbol.clone(),
            direction,
            entry: plan.entry,
            stop_loss: plan.stop_loss,
            targets: plan.targets,
            status: SignalStatus::Open,
            opened_at: now,
            cooldown_until,
            sequence_today: self.stats.total_signals,
        };
        self.cooldowns.insert(signal.symbol.clone(), cooldown_until);
        self.active.insert(signal.symbol.clone(), signal.clone());

        info!(
            id,
            symbol = %signal.symbol,
            direction = %direction,
            entry = signal.entry,
            stop = signal.stop_loss,
            seq = signal.sequence_today,
            "Signal opened"
        );
        self.emit(SignalEvent::NewSignal {
            id,
            symbol: signal.symbol.clone(),
            direction,
            entry: signal.entry,
            stop_loss: signal.stop_loss,
            targets: signal.targets,
            sequence_today: signal.sequence_today,
            reward_ratio: plan.reward_ratio(),
        });

        Ok(signal)
    }

    /// Check the open signal for `symbol` against `price`.
    ///
    /// Returns the resolution when the stop or the first target was crossed,
    /// `None` when the signal stays open or there is no open signal.
    pub fn evaluate(&mut self, symbol: &str, price: f64, now: DateTime<Utc>) -> Option<Resolution> {
        if !price.is_finite() || price <= 0.0 {
            warn!(symbol, price, "Ignoring unusable price");
            return None;
        }
        let signal = self.active.get(symbol)?;

        let outcome = if signal.stop_hit(price) {
            Outcome::Lost
        } else if signal.first_target_hit(price) {
            Outcome::Won
        } else {
            return None;
        };

        let mut signal = self.active.remove(symbol)?;
        signal.status = match outcome {
            Outcome::Won => SignalStatus::Won,
            Outcome::Lost => SignalStatus::Lost,
        };
        let profit_percent = signal.profit_percent(price);
        let resolution = Resolution {
            outcome,
            exit_price: price,
            profit_percent,
            targets_reached: signal.targets_reached(price),
            resolved_at: now,
            signal,
        };

        self.stats.profit_percent += profit_percent;
        match outcome {
            Outcome::Won => {
                self.stats.wins += 1;
                info!(
                    id = resolution.signal.id,
                    symbol,
                    price,
                    profit_pct = profit_percent,
                    targets = resolution.targets_reached,
                    "Target hit"
                );
                self.emit(SignalEvent::SignalResolved {
                    id: resolution.signal.id,
                    symbol: symbol.to_string(),
                    outcome,
                    profit_percent,
                    sequence_today: resolution.signal.sequence_today,
                    targets_reached: resolution.targets_reached,
                });
            }
            Outcome::Lost => {
                // Stop-outs are recorded but not announced.
                self.stats.losses += 1;
                info!(
                    id = resolution.signal.id,
                    symbol,
                    price,
                    profit_pct = profit_percent,
                    "Stop hit"
                );
            }
        }

        Some(resolution)
    }

    /// Close the day: publish the summary, zero the stats and drop every
    /// open signal unscored. Cooldowns are left to expire on their own.
    pub fn rollup(&mut self) -> Rollup {
        let stats = std::mem::take(&mut self.stats);
        let mut expired: Vec<Signal> = self.active.drain().map(|(_, s)| s).collect();
        expired.sort_by_key(|s| s.id);

        info!(
            total = stats.total_signals,
            wins = stats.wins,
            losses = stats.losses,
            expired = expired.len(),
            "Daily rollup"
        );
        self.emit(SignalEvent::DailySummary {
            total_signals: stats.total_signals,
            wins: stats.wins,
            losses: stats.losses,
            profit_percent: stats.profit_percent,
        });

        Rollup { stats, expired }
    }

    pub fn is_open(&self, symbol: &str) -> bool {
        self.active.contains_key(symbol)
    }

    pub fn is_cooling_down(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        self.cooldowns.get(symbol).is_some_and(|&until| now < until)
    }

    /// Symbols that may receive a new signal at `now`.
    pub fn accepts(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        !self.is_open(symbol) && !self.is_cooling_down(symbol, now)
    }

    pub fn open_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.active.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn active_signals(&self) -> Vec<Signal> {
        let mut signals: Vec<Signal> = self.active.values().cloned().collect();
        signals.sort_by_key(|s| s.id);
        signals
    }

    pub fn stats(&self) -> DailyStats {
        self.stats
    }

    fn emit(&self, event: SignalEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!(error = %e, "Notification dropped");
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use common::{Direction, SCORE_ELIGIBLE, SCORE_NEUTRAL};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 1, 0).unwrap()
    }

    fn long_plan(symbol: &str) -> SignalPlan {
        SignalPlan {
            symbol: symbol.into(),
            direction: Some(Direction::Long),
            score: SCORE_ELIGIBLE,
            entry: 100.0,
            stop_loss: 95.0,
            targets: [105.0, 107.5, 110.0, 115.0],
            current_price: 100.0,
            indicators: None,
        }
    }

    fn short_plan(symbol: &str) -> SignalPlan {
        SignalPlan {
            direction: Some(Direction::Short),
            stop_loss: 105.0,
            targets: [95.0, 92.5, 90.0, 85.0],
            ..long_plan(symbol)
        }
    }

    fn make_watchlist() -> (WatchlistStateMachine, mpsc::Receiver<SignalEvent>) {
        let (tx, rx) = mpsc::channel(32);
        (WatchlistStateMachine::new(Duration::hours(2), tx), rx)
    }

    #[test]
    fn register_opens_signal_and_announces_it() {
        let (mut wl, mut rx) = make_watchlist();
        let signal = wl.register(&long_plan("BTCUSDT"), t0()).unwrap();

        assert_eq!(signal.id, 1);
        assert_eq!(signal.status, SignalStatus::Open);
        assert_eq!(signal.cooldown_until, t0() + Duration::hours(2));
        assert_eq!(signal.sequence_today, 1);
        assert_eq!(wl.stats().total_signals, 1);
        assert_eq!(wl.open_symbols(), vec!["BTCUSDT".to_string()]);

        match rx.try_recv().unwrap() {
            SignalEvent::NewSignal { id, symbol, sequence_today, reward_ratio, .. } => {
                assert_eq!(id, 1);
                assert_eq!(symbol, "BTCUSDT");
                assert_eq!(sequence_today, 1);
                assert!((reward_ratio - 3.0).abs() < 1e-9);
            }
            other => panic!("Expected NewSignal, got {other:?}"),
        }
    }

    #[test]
    fn ids_increment_across_symbols() {
        let (mut wl, _rx) = make_watchlist();
        let a = wl.register(&long_plan("BTCUSDT"), t0()).unwrap();
        let b = wl.register(&short_plan("ETHUSDT"), t0()).unwrap();
        assert_eq!((a.id, b.id), (1, 2));
        assert_eq!(b.sequence_today, 2);
    }

    #[test]
    fn neutral_plan_is_rejected() {
        let (mut wl, mut rx) = make_watchlist();
        let plan = SignalPlan::neutral("BTCUSDT", 100.0, SCORE_NEUTRAL);
        assert_eq!(
            wl.register(&plan, t0()),
            Err(Rejection::NotEligible { score: SCORE_NEUTRAL })
        );
        assert_eq!(wl.stats(), DailyStats::default());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn duplicate_registration_leaves_state_unchanged() {
        let (mut wl, mut rx) = make_watchlist();
        wl.register(&long_plan("BTCUSDT"), t0()).unwrap();
        let _ = rx.try_recv();
        let before = (wl.stats(), wl.active_signals());

        let again = wl.register(&long_plan("BTCUSDT"), t0() + Duration::minutes(15));
        assert_eq!(again, Err(Rejection::AlreadyOpen { id: 1 }));
        assert_eq!((wl.stats(), wl.active_signals()), before);
        assert!(rx.try_recv().is_err(), "No event for a rejected plan");
    }

    #[test]
    fn zero_risk_plan_is_rejected() {
        let (mut wl, _rx) = make_watchlist();
        let plan = SignalPlan {
            stop_loss: 100.0,
            ..long_plan("BTCUSDT")
        };
        assert!(matches!(wl.register(&plan, t0()), Err(Rejection::InvalidPlan(_))));
        assert!(wl.accepts("BTCUSDT", t0()));
        assert_eq!(wl.stats().total_signals, 0);
    }

    #[test]
    fn stop_hit_loses_silently() {
        let (mut wl, mut rx) = make_watchlist();
        wl.register(&long_plan("BTCUSDT"), t0()).unwrap();
        let _ = rx.try_recv();

        let res = wl.evaluate("BTCUSDT", 94.0, t0()).unwrap();
        assert_eq!(res.outcome, Outcome::Lost);
        assert_eq!(res.signal.status, SignalStatus::Lost);
        assert!((res.profit_percent + 6.0).abs() < 1e-9);
        assert_eq!(wl.stats().losses, 1);
        assert_eq!(wl.stats().wins, 0);
        assert!(!wl.is_open("BTCUSDT"));
        assert!(rx.try_recv().is_err(), "Losses are not announced");
    }

    #[test]
    fn first_target_wins_and_announces() {
        let (mut wl, mut rx) = make_watchlist();
        wl.register(&long_plan("BTCUSDT"), t0()).unwrap();
        let _ = rx.try_recv();

        let res = wl.evaluate("BTCUSDT", 106.0, t0()).unwrap();
        assert_eq!(res.outcome, Outcome::Won);
        assert!((res.profit_percent - 6.0).abs() < 1e-9);
        assert_eq!(res.targets_reached, 1);
        assert_eq!(wl.stats().wins, 1);
        assert!(!wl.is_open("BTCUSDT"));

        match rx.try_recv().unwrap() {
            SignalEvent::SignalResolved { id, outcome, profit_percent, .. } => {
                assert_eq!(id, 1);
                assert_eq!(outcome, Outcome::Won);
                assert!((profit_percent - 6.0).abs() < 1e-9);
            }
            other => panic!("Expected SignalResolved, got {other:?}"),
        }
    }

    /// Known simplification: reaching the first target closes the signal even
    /// though three farther targets were published. They are reported, not tracked.
    #[test]
    fn first_target_closes_signal_even_when_farther_targets_are_open() {
        let (mut wl, _rx) = make_watchlist();
        wl.register(&long_plan("BTCUSDT"), t0()).unwrap();
        let res = wl.evaluate("BTCUSDT", 111.0, t0()).unwrap();
        assert_eq!(res.outcome, Outcome::Won);
        assert_eq!(res.targets_reached, 3);
        assert!(wl.evaluate("BTCUSDT", 116.0, t0()).is_none());
    }

    #[test]
    fn price_between_levels_keeps_signal_open() {
        let (mut wl, _rx) = make_watchlist();
        wl.register(&long_plan("BTCUSDT"), t0()).unwrap();
        assert!(wl.evaluate("BTCUSDT", 96.0, t0()).is_none());
        assert!(wl.evaluate("BTCUSDT", 104.99, t0()).is_none());
        assert!(wl.is_open("BTCUSDT"));
        assert_eq!(wl.stats().completed(), 0);
    }

    #[test]
    fn short_signal_resolves_in_both_directions() {
        let (mut wl, _rx) = make_watchlist();
        wl.register(&short_plan("ETHUSDT"), t0()).unwrap();
        let res = wl.evaluate("ETHUSDT", 105.0, t0()).unwrap();
        assert_eq!(res.outcome, Outcome::Lost);

        let (mut wl, _rx) = make_watchlist();
        wl.register(&short_plan("ETHUSDT"), t0()).unwrap();
        let res = wl.evaluate("ETHUSDT", 94.0, t0()).unwrap();
        assert_eq!(res.outcome, Outcome::Won);
        assert!((res.profit_percent - 6.0).abs() < 1e-9);
    }

    #[test]
    fn stop_takes_precedence_when_both_levels_are_crossed() {
        let (mut wl, _rx) = make_watchlist();
        // Degenerate geometry cannot be registered, so craft the signal by hand
        // to reach the tie-break.
        wl.register(&long_plan("BTCUSDT"), t0()).unwrap();
        if let Some(s) = wl.active.get_mut("BTCUSDT") {
            s.stop_loss = 106.0;
        }
        let res = wl.evaluate("BTCUSDT", 105.5, t0()).unwrap();
        assert_eq!(res.outcome, Outcome::Lost);
    }

    #[test]
    fn cooldown_outlives_resolution() {
        let (mut wl, _rx) = make_watchlist();
        wl.register(&long_plan("BTCUSDT"), t0()).unwrap();
        wl.evaluate("BTCUSDT", 106.0, t0() + Duration::minutes(10)).unwrap();

        let later = t0() + Duration::minutes(90);
        assert!(wl.is_cooling_down("BTCUSDT", later));
        assert_eq!(
            wl.register(&long_plan("BTCUSDT"), later),
            Err(Rejection::CoolingDown { until: t0() + Duration::hours(2) })
        );

        let expired = t0() + Duration::hours(2);
        let again = wl.register(&long_plan("BTCUSDT"), expired).unwrap();
        assert_eq!(again.id, 2);
    }

    #[test]
    fn rollup_reports_then_resets_and_drops_open_signals() {
        let (mut wl, mut rx) = make_watchlist();
        wl.register(&long_plan("BTCUSDT"), t0()).unwrap();
        wl.register(&long_plan("ETHUSDT"), t0()).unwrap();
        wl.register(&short_plan("SOLUSDT"), t0()).unwrap();
        wl.evaluate("BTCUSDT", 106.0, t0()).unwrap();
        wl.evaluate("ETHUSDT", 90.0, t0()).unwrap();
        while rx.try_recv().is_ok() {}

        let rollup = wl.rollup();
        assert_eq!(rollup.stats.total_signals, 3);
        assert_eq!(rollup.stats.wins, 1);
        assert_eq!(rollup.stats.losses, 1);
        assert_eq!(rollup.expired.len(), 1);
        assert_eq!(rollup.expired[0].symbol, "SOLUSDT");

        assert_eq!(wl.stats(), DailyStats::default());
        assert!(wl.active_signals().is_empty());

        match rx.try_recv().unwrap() {
            SignalEvent::DailySummary { total_signals, wins, losses, profit_percent } => {
                assert_eq!((total_signals, wins, losses), (3, 1, 1));
                assert!((profit_percent - (6.0 - 10.0)).abs() < 1e-9);
            }
            other => panic!("Expected DailySummary, got {other:?}"),
        }
    }

    #[test]
    fn rollup_on_empty_day_still_summarises() {
        let (mut wl, mut rx) = make_watchlist();
        let rollup = wl.rollup();
        assert_eq!(rollup.stats, DailyStats::default());
        assert!(matches!(rx.try_recv(), Ok(SignalEvent::DailySummary { total_signals: 0, .. })));
    }

    #[test]
    fn full_event_channel_does_not_block_state_changes() {
        let (tx, _rx) = mpsc::channel(1);
        let mut wl = WatchlistStateMachine::new(Duration::hours(2), tx);
        wl.register(&long_plan("BTCUSDT"), t0()).unwrap();
        wl.register(&long_plan("ETHUSDT"), t0()).unwrap();
        assert_eq!(wl.stats().total_signals, 2);
    }

    #[test]
    fn first_id_continues_after_journal() {
        let (tx, _rx) = mpsc::channel(4);
        let mut wl = WatchlistStateMachine::new(Duration::hours(2), tx).with_first_id(41);
        assert_eq!(wl.register(&long_plan("BTCUSDT"), t0()).unwrap().id, 41);
    }
}
