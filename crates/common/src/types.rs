use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV sample as returned by the exchange klines endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub open_time: DateTime<Utc>,
}

impl Candle {
    /// High-low range of the candle.
    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

/// Trade direction of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for long, -1 for short. Multiplying a distance by this projects it
    /// from entry in the trade direction.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// Indicator values at the most recent sample of a close series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub rsi: f64,
    pub ema50: f64,
    pub ema200: f64,
    /// False when fewer closes than the slow EMA period were available and
    /// `ema200` was seeded over the shorter window. Treat as lower confidence.
    pub ema200_full_window: bool,
}

/// Scores a plan can carry.
pub const SCORE_NEUTRAL: u8 = 50;
pub const SCORE_ELIGIBLE: u8 = 100;

/// Output of the signal generator for one symbol. Not yet a tracked signal.
///
/// A plan with `score == SCORE_ELIGIBLE` always carries a direction, a stop
/// and four targets. Lower scores leave the price levels at zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalPlan {
    pub symbol: String,
    pub direction: Option<Direction>,
    pub score: u8,
    pub entry: f64,
    pub stop_loss: f64,
    pub targets: [f64; 4],
    pub current_price: f64,
    pub indicators: Option<IndicatorSnapshot>,
}

impl SignalPlan {
    /// A plan that will never be promoted.
    pub fn neutral(symbol: impl Into<String>, current_price: f64, score: u8) -> Self {
        Self {
            symbol: symbol.into(),
            direction: None,
            score,
            entry: 0.0,
            stop_loss: 0.0,
            targets: [0.0; 4],
            current_price,
            indicators: None,
        }
    }

    pub fn is_eligible(&self) -> bool {
        self.score == SCORE_ELIGIBLE && self.direction.is_some()
    }

    /// Distance between entry and stop.
    pub fn risk(&self) -> f64 {
        (self.entry - self.stop_loss).abs()
    }

    /// Reward of the farthest target expressed in multiples of risk.
    pub fn reward_ratio(&self) -> f64 {
        let risk = self.risk();
        if risk > 0.0 {
            (self.targets[3] - self.entry).abs() / risk
        } else {
            0.0
        }
    }

    /// Checks the price geometry of an eligible plan: stop on the losing side of
    /// entry, targets strictly ordered away from entry on the winning side.
    pub fn has_valid_levels(&self) -> bool {
        let Some(direction) = self.direction else {
            return false;
        };
        let s = direction.sign();
        let finite = self.entry.is_finite()
            && self.stop_loss.is_finite()
            && self.targets.iter().all(|t| t.is_finite());
        if !finite || self.risk() <= 0.0 {
            return false;
        }
        if (self.entry - self.stop_loss) * s <= 0.0 {
            return false;
        }
        let mut prev = self.entry;
        for &target in &self.targets {
            if (target - prev) * s <= 0.0 {
                return false;
            }
            prev = target;
        }
        true
    }
}

pub type SignalId = u64;

/// Lifecycle status of a tracked signal. `Won` and `Lost` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStatus {
    Open,
    Won,
    Lost,
}

impl std::fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalStatus::Open => write!(f, "open"),
            SignalStatus::Won => write!(f, "won"),
            SignalStatus::Lost => write!(f, "lost"),
        }
    }
}

/// A signal owned by the watchlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: SignalId,
    pub symbol: String,
    pub direction: Direction,
    pub entry: f64,
    pub stop_loss: f64,
    pub targets: [f64; 4],
    pub status: SignalStatus,
    pub opened_at: DateTime<Utc>,
    pub cooldown_until: DateTime<Utc>,
    /// 1-based position of this signal among the signals opened since the last rollup.
    pub sequence_today: u32,
}

impl Signal {
    pub fn stop_hit(&self, price: f64) -> bool {
        match self.direction {
            Direction::Long => price <= self.stop_loss,
            Direction::Short => price >= self.stop_loss,
        }
    }

    /// Only the first target resolves a signal; the others are informational.
    pub fn first_target_hit(&self, price: f64) -> bool {
        self.target_crossed(0, price)
    }

    /// Number of targets (0..=4) that `price` has reached or crossed.
    pub fn targets_reached(&self, price: f64) -> usize {
        (0..self.targets.len())
            .filter(|&i| self.target_crossed(i, price))
            .count()
    }

    /// Realised move from entry to `exit` in percent, positive when in our favour.
    pub fn profit_percent(&self, exit: f64) -> f64 {
        if self.entry == 0.0 {
            return 0.0;
        }
        (exit - self.entry) / self.entry * 100.0 * self.direction.sign()
    }

    fn target_crossed(&self, index: usize, price: f64) -> bool {
        match self.direction {
            Direction::Long => price >= self.targets[index],
            Direction::Short => price <= self.targets[index],
        }
    }
}

/// Terminal outcome of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Won,
    Lost,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Won => write!(f, "WON"),
            Outcome::Lost => write!(f, "LOST"),
        }
    }
}

/// Result of evaluating an open signal against a price that crossed a level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub signal: Signal,
    pub outcome: Outcome,
    pub exit_price: f64,
    pub profit_percent: f64,
    pub targets_reached: usize,
    pub resolved_at: DateTime<Utc>,
}

/// Process-wide daily accumulator. Reset at every rollup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyStats {
    pub total_signals: u32,
    pub wins: u32,
    pub losses: u32,
    /// Sum of realised percent over all resolutions (losses negative).
    pub profit_percent: f64,
}

impl DailyStats {
    pub fn completed(&self) -> u32 {
        self.wins + self.losses
    }

    /// Wins as a percentage of resolved signals, 0 when none resolved.
    pub fn win_rate(&self) -> f64 {
        match self.completed() {
            0 => 0.0,
            n => self.wins as f64 / n as f64 * 100.0,
        }
    }

    pub fn average_profit(&self) -> f64 {
        match self.completed() {
            0 => 0.0,
            n => self.profit_percent / n as f64,
        }
    }
}

/// Events published by the watchlist to the notification sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalEvent {
    NewSignal {
        id: SignalId,
        symbol: String,
        direction: Direction,
        entry: f64,
        stop_loss: f64,
        targets: [f64; 4],
        sequence_today: u32,
        reward_ratio: f64,
    },
    /// Emitted for wins only; stop-outs are silent.
    SignalResolved {
        id: SignalId,
        symbol: String,
        outcome: Outcome,
        profit_percent: f64,
        sequence_today: u32,
        targets_reached: usize,
    },
    DailySummary {
        total_signals: u32,
        wins: u32,
        losses: u32,
        profit_percent: f64,
    },
}
