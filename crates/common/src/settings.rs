use chrono::{Duration, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Wall-clock time of day, written as `{ hour = 23, minute = 0 }` in TOML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClockTime {
    pub hour: u32,
    pub minute: u32,
}

impl ClockTime {
    pub const fn new(hour: u32, minute: u32) -> Self {
        Self { hour, minute }
    }

    pub fn of<T: Timelike>(t: &T) -> Self {
        Self::new(t.hour(), t.minute())
    }

    pub fn to_naive(self) -> Option<NaiveTime> {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0)
    }
}

impl std::fmt::Display for ClockTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// Signal parameters file (TOML).
///
/// Example `config/signals.toml`:
/// ```toml
/// symbols = ["BTCUSDT", "ETHUSDT"]
/// interval = "15m"
/// scan_minutes = [1, 16, 31, 46]
/// active_from = { hour = 5, minute = 0 }
/// active_until = { hour = 21, minute = 31 }
/// rollover = { hour = 23, minute = 0 }
/// cooldown_minutes = 120
///
/// [rules]
/// rsi_oversold = 35.0
/// rsi_overbought = 65.0
/// stop_multiple = 1.5
/// target_multiples = [1.0, 1.5, 2.0, 3.0]
/// ```
/// Every field is optional and falls back to the defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub symbols: Vec<String>,
    /// Candle interval passed to the data source, e.g. "15m".
    pub interval: String,
    /// Candles requested per scan.
    pub candle_limit: usize,
    /// Minute offsets within each hour at which a scan runs.
    pub scan_minutes: Vec<u32>,
    /// Scans only run between these times (inclusive), local time.
    pub active_from: ClockTime,
    pub active_until: ClockTime,
    /// Open signals are re-priced whenever `minute % monitor_every_minutes == 0`.
    pub monitor_every_minutes: u32,
    /// Daily summary and stats reset.
    pub rollover: ClockTime,
    /// Offset of the operator's wall clock from UTC.
    pub utc_offset_hours: i32,
    pub cooldown_minutes: i64,
    pub rules: SignalRules,
}

/// Parameters of the scoring function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalRules {
    pub min_candles: usize,
    pub rsi_period: usize,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub ema_fast: usize,
    pub ema_slow: usize,
    /// Candles in the high-low range average used as volatility.
    pub volatility_window: usize,
    /// Stop distance in multiples of volatility.
    pub stop_multiple: f64,
    /// Target distances in multiples of risk, nearest first.
    pub target_multiples: [f64; 4],
}

impl Default for SignalRules {
    fn default() -> Self {
        Self {
            min_candles: 50,
            rsi_period: 14,
            rsi_oversold: 35.0,
            rsi_overbought: 65.0,
            ema_fast: 50,
            ema_slow: 200,
            volatility_window: 14,
            stop_multiple: 1.5,
            target_multiples: [1.0, 1.5, 2.0, 3.0],
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            symbols: [
                "BTCUSDT", "ETHUSDT", "BNBUSDT", "SOLUSDT", "XRPUSDT", "ADAUSDT", "DOGEUSDT",
                "TRXUSDT", "MATICUSDT", "LTCUSDT",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            interval: "15m".to_string(),
            candle_limit: 100,
            scan_minutes: vec![1, 16, 31, 46],
            active_from: ClockTime::new(5, 0),
            active_until: ClockTime::new(21, 31),
            monitor_every_minutes: 5,
            rollover: ClockTime::new(23, 0),
            utc_offset_hours: 0,
            cooldown_minutes: 120,
            rules: SignalRules::default(),
        }
    }
}

impl Settings {
    /// Load and validate a TOML settings file.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read '{path}': {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: Settings =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::minutes(self.cooldown_minutes)
    }

    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            return Err(Error::Config("symbols must not be empty".into()));
        }
        if let Some(m) = self.scan_minutes.iter().find(|&&m| m > 59) {
            return Err(Error::Config(format!("scan minute {m} out of range")));
        }
        if self.monitor_every_minutes == 0 || self.monitor_every_minutes > 60 {
            return Err(Error::Config("monitor_every_minutes must be in 1..=60".into()));
        }
        for (name, t) in [
            ("active_from", self.active_from),
            ("active_until", self.active_until),
            ("rollover", self.rollover),
        ] {
            if t.to_naive().is_none() {
                return Err(Error::Config(format!("{name} {t} is not a valid time")));
            }
        }
        if !(-12..=14).contains(&self.utc_offset_hours) {
            return Err(Error::Config("utc_offset_hours must be in -12..=14".into()));
        }
        if self.cooldown_minutes < 0 {
            return Err(Error::Config("cooldown_minutes must not be negative".into()));
        }
        self.rules.validate()
    }
}

impl SignalRules {
    pub fn validate(&self) -> Result<()> {
        if self.rsi_period < 2 {
            return Err(Error::Config("rsi_period must be >= 2".into()));
        }
        if self.rsi_oversold >= self.rsi_overbought {
            return Err(Error::Config("rsi_oversold must be below rsi_overbought".into()));
        }
        if self.ema_fast == 0 || self.ema_slow == 0 || self.volatility_window == 0 {
            return Err(Error::Config("indicator periods must be positive".into()));
        }
        if self.min_candles < self.rsi_period + 1 || self.min_candles < self.volatility_window {
            return Err(Error::Config(
                "min_candles must cover the RSI and volatility windows".into(),
            ));
        }
        if self.stop_multiple.is_nan() || self.stop_multiple <= 0.0 {
            return Err(Error::Config("stop_multiple must be positive".into()));
        }
        let mut prev = 0.0;
        for &m in &self.target_multiples {
            if m.is_nan() || m <= prev {
                return Err(Error::Config(
                    "target_multiples must be positive and strictly increasing".into(),
                ));
            }
            prev = m;
        }
        Ok(())
    }
}
