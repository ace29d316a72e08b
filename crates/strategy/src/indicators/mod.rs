pub mod ema;
pub mod rsi;

pub use ema::{ema, Ema, EmaValue};
pub use rsi::RsiIndicator;

use common::{Error, IndicatorSnapshot, Result};

/// Computes RSI and the fast/slow EMAs at the last sample of a close series.
#[derive(Debug, Clone)]
pub struct IndicatorEngine {
    rsi: RsiIndicator,
    ema_fast: Ema,
    ema_slow: Ema,
}

impl IndicatorEngine {
    pub fn new(rsi_period: usize, ema_fast: usize, ema_slow: usize) -> Self {
        Self {
            rsi: RsiIndicator::new(rsi_period),
            ema_fast: Ema::new(ema_fast),
            ema_slow: Ema::new(ema_slow),
        }
    }

    /// Fails with `InsufficientData` when RSI is undefined for `closes`.
    pub fn snapshot(&self, closes: &[f64]) -> Result<IndicatorSnapshot> {
        let insufficient = || Error::InsufficientData {
            needed: self.rsi.min_samples(),
            got: closes.len(),
        };
        let rsi = self.rsi.compute(closes).ok_or_else(insufficient)?;
        let fast = self.ema_fast.compute(closes).ok_or_else(insufficient)?;
        let slow = self.ema_slow.compute(closes).ok_or_else(insufficient)?;

        Ok(IndicatorSnapshot {
            rsi,
            ema50: fast.value,
            ema200: slow.value,
            ema200_full_window: slow.full_window,
        })
    }
}

impl Default for IndicatorEngine {
    fn default() -> Self {
        Self::new(14, 50, 200)
    }
}
