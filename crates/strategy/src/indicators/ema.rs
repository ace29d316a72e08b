/// Exponential Moving Average of `data` with the given period.
///
/// Seeded with the simple average of the first `period` values, then smoothed
/// with `k = 2 / (period + 1)` over the rest of the series. When `data` is
/// shorter than `period` the seed covers the whole series, so the result is a
/// plain average. Use [`Ema::compute`] to learn whether that happened.
pub fn ema(data: &[f64], period: usize) -> Option<f64> {
    Ema::new(period).compute(data).map(|v| v.value)
}

/// Final EMA value together with whether the full seed window was available.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmaValue {
    pub value: f64,
    pub full_window: bool,
}

#[derive(Debug, Clone)]
pub struct Ema {
    pub period: usize,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "EMA period must be >= 1");
        Self { period }
    }

    /// Returns `None` only for an empty series.
    pub fn compute(&self, data: &[f64]) -> Option<EmaValue> {
        if data.is_empty() {
            return None;
        }
        let k = 2.0 / (self.period as f64 + 1.0);

        // Seed with SMA of first `period` values
        let seed_len = self.period.min(data.len());
        let mut value: f64 = data[..seed_len].iter().sum::<f64>() / seed_len as f64;

        for &price in &data[seed_len..] {
            value = price * k + value * (1.0 - k);
        }

        Some(EmaValue {
            value,
            full_window: data.len() >= self.period,
        })
    }
}
