use tracing::debug;

use common::{
    Candle, Direction, Error, IndicatorSnapshot, Result, SignalPlan, SignalRules, SCORE_ELIGIBLE,
    SCORE_NEUTRAL,
};

use crate::indicators::IndicatorEngine;

/// Turns a candle series into a scored trade plan.
///
/// Trend filter is the slow EMA, trigger is RSI at an extreme against the
/// trend (pullback entries). Stop sits `stop_multiple` average ranges behind
/// entry; targets are fixed multiples of that risk.
#[derive(Debug, Clone)]
pub struct SignalGenerator {
    rules: SignalRules,
    indicators: IndicatorEngine,
}

impl SignalGenerator {
    pub fn new(rules: SignalRules) -> Self {
        let indicators = IndicatorEngine::new(rules.rsi_period, rules.ema_fast, rules.ema_slow);
        Self { rules, indicators }
    }

    pub fn rules(&self) -> &SignalRules {
        &self.rules
    }

    /// Score `candles` (oldest first) for `symbol`.
    ///
    /// Errors are per-symbol and non-fatal: `InsufficientData` for short
    /// series, `InvalidPlan` when the volatility proxy yields no risk.
    pub fn evaluate(&self, symbol: &str, candles: &[Candle]) -> Result<SignalPlan> {
        if candles.len() < self.rules.min_candles {
            return Err(Error::InsufficientData {
                needed: self.rules.min_candles,
                got: candles.len(),
            });
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let snapshot = self.indicators.snapshot(&closes)?;
        let price = closes[closes.len() - 1];

        let Some(direction) = self.direction(price, &snapshot) else {
            debug!(symbol, rsi = snapshot.rsi, ema200 = snapshot.ema200, "No setup");
            return Ok(SignalPlan {
                indicators: Some(snapshot),
                ..SignalPlan::neutral(symbol, price, SCORE_NEUTRAL)
            });
        };

        let volatility = self.volatility(candles);
        let plan = self.build_plan(symbol, direction, price, volatility, snapshot);
        if !plan.has_valid_levels() {
            return Err(Error::InvalidPlan(format!(
                "{symbol} {direction}: volatility {volatility} gives risk {}",
                plan.risk()
            )));
        }

        debug!(
            symbol,
            %direction,
            entry = plan.entry,
            stop = plan.stop_loss,
            rsi = snapshot.rsi,
            low_confidence_trend = !snapshot.ema200_full_window,
            "Setup found"
        );
        Ok(plan)
    }

    fn direction(&self, price: f64, snap: &IndicatorSnapshot) -> Option<Direction> {
        if price > snap.ema200 && snap.rsi < self.rules.rsi_oversold {
            Some(Direction::Long)
        } else if price < snap.ema200 && snap.rsi > self.rules.rsi_overbought {
            Some(Direction::Short)
        } else {
            None
        }
    }

    /// Mean high-low range of the last `volatility_window` candles.
    fn volatility(&self, candles: &[Candle]) -> f64 {
        let window = self.rules.volatility_window.min(candles.len());
        let recent = &candles[candles.len() - window..];
        recent.iter().map(Candle::range).sum::<f64>() / self.rules.volatility_window as f64
    }

    fn build_plan(
        &self,
        symbol: &str,
        direction: Direction,
        entry: f64,
        volatility: f64,
        snapshot: IndicatorSnapshot,
    ) -> SignalPlan {
        let s = direction.sign();
        let stop_loss = entry - s * self.rules.stop_multiple * volatility;
        let risk = (entry - stop_loss).abs();
        let targets = self.rules.target_multiples.map(|m| entry + s * risk * m);

        SignalPlan {
            symbol: symbol.to_string(),
            direction: Some(direction),
            score: SCORE_ELIGIBLE,
            entry,
            stop_loss,
            targets,
            current_price: entry,
            indicators: Some(snapshot),
        }
    }
}

impl Default for SignalGenerator {
    fn default() -> Self {
        Self::new(SignalRules::default())
    }
}
