use async_trait::async_trait;

use crate::{Candle, Result, SignalEvent};

/// Read-only source of market data.
///
/// `BinanceMarketData` in `crates/engine` implements this against the futures
/// REST API. Implementations return `Error::DataSourceUnavailable` on any
/// transport or API failure and never panic; the scheduler skips the symbol
/// for the current cycle.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Closed and in-progress candles for `symbol`, oldest first.
    async fn candles(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>>;

    /// Latest traded price for `symbol`.
    async fn latest_price(&self, symbol: &str) -> Result<f64>;
}

/// Delivers watchlist events to end users.
///
/// Retry and rate limiting are the sink's concern. The watchlist never waits
/// on delivery.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, event: &SignalEvent) -> Result<()>;
}
