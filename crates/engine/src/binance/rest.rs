use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use common::{Candle, Error, MarketDataSource, Result};

pub const DEFAULT_BASE_URL: &str = "https://fapi.binance.com";

/// Public market data from the Binance USDⓈ-M futures REST API.
/// No keys are needed; every request is bounded by `timeout`.
pub struct BinanceMarketData {
    base_url: String,
    http: Client,
}

impl BinanceMarketData {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<String> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| Error::DataSourceUnavailable(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::DataSourceUnavailable(e.to_string()))?;

        if !status.is_success() {
            return Err(Error::DataSourceUnavailable(format!("HTTP {status}: {body}")));
        }
        Ok(body)
    }
}

#[async_trait]
impl MarketDataSource for BinanceMarketData {
    async fn candles(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>> {
        debug!(symbol, interval, limit, "Fetching klines");
        let body = self
            .get(
                "/fapi/v1/klines",
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", interval.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        let candles = parse_klines(&body)?;
        if candles.is_empty() {
            return Err(Error::DataSourceUnavailable(format!("{symbol}: empty kline series")));
        }
        Ok(candles)
    }

    async fn latest_price(&self, symbol: &str) -> Result<f64> {
        let body = self
            .get("/fapi/v1/ticker/price", &[("symbol", symbol.to_string())])
            .await?;
        parse_ticker(&body)
    }
}

/// Klines arrive as arrays: `[openTime, "open", "high", "low", "close", "volume", closeTime, ...]`.
pub(crate) fn parse_klines(body: &str) -> Result<Vec<Candle>> {
    let rows: Vec<Vec<Value>> = serde_json::from_str(body)
        .map_err(|e| Error::DataSourceUnavailable(format!("malformed klines: {e}")))?;

    rows.iter()
        .map(|row| {
            Ok(Candle {
                open_time: open_time(row.first())?,
                open: number(row.get(1), "open")?,
                high: number(row.get(2), "high")?,
                low: number(row.get(3), "low")?,
                close: number(row.get(4), "close")?,
                volume: number(row.get(5), "volume")?,
            })
        })
        .collect()
}

pub(crate) fn parse_ticker(body: &str) -> Result<f64> {
    let ticker: PriceTicker = serde_json::from_str(body)
        .map_err(|e| Error::DataSourceUnavailable(format!("malformed ticker: {e}")))?;
    let price = ticker
        .price
        .parse::<f64>()
        .map_err(|e| Error::DataSourceUnavailable(format!("bad price '{}': {e}", ticker.price)))?;
    if !price.is_finite() || price <= 0.0 {
        return Err(Error::DataSourceUnavailable(format!("non-positive price {price}")));
    }
    Ok(price)
}

fn number(value: Option<&Value>, field: &str) -> Result<f64> {
    let parsed = match value {
        Some(Value::String(s)) => s.parse::<f64>().ok(),
        Some(Value::Number(n)) => n.as_f64(),
        _ => None,
    };
    parsed.ok_or_else(|| Error::DataSourceUnavailable(format!("kline field '{field}' missing")))
}

fn open_time(value: Option<&Value>) -> Result<DateTime<Utc>> {
    value
        .and_then(Value::as_i64)
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .ok_or_else(|| Error::DataSourceUnavailable("kline open time missing".into()))
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct PriceTicker {
    price: String,
}
