//! Binance public API client for market data (no authentication required)

use anyhow::Result;
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::types::Candle;

const DEFAULT_BASE_URL: &str = "https://api.binance.com";
const MAX_KLINES_PER_REQUEST: u32 = 1000;

/// Binance public market data client
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
}

/// Raw kline data from Binance API (array of arrays)
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct RawKline(
    i64,    // 0: Open time
    String, // 1: Open
    String, // 2: High
    String, // 3: Low
    String, // 4: Close
    String, // 5: Volume
    i64,    // 6: Close time
    String, // 7: Quote asset volume
    u64,    // 8: Number of trades
    String, // 9: Taker buy base
    String, // 10: Taker buy quote
    String, // 11: Ignore
);

/// Binance ticker price response
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct TickerPrice {
    symbol: String,
    price: String,
}

impl Default for BinanceClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Exact decimal parse, then the nearest f64
fn parse_price(raw: &str) -> Option<f64> {
    Decimal::from_str(raw).ok()?.to_f64()
}

/// Convert one kline row; rows with unparseable or negative numbers are dropped
fn candle_from_raw(raw: &RawKline) -> Option<Candle> {
    let open = parse_price(&raw.1)?;
    let high = parse_price(&raw.2)?;
    let low = parse_price(&raw.3)?;
    let close = parse_price(&raw.4)?;
    let volume = parse_price(&raw.5)?;
    if [open, high, low, close, volume].iter().any(|v| *v < 0.0) {
        return None;
    }
    Some(Candle::new(raw.0 / 1000, open, high, low, close, volume))
}

fn candles_from_raw(raw_klines: &[RawKline]) -> Vec<Candle> {
    let candles: Vec<Candle> = raw_klines.iter().filter_map(candle_from_raw).collect();
    if candles.len() < raw_klines.len() {
        warn!(
            dropped = raw_klines.len() - candles.len(),
            "Dropped malformed klines"
        );
    }
    candles
}

impl BinanceClient {
    /// Create a new Binance client with default base URL
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fetch the most recent `limit` candles, oldest first, timestamps in seconds
    pub async fn get_candles(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Candle>> {
        let limit = limit.clamp(1, MAX_KLINES_PER_REQUEST);
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url, symbol, interval, limit
        );

        debug!(symbol, interval, limit, "Fetching klines from Binance");

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Binance API error {}: {}", status, body);
        }

        let raw_klines: Vec<RawKline> = response.json().await?;
        let candles = candles_from_raw(&raw_klines);

        debug!(count = candles.len(), "Fetched klines");
        Ok(candles)
    }

    /// Current price for a symbol, used as the mark price of the latest bar
    pub async fn get_mark_price(&self, symbol: &str) -> Result<f64> {
        let url = format!("{}/api/v3/ticker/price?symbol={}", self.base_url, symbol);

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Binance API error {}: {}", status, body);
        }

        let ticker: TickerPrice = response.json().await?;
        let price = Decimal::from_str(&ticker.price)?;
        price
            .to_f64()
            .ok_or_else(|| anyhow::anyhow!("Price out of range: {}", ticker.price))
    }
}
