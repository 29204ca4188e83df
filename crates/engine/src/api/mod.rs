//! Market-data and notification clients

pub mod binance;
pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::MarketSettings;
use crate::types::Candle;

pub use binance::BinanceClient;
pub use telegram::{notifier_from_env, Notifier, NullNotifier, TelegramNotifier};

/// Source of raw (un-enriched) candles for the analysis cycle
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn candles(&self, market: &MarketSettings) -> Result<Vec<Candle>>;
    async fn mark_price(&self, symbol: &str) -> Result<f64>;
}

#[async_trait]
impl MarketData for BinanceClient {
    async fn candles(&self, market: &MarketSettings) -> Result<Vec<Candle>> {
        self.get_candles(&market.symbol, &market.interval, market.limit).await
    }

    async fn mark_price(&self, symbol: &str) -> Result<f64> {
        self.get_mark_price(symbol).await
    }
}
