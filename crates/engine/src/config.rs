//! Engine configuration: indicator lookbacks, backtest costs and market selection

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Indicator lookbacks and voter thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorSettings {
    pub rsi_period: usize,
    /// Minimum two-point RSI angle (degrees) for a long reversal
    pub rsi_angle_threshold_long: f64,
    /// Maximum two-point RSI angle (degrees) for a short reversal
    pub rsi_angle_threshold_short: f64,
    pub atr_period: usize,
    /// Take-profit distance in ATR multiples (stop is always 1 ATR)
    pub risk_reward_ratio: f64,
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
    /// Short, medium and long SMA lookbacks
    pub sma_periods: [usize; 3],
    pub bb_period: usize,
    pub bb_multiplier: f64,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            rsi_angle_threshold_long: 10.0,
            rsi_angle_threshold_short: -10.0,
            atr_period: 14,
            risk_reward_ratio: 2.0,
            rsi_overbought: 70.0,
            rsi_oversold: 30.0,
            sma_periods: [20, 50, 200],
            bb_period: 20,
            bb_multiplier: 2.0,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
        }
    }
}

impl IndicatorSettings {
    /// First index at which the MACD signal line is defined
    pub fn macd_warmup(&self) -> usize {
        (self.macd_slow + self.macd_signal).saturating_sub(2)
    }
}

/// A named evaluation window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationPeriod {
    pub name: String,
    pub days: u32,
}

impl EvaluationPeriod {
    pub fn new(name: &str, days: u32) -> Self {
        Self {
            name: name.to_string(),
            days,
        }
    }
}

/// Backtest costs, capital and the evaluation schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestSettings {
    /// Evaluated in order; names must be unique
    pub periods: Vec<EvaluationPeriod>,
    pub risk_per_trade: f64,
    /// Default voter threshold
    pub confidence_threshold: f64,
    /// Fee per fill, as a fraction of entry price
    pub trading_fee: f64,
    /// Slippage per trade, as a fraction of entry price
    pub slippage: f64,
    pub initial_capital: f64,
    /// Bars prepended to each training/validation slice
    pub warmup_candles: usize,
    pub monte_carlo_iterations: usize,
    /// Up/down ratio needed by the trend recommendation.
    ///
    /// Defaults to 0.65. The up and down ratios sum to 1, so any value at or
    /// below 0.5 always picks a direction and the recommendation is never
    /// neutral (see "Recommendation threshold" in DESIGN.md).
    pub recommendation_threshold: f64,
}

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            periods: vec![
                EvaluationPeriod::new("short", 30),
                EvaluationPeriod::new("medium", 90),
                EvaluationPeriod::new("long", 180),
            ],
            risk_per_trade: 0.01,
            confidence_threshold: 0.4,
            trading_fee: 0.0004,
            slippage: 0.0005,
            initial_capital: 1000.0,
            warmup_candles: 201,
            monte_carlo_iterations: 500,
            recommendation_threshold: 0.65,
        }
    }
}

/// Which market to pull candles for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketSettings {
    pub symbol: String,
    pub interval: String,
    pub limit: u32,
}

impl Default for MarketSettings {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            interval: "1h".to_string(),
            limit: 1000,
        }
    }
}

/// Everything the analysis cycle needs, loadable from a JSON file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub indicators: IndicatorSettings,
    pub backtest: BacktestSettings,
    pub market: MarketSettings,
    /// Classifier predictions below this confidence count as neutral
    pub ml_confidence_threshold: f64,
    pub poll_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            indicators: IndicatorSettings::default(),
            backtest: BacktestSettings::default(),
            market: MarketSettings::default(),
            ml_confidence_threshold: 0.65,
            poll_interval_secs: 3600,
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file; missing keys keep their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        let ind = &self.indicators;
        if ind.rsi_period == 0 || ind.atr_period == 0 || ind.bb_period == 0 {
            anyhow::bail!("indicator periods must be positive");
        }
        if ind.sma_periods.iter().any(|&p| p == 0) {
            anyhow::bail!("SMA periods must be positive");
        }
        if ind.macd_fast == 0 || ind.macd_fast >= ind.macd_slow || ind.macd_signal == 0 {
            anyhow::bail!(
                "invalid MACD periods {}/{}/{}",
                ind.macd_fast,
                ind.macd_slow,
                ind.macd_signal
            );
        }
        let mut names: Vec<&str> = self.backtest.periods.iter().map(|p| p.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.backtest.periods.len() {
            anyhow::bail!("evaluation period names must be unique");
        }
        if self.backtest.initial_capital <= 0.0 {
            anyhow::bail!("initial capital must be positive");
        }
        Ok(())
    }
}
