//! Types shared by the indicator pass, the backtester and the optimizer

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single candlestick (OHLCV) with the indicator readings attached to it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Open time in seconds
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Exchange mark price, when the market-data source provided one
    #[serde(default)]
    pub mark_price: Option<f64>,
    /// Derived readings, filled once by `indicators::enrich`
    #[serde(default)]
    pub indicators: Indicators,
}

impl Candle {
    pub fn new(timestamp: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            mark_price: None,
            indicators: Indicators::default(),
        }
    }

    /// Mark price if known, otherwise the close
    pub fn reference_price(&self) -> f64 {
        self.mark_price.unwrap_or(self.close)
    }
}

// ta's bar traits, so candles can be fed straight into `ta` indicators
impl ta::Open for Candle {
    fn open(&self) -> f64 {
        self.open
    }
}

impl ta::High for Candle {
    fn high(&self) -> f64 {
        self.high
    }
}

impl ta::Low for Candle {
    fn low(&self) -> f64 {
        self.low
    }
}

impl ta::Close for Candle {
    fn close(&self) -> f64 {
        self.close
    }
}

impl ta::Volume for Candle {
    fn volume(&self) -> f64 {
        self.volume
    }
}

/// Indicator readings for one bar.
///
/// A field is `None` until the bar index reaches that indicator's lookback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Indicators {
    pub rsi: Option<f64>,
    /// Short SMA (20 bars by default)
    pub sma: Option<f64>,
    pub sma50: Option<f64>,
    pub sma200: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,
    pub macd_line: Option<f64>,
    pub signal_line: Option<f64>,
    pub histogram: Option<f64>,
    pub obv: Option<f64>,
    pub fibonacci: Option<FibonacciLevels>,
}

/// Retracement levels measured down from the series high
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FibonacciLevels {
    pub level_236: f64,
    pub level_382: f64,
    pub level_500: f64,
    pub level_618: f64,
    pub level_786: f64,
}

/// Directional decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Long,
    Short,
    Neutral,
}

impl Signal {
    pub fn is_neutral(self) -> bool {
        matches!(self, Signal::Neutral)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Signal::Long => "long",
            Signal::Short => "short",
            Signal::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Signal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "long" | "buy" => Ok(Signal::Long),
            "short" | "sell" => Ok(Signal::Short),
            "neutral" | "hold" => Ok(Signal::Neutral),
            other => Err(format!("unknown signal '{other}'")),
        }
    }
}

/// Output of the signal voter for one bar
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalDecision {
    pub signal: Signal,
    /// Bollinger-based stop hint, set for non-neutral decisions
    pub stop_loss: Option<f64>,
    /// Bollinger-based target hint, set for non-neutral decisions
    pub take_profit: Option<f64>,
    pub long_score: f64,
    pub short_score: f64,
}

impl SignalDecision {
    pub fn neutral() -> Self {
        Self {
            signal: Signal::Neutral,
            stop_loss: None,
            take_profit: None,
            long_score: 0.0,
            short_score: 0.0,
        }
    }
}

/// Why a simulated trade closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    /// Window ran out before either level was hit
    Manual,
    /// No position taken: ATR was missing or not positive
    InvalidAtr,
}

impl ExitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::Manual => "manual",
            ExitReason::InvalidAtr => "invalid_atr",
        }
    }
}

/// A single simulated trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub signal: Signal,
    pub entry_price: f64,
    pub exit_price: f64,
    /// `None` when the trade aborted on an invalid ATR
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    /// Price delta net of fees and slippage
    pub profit: f64,
    /// Bars walked after entry
    pub duration: usize,
    pub exit_reason: ExitReason,
    /// Entry bar time in seconds
    pub timestamp: i64,
}

/// Outcome of one backtest run, or of a merged training/validation pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub initial_capital: f64,
    pub final_capital: f64,
    pub wins: u32,
    pub losses: u32,
    pub total_trades: u32,
    /// Capital after each trade, in trade order
    pub equity_curve: Vec<f64>,
    pub trades: Vec<Trade>,
    pub peak: f64,
    /// Largest peak-to-trough decline in capital units
    pub max_drawdown: f64,
    /// `max_drawdown / peak`, a fraction in [0, 1]
    pub drawdown_rate: f64,
    pub win_rate: f64,
    pub sharpe_ratio: f64,
    pub profit_factor: f64,
    pub risk_reward_ratio: f64,
    pub avg_trade_duration: f64,
    pub avg_profit_per_trade: f64,
    pub stop_loss_rate: f64,
    pub take_profit_rate: f64,
    pub manual_exit_rate: f64,
    pub best_trade: f64,
    pub worst_trade: f64,
    /// Parameters tuned on the training split (orchestrator output only)
    #[serde(default)]
    pub optimized_params: Option<ParameterSet>,
    /// Period length in days (orchestrator output only)
    #[serde(default)]
    pub days: Option<u32>,
}

impl BacktestResult {
    /// A run with no trades yet
    pub fn empty(initial_capital: f64) -> Self {
        Self {
            initial_capital,
            final_capital: initial_capital,
            wins: 0,
            losses: 0,
            total_trades: 0,
            equity_curve: Vec::new(),
            trades: Vec::new(),
            peak: initial_capital,
            max_drawdown: 0.0,
            drawdown_rate: 0.0,
            win_rate: 0.0,
            sharpe_ratio: 0.0,
            profit_factor: 0.0,
            risk_reward_ratio: 0.0,
            avg_trade_duration: 0.0,
            avg_profit_per_trade: 0.0,
            stop_loss_rate: 0.0,
            take_profit_rate: 0.0,
            manual_exit_rate: 0.0,
            best_trade: 0.0,
            worst_trade: 0.0,
            optimized_params: None,
            days: None,
        }
    }

    pub fn net_profit(&self) -> f64 {
        self.final_capital - self.initial_capital
    }
}

/// Strategy knobs searched by the optimizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
    pub sma_short: usize,
    pub sma_long: usize,
    pub bb_period: usize,
    pub bb_multiplier: f64,
    pub confidence_threshold: f64,
    /// Score of the run that produced this set, when it came from the optimizer
    #[serde(default)]
    pub score: Option<ParameterScore>,
}

impl Default for ParameterSet {
    fn default() -> Self {
        Self {
            rsi_overbought: 70.0,
            rsi_oversold: 30.0,
            sma_short: 50,
            sma_long: 200,
            bb_period: 20,
            bb_multiplier: 2.0,
            confidence_threshold: 0.4,
            score: None,
        }
    }
}

impl ParameterSet {
    /// Performance score, 0 when unscored
    pub fn performance(&self) -> f64 {
        self.score.map(|s| s.performance).unwrap_or(0.0)
    }
}

/// Provenance of an optimized parameter set
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterScore {
    /// `win_rate * (1 - drawdown_rate) * sharpe_ratio`
    pub performance: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
}
