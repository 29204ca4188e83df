//! Trade simulator: ATR-sized stop-loss / take-profit walked forward bar by bar

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{BacktestSettings, IndicatorSettings};
use crate::indicators::atr;
use crate::types::{Candle, ExitReason, Signal, Trade};

/// Per-trade cost model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeCosts {
    /// Fee per fill; charged twice
    pub trading_fee: f64,
    pub slippage: f64,
}

impl TradeCosts {
    pub fn from_settings(settings: &BacktestSettings) -> Self {
        Self {
            trading_fee: settings.trading_fee,
            slippage: settings.slippage,
        }
    }

    /// Flat round-trip deduction for a position opened at `entry_price`
    pub fn deduction(&self, entry_price: f64) -> f64 {
        entry_price * self.trading_fee * 2.0 + entry_price * self.slippage
    }
}

/// Simulate one trade.
///
/// `window` starts at the entry bar; ATR is measured over the same window.
/// A missing or non-positive ATR yields an `InvalidAtr` record with zero profit.
pub fn simulate(
    signal: Signal,
    window: &[Candle],
    indicators: &IndicatorSettings,
    costs: &TradeCosts,
) -> Option<Trade> {
    let entry = window.first()?;
    match atr(window, indicators.atr_period) {
        Some(value) if value > 0.0 => simulate_with_atr(
            signal,
            window,
            value,
            indicators.risk_reward_ratio,
            costs,
        ),
        other => {
            debug!(entry = entry.close, atr = ?other, "ATR unavailable, trade skipped");
            Some(Trade {
                signal,
                entry_price: entry.close,
                exit_price: entry.close,
                stop_loss: None,
                take_profit: None,
                profit: 0.0,
                duration: 0,
                exit_reason: ExitReason::InvalidAtr,
                timestamp: entry.timestamp,
            })
        }
    }
}

/// Walk the window with a known ATR.
///
/// Stop-loss is tested before take-profit on each close; a hit exits at the
/// level price. Without a hit the trade closes at the last close. `None` for
/// an empty window.
pub fn simulate_with_atr(
    signal: Signal,
    window: &[Candle],
    atr: f64,
    risk_reward_ratio: f64,
    costs: &TradeCosts,
) -> Option<Trade> {
    let (entry, rest) = window.split_first()?;
    let entry_price = entry.close;
    let direction = if signal == Signal::Short { -1.0 } else { 1.0 };

    let stop_loss = entry_price - direction * atr;
    let take_profit = entry_price + direction * atr * risk_reward_ratio;

    let mut duration = 0;
    let mut exit = None;
    for candle in rest {
        duration += 1;
        let price = candle.close;
        let (hit_stop, hit_target) = if direction > 0.0 {
            (price <= stop_loss, price >= take_profit)
        } else {
            (price >= stop_loss, price <= take_profit)
        };
        if hit_stop {
            exit = Some((stop_loss, ExitReason::StopLoss));
            break;
        }
        if hit_target {
            exit = Some((take_profit, ExitReason::TakeProfit));
            break;
        }
    }

    let (exit_price, exit_reason) = exit.unwrap_or_else(|| {
        let last = window.last().map(|c| c.close).unwrap_or(entry_price);
        (last, ExitReason::Manual)
    });

    let profit = direction * (exit_price - entry_price) - costs.deduction(entry_price);

    debug!(
        signal = %signal,
        entry = entry_price,
        exit = exit_price,
        reason = exit_reason.as_str(),
        profit,
        "Trade closed"
    );

    Some(Trade {
        signal,
        entry_price,
        exit_price,
        stop_loss: Some(stop_loss),
        take_profit: Some(take_profit),
        profit,
        duration,
        exit_reason,
        timestamp: entry.timestamp,
    })
}
