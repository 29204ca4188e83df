//! Metrics aggregation over a finished trade list
//!
//! All rates are fractions; display code multiplies by 100.

use crate::types::{BacktestResult, ExitReason, Trade};

/// Trading days used to annualize the per-trade Sharpe ratio
const ANNUALIZATION_DAYS: f64 = 365.0;

/// Fill the derived fields of `result` from its trades and equity bookkeeping
pub fn aggregate(mut result: BacktestResult) -> BacktestResult {
    let trades = &result.trades;
    let total = trades.len();
    result.total_trades = total as u32;

    result.drawdown_rate = if result.peak > 0.0 {
        (result.max_drawdown / result.peak).clamp(0.0, 1.0)
    } else {
        0.0
    };

    if total == 0 {
        return result;
    }
    let n = total as f64;

    let profits: Vec<f64> = trades.iter().map(|t| t.profit).collect();
    let winners: Vec<f64> = profits.iter().copied().filter(|&p| p >= 0.0).collect();
    let losers: Vec<f64> = profits.iter().copied().filter(|&p| p < 0.0).collect();

    let gross_profit: f64 = winners.iter().sum();
    let gross_loss: f64 = losers.iter().map(|p| p.abs()).sum();

    result.win_rate = winners.len() as f64 / n;
    result.sharpe_ratio = sharpe_ratio(&profits);
    result.profit_factor = if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else {
        0.0
    };
    result.risk_reward_ratio = risk_reward_ratio(&profits);

    result.stop_loss_rate = exit_rate(trades, ExitReason::StopLoss);
    result.take_profit_rate = exit_rate(trades, ExitReason::TakeProfit);
    result.manual_exit_rate = exit_rate(trades, ExitReason::Manual);

    result.avg_trade_duration = trades.iter().map(|t| t.duration as f64).sum::<f64>() / n;
    result.avg_profit_per_trade = result.net_profit() / n;
    result.best_trade = profits.iter().copied().fold(f64::MIN, f64::max);
    result.worst_trade = profits.iter().copied().fold(f64::MAX, f64::min);

    result
}

/// Mean over sample standard deviation, annualized.
///
/// Zero for fewer than two trades or a constant profit series.
pub fn sharpe_ratio(profits: &[f64]) -> f64 {
    if profits.len() < 2 {
        return 0.0;
    }
    let n = profits.len() as f64;
    let mean = profits.iter().sum::<f64>() / n;
    let variance = profits.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std_dev = variance.sqrt();
    if std_dev < 1e-12 {
        return 0.0;
    }
    mean / std_dev * ANNUALIZATION_DAYS.sqrt()
}

/// Average gain over average loss, ignoring break-even trades.
///
/// Zero unless there is at least one gain and one loss.
pub fn risk_reward_ratio(profits: &[f64]) -> f64 {
    let gains: Vec<f64> = profits.iter().copied().filter(|&p| p > 0.0).collect();
    let losses: Vec<f64> = profits.iter().copied().filter(|&p| p < 0.0).collect();
    if gains.is_empty() || losses.is_empty() {
        return 0.0;
    }
    let avg_gain = gains.iter().sum::<f64>() / gains.len() as f64;
    let avg_loss = losses.iter().map(|p| p.abs()).sum::<f64>() / losses.len() as f64;
    avg_gain / avg_loss
}

fn exit_rate(trades: &[Trade], reason: ExitReason) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    trades.iter().filter(|t| t.exit_reason == reason).count() as f64 / trades.len() as f64
}
