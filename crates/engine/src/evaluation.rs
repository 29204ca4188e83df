//! Train/validation orchestration
//!
//! For each configured period the most recent `70% of days + warm-up` bars are
//! backtested with default parameters and then optimized; the tuned set is
//! re-run on the most recent `30% of days + warm-up` bars. The validation slice
//! overlaps the training tail by the warm-up length, but warm-up bars never
//! trade. The two results are merged per period, and the period with the best
//! Sharpe ratio supplies the parameters used for the live signal.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{BacktestSettings, EvaluationPeriod, IndicatorSettings};
use crate::engine::BacktestEngine;
use crate::indicators::atr;
use crate::optimizer::Optimizer;
use crate::simulator::{simulate_with_atr, TradeCosts};
use crate::types::*;
use crate::voter::vote;

/// Bars used to size the live signal's ATR levels
pub const LIVE_WINDOW: usize = 20;

/// Combined result for one named period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodResult {
    pub period: String,
    pub result: BacktestResult,
}

/// Training/validation bar counts for a period length
pub fn split_sizes(days: u32) -> (usize, usize) {
    let days = days as usize;
    let training = days * 7 / 10;
    (training, days - training)
}

/// The last `n` items of a slice (all of it when shorter)
fn tail<T>(items: &[T], n: usize) -> &[T] {
    &items[items.len().saturating_sub(n)..]
}

pub struct Orchestrator<'a> {
    indicators: &'a IndicatorSettings,
    settings: &'a BacktestSettings,
}

impl<'a> Orchestrator<'a> {
    pub fn new(indicators: &'a IndicatorSettings, settings: &'a BacktestSettings) -> Self {
        Self {
            indicators,
            settings,
        }
    }

    /// Evaluate every configured period in order; periods without enough
    /// history are left out
    pub fn evaluate(&self, candles: &[Candle], rng: &mut impl Rng) -> Vec<PeriodResult> {
        info!(
            bars = candles.len(),
            periods = self.settings.periods.len(),
            risk_per_trade = self.settings.risk_per_trade,
            "Starting train/validation evaluation"
        );

        self.settings
            .periods
            .iter()
            .filter_map(|period| {
                self.evaluate_period(candles, period, rng)
                    .map(|result| PeriodResult {
                        period: period.name.clone(),
                        result,
                    })
            })
            .collect()
    }

    /// Train, optimize and validate one period
    pub fn evaluate_period(
        &self,
        candles: &[Candle],
        period: &EvaluationPeriod,
        rng: &mut impl Rng,
    ) -> Option<BacktestResult> {
        let (training_size, validation_size) = split_sizes(period.days);
        let warmup = self.settings.warmup_candles;

        if candles.len() < training_size + warmup {
            info!(
                period = %period.name,
                required = training_size + warmup,
                available = candles.len(),
                "Not enough candles, skipping period"
            );
            return None;
        }

        let optimizer = Optimizer::new(self.indicators, self.settings);

        let training_slice = tail(candles, training_size + warmup);
        let training = BacktestEngine::run(
            training_slice,
            &optimizer.seed_params(),
            self.indicators,
            self.settings,
        );
        let tuned = optimizer.optimize(training_slice, rng);

        let validation_slice = tail(candles, validation_size + warmup);
        let validation = BacktestEngine::run(validation_slice, &tuned, self.indicators, self.settings);

        info!(
            period = %period.name,
            days = period.days,
            training_trades = training.total_trades,
            validation_trades = validation.total_trades,
            performance = tuned.performance(),
            "Period evaluated"
        );

        let mut combined = combine_results(training, validation);
        combined.optimized_params = Some(tuned);
        combined.days = Some(period.days);
        Some(combined)
    }
}

fn mean_or_max(a: f64, b: f64) -> f64 {
    if a > 0.0 && b > 0.0 {
        (a + b) / 2.0
    } else {
        a.max(b)
    }
}

/// Merge a training and a validation run.
///
/// A side without trades yields the other side unchanged. Otherwise counts
/// add up, per-trade averages and exit rates are weighted by trade count,
/// profit factor and risk/reward are averaged when both are positive, the
/// Sharpe ratio is averaged and drawdown takes the worse side.
pub fn combine_results(training: BacktestResult, validation: BacktestResult) -> BacktestResult {
    if validation.total_trades == 0 {
        return training;
    }
    if training.total_trades == 0 {
        return validation;
    }

    let nt = training.total_trades as f64;
    let nv = validation.total_trades as f64;
    let n = nt + nv;
    let weighted = |a: f64, b: f64| (a * nt + b * nv) / n;

    let mut trades = training.trades;
    trades.extend(validation.trades);

    let initial_capital = training.initial_capital;
    let mut equity = initial_capital;
    let mut peak = initial_capital;
    let equity_curve: Vec<f64> = trades
        .iter()
        .map(|t| {
            equity += t.profit;
            peak = peak.max(equity);
            equity
        })
        .collect();

    let wins = training.wins + validation.wins;

    BacktestResult {
        initial_capital,
        final_capital: equity,
        wins,
        losses: training.losses + validation.losses,
        total_trades: training.total_trades + validation.total_trades,
        equity_curve,
        trades,
        peak,
        max_drawdown: training.max_drawdown.max(validation.max_drawdown),
        drawdown_rate: training.drawdown_rate.max(validation.drawdown_rate),
        win_rate: wins as f64 / n,
        sharpe_ratio: (training.sharpe_ratio + validation.sharpe_ratio) / 2.0,
        profit_factor: mean_or_max(training.profit_factor, validation.profit_factor),
        risk_reward_ratio: mean_or_max(training.risk_reward_ratio, validation.risk_reward_ratio),
        avg_trade_duration: weighted(training.avg_trade_duration, validation.avg_trade_duration),
        avg_profit_per_trade: weighted(
            training.avg_profit_per_trade,
            validation.avg_profit_per_trade,
        ),
        stop_loss_rate: weighted(training.stop_loss_rate, validation.stop_loss_rate),
        take_profit_rate: weighted(training.take_profit_rate, validation.take_profit_rate),
        manual_exit_rate: weighted(training.manual_exit_rate, validation.manual_exit_rate),
        best_trade: training.best_trade.max(validation.best_trade),
        worst_trade: training.worst_trade.min(validation.worst_trade),
        optimized_params: None,
        days: None,
    }
}

/// The evaluated period with the highest Sharpe ratio; earlier periods win ties
pub fn select_best(periods: &[PeriodResult]) -> Option<&PeriodResult> {
    periods.iter().fold(None, |best: Option<&PeriodResult>, p| match best {
        Some(b) if b.result.sharpe_ratio >= p.result.sharpe_ratio => Some(b),
        _ => Some(p),
    })
}

/// Parameters adopted for live signalling, defaults when nothing was evaluated
pub fn adopted_params(periods: &[PeriodResult], settings: &BacktestSettings) -> ParameterSet {
    select_best(periods)
        .and_then(|p| p.result.optimized_params.clone())
        .unwrap_or_else(|| ParameterSet {
            confidence_threshold: settings.confidence_threshold,
            ..ParameterSet::default()
        })
}

/// Vote on the latest bar and the ATR levels a trade would use
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveSignal {
    pub decision: SignalDecision,
    pub price: f64,
    /// Present for non-neutral decisions
    pub trade: Option<Trade>,
}

/// Vote on the last two candles with `params`; a non-neutral vote is sized
/// with ATR over the last `LIVE_WINDOW` bars
pub fn live_signal(
    candles: &[Candle],
    params: &ParameterSet,
    indicators: &IndicatorSettings,
    settings: &BacktestSettings,
) -> Option<LiveSignal> {
    let [.., previous, current] = candles else {
        return None;
    };
    let decision = vote(current, previous, params, indicators);

    let trade = if decision.signal.is_neutral() {
        None
    } else {
        let costs = TradeCosts::from_settings(settings);
        let entry = std::slice::from_ref(current);
        match atr(tail(candles, LIVE_WINDOW), indicators.atr_period) {
            Some(value) if value > 0.0 => simulate_with_atr(
                decision.signal,
                entry,
                value,
                indicators.risk_reward_ratio,
                &costs,
            ),
            _ => Some(Trade {
                signal: decision.signal,
                entry_price: current.close,
                exit_price: current.close,
                stop_loss: None,
                take_profit: None,
                profit: 0.0,
                duration: 0,
                exit_reason: ExitReason::InvalidAtr,
                timestamp: current.timestamp,
            }),
        }
    };

    debug!(signal = %decision.signal, price = current.close, "Live signal");

    Some(LiveSignal {
        decision,
        price: current.reference_price(),
        trade,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::sample_series;
    use crate::metrics::aggregate;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn trade(profit: f64, reason: ExitReason) -> Trade {
        Trade {
            signal: Signal::Long,
            entry_price: 100.0,
            exit_price: 100.0 + profit,
            stop_loss: Some(98.0),
            take_profit: Some(104.0),
            profit,
            duration: 2,
            exit_reason: reason,
            timestamp: 0,
        }
    }

    fn result_from(profits: &[f64]) -> BacktestResult {
        let mut result = BacktestResult::empty(1000.0);
        for &p in profits {
            let reason = if p >= 0.0 {
                ExitReason::TakeProfit
            } else {
                ExitReason::StopLoss
            };
            result.trades.push(trade(p, reason));
            result.final_capital += p;
            if p >= 0.0 {
                result.wins += 1;
            } else {
                result.losses += 1;
            }
            result.equity_curve.push(result.final_capital);
            result.peak = result.peak.max(result.final_capital);
            result.max_drawdown = result.max_drawdown.max(result.peak - result.final_capital);
        }
        aggregate(result)
    }

    #[test]
    fn test_split_sizes() {
        assert_eq!(split_sizes(30), (21, 9));
        assert_eq!(split_sizes(90), (63, 27));
        assert_eq!(split_sizes(180), (126, 54));
        assert_eq!(split_sizes(1), (0, 1));
    }

    #[test]
    fn test_combine_with_empty_validation_returns_training() {
        let training = result_from(&[4.0, -2.0, 3.0]);
        let combined = combine_results(training.clone(), BacktestResult::empty(1000.0));
        assert_eq!(combined.total_trades, training.total_trades);
        assert_eq!(combined, training);
    }

    #[test]
    fn test_combine_with_empty_training_returns_validation() {
        let validation = result_from(&[1.0, 1.5]);
        let combined = combine_results(BacktestResult::empty(1000.0), validation.clone());
        assert_eq!(combined, validation);
    }

    #[test]
    fn test_combine_merges_counts_and_extremes() {
        let training = result_from(&[4.0, -2.0, 3.0]);
        let validation = result_from(&[-5.0, 6.0]);
        let combined = combine_results(training.clone(), validation.clone());

        assert_eq!(combined.total_trades, 5);
        assert_eq!(combined.wins, 3);
        assert_eq!(combined.losses, 2);
        assert!((combined.win_rate - 0.6).abs() < 1e-9);
        assert_eq!(combined.best_trade, 6.0);
        assert_eq!(combined.worst_trade, -5.0);
        assert_eq!(
            combined.max_drawdown,
            training.max_drawdown.max(validation.max_drawdown)
        );
        assert!(
            (combined.sharpe_ratio - (training.sharpe_ratio + validation.sharpe_ratio) / 2.0).abs()
                < 1e-9
        );
        assert!(
            (combined.profit_factor - (training.profit_factor + validation.profit_factor) / 2.0)
                .abs()
                < 1e-9
        );
        // 3 of 5 trades hit take-profit
        assert!((combined.take_profit_rate - 0.6).abs() < 1e-9);

        let sum: f64 = combined.trades.iter().map(|t| t.profit).sum();
        assert!((combined.final_capital - combined.initial_capital - sum).abs() < 1e-9);
    }

    #[test]
    fn test_combine_takes_max_when_one_ratio_is_zero() {
        let training = result_from(&[4.0, 3.0]);
        let validation = result_from(&[-5.0, 6.0]);
        assert_eq!(training.profit_factor, 0.0);
        let combined = combine_results(training, validation.clone());
        assert_eq!(combined.profit_factor, validation.profit_factor);
        assert_eq!(combined.risk_reward_ratio, validation.risk_reward_ratio);
    }

    #[test]
    fn test_select_best_by_sharpe() {
        let mk = |name: &str, sharpe: f64| {
            let mut result = BacktestResult::empty(1000.0);
            result.sharpe_ratio = sharpe;
            result.optimized_params = Some(ParameterSet {
                rsi_overbought: 60.0 + sharpe,
                ..Default::default()
            });
            PeriodResult {
                period: name.to_string(),
                result,
            }
        };
        let periods = vec![mk("short", 1.0), mk("medium", 3.0), mk("long", 3.0)];
        assert_eq!(select_best(&periods).unwrap().period, "medium");
        let adopted = adopted_params(&periods, &BacktestSettings::default());
        assert_eq!(adopted.rsi_overbought, 63.0);

        assert!(select_best(&[]).is_none());
        assert_eq!(
            adopted_params(&[], &BacktestSettings::default()),
            ParameterSet::default()
        );
    }

    #[test]
    fn test_short_history_skips_periods() {
        let candles = sample_series(220);
        let indicators = IndicatorSettings::default();
        let settings = BacktestSettings::default();
        let orchestrator = Orchestrator::new(&indicators, &settings);
        let results = orchestrator.evaluate(&candles, &mut StdRng::seed_from_u64(9));
        // even the short period needs 21 + 201 = 222 bars
        assert!(results.is_empty());

        let candles = sample_series(240);
        let results = orchestrator.evaluate(&candles, &mut StdRng::seed_from_u64(9));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].period, "short");
        assert_eq!(results[0].result.days, Some(30));
        assert!(results[0].result.optimized_params.is_some());
    }

    #[test]
    fn test_validation_slice_overlaps_training_tail_only_by_warmup() {
        let candles = sample_series(600);
        let (training, validation) = split_sizes(90);
        let training_slice = tail(&candles, training + 201);
        let validation_slice = tail(&candles, validation + 201);
        // both end at the newest bar; validation starts inside the training slice
        assert_eq!(
            training_slice.last().unwrap().timestamp,
            validation_slice.last().unwrap().timestamp
        );
        assert_eq!(training_slice.len() - validation_slice.len(), training - validation);
    }

    #[test]
    fn test_live_signal() {
        let candles = sample_series(260);
        let live = live_signal(
            &candles,
            &ParameterSet::default(),
            &IndicatorSettings::default(),
            &BacktestSettings::default(),
        )
        .unwrap();
        match live.decision.signal {
            Signal::Neutral => assert!(live.trade.is_none()),
            signal => {
                let trade = live.trade.unwrap();
                assert_eq!(trade.signal, signal);
                assert_eq!(trade.entry_price, candles[259].close);
                assert!(trade.stop_loss.is_some());
            }
        }
        let single = live_signal(
            &candles[..1],
            &ParameterSet::default(),
            &IndicatorSettings::default(),
            &BacktestSettings::default(),
        );
        assert!(single.is_none());
    }
}
