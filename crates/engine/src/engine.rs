//! Bar-by-bar backtest runner

use tracing::debug;

use crate::config::{BacktestSettings, IndicatorSettings};
use crate::metrics;
use crate::simulator::{simulate, TradeCosts};
use crate::types::*;
use crate::voter::vote;

/// Replays an enriched candle series through the voter and trade simulator
pub struct BacktestEngine;

impl BacktestEngine {
    /// First bar allowed to trade: every lookback the parameters depend on is warm
    pub fn start_index(params: &ParameterSet, indicators: &IndicatorSettings) -> usize {
        params
            .bb_period
            .max(params.sma_long)
            .max(indicators.macd_slow)
            .max(1)
    }

    /// Run a backtest over `candles` (already enriched) with `params`.
    ///
    /// Each non-neutral vote opens an independent trade over the remaining
    /// bars. A series too short to warm up yields an empty result.
    pub fn run(
        candles: &[Candle],
        params: &ParameterSet,
        indicators: &IndicatorSettings,
        settings: &BacktestSettings,
    ) -> BacktestResult {
        let mut result = BacktestResult::empty(settings.initial_capital);
        let start = Self::start_index(params, indicators);

        if candles.len() <= start {
            debug!(
                required = start + 1,
                given = candles.len(),
                "Not enough candles for backtest"
            );
            return metrics::aggregate(result);
        }

        debug!(
            start_index = start,
            bars = candles.len(),
            threshold = params.confidence_threshold,
            risk_per_trade = settings.risk_per_trade,
            "Starting backtest"
        );

        let costs = TradeCosts::from_settings(settings);

        for i in start..candles.len() {
            let decision = vote(&candles[i], &candles[i - 1], params, indicators);
            if decision.signal.is_neutral() {
                continue;
            }

            let Some(trade) = simulate(decision.signal, &candles[i..], indicators, &costs) else {
                continue;
            };
            Self::record(&mut result, trade);
        }

        let result = metrics::aggregate(result);

        debug!(
            trades = result.total_trades,
            win_rate = result.win_rate,
            sharpe = result.sharpe_ratio,
            final_capital = result.final_capital,
            "Backtest complete"
        );

        result
    }

    /// Book a closed trade into capital, equity curve and drawdown tracking
    fn record(result: &mut BacktestResult, trade: Trade) {
        result.final_capital += trade.profit;
        if trade.profit >= 0.0 {
            result.wins += 1;
        } else {
            result.losses += 1;
        }

        let equity = result.final_capital;
        result.equity_curve.push(equity);
        result.peak = result.peak.max(equity);
        result.max_drawdown = result.max_drawdown.max(result.peak - equity);

        result.trades.push(trade);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::indicators::enrich;

    pub(crate) fn make_candles(prices: &[f64]) -> Vec<Candle> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &p)| Candle::new(i as i64 * 3600, p, p + 1.5, p - 1.5, p, 100.0 + (i % 7) as f64 * 20.0))
            .collect()
    }

    /// A wavy uptrend long enough to warm every indicator
    pub(crate) fn sample_series(n: usize) -> Vec<Candle> {
        let prices: Vec<f64> = (0..n)
            .map(|i| {
                let t = i as f64;
                200.0 + t * 0.05 + (t / 6.0).sin() * 8.0 + (t / 17.0).cos() * 4.0
            })
            .collect();
        enrich(&make_candles(&prices), &IndicatorSettings::default())
    }

    fn run(candles: &[Candle], params: &ParameterSet) -> BacktestResult {
        BacktestEngine::run(
            candles,
            params,
            &IndicatorSettings::default(),
            &BacktestSettings::default(),
        )
    }

    #[test]
    fn test_empty_candles() {
        let result = run(&[], &ParameterSet::default());
        assert_eq!(result.total_trades, 0);
        assert_eq!(result.final_capital, result.initial_capital);
    }

    #[test]
    fn test_short_series_yields_empty_result() {
        let candles = sample_series(200);
        let result = run(&candles, &ParameterSet::default());
        assert_eq!(result.total_trades, 0);
        assert_eq!(result.initial_capital, 1000.0);
        assert_eq!(result.final_capital, 1000.0);
        assert!(result.equity_curve.is_empty());
    }

    #[test]
    fn test_start_index() {
        let indicators = IndicatorSettings::default();
        assert_eq!(BacktestEngine::start_index(&ParameterSet::default(), &indicators), 200);
        let params = ParameterSet {
            sma_long: 10,
            bb_period: 15,
            ..Default::default()
        };
        assert_eq!(BacktestEngine::start_index(&params, &indicators), 26);
    }

    #[test]
    fn test_capital_matches_trade_sum() {
        let candles = sample_series(420);
        let result = run(&candles, &ParameterSet::default());
        assert!(result.total_trades > 0);

        let sum: f64 = result.trades.iter().map(|t| t.profit).sum();
        assert!((result.final_capital - result.initial_capital - sum).abs() < 1e-6);
        assert_eq!(result.wins + result.losses, result.total_trades);
        assert_eq!(result.equity_curve.len(), result.trades.len());
    }

    #[test]
    fn test_peak_and_drawdown_bookkeeping() {
        let candles = sample_series(420);
        let result = run(&candles, &ParameterSet::default());

        let mut peak = result.initial_capital;
        let mut max_dd: f64 = 0.0;
        for &equity in &result.equity_curve {
            peak = peak.max(equity);
            max_dd = max_dd.max(peak - equity);
        }
        assert!((result.peak - peak).abs() < 1e-9);
        assert!((result.max_drawdown - max_dd).abs() < 1e-9);
        assert!(result.max_drawdown >= 0.0);
        assert!(result.peak >= result.initial_capital);
    }

    #[test]
    fn test_rerun_is_identical() {
        let candles = sample_series(360);
        let params = ParameterSet {
            confidence_threshold: 0.5,
            ..Default::default()
        };
        assert_eq!(run(&candles, &params), run(&candles, &params));
    }

    #[test]
    fn test_tail_trades_abort_on_invalid_atr() {
        let candles = sample_series(300);
        let result = run(&candles, &ParameterSet::default());
        // the last bars leave fewer than 15 candles for ATR
        if let Some(last) = result.trades.last() {
            if last.timestamp >= candles[candles.len() - 14].timestamp {
                assert_eq!(last.exit_reason, ExitReason::InvalidAtr);
                assert_eq!(last.profit, 0.0);
            }
        }
    }
}
