//! Monte Carlo resampling of a backtest's trade profits

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::BacktestResult;

/// Fewer trades than this make the resampled distribution meaningless
pub const MIN_TRADES: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonteCarloSummary {
    pub iterations: usize,
    pub median: f64,
    /// 95th percentile of final capital
    pub best_5pct: f64,
    /// 5th percentile of final capital
    pub worst_5pct: f64,
    /// Share of paths ending above initial capital
    pub probability_profit: f64,
    /// Highest capital reached above the start on any path
    pub max_runup: f64,
    /// Deepest peak-to-trough decline on any path
    pub max_drawdown: f64,
}

/// Bootstrap `iterations` equity paths by drawing trade profits with replacement.
///
/// Returns `None` with fewer than `MIN_TRADES` trades or zero iterations.
pub fn simulate(
    result: &BacktestResult,
    iterations: usize,
    rng: &mut impl Rng,
) -> Option<MonteCarloSummary> {
    let profits: Vec<f64> = result.trades.iter().map(|t| t.profit).collect();
    if profits.len() < MIN_TRADES || iterations == 0 {
        return None;
    }

    let initial = result.initial_capital;
    let mut finals = Vec::with_capacity(iterations);
    let mut max_runup = 0.0_f64;
    let mut max_drawdown = 0.0_f64;

    for _ in 0..iterations {
        let mut equity = initial;
        let mut peak = initial;
        for _ in 0..profits.len() {
            if let Some(p) = profits.choose(rng) {
                equity += p;
            }
            peak = peak.max(equity);
            max_drawdown = max_drawdown.max(peak - equity);
        }
        max_runup = max_runup.max(peak - initial);
        finals.push(equity);
    }

    finals.sort_by(|a, b| a.total_cmp(b));
    let at = |q: f64| finals[((iterations as f64 * q) as usize).min(iterations - 1)];
    let profitable = finals.iter().filter(|&&f| f > initial).count();

    let summary = MonteCarloSummary {
        iterations,
        median: at(0.5),
        best_5pct: at(0.95),
        worst_5pct: at(0.05),
        probability_profit: profitable as f64 / iterations as f64,
        max_runup,
        max_drawdown,
    };
    debug!(
        iterations,
        median = summary.median,
        probability_profit = summary.probability_profit,
        "Monte Carlo complete"
    );
    Some(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExitReason, Signal, Trade};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn result_with(profits: &[f64]) -> BacktestResult {
        let mut result = BacktestResult::empty(1000.0);
        for &profit in profits {
            result.trades.push(Trade {
                signal: Signal::Long,
                entry_price: 100.0,
                exit_price: 100.0 + profit,
                stop_loss: None,
                take_profit: None,
                profit,
                duration: 1,
                exit_reason: ExitReason::Manual,
                timestamp: 0,
            });
            result.final_capital += profit;
        }
        result
    }

    #[test]
    fn test_requires_ten_trades() {
        let result = result_with(&[1.0; 9]);
        assert!(simulate(&result, 100, &mut StdRng::seed_from_u64(1)).is_none());
        let result = result_with(&[1.0; 10]);
        assert!(simulate(&result, 0, &mut StdRng::seed_from_u64(1)).is_none());
    }

    #[test]
    fn test_constant_profits() {
        let result = result_with(&[2.0; 12]);
        let summary = simulate(&result, 200, &mut StdRng::seed_from_u64(1)).unwrap();
        assert!((summary.median - 1024.0).abs() < 1e-9);
        assert_eq!(summary.probability_profit, 1.0);
        assert!((summary.max_runup - 24.0).abs() < 1e-9);
        assert_eq!(summary.max_drawdown, 0.0);
    }

    #[test]
    fn test_percentiles_are_ordered() {
        let profits: Vec<f64> = (0..30).map(|i| if i % 3 == 0 { -4.0 } else { 2.5 }).collect();
        let result = result_with(&profits);
        let summary = simulate(&result, 500, &mut StdRng::seed_from_u64(8)).unwrap();
        assert!(summary.worst_5pct <= summary.median);
        assert!(summary.median <= summary.best_5pct);
        assert!((0.0..=1.0).contains(&summary.probability_profit));
        assert!(summary.max_drawdown > 0.0);
    }
}
