//! Three-phase random parameter search
//!
//! A wide phase samples the full parameter space, then a medium and a narrow
//! phase sample bands around the running best. Each candidate is scored by a
//! full backtest; only a strictly better score replaces the running best,
//! which carries over from one phase to the next.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use tracing::{debug, info};

use crate::config::{BacktestSettings, IndicatorSettings};
use crate::engine::BacktestEngine;
use crate::types::{BacktestResult, Candle, ParameterScore, ParameterSet};

// ============================================================================
// Phases
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchPhase {
    Wide,
    Medium,
    Narrow,
}

impl SearchPhase {
    pub const ALL: [SearchPhase; 3] = [SearchPhase::Wide, SearchPhase::Medium, SearchPhase::Narrow];

    pub fn iterations(self) -> usize {
        match self {
            SearchPhase::Wide => 20,
            SearchPhase::Medium => 20,
            SearchPhase::Narrow => 10,
        }
    }
}

impl std::fmt::Display for SearchPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchPhase::Wide => write!(f, "wide"),
            SearchPhase::Medium => write!(f, "medium"),
            SearchPhase::Narrow => write!(f, "narrow"),
        }
    }
}

// ============================================================================
// Sampling ranges
// ============================================================================

/// Integer sampling ranges. The multiplier is in tenths and the confidence
/// threshold in hundredths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterRanges {
    pub rsi_overbought: RangeInclusive<i64>,
    pub rsi_oversold: RangeInclusive<i64>,
    pub sma_short: RangeInclusive<i64>,
    pub sma_long: RangeInclusive<i64>,
    pub bb_period: RangeInclusive<i64>,
    pub bb_multiplier_tenths: RangeInclusive<i64>,
    pub confidence_hundredths: RangeInclusive<i64>,
}

/// `[max(floor, best - width), min(cap, best + width)]`, never inverted
fn band(best: i64, width: i64, floor: i64, cap: i64) -> RangeInclusive<i64> {
    let lo = floor.max(best - width);
    let hi = cap.min(best + width);
    lo.min(hi)..=lo.max(hi)
}

impl ParameterRanges {
    /// Ranges for `phase`, centred on `best` for the medium and narrow phases
    pub fn for_phase(phase: SearchPhase, best: &ParameterSet) -> Self {
        let ob = best.rsi_overbought.round() as i64;
        let os = best.rsi_oversold.round() as i64;
        let short = best.sma_short as i64;
        let long = best.sma_long as i64;
        let bb = best.bb_period as i64;
        let mult = (best.bb_multiplier * 10.0).round() as i64;
        let conf = (best.confidence_threshold * 100.0).round() as i64;

        match phase {
            SearchPhase::Wide => Self {
                rsi_overbought: 60..=80,
                rsi_oversold: 20..=40,
                sma_short: 30..=70,
                sma_long: 150..=250,
                bb_period: 15..=25,
                bb_multiplier_tenths: 15..=25,
                confidence_hundredths: 50..=70,
            },
            SearchPhase::Medium => Self {
                rsi_overbought: band(ob, 5, 65, 75),
                rsi_oversold: band(os, 5, 25, 35),
                sma_short: band(short, 10, 40, 60),
                sma_long: band(long, 20, 180, 220),
                bb_period: band(bb, 2, 18, 22),
                bb_multiplier_tenths: band(mult, 2, 16, 24),
                confidence_hundredths: band(conf, 5, 55, 65),
            },
            SearchPhase::Narrow => Self {
                rsi_overbought: band(ob, 2, 68, 72),
                rsi_oversold: band(os, 2, 28, 32),
                sma_short: band(short, 5, 45, 55),
                sma_long: band(long, 10, 190, 210),
                bb_period: band(bb, 1, 19, 21),
                bb_multiplier_tenths: band(mult, 1, 18, 22),
                confidence_hundredths: band(conf, 2, 58, 62),
            },
        }
    }

    /// Draw one candidate, each knob independently and uniformly
    pub fn sample(&self, rng: &mut impl Rng) -> ParameterSet {
        ParameterSet {
            rsi_overbought: rng.gen_range(self.rsi_overbought.clone()) as f64,
            rsi_oversold: rng.gen_range(self.rsi_oversold.clone()) as f64,
            sma_short: rng.gen_range(self.sma_short.clone()) as usize,
            sma_long: rng.gen_range(self.sma_long.clone()) as usize,
            bb_period: rng.gen_range(self.bb_period.clone()) as usize,
            bb_multiplier: rng.gen_range(self.bb_multiplier_tenths.clone()) as f64 / 10.0,
            confidence_threshold: rng.gen_range(self.confidence_hundredths.clone()) as f64 / 100.0,
            score: None,
        }
    }
}

// ============================================================================
// Search
// ============================================================================

/// `win_rate * (1 - drawdown) * sharpe`
pub fn performance_score(result: &BacktestResult) -> f64 {
    result.win_rate * (1.0 - result.drawdown_rate) * result.sharpe_ratio
}

/// Best parameter set plus the running-best score after every iteration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationOutcome {
    pub best: ParameterSet,
    pub best_score_history: Vec<f64>,
    pub evaluated: usize,
}

/// Optimizes parameters over a fixed candle slice
pub struct Optimizer<'a> {
    indicators: &'a IndicatorSettings,
    settings: &'a BacktestSettings,
}

impl<'a> Optimizer<'a> {
    pub fn new(indicators: &'a IndicatorSettings, settings: &'a BacktestSettings) -> Self {
        Self {
            indicators,
            settings,
        }
    }

    /// Starting point: default knobs with the configured threshold, score 0
    pub fn seed_params(&self) -> ParameterSet {
        ParameterSet {
            confidence_threshold: self.settings.confidence_threshold,
            ..ParameterSet::default()
        }
    }

    /// Score a single candidate
    pub fn evaluate(&self, candles: &[Candle], params: &ParameterSet) -> ParameterScore {
        let result = BacktestEngine::run(candles, params, self.indicators, self.settings);
        ParameterScore {
            performance: performance_score(&result),
            sharpe_ratio: result.sharpe_ratio,
            max_drawdown: result.drawdown_rate,
        }
    }

    /// Run all three phases and return the best set found
    pub fn optimize(&self, candles: &[Candle], rng: &mut impl Rng) -> ParameterSet {
        self.optimize_traced(candles, rng).best
    }

    /// Same as `optimize`, also reporting the running best after each iteration
    pub fn optimize_traced(&self, candles: &[Candle], rng: &mut impl Rng) -> OptimizationOutcome {
        info!(bars = candles.len(), "Starting parameter optimization");

        let start = OptimizationOutcome {
            best: self.seed_params(),
            best_score_history: Vec::new(),
            evaluated: 0,
        };

        let outcome = SearchPhase::ALL.iter().fold(start, |outcome, &phase| {
            let ranges = ParameterRanges::for_phase(phase, &outcome.best);
            let outcome = (0..phase.iterations()).fold(outcome, |mut acc, _| {
                let mut candidate = ranges.sample(rng);
                let score = self.evaluate(candles, &candidate);
                acc.evaluated += 1;

                if score.performance > acc.best.performance() {
                    debug!(
                        phase = %phase,
                        performance = score.performance,
                        sharpe = score.sharpe_ratio,
                        "New best parameters"
                    );
                    candidate.score = Some(score);
                    acc.best = candidate;
                }
                acc.best_score_history.push(acc.best.performance());
                acc
            });
            debug!(phase = %phase, best = outcome.best.performance(), "Phase complete");
            outcome
        });

        info!(
            evaluated = outcome.evaluated,
            performance = outcome.best.performance(),
            overbought = outcome.best.rsi_overbought,
            oversold = outcome.best.rsi_oversold,
            threshold = outcome.best.confidence_threshold,
            "Optimization complete"
        );

        outcome
    }
}
