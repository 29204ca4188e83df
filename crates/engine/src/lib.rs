//! Signal Desk engine: indicator backtesting, parameter search and signals
//!
//! Provides:
//! - Indicator enrichment, signal voting and ATR trade simulation
//! - Bar-by-bar backtests with aggregated risk metrics
//! - Three-phase random parameter search and train/validation evaluation
//! - Monte Carlo resampling, logistic classifier and trend recommendation
//! - Binance market data and Telegram notification clients
//! - The analysis cycle and its poll loop

pub mod analysis;
pub mod api;
pub mod classifier;
pub mod config;
pub mod cycle;
pub mod engine;
pub mod evaluation;
pub mod indicators;
pub mod metrics;
pub mod monte_carlo;
pub mod optimizer;
pub mod report;
pub mod simulator;
pub mod types;
pub mod voter;

// Re-exports for convenience
pub use analysis::{analyze_trend, recommend, Recommendation, TrendAnalysis};
pub use api::{notifier_from_env, BinanceClient, MarketData, Notifier, NullNotifier, TelegramNotifier};
pub use classifier::{Classifier, ClassifierError, LogisticClassifier, MlAdvisor, Prediction};
pub use config::{BacktestSettings, EngineConfig, EvaluationPeriod, IndicatorSettings, MarketSettings};
pub use cycle::{
    run_cycle, run_watch_loop, train_advisor, CycleContext, CycleProgress, CycleReport, CycleStatus,
    TrainingSummary,
};
pub use engine::BacktestEngine;
pub use evaluation::{LiveSignal, Orchestrator, PeriodResult};
pub use monte_carlo::MonteCarloSummary;
pub use optimizer::{OptimizationOutcome, Optimizer, SearchPhase};
pub use types::*;
