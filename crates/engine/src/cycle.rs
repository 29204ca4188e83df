//! Analysis cycle and poll loop
//!
//! One cycle fetches candles, stores a classifier sample, evaluates every
//! period, derives the live, classifier and trend signals, persists the
//! evaluation and notifies on a directional recommendation. The watch loop
//! repeats cycles until cancelled; a failed cycle is logged and retried on
//! the next tick.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use persistence::repository::{EvaluationRecord, EvaluationRepository, SampleRecord, SampleRepository};
use persistence::SqlitePool;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::analysis::{analyze_trend, average_win_rate, recommend, Recommendation, TrendAnalysis};
use crate::api::{MarketData, Notifier};
use crate::classifier::{
    latest_sample, LogisticClassifier, MlAdvisor, Prediction, TrainingSample, FEATURE_COUNT,
};
use crate::config::EngineConfig;
use crate::evaluation::{adopted_params, live_signal, select_best, LiveSignal, Orchestrator, PeriodResult};
use crate::indicators::enrich;
use crate::monte_carlo::{self, MonteCarloSummary};
use crate::report::{render_backtest_report, render_monte_carlo};
use crate::types::{Candle, ParameterSet, Signal};

/// Evaluation needs more bars than this
pub const MIN_EVALUATION_CANDLES: usize = 200;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Collaborators a cycle runs against
#[derive(Clone)]
pub struct CycleContext {
    pub config: EngineConfig,
    pub market: Arc<dyn MarketData>,
    pub notifier: Arc<dyn Notifier>,
    pub pool: SqlitePool,
}

/// Classifier training outcome
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingSummary {
    /// Samples in the store
    pub stored: usize,
    /// Samples left after class balancing
    pub used: usize,
    pub trained: bool,
    pub error: Option<String>,
}

/// Everything one cycle produced
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub generated_at: DateTime<Utc>,
    pub symbol: String,
    pub candles: usize,
    pub price: Option<f64>,
    pub periods: Vec<PeriodResult>,
    pub adopted_params: ParameterSet,
    pub live_signal: Option<LiveSignal>,
    pub prediction: Prediction,
    pub ml_signal: Signal,
    pub training: TrainingSummary,
    pub trend: Option<TrendAnalysis>,
    pub recommendation: Option<Recommendation>,
    pub monte_carlo: Option<MonteCarloSummary>,
    pub sample_stored: bool,
    /// Evaluation rows were written to the store
    pub persisted: bool,
    pub notified: bool,
    pub report_text: String,
}

impl CycleReport {
    /// Final signal of the cycle
    pub fn signal(&self) -> Signal {
        self.recommendation
            .as_ref()
            .map_or(Signal::Neutral, |r| r.signal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CycleStatus {
    Idle,
    Running,
    Error,
}

/// Shared state of the watch loop, readable from HTTP handlers
pub struct CycleProgress {
    pub status: RwLock<CycleStatus>,
    pub cancelled: AtomicBool,
    pub cycles_completed: AtomicU64,
    pub last_report: RwLock<Option<CycleReport>>,
    pub error_message: RwLock<Option<String>>,
}

fn store<T>(lock: &RwLock<T>, value: T) {
    if let Ok(mut guard) = lock.write() {
        *guard = value;
    }
}

impl CycleProgress {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(CycleStatus::Idle),
            cancelled: AtomicBool::new(false),
            cycles_completed: AtomicU64::new(0),
            last_report: RwLock::new(None),
            error_message: RwLock::new(None),
        }
    }

    pub fn reset(&self) {
        store(&self.status, CycleStatus::Running);
        self.cancelled.store(false, Ordering::Relaxed);
        store(&self.error_message, None);
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.status
            .read()
            .map(|s| *s == CycleStatus::Running)
            .unwrap_or(false)
    }

    pub fn status(&self) -> CycleStatus {
        self.status.read().map(|s| *s).unwrap_or(CycleStatus::Error)
    }

    pub fn last_report(&self) -> Option<CycleReport> {
        self.last_report.read().ok().and_then(|r| r.clone())
    }

    pub fn error_message(&self) -> Option<String> {
        self.error_message.read().ok().and_then(|e| e.clone())
    }

    pub fn record_report(&self, report: CycleReport) {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
        store(&self.error_message, None);
        store(&self.last_report, Some(report));
    }

    fn record_error(&self, message: String) {
        store(&self.error_message, Some(message));
    }
}

impl Default for CycleProgress {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Samples and training
// ---------------------------------------------------------------------------

/// SHA-256 over the candle timestamp and feature bits; equal samples hash equal
pub fn sample_hash(sample: &TrainingSample) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sample.timestamp.to_le_bytes());
    for value in &sample.features {
        hasher.update(value.to_le_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Store the newest bar's sample; false when it was already present
pub async fn store_sample(pool: &SqlitePool, sample: &TrainingSample) -> anyhow::Result<bool> {
    let record = SampleRecord::from_values(
        sample_hash(sample),
        sample.timestamp,
        &sample.features,
        sample.label.as_str(),
    )?;
    Ok(SampleRepository::new(pool).save(&record).await?)
}

/// Load every stored sample; undecodable rows are skipped
pub async fn load_samples(pool: &SqlitePool) -> anyhow::Result<Vec<TrainingSample>> {
    let records = SampleRepository::new(pool).load_all().await?;
    let total = records.len();

    let samples: Vec<TrainingSample> = records
        .into_iter()
        .filter_map(|record| {
            let features = record.feature_values().ok()?;
            let label = record.label.parse::<Signal>().ok()?;
            (features.len() == FEATURE_COUNT).then_some(TrainingSample {
                timestamp: record.candle_timestamp,
                features,
                label,
            })
        })
        .collect();

    if samples.len() < total {
        warn!(skipped = total - samples.len(), "Skipped undecodable training samples");
    }
    Ok(samples)
}

/// Retrain a fresh classifier from the sample store.
///
/// A training failure (too few or single-class samples) leaves the advisor
/// untrained and is reported in the summary rather than as an error.
pub async fn train_advisor(
    pool: &SqlitePool,
    config: &EngineConfig,
    rng: &mut (impl Rng + Send),
) -> anyhow::Result<(MlAdvisor<LogisticClassifier>, TrainingSummary)> {
    let samples = load_samples(pool).await?;
    let stored = samples.len();
    let threshold = config.ml_confidence_threshold;
    let seed: u64 = rng.gen();

    let (advisor, outcome) = tokio::task::spawn_blocking(move || {
        let mut advisor = MlAdvisor::new(LogisticClassifier::default(), threshold);
        let outcome = advisor.train(samples, &mut StdRng::seed_from_u64(seed));
        (advisor, outcome)
    })
    .await?;

    let summary = match outcome {
        Ok(used) => {
            info!(stored, used, "Classifier trained");
            TrainingSummary {
                stored,
                used,
                trained: true,
                error: None,
            }
        }
        Err(e) => {
            warn!(stored, error = %e, "Classifier not trained");
            TrainingSummary {
                stored,
                used: 0,
                trained: false,
                error: Some(e.to_string()),
            }
        }
    };
    Ok((advisor, summary))
}

// ---------------------------------------------------------------------------
// Cycle
// ---------------------------------------------------------------------------

fn evaluation_records(
    report: &CycleReport,
    best_period: Option<&str>,
) -> anyhow::Result<Vec<EvaluationRecord>> {
    let cycle_at = report.generated_at.timestamp();
    let signal = report.signal().as_str().to_string();
    let monte_carlo_json = report
        .monte_carlo
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    if report.periods.is_empty() {
        return Ok(vec![EvaluationRecord {
            id: None,
            cycle_at,
            symbol: report.symbol.clone(),
            period: "unevaluated".to_string(),
            days: 0,
            total_trades: 0,
            win_rate: 0.0,
            sharpe_ratio: 0.0,
            max_drawdown: 0.0,
            drawdown_rate: 0.0,
            final_capital: 0.0,
            params_json: None,
            signal,
            monte_carlo_json: None,
            created_at: None,
        }]);
    }

    report
        .periods
        .iter()
        .map(|p| {
            let r = &p.result;
            Ok(EvaluationRecord {
                id: None,
                cycle_at,
                symbol: report.symbol.clone(),
                period: p.period.clone(),
                days: i64::from(r.days.unwrap_or(0)),
                total_trades: i64::from(r.total_trades),
                win_rate: r.win_rate,
                sharpe_ratio: r.sharpe_ratio,
                max_drawdown: r.max_drawdown,
                drawdown_rate: r.drawdown_rate,
                final_capital: r.final_capital,
                params_json: r.optimized_params.as_ref().map(serde_json::to_string).transpose()?,
                signal: signal.clone(),
                monte_carlo_json: if best_period == Some(p.period.as_str()) {
                    monte_carlo_json.clone()
                } else {
                    None
                },
                created_at: None,
            })
        })
        .collect()
}

/// Evaluate every period on the blocking pool and hand the candles back
async fn evaluate_periods(
    candles: Vec<Candle>,
    config: &EngineConfig,
    seed: u64,
) -> anyhow::Result<(Vec<PeriodResult>, Vec<Candle>)> {
    if candles.len() <= MIN_EVALUATION_CANDLES {
        warn!(bars = candles.len(), "Too few candles to evaluate, using defaults");
        return Ok((Vec::new(), candles));
    }
    let indicators = config.indicators.clone();
    let backtest = config.backtest.clone();
    let evaluated = tokio::task::spawn_blocking(move || {
        let mut rng = StdRng::seed_from_u64(seed);
        let periods = Orchestrator::new(&indicators, &backtest).evaluate(&candles, &mut rng);
        (periods, candles)
    })
    .await?;
    Ok(evaluated)
}

async fn save_evaluations(
    pool: &SqlitePool,
    report: &CycleReport,
    best_period: Option<&str>,
) -> anyhow::Result<usize> {
    let records = evaluation_records(report, best_period)?;
    let repo = EvaluationRepository::new(pool);
    for record in &records {
        repo.save(record).await?;
    }
    Ok(records.len())
}

/// Run one full analysis cycle.
///
/// Fails only when no candles can be fetched. A missing mark price, an
/// unreachable store, an untrained classifier or a failed notification
/// degrade to defaults.
pub async fn run_cycle(ctx: &CycleContext, rng: &mut (impl Rng + Send)) -> anyhow::Result<CycleReport> {
    let config = &ctx.config;
    let symbol = config.market.symbol.as_str();

    let raw = ctx.market.candles(&config.market).await?;
    if raw.len() < 2 {
        anyhow::bail!("not enough candle data for {} ({} bars)", symbol, raw.len());
    }

    let mut candles = enrich(&raw, &config.indicators);
    match ctx.market.mark_price(symbol).await {
        Ok(price) => {
            if let Some(last) = candles.last_mut() {
                last.mark_price = Some(price);
            }
        }
        Err(e) => warn!(symbol, error = %e, "Mark price unavailable, using close"),
    }
    info!(symbol, bars = candles.len(), "Candles loaded");

    let sample_stored = match latest_sample(&candles) {
        Some(sample) => match store_sample(&ctx.pool, &sample).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "Training sample not stored");
                false
            }
        },
        None => {
            debug!("Latest bar has no complete feature vector");
            false
        }
    };

    let (periods, candles) = evaluate_periods(candles, config, rng.gen()).await?;

    let params = adopted_params(&periods, &config.backtest);
    let live = live_signal(&candles, &params, &config.indicators, &config.backtest);

    let best = select_best(&periods);
    let monte_carlo = best.and_then(|p| {
        monte_carlo::simulate(&p.result, config.backtest.monte_carlo_iterations, rng)
    });
    let best_period = best.map(|p| p.period.clone());

    let (advisor, training) = match train_advisor(&ctx.pool, config, rng).await {
        Ok(trained) => trained,
        Err(e) => {
            warn!(error = %e, "Classifier training skipped");
            let summary = TrainingSummary {
                stored: 0,
                used: 0,
                trained: false,
                error: Some(e.to_string()),
            };
            let advisor = MlAdvisor::new(LogisticClassifier::default(), config.ml_confidence_threshold);
            (advisor, summary)
        }
    };
    let (prediction, ml_signal) = advisor.combined_signal(&candles);

    let trend = analyze_trend(&candles);
    let recommendation = match (&trend, candles.last()) {
        (Some(analysis), Some(last)) => Some(recommend(
            last,
            analysis,
            average_win_rate(&periods),
            config.backtest.recommendation_threshold,
            config.backtest.risk_per_trade,
            &config.indicators,
        )),
        _ => None,
    };

    let mut report_text = String::new();
    if let Some(rec) = &recommendation {
        report_text.push_str(&rec.text);
    }
    report_text.push_str(&render_backtest_report(&periods, &config.backtest));
    if let Some(summary) = &monte_carlo {
        report_text.push_str(&render_monte_carlo(summary));
    }

    let mut report = CycleReport {
        generated_at: Utc::now(),
        symbol: symbol.to_string(),
        candles: candles.len(),
        price: candles.last().map(|c| c.reference_price()),
        periods,
        adopted_params: params,
        live_signal: live,
        prediction,
        ml_signal,
        training,
        trend,
        recommendation,
        monte_carlo,
        sample_stored,
        persisted: false,
        notified: false,
        report_text,
    };

    match save_evaluations(&ctx.pool, &report, best_period.as_deref()).await {
        Ok(rows) => {
            debug!(rows, "Evaluation saved");
            report.persisted = true;
        }
        Err(e) => warn!(error = %e, "Evaluation not persisted"),
    }

    if let Some(rec) = report.recommendation.as_ref().filter(|r| !r.signal.is_neutral()) {
        match ctx.notifier.send(&rec.text).await {
            Ok(()) => report.notified = true,
            Err(e) => warn!(error = %e, "Notification failed"),
        }
    }

    info!(
        symbol,
        signal = %report.signal(),
        ml_signal = %report.ml_signal,
        periods = report.periods.len(),
        notified = report.notified,
        "Analysis cycle complete"
    );
    Ok(report)
}

// ---------------------------------------------------------------------------
// Watch loop
// ---------------------------------------------------------------------------

/// Run cycles every `poll_interval_secs` until `progress` is cancelled
pub async fn run_watch_loop(ctx: &CycleContext, progress: &CycleProgress, rng: &mut (impl Rng + Send)) {
    info!(
        symbol = %ctx.config.market.symbol,
        interval_secs = ctx.config.poll_interval_secs,
        "Watch loop starting"
    );
    progress.reset();

    loop {
        if progress.is_cancelled() {
            info!("Watch loop cancelled");
            break;
        }

        match run_cycle(ctx, rng).await {
            Ok(report) => progress.record_report(report),
            Err(e) => {
                error!(error = %e, "Analysis cycle failed");
                progress.record_error(e.to_string());
            }
        }

        // Wait before next cycle
        for _ in 0..(ctx.config.poll_interval_secs * 2) {
            if progress.is_cancelled() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        }
    }

    store(&progress.status, CycleStatus::Idle);
    info!("Watch loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::NullNotifier;
    use crate::config::MarketSettings;
    use crate::engine::tests::make_candles;
    use async_trait::async_trait;
    use persistence::Database;
    use std::sync::atomic::AtomicUsize;

    struct FixedMarket {
        candles: Vec<Candle>,
    }

    #[async_trait]
    impl MarketData for FixedMarket {
        async fn candles(&self, _market: &MarketSettings) -> anyhow::Result<Vec<Candle>> {
            Ok(self.candles.clone())
        }

        async fn mark_price(&self, _symbol: &str) -> anyhow::Result<f64> {
            anyhow::bail!("mark price offline")
        }
    }

    /// Fails every fetch and cancels the loop on the second call
    struct FailingMarket {
        calls: AtomicUsize,
        progress: Arc<CycleProgress>,
    }

    #[async_trait]
    impl MarketData for FailingMarket {
        async fn candles(&self, _market: &MarketSettings) -> anyhow::Result<Vec<Candle>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) >= 1 {
                self.progress.cancel();
            }
            anyhow::bail!("exchange unreachable")
        }

        async fn mark_price(&self, _symbol: &str) -> anyhow::Result<f64> {
            Ok(1.0)
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        messages: RwLock<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, message: &str) -> anyhow::Result<()> {
            self.messages.write().unwrap().push(message.to_string());
            Ok(())
        }
    }

    fn wavy(n: usize) -> Vec<Candle> {
        let prices: Vec<f64> = (0..n)
            .map(|i| {
                let t = i as f64;
                200.0 + t * 0.05 + (t / 6.0).sin() * 8.0 + (t / 17.0).cos() * 4.0
            })
            .collect();
        make_candles(&prices)
    }

    async fn context(market: Arc<dyn MarketData>, notifier: Arc<dyn Notifier>) -> (Database, CycleContext) {
        let db = Database::in_memory().await.unwrap();
        let ctx = CycleContext {
            config: EngineConfig::default(),
            market,
            notifier,
            pool: db.pool_clone(),
        };
        (db, ctx)
    }

    #[test]
    fn test_sample_hash_is_stable() {
        let sample = TrainingSample {
            timestamp: 3600,
            features: vec![55.0, 120.0, 0.4, 900.0],
            label: Signal::Long,
        };
        let mut other = sample.clone();
        assert_eq!(sample_hash(&sample), sample_hash(&other));
        assert_eq!(sample_hash(&sample).len(), 64);
        other.features[2] = 0.41;
        assert_ne!(sample_hash(&sample), sample_hash(&other));
    }

    #[tokio::test]
    async fn test_cycle_evaluates_and_persists() {
        let market = Arc::new(FixedMarket { candles: wavy(260) });
        let (_db, ctx) = context(market, Arc::new(NullNotifier)).await;
        let mut rng = StdRng::seed_from_u64(42);

        let report = run_cycle(&ctx, &mut rng).await.unwrap();
        assert_eq!(report.candles, 260);
        // only the short period fits in 260 bars
        assert_eq!(report.periods.len(), 1);
        assert_eq!(report.periods[0].period, "short");
        assert!(report.sample_stored);
        assert!(report.persisted);
        assert!(report.trend.is_some());
        assert!(report.recommendation.is_some());
        // mark price failed, so the close is used
        assert_eq!(report.price, Some(wavy(260)[259].close));
        assert!(report.report_text.contains("Short-Term Performance"));

        let saved = EvaluationRepository::new(&ctx.pool).latest_cycle().await.unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].signal, report.signal().as_str());
    }

    #[tokio::test]
    async fn test_repeated_cycle_keeps_one_sample() {
        let market = Arc::new(FixedMarket { candles: wavy(120) });
        let (_db, ctx) = context(market, Arc::new(NullNotifier)).await;
        let mut rng = StdRng::seed_from_u64(7);

        let first = run_cycle(&ctx, &mut rng).await.unwrap();
        let second = run_cycle(&ctx, &mut rng).await.unwrap();
        assert!(first.sample_stored);
        assert!(!second.sample_stored);
        assert_eq!(SampleRepository::new(&ctx.pool).count().await.unwrap(), 1);

        // one sample balances to nothing, so the classifier stays untrained
        assert!(!second.training.trained);
        assert_eq!(second.ml_signal, Signal::Neutral);
        // short history: nothing evaluated, an unevaluated row is still written
        assert!(second.periods.is_empty());
        let rows = EvaluationRepository::new(&ctx.pool).latest(10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.period == "unevaluated"));
    }

    #[tokio::test]
    async fn test_directional_recommendation_is_notified() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (_db, mut ctx) = context(Arc::new(FixedMarket { candles: wavy(120) }), notifier.clone()).await;
        // a zero ratio threshold always picks long
        ctx.config.backtest.recommendation_threshold = 0.0;

        let report = run_cycle(&ctx, &mut StdRng::seed_from_u64(3)).await.unwrap();
        let rec = report.recommendation.as_ref().unwrap();
        assert_eq!(rec.signal, Signal::Long);
        assert_eq!(report.signal(), Signal::Long);
        assert!(report.notified);

        let messages = notifier.messages.read().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0], rec.text);
        assert!(messages[0].contains("LONG signal (buy)"));
    }

    #[tokio::test]
    async fn test_neutral_recommendation_is_not_notified() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (_db, mut ctx) = context(Arc::new(FixedMarket { candles: wavy(120) }), notifier.clone()).await;
        // ratios never exceed 1
        ctx.config.backtest.recommendation_threshold = 1.01;

        let report = run_cycle(&ctx, &mut StdRng::seed_from_u64(3)).await.unwrap();
        assert_eq!(report.recommendation.as_ref().unwrap().signal, Signal::Neutral);
        assert!(!report.notified);
        assert!(notifier.messages.read().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_closed_store_still_recommends() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (_db, mut ctx) = context(Arc::new(FixedMarket { candles: wavy(260) }), notifier.clone()).await;
        ctx.config.backtest.recommendation_threshold = 0.0;
        ctx.pool.close().await;

        let report = run_cycle(&ctx, &mut StdRng::seed_from_u64(5)).await.unwrap();
        assert!(!report.sample_stored);
        assert!(!report.persisted);
        assert!(!report.training.trained);
        assert!(report.training.error.is_some());
        assert!(matches!(report.prediction, Prediction::Unavailable { .. }));
        assert_eq!(report.ml_signal, Signal::Neutral);

        // evaluation and recommendation survive the storage failures
        assert_eq!(report.periods.len(), 1);
        assert_eq!(report.recommendation.as_ref().unwrap().signal, Signal::Long);
        assert!(report.notified);
        assert_eq!(notifier.messages.read().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_blocking_evaluation_matches_inline() {
        let config = EngineConfig::default();
        let candles = enrich(&wavy(260), &config.indicators);

        let (periods, returned) = evaluate_periods(candles.clone(), &config, 9).await.unwrap();
        assert_eq!(returned.len(), candles.len());
        assert_eq!(returned[259].close, candles[259].close);

        let inline = Orchestrator::new(&config.indicators, &config.backtest)
            .evaluate(&candles, &mut StdRng::seed_from_u64(9));
        assert_eq!(periods.len(), inline.len());
        assert_eq!(periods[0].result.final_capital, inline[0].result.final_capital);
        assert_eq!(periods[0].result.total_trades, inline[0].result.total_trades);

        let (skipped, _) = evaluate_periods(wavy(150), &config, 9).await.unwrap();
        assert!(skipped.is_empty());
    }

    #[tokio::test]
    async fn test_empty_market_is_an_error() {
        let (_db, ctx) = context(Arc::new(FixedMarket { candles: Vec::new() }), Arc::new(NullNotifier)).await;
        let err = run_cycle(&ctx, &mut StdRng::seed_from_u64(1)).await.unwrap_err();
        assert!(err.to_string().contains("not enough candle data"));
    }

    #[tokio::test]
    async fn test_watch_loop_survives_failures_until_cancelled() {
        let progress = Arc::new(CycleProgress::new());
        let market = Arc::new(FailingMarket {
            calls: AtomicUsize::new(0),
            progress: progress.clone(),
        });
        let (_db, mut ctx) = context(market.clone(), Arc::new(NullNotifier)).await;
        ctx.config.poll_interval_secs = 0;

        run_watch_loop(&ctx, &progress, &mut StdRng::seed_from_u64(1)).await;

        assert_eq!(market.calls.load(Ordering::SeqCst), 2);
        assert_eq!(progress.status(), CycleStatus::Idle);
        assert!(progress.error_message().unwrap().contains("exchange unreachable"));
        assert!(progress.last_report().is_none());
    }
}
