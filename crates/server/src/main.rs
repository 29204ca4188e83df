//! Signal Desk: OHLCV backtesting and trading-signal service
//!
//! Usage:
//!   signal-desk analyze [--json]     - Run one analysis cycle and print the report
//!   signal-desk watch                - Repeat the cycle every poll interval
//!   signal-desk train                - Retrain the classifier from stored samples
//!   signal-desk samples [--reset]    - Show or clear the training sample store
//!   signal-desk serve --port 3001    - Launch the HTTP API

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use clap::{Parser, Subcommand};
use engine::{
    notifier_from_env, run_cycle, run_watch_loop, train_advisor, BinanceClient, CycleContext,
    CycleProgress, CycleReport, EngineConfig, Prediction,
};
use persistence::repository::{EvaluationRepository, SampleRepository};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

const APP_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH"));
const DEFAULT_DB_PATH: &str = "data/signals.db";

#[derive(Parser)]
#[command(name = "signal-desk")]
#[command(about = "Backtesting and trading-signal engine for a single symbol", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON config file; defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one analysis cycle
    Analyze {
        /// Print the full cycle report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run analysis cycles until Ctrl+C
    Watch,
    /// Retrain the classifier from stored samples
    Train,
    /// Show the training sample store
    Samples {
        /// Delete every stored sample
        #[arg(long)]
        reset: bool,
    },
    /// Launch the HTTP API
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value_t = 3001)]
        port: u16,
    },
}

#[derive(Clone)]
struct AppState {
    ctx: CycleContext,
    db: Arc<persistence::Database>,
    progress: Arc<CycleProgress>,
    /// Held while a cycle or training run is in flight
    busy: Arc<Mutex<()>>,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,signal_desk=debug,sqlx=warn")
    } else {
        EnvFilter::new("info,engine=info,signal_desk=info,sqlx=warn")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => {
            let config = EngineConfig::from_json_file(path)?;
            info!(path = %path.display(), "Config loaded");
            Ok(config)
        }
        None => Ok(EngineConfig::default()),
    }
}

async fn open_database() -> anyhow::Result<(persistence::Database, String)> {
    let db_path =
        std::env::var("SIGNAL_DESK_DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());
    let db = persistence::Database::new(&db_path).await.map_err(|e| {
        error!("Failed to initialize database: {}", e);
        anyhow::anyhow!("Database initialization failed: {}", e)
    })?;
    Ok((db, db_path))
}

fn build_context(config: EngineConfig, db: &persistence::Database) -> CycleContext {
    CycleContext {
        config,
        market: Arc::new(BinanceClient::new()),
        notifier: notifier_from_env(),
        pool: db.pool_clone(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dotenvy::dotenv().ok();

    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Analyze { json } => cmd_analyze(config, json).await?,
        Commands::Watch => cmd_watch(config).await?,
        Commands::Train => cmd_train(config).await?,
        Commands::Samples { reset } => cmd_samples(reset).await?,
        Commands::Serve { host, port } => cmd_serve(config, &host, port).await?,
    }

    Ok(())
}

// ============================================================================
// CLI commands
// ============================================================================

fn describe_prediction(prediction: &Prediction) -> String {
    match prediction {
        Prediction::Predicted { label, confidence } => {
            format!("{} ({:.0}% confidence)", label, confidence * 100.0)
        }
        Prediction::Unavailable { reason } => format!("unavailable ({reason})"),
    }
}

fn print_report(report: &CycleReport) {
    println!("\n=== Signal Desk v{} ===", APP_VERSION);
    println!(
        "Symbol: {} | Bars: {} | Price: {}",
        report.symbol,
        report.candles,
        report
            .price
            .map_or_else(|| "n/a".to_string(), |p| format!("{p:.2}"))
    );
    if let Some(live) = &report.live_signal {
        let levels = live
            .trade
            .as_ref()
            .and_then(|t| t.stop_loss.zip(t.take_profit))
            .map_or_else(String::new, |(sl, tp)| format!(" | SL {sl:.2} | TP {tp:.2}"));
        println!("Strategy vote: {}{}", live.decision.signal, levels);
    }
    println!(
        "Classifier: {} -> {}",
        describe_prediction(&report.prediction),
        report.ml_signal
    );
    println!("Final signal: {}\n", report.signal());
    println!("{}", report.report_text);
}

async fn cmd_analyze(config: EngineConfig, json: bool) -> anyhow::Result<()> {
    let (db, _) = open_database().await?;
    let ctx = build_context(config, &db);
    let mut rng = StdRng::from_entropy();

    let report = run_cycle(&ctx, &mut rng).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

async fn cmd_watch(config: EngineConfig) -> anyhow::Result<()> {
    let (db, db_path) = open_database().await?;
    println!("\n=== Signal Desk v{} ===", APP_VERSION);
    println!(
        "Watching {} {} every {}s | Database: {}",
        config.market.symbol, config.market.interval, config.poll_interval_secs, db_path
    );
    println!("Press Ctrl+C to stop\n");

    let ctx = build_context(config, &db);
    let progress = Arc::new(CycleProgress::new());

    let progress_for_ctrlc = progress.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl+C received, requesting cancel...");
        progress_for_ctrlc.cancel();
    });

    let mut rng = StdRng::from_entropy();
    run_watch_loop(&ctx, &progress, &mut rng).await;

    info!(
        cycles = progress
            .cycles_completed
            .load(std::sync::atomic::Ordering::Relaxed),
        "Watch finished"
    );
    Ok(())
}

async fn cmd_train(config: EngineConfig) -> anyhow::Result<()> {
    let (db, _) = open_database().await?;
    let mut rng = StdRng::from_entropy();
    let (_, summary) = train_advisor(db.pool(), &config, &mut rng).await?;

    println!(
        "Samples stored: {} | used after balancing: {}",
        summary.stored, summary.used
    );
    match &summary.error {
        None => println!("Classifier trained"),
        Some(reason) => println!("Classifier not trained: {reason}"),
    }
    Ok(())
}

async fn cmd_samples(reset: bool) -> anyhow::Result<()> {
    let (db, db_path) = open_database().await?;
    let repo = SampleRepository::new(db.pool());

    if reset {
        let removed = repo.clear().await?;
        info!(removed, "Training samples cleared");
        println!("Removed {} samples from {}", removed, db_path);
    } else {
        println!("{} samples stored in {}", repo.count().await?, db_path);
    }
    Ok(())
}

// ============================================================================
// Serve command (Axum web server)
// ============================================================================

async fn cmd_serve(config: EngineConfig, host: &str, port: u16) -> anyhow::Result<()> {
    info!("Signal Desk v{} starting...", APP_VERSION);

    let (db, db_path) = open_database().await?;
    let ctx = build_context(config, &db);

    let state = AppState {
        ctx,
        db: Arc::new(db),
        progress: Arc::new(CycleProgress::new()),
        busy: Arc::new(Mutex::new(())),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new().nest("/api", api_routes(state)).layer(cors);

    let addr: std::net::SocketAddr = format!("{}:{}", host, port).parse()?;
    println!("\n=== Signal Desk v{} ===", APP_VERSION);
    println!("Listening on http://{}", addr);
    println!("\nEndpoints:");
    println!("  GET  /api/health           - Health check");
    println!("  POST /api/analyze          - Run one analysis cycle");
    println!("  GET  /api/analysis/latest  - Most recent cycle");
    println!("  GET  /api/evaluations      - Stored evaluation history");
    println!("  POST /api/train            - Retrain the classifier");
    println!("\n  Database: {}", db_path);
    println!("\nPress Ctrl+C to stop\n");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api_health))
        .route("/analyze", post(api_analyze))
        .route("/analysis/latest", get(api_latest_analysis))
        .route("/evaluations", get(api_evaluations))
        .route("/train", post(api_train))
        .with_state(state)
}

// ============================================================================
// API Handlers
// ============================================================================

type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(status: StatusCode, message: impl std::fmt::Display) -> ApiError {
    (
        status,
        Json(serde_json::json!({ "success": false, "message": message.to_string() })),
    )
}

/// GET /api/health
async fn api_health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "signal-desk",
        "version": APP_VERSION,
        "symbol": state.ctx.config.market.symbol,
        "cycles_completed": state
            .progress
            .cycles_completed
            .load(std::sync::atomic::Ordering::Relaxed),
    }))
}

/// POST /api/analyze: run one cycle and return its report
async fn api_analyze(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let Ok(_guard) = state.busy.try_lock() else {
        return Err(api_error(StatusCode::CONFLICT, "An analysis is already running"));
    };

    info!(symbol = %state.ctx.config.market.symbol, "Analysis requested via API");
    let mut rng = StdRng::from_entropy();
    let report = run_cycle(&state.ctx, &mut rng).await.map_err(|e| {
        error!(error = %e, "Analysis cycle failed");
        api_error(StatusCode::BAD_GATEWAY, e)
    })?;

    let body = serde_json::to_value(&report)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?;
    state.progress.record_report(report);
    Ok(Json(body))
}

/// GET /api/analysis/latest: last in-memory report, else the last stored cycle
async fn api_latest_analysis(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if let Some(report) = state.progress.last_report() {
        return Ok(Json(serde_json::json!({ "source": "memory", "report": report })));
    }

    let rows = EvaluationRepository::new(state.db.pool())
        .latest_cycle()
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?;
    if rows.is_empty() {
        return Err(api_error(StatusCode::NOT_FOUND, "No analysis has run yet"));
    }
    Ok(Json(serde_json::json!({ "source": "database", "evaluations": rows })))
}

#[derive(Debug, Deserialize)]
struct EvaluationsQuery {
    limit: Option<i64>,
}

/// GET /api/evaluations?limit=50
async fn api_evaluations(
    State(state): State<AppState>,
    Query(query): Query<EvaluationsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let rows = EvaluationRepository::new(state.db.pool())
        .latest(limit)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?;
    Ok(Json(serde_json::json!({ "count": rows.len(), "evaluations": rows })))
}

/// POST /api/train: retrain from stored samples and report the outcome
async fn api_train(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let Ok(_guard) = state.busy.try_lock() else {
        return Err(api_error(StatusCode::CONFLICT, "An analysis is already running"));
    };

    let mut rng = StdRng::from_entropy();
    let (_, summary) = train_advisor(state.db.pool(), &state.ctx.config, &mut rng)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?;
    Ok(Json(serde_json::json!({ "success": summary.trained, "training": summary })))
}
