//! Database schema definitions

/// SQL to create all tables
pub const CREATE_TABLES: &str = r#"
-- Labelled feature vectors collected once per analysis cycle
CREATE TABLE IF NOT EXISTS training_samples (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sample_hash TEXT NOT NULL UNIQUE,
    candle_timestamp INTEGER NOT NULL,
    features TEXT NOT NULL,
    label TEXT NOT NULL,
    created_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- One row per evaluated period per analysis cycle
CREATE TABLE IF NOT EXISTS evaluations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    cycle_at INTEGER NOT NULL,
    symbol TEXT NOT NULL,
    period TEXT NOT NULL,
    days INTEGER NOT NULL DEFAULT 0,
    total_trades INTEGER NOT NULL DEFAULT 0,
    win_rate REAL NOT NULL DEFAULT 0,
    sharpe_ratio REAL NOT NULL DEFAULT 0,
    max_drawdown REAL NOT NULL DEFAULT 0,
    drawdown_rate REAL NOT NULL DEFAULT 0,
    final_capital REAL NOT NULL DEFAULT 0,
    params_json TEXT,
    signal TEXT NOT NULL DEFAULT 'neutral',
    created_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- ========== INDEXES ==========

CREATE INDEX IF NOT EXISTS idx_samples_timestamp ON training_samples(candle_timestamp);
CREATE INDEX IF NOT EXISTS idx_evaluations_cycle ON evaluations(cycle_at DESC);
CREATE INDEX IF NOT EXISTS idx_evaluations_symbol ON evaluations(symbol, period)
"#;

/// Column additions applied after table creation; "duplicate column" errors are ignored
pub const MIGRATIONS: &[&str] = &["ALTER TABLE evaluations ADD COLUMN monte_carlo_json TEXT"];
