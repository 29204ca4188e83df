//! Evaluation history repository

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// One evaluated period from one analysis cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct EvaluationRecord {
    pub id: Option<i64>,
    /// Unix seconds when the cycle ran
    pub cycle_at: i64,
    pub symbol: String,
    pub period: String,
    pub days: i64,
    pub total_trades: i64,
    pub win_rate: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub drawdown_rate: f64,
    pub final_capital: f64,
    pub params_json: Option<String>,
    /// Final signal of the cycle
    pub signal: String,
    pub monte_carlo_json: Option<String>,
    pub created_at: Option<i64>,
}

pub struct EvaluationRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> EvaluationRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn save(&self, record: &EvaluationRecord) -> DbResult<i64> {
        let result = sqlx::query(
            r#"INSERT INTO evaluations
                (cycle_at, symbol, period, days, total_trades, win_rate, sharpe_ratio,
                 max_drawdown, drawdown_rate, final_capital, params_json, signal,
                 monte_carlo_json)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(record.cycle_at)
        .bind(&record.symbol)
        .bind(&record.period)
        .bind(record.days)
        .bind(record.total_trades)
        .bind(record.win_rate)
        .bind(record.sharpe_ratio)
        .bind(record.max_drawdown)
        .bind(record.drawdown_rate)
        .bind(record.final_capital)
        .bind(&record.params_json)
        .bind(&record.signal)
        .bind(&record.monte_carlo_json)
        .execute(self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Most recent rows first
    pub async fn latest(&self, limit: i64) -> DbResult<Vec<EvaluationRecord>> {
        let records = sqlx::query_as::<_, EvaluationRecord>(
            "SELECT * FROM evaluations ORDER BY cycle_at DESC, id DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    /// Every row written by the most recent cycle, in insertion order
    pub async fn latest_cycle(&self) -> DbResult<Vec<EvaluationRecord>> {
        let records = sqlx::query_as::<_, EvaluationRecord>(
            r#"SELECT * FROM evaluations
               WHERE cycle_at = (SELECT MAX(cycle_at) FROM evaluations)
               ORDER BY id ASC"#,
        )
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }
}
