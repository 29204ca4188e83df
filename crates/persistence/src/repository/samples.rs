//! Training sample repository

use crate::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// A stored classifier sample; `features` is a JSON array of numbers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct SampleRecord {
    pub id: Option<i64>,
    pub sample_hash: String,
    pub candle_timestamp: i64,
    pub features: String,
    pub label: String,
    pub created_at: Option<i64>,
}

impl SampleRecord {
    pub fn new(sample_hash: String, candle_timestamp: i64, features: String, label: String) -> Self {
        Self {
            id: None,
            sample_hash,
            candle_timestamp,
            features,
            label,
            created_at: None,
        }
    }

    pub fn from_values(sample_hash: String, candle_timestamp: i64, features: &[f64], label: &str) -> DbResult<Self> {
        let features = serde_json::to_string(features).map_err(|e| DbError::Query(e.to_string()))?;
        Ok(Self::new(sample_hash, candle_timestamp, features, label.to_string()))
    }

    /// Decode the stored feature array
    pub fn feature_values(&self) -> DbResult<Vec<f64>> {
        serde_json::from_str(&self.features)
            .map_err(|e| DbError::Query(format!("sample {}: {e}", self.sample_hash)))
    }
}

pub struct SampleRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SampleRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a sample (INSERT OR IGNORE by sample_hash).
    /// Returns false when an identical sample was already stored.
    pub async fn save(&self, record: &SampleRecord) -> DbResult<bool> {
        let result = sqlx::query(
            r#"INSERT OR IGNORE INTO training_samples
                (sample_hash, candle_timestamp, features, label)
               VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&record.sample_hash)
        .bind(record.candle_timestamp)
        .bind(&record.features)
        .bind(&record.label)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// All samples, oldest candle first
    pub async fn load_all(&self) -> DbResult<Vec<SampleRecord>> {
        let records = sqlx::query_as::<_, SampleRecord>(
            "SELECT * FROM training_samples ORDER BY candle_timestamp ASC, id ASC",
        )
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    pub async fn count(&self) -> DbResult<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM training_samples")
            .fetch_one(self.pool)
            .await?;
        Ok(row.0)
    }

    /// Delete every sample, returning how many were removed
    pub async fn clear(&self) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM training_samples")
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
