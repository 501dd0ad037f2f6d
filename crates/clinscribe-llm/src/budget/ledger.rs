//! Usage ledger - persisted history of every billed generation
//!
//! The `ai_usage` table is read by external analytics, so its column names
//! are part of the public contract.

use crate::error::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use tracing::{debug, info, instrument};

/// One persisted usage row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Backend that served the request
    pub provider: String,
    /// Model name
    pub model: String,
    /// Total input tokens
    pub input_tokens: u64,
    /// Output tokens
    pub output_tokens: u64,
    /// Input tokens read from cache
    pub cache_read_tokens: u64,
    /// Input tokens written to cache
    pub cache_creation_tokens: u64,
    /// Computed cost in USD
    pub cost_usd: f64,
    /// Task type tag
    pub task_type: String,
    /// Generation duration
    pub duration_ms: u64,
    /// Owning organization, when known
    pub organization_id: Option<String>,
    /// Record time
    pub created_at: DateTime<Utc>,
}

/// Storage backend for usage records
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait UsageLedger: Send + Sync {
    /// Append a record
    async fn append(&self, record: &UsageRecord) -> Result<()>;

    /// Sum of `cost_usd` for records at or after `since`
    async fn spend_since(&self, since: DateTime<Utc>) -> Result<f64>;

    /// Most recent records, newest first
    async fn recent(&self, limit: u32) -> Result<Vec<UsageRecord>>;
}

fn timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn map_db_err(err: sqlx::Error) -> Error {
    let message = err.to_string();
    if message.contains("no such table") {
        Error::LedgerMissing
    } else {
        Error::Ledger(message)
    }
}

/// SQLite-backed ledger
#[derive(Clone)]
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    /// Open (creating if needed) a ledger database file and run migrations
    pub async fn from_path(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Ledger(format!("failed to create directory: {e}")))?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await
            .map_err(map_db_err)?;

        let ledger = Self { pool };
        ledger.run_migrations().await?;

        info!("Usage ledger initialized at {}", db_path.display());
        Ok(ledger)
    }

    /// Connect to an existing database without creating the table
    pub async fn connect_existing(db_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
            .map_err(map_db_err)?;
        Ok(Self { pool })
    }

    /// In-memory ledger (for testing)
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(map_db_err)?;

        let ledger = Self { pool };
        ledger.run_migrations().await?;
        debug!("In-memory usage ledger initialized");
        Ok(ledger)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ai_usage (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                provider TEXT NOT NULL,
                model TEXT NOT NULL,
                input_tokens INTEGER NOT NULL DEFAULT 0,
                output_tokens INTEGER NOT NULL DEFAULT 0,
                cache_read_tokens INTEGER NOT NULL DEFAULT 0,
                cache_creation_tokens INTEGER NOT NULL DEFAULT 0,
                cost_usd REAL NOT NULL DEFAULT 0,
                task_type TEXT NOT NULL,
                duration_ms INTEGER NOT NULL DEFAULT 0,
                organization_id TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_ai_usage_created
            ON ai_usage(created_at)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;

        debug!("Ledger migrations completed");
        Ok(())
    }
}

#[async_trait::async_trait]
impl UsageLedger for SqliteLedger {
    #[instrument(skip(self, record), fields(model = %record.model))]
    async fn append(&self, record: &UsageRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ai_usage (
                provider, model, input_tokens, output_tokens,
                cache_read_tokens, cache_creation_tokens, cost_usd,
                task_type, duration_ms, organization_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&record.provider)
        .bind(&record.model)
        .bind(record.input_tokens as i64)
        .bind(record.output_tokens as i64)
        .bind(record.cache_read_tokens as i64)
        .bind(record.cache_creation_tokens as i64)
        .bind(record.cost_usd)
        .bind(&record.task_type)
        .bind(record.duration_ms as i64)
        .bind(&record.organization_id)
        .bind(timestamp(&record.created_at))
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    async fn spend_since(&self, since: DateTime<Utc>) -> Result<f64> {
        let total: f64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(cost_usd), 0.0) FROM ai_usage WHERE created_at >= ?1",
        )
        .bind(timestamp(&since))
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(total)
    }

    async fn recent(&self, limit: u32) -> Result<Vec<UsageRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT provider, model, input_tokens, output_tokens,
                   cache_read_tokens, cache_creation_tokens, cost_usd,
                   task_type, duration_ms, organization_id, created_at
            FROM ai_usage
            ORDER BY created_at DESC, id DESC
            LIMIT ?1
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;

        rows.into_iter().map(row_to_record).collect()
    }
}

fn row_to_record(row: sqlx::sqlite::SqliteRow) -> Result<UsageRecord> {
    let get_i64 = |col: &str| -> Result<u64> {
        row.try_get::<i64, _>(col)
            .map(|v| v.max(0) as u64)
            .map_err(map_db_err)
    };

    let created_at: String = row.try_get("created_at").map_err(map_db_err)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| Error::Ledger(format!("bad created_at: {e}")))?
        .with_timezone(&Utc);

    Ok(UsageRecord {
        provider: row.try_get("provider").map_err(map_db_err)?,
        model: row.try_get("model").map_err(map_db_err)?,
        input_tokens: get_i64("input_tokens")?,
        output_tokens: get_i64("output_tokens")?,
        cache_read_tokens: get_i64("cache_read_tokens")?,
        cache_creation_tokens: get_i64("cache_creation_tokens")?,
        cost_usd: row.try_get("cost_usd").map_err(map_db_err)?,
        task_type: row.try_get("task_type").map_err(map_db_err)?,
        duration_ms: get_i64("duration_ms")?,
        organization_id: row.try_get("organization_id").map_err(map_db_err)?,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(cost: f64, created_at: DateTime<Utc>) -> UsageRecord {
        UsageRecord {
            provider: "hosted".to_string(),
            model: "claude-sonnet-4-5-20250929".to_string(),
            input_tokens: 1200,
            output_tokens: 300,
            cache_read_tokens: 1000,
            cache_creation_tokens: 0,
            cost_usd: cost,
            task_type: "clinical_summary".to_string(),
            duration_ms: 840,
            organization_id: Some("org-1".to_string()),
            created_at,
        }
    }

    #[tokio::test]
    async fn test_append_and_sum() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        let now = Utc::now();

        ledger.append(&record(0.25, now - Duration::days(2))).await.unwrap();
        ledger.append(&record(0.50, now)).await.unwrap();
        ledger.append(&record(0.75, now)).await.unwrap();

        let today = ledger.spend_since(now - Duration::hours(1)).await.unwrap();
        assert!((today - 1.25).abs() < 1e-9);

        let all = ledger.spend_since(now - Duration::days(30)).await.unwrap();
        assert!((all - 1.50).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_recent_is_newest_first() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        let now = Utc::now();
        ledger.append(&record(0.1, now - Duration::minutes(5))).await.unwrap();
        ledger.append(&record(0.2, now)).await.unwrap();

        let recent = ledger.recent(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!((recent[0].cost_usd - 0.2).abs() < 1e-9);
        assert_eq!(recent[0].organization_id.as_deref(), Some("org-1"));
        assert_eq!(recent[0].cache_read_tokens, 1000);
    }

    #[tokio::test]
    async fn test_missing_table_is_reported() {
        let ledger = SqliteLedger::connect_existing("sqlite::memory:").await.unwrap();
        let err = ledger.spend_since(Utc::now()).await.unwrap_err();
        assert!(matches!(err, Error::LedgerMissing));
    }

    #[tokio::test]
    async fn test_from_path_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("usage.db");

        let ledger = SqliteLedger::from_path(&path).await.unwrap();
        ledger.append(&record(0.3, Utc::now())).await.unwrap();

        assert!(path.exists());
        assert_eq!(ledger.recent(5).await.unwrap().len(), 1);
    }
}
