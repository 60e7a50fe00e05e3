//! Durable record of every listing URL ever notified.
//!
//! Rows are written once per URL and never updated. The unique constraint on `url`
//! makes the membership check and the insert a single statement, so two callers
//! racing on the same URL get exactly one `true` between them.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use jobwatch_core::JobRecord;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("schema migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("encoding matched keywords: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StoreError {
    /// Busy/locked database or an exhausted pool; worth one more try.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(sqlx::Error::PoolTimedOut) => true,
            StoreError::Database(sqlx::Error::Database(db)) => {
                db.code().is_some_and(|code| is_busy_code(&code))
            }
            _ => false,
        }
    }
}

/// SQLITE_BUSY, SQLITE_LOCKED and their extended codes.
fn is_busy_code(code: &str) -> bool {
    matches!(code, "5" | "6" | "261" | "262" | "517" | "773")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceCount {
    pub source: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayCount {
    /// `YYYY-MM-DD` in UTC.
    pub day: String,
    pub count: u64,
}

#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Creates the schema if it does not exist yet.
    async fn init(&self) -> Result<(), StoreError>;

    async fn exists(&self, url: &str) -> Result<bool, StoreError>;

    /// Returns `true` only for the call that actually created the row.
    async fn insert_if_absent(&self, record: &JobRecord) -> Result<bool, StoreError>;

    async fn total(&self) -> Result<u64, StoreError>;

    async fn count_by_source(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<SourceCount>, StoreError>;

    /// Most recent day first.
    async fn count_by_day(&self, since: DateTime<Utc>) -> Result<Vec<DayCount>, StoreError>;
}

#[derive(Debug, Clone)]
pub struct SqliteDedupStore {
    pool: SqlitePool,
}

impl SqliteDedupStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        // An in-memory database lives and dies with its connection.
        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(4)
                .connect_with(options)
                .await?
        };

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn stamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[async_trait]
impl DedupStore for SqliteDedupStore {
    async fn init(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("dedup store schema ready");
        Ok(())
    }

    async fn exists(&self, url: &str) -> Result<bool, StoreError> {
        let row: Option<i64> = sqlx::query_scalar("SELECT 1 FROM seen_jobs WHERE url = ?1 LIMIT 1")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn insert_if_absent(&self, record: &JobRecord) -> Result<bool, StoreError> {
        let keywords = serde_json::to_string(&record.matched_keywords)?;
        let result = sqlx::query(
            "INSERT INTO seen_jobs \
             (url, title, company, location, source, posted_date, found_at, matched_keywords) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
             ON CONFLICT(url) DO NOTHING",
        )
        .bind(&record.url)
        .bind(&record.title)
        .bind(&record.company)
        .bind(&record.location)
        .bind(record.source.as_str())
        .bind(&record.posted_date)
        .bind(stamp(record.found_at))
        .bind(keywords)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn total(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM seen_jobs")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn count_by_source(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<SourceCount>, StoreError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT source, COUNT(*) FROM seen_jobs \
             WHERE ?1 IS NULL OR found_at >= ?1 \
             GROUP BY source ORDER BY COUNT(*) DESC, source ASC",
        )
        .bind(since.map(stamp))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(source, count)| SourceCount {
                source,
                count: count.max(0) as u64,
            })
            .collect())
    }

    async fn count_by_day(&self, since: DateTime<Utc>) -> Result<Vec<DayCount>, StoreError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT substr(found_at, 1, 10) AS day, COUNT(*) FROM seen_jobs \
             WHERE found_at >= ?1 GROUP BY day ORDER BY day DESC",
        )
        .bind(stamp(since))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(day, count)| DayCount {
                day,
                count: count.max(0) as u64,
            })
            .collect())
    }
}

/// Process-local store for dry runs: nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryDedupStore {
    rows: Mutex<HashMap<String, JobRecord>>,
}

impl MemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> std::sync::MutexGuard<'_, HashMap<String, JobRecord>> {
        // A panic while holding the lock cannot leave a half-written row behind.
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl DedupStore for MemoryDedupStore {
    async fn init(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn exists(&self, url: &str) -> Result<bool, StoreError> {
        Ok(self.rows().contains_key(url))
    }

    async fn insert_if_absent(&self, record: &JobRecord) -> Result<bool, StoreError> {
        let mut rows = self.rows();
        if rows.contains_key(&record.url) {
            return Ok(false);
        }
        rows.insert(record.url.clone(), record.clone());
        Ok(true)
    }

    async fn total(&self) -> Result<u64, StoreError> {
        Ok(self.rows().len() as u64)
    }

    async fn count_by_source(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<SourceCount>, StoreError> {
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for record in self.rows().values() {
            if since.map_or(true, |s| record.found_at >= s) {
                *counts.entry(record.source.as_str().to_string()).or_default() += 1;
            }
        }
        let mut out: Vec<SourceCount> = counts
            .into_iter()
            .map(|(source, count)| SourceCount { source, count })
            .collect();
        out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.source.cmp(&b.source)));
        Ok(out)
    }

    async fn count_by_day(&self, since: DateTime<Utc>) -> Result<Vec<DayCount>, StoreError> {
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for record in self.rows().values().filter(|r| r.found_at >= since) {
            *counts
                .entry(record.found_at.format("%Y-%m-%d").to_string())
                .or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .rev()
            .map(|(day, count)| DayCount { day, count })
            .collect())
    }
}
