//! Acquisition ledger using SQLite with sqlx.
//!
//! Records every published artifact and every scheduler run so the status
//! endpoint can report what the service has done since it was deployed.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};
use uuid::Uuid;
use wind_common::ValidTime;

const SCHEMA: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS artifacts (
        valid_time TEXT PRIMARY KEY,
        cycle TEXT NOT NULL,
        forecast_hour INTEGER NOT NULL,
        bytes INTEGER NOT NULL,
        stored_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS runs (
        id TEXT PRIMARY KEY,
        started_at TEXT NOT NULL,
        finished_at TEXT NOT NULL,
        cycle TEXT,
        outcome TEXT NOT NULL,
        stored INTEGER DEFAULT 0,
        failed INTEGER DEFAULT 0
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_runs_started ON runs(started_at)",
];

/// How a scheduler run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Acquired,
    AlreadyCurrent,
    NoUpstreamData,
    BaseFailed,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Acquired => "acquired",
            Self::AlreadyCurrent => "already_current",
            Self::NoUpstreamData => "no_upstream_data",
            Self::BaseFailed => "base_failed",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "acquired" => Self::Acquired,
            "already_current" => Self::AlreadyCurrent,
            "no_upstream_data" => Self::NoUpstreamData,
            _ => Self::BaseFailed,
        }
    }
}

/// A published artifact.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactRecord {
    pub valid_time: String,
    pub cycle: String,
    pub forecast_hour: u32,
    pub bytes: u64,
    pub stored_at: DateTime<Utc>,
}

impl ArtifactRecord {
    pub fn new(valid_time: &ValidTime, bytes: u64) -> Self {
        Self {
            valid_time: valid_time.label(),
            cycle: valid_time.cycle.label(),
            forecast_hour: valid_time.offset.hours(),
            bytes,
            stored_at: Utc::now(),
        }
    }
}

/// One scheduler run.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cycle: Option<String>,
    pub outcome: RunOutcome,
    pub stored: u32,
    pub failed: u32,
}

impl RunRecord {
    pub fn new(
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        cycle: Option<String>,
        outcome: RunOutcome,
        stored: u32,
        failed: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at,
            finished_at,
            cycle,
            outcome,
            stored,
            failed,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LedgerStats {
    pub artifacts: u64,
    pub total_bytes: u64,
    pub runs: u64,
    pub last_acquired_at: Option<DateTime<Utc>>,
}

/// Persistent record of artifacts and runs.
#[derive(Clone)]
pub struct AcquisitionLedger {
    pool: SqlitePool,
}

impl AcquisitionLedger {
    /// Open or create the ledger database at the given path.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.with_context(|| {
                    format!("Failed to create ledger directory: {}", parent.display())
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to open SQLite database")?;

        Self::migrate(&pool).await?;

        info!(path = %path.display(), "Opened acquisition ledger");
        Ok(Self { pool })
    }

    /// Open an in-memory database (for testing).
    pub async fn open_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(pool)
                .await
                .context("Failed to create ledger schema")?;
        }
        Ok(())
    }

    /// Record a published artifact. An existing entry is kept.
    pub async fn record_artifact(&self, record: &ArtifactRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO artifacts (valid_time, cycle, forecast_hour, bytes, stored_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.valid_time)
        .bind(&record.cycle)
        .bind(record.forecast_hour as i64)
        .bind(record.bytes as i64)
        .bind(record.stored_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(valid_time = %record.valid_time, "Recorded artifact");
        Ok(())
    }

    pub async fn record_run(&self, run: &RunRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO runs (id, started_at, finished_at, cycle, outcome, stored, failed)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.id.to_string())
        .bind(run.started_at.to_rfc3339())
        .bind(run.finished_at.to_rfc3339())
        .bind(&run.cycle)
        .bind(run.outcome.as_str())
        .bind(run.stored as i64)
        .bind(run.failed as i64)
        .execute(&self.pool)
        .await?;

        debug!(run_id = %run.id, outcome = run.outcome.as_str(), "Recorded run");
        Ok(())
    }

    /// Most recent runs first.
    pub async fn recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let rows: Vec<(String, String, String, Option<String>, String, i64, i64)> = sqlx::query_as(
            r#"
            SELECT id, started_at, finished_at, cycle, outcome, stored, failed
            FROM runs
            ORDER BY started_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let runs = rows
            .into_iter()
            .map(|row| RunRecord {
                id: Uuid::parse_str(&row.0).unwrap_or_default(),
                started_at: parse_timestamp(&row.1),
                finished_at: parse_timestamp(&row.2),
                cycle: row.3,
                outcome: RunOutcome::from_str(&row.4),
                stored: row.5 as u32,
                failed: row.6 as u32,
            })
            .collect();

        Ok(runs)
    }

    /// Most recently stored artifacts first.
    pub async fn recent_artifacts(&self, limit: usize) -> Result<Vec<ArtifactRecord>> {
        let rows: Vec<(String, String, i64, i64, String)> = sqlx::query_as(
            r#"
            SELECT valid_time, cycle, forecast_hour, bytes, stored_at
            FROM artifacts
            ORDER BY stored_at DESC, valid_time DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let records = rows
            .into_iter()
            .map(|row| ArtifactRecord {
                valid_time: row.0,
                cycle: row.1,
                forecast_hour: row.2 as u32,
                bytes: row.3 as u64,
                stored_at: parse_timestamp(&row.4),
            })
            .collect();

        Ok(records)
    }

    pub async fn stats(&self) -> Result<LedgerStats> {
        let artifacts: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM artifacts")
            .fetch_one(&self.pool)
            .await?;

        let total_bytes: (i64,) = sqlx::query_as("SELECT COALESCE(SUM(bytes), 0) FROM artifacts")
            .fetch_one(&self.pool)
            .await?;

        let runs: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM runs")
            .fetch_one(&self.pool)
            .await?;

        let last_acquired: Option<(String,)> = sqlx::query_as(
            "SELECT finished_at FROM runs WHERE outcome = 'acquired' ORDER BY finished_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(LedgerStats {
            artifacts: artifacts.0 as u64,
            total_bytes: total_bytes.0 as u64,
            runs: runs.0 as u64,
            last_acquired_at: last_acquired.map(|row| parse_timestamp(&row.0)),
        })
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use test_utils::temp_test_dir;
    use wind_common::{Cycle, ForecastOffset};

    fn valid_time(label: &str, hours: u32) -> ValidTime {
        ValidTime::new(Cycle::parse_label(label).unwrap(), ForecastOffset::new(hours))
    }

    #[tokio::test]
    async fn test_record_artifacts_and_stats() {
        let ledger = AcquisitionLedger::open_memory().await.unwrap();

        ledger
            .record_artifact(&ArtifactRecord::new(&valid_time("2024011500", 0), 1000))
            .await
            .unwrap();
        ledger
            .record_artifact(&ArtifactRecord::new(&valid_time("2024011500", 6), 500))
            .await
            .unwrap();
        // Duplicate valid time is ignored
        ledger
            .record_artifact(&ArtifactRecord::new(&valid_time("2024011500", 6), 9999))
            .await
            .unwrap();

        let stats = ledger.stats().await.unwrap();
        assert_eq!(stats.artifacts, 2);
        assert_eq!(stats.total_bytes, 1500);
        assert_eq!(stats.runs, 0);
        assert!(stats.last_acquired_at.is_none());

        let recent = ledger.recent_artifacts(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        let f006 = recent.iter().find(|r| r.forecast_hour == 6).unwrap();
        assert_eq!(f006.valid_time, "2024011506");
        assert_eq!(f006.cycle, "2024011500");
    }

    #[tokio::test]
    async fn test_runs_most_recent_first() {
        let ledger = AcquisitionLedger::open_memory().await.unwrap();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 15, 0, 5, 0).unwrap();

        let first = RunRecord::new(
            t0,
            t0 + Duration::minutes(3),
            Some("2024011500".to_string()),
            RunOutcome::Acquired,
            41,
            0,
        );
        let second = RunRecord::new(
            t0 + Duration::hours(1),
            t0 + Duration::hours(1) + Duration::seconds(2),
            Some("2024011500".to_string()),
            RunOutcome::AlreadyCurrent,
            0,
            0,
        );
        ledger.record_run(&first).await.unwrap();
        ledger.record_run(&second).await.unwrap();

        let runs = ledger.recent_runs(10).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, second.id);
        assert_eq!(runs[0].outcome, RunOutcome::AlreadyCurrent);
        assert_eq!(runs[1].stored, 41);

        let stats = ledger.stats().await.unwrap();
        assert_eq!(stats.runs, 2);
        assert_eq!(stats.last_acquired_at, Some(first.finished_at));

        assert_eq!(ledger.recent_runs(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_open_creates_file() {
        let dir = temp_test_dir();
        let path = dir.path().join("state").join("ledger.db");
        let ledger = AcquisitionLedger::open(&path).await.unwrap();
        ledger
            .record_artifact(&ArtifactRecord::new(&valid_time("2024011506", 0), 1))
            .await
            .unwrap();
        assert!(path.exists());

        // Reopening keeps existing rows
        drop(ledger);
        let reopened = AcquisitionLedger::open(&path).await.unwrap();
        assert_eq!(reopened.stats().await.unwrap().artifacts, 1);
    }

    #[test]
    fn test_outcome_round_trip() {
        for outcome in [
            RunOutcome::Acquired,
            RunOutcome::AlreadyCurrent,
            RunOutcome::NoUpstreamData,
            RunOutcome::BaseFailed,
        ] {
            assert_eq!(RunOutcome::from_str(outcome.as_str()), outcome);
        }
    }
}
