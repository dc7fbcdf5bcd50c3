//! SQLite-based run history store

use crate::persistence::{PersistenceBackend, RunRecord};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// SQLite run store
pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    /// Create a new SQLite store
    pub async fn new(db_path: &str) -> Result<Self> {
        let pool = SqlitePool::connect(&format!("sqlite:{}?mode=rwc", db_path))
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let db_dir = data_dir.join("slipway");
        std::fs::create_dir_all(&db_dir)?;

        let db_path = db_dir.join("runs.db");
        let db_path = db_path
            .to_str()
            .context("run history path is not valid UTF-8")?;
        Self::new(db_path).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                pipeline_name TEXT NOT NULL,
                status TEXT NOT NULL,
                event TEXT NOT NULL,
                branch TEXT,
                image_tag TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                stages_total INTEGER NOT NULL DEFAULT 0,
                stages_succeeded INTEGER NOT NULL DEFAULT 0,
                stages_failed INTEGER NOT NULL DEFAULT 0,
                stages_skipped INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_pipeline_name ON runs(pipeline_name);
            CREATE INDEX IF NOT EXISTS idx_status ON runs(status);
            CREATE INDEX IF NOT EXISTS idx_started_at ON runs(started_at);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn status_from_str(status: &str) -> crate::core::EngineStatus {
        match status {
            "Idle" => crate::core::EngineStatus::Idle,
            "Loading" => crate::core::EngineStatus::Loading,
            "Executing" => crate::core::EngineStatus::Executing,
            "Succeeded" => crate::core::EngineStatus::Succeeded,
            _ => crate::core::EngineStatus::Failed,
        }
    }

    fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<RunRecord> {
        Ok(RunRecord {
            run_id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            pipeline_name: row.get("pipeline_name"),
            status: Self::status_from_str(&row.get::<String, _>("status")),
            event: row.get("event"),
            branch: row.get("branch"),
            image_tag: row.get("image_tag"),
            started_at: Self::from_naive(row.get("started_at")),
            completed_at: row
                .get::<Option<NaiveDateTime>, _>("completed_at")
                .map(Self::from_naive),
            stages_total: row.get::<i64, _>("stages_total") as usize,
            stages_succeeded: row.get::<i64, _>("stages_succeeded") as usize,
            stages_failed: row.get::<i64, _>("stages_failed") as usize,
            stages_skipped: row.get::<i64, _>("stages_skipped") as usize,
        })
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for SqliteRunStore {
    async fn save_run(&self, record: &RunRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO runs
            (id, pipeline_name, status, event, branch, image_tag, started_at, completed_at,
             stages_total, stages_succeeded, stages_failed, stages_skipped)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(record.run_id.to_string())
        .bind(&record.pipeline_name)
        .bind(format!("{:?}", record.status))
        .bind(&record.event)
        .bind(&record.branch)
        .bind(&record.image_tag)
        .bind(Self::to_naive(record.started_at))
        .bind(record.completed_at.map(Self::to_naive))
        .bind(record.stages_total as i64)
        .bind(record.stages_succeeded as i64)
        .bind(record.stages_failed as i64)
        .bind(record.stages_skipped as i64)
        .execute(&self.pool)
        .await
        .context("Failed to save run")?;

        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunRecord>> {
        let row = sqlx::query("SELECT * FROM runs WHERE id = ?1")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load run")?;

        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn list_runs(&self, pipeline_name: &str) -> Result<Vec<RunRecord>> {
        let rows =
            sqlx::query("SELECT * FROM runs WHERE pipeline_name = ?1 ORDER BY started_at DESC")
                .bind(pipeline_name)
                .fetch_all(&self.pool)
                .await
                .context("Failed to list runs")?;

        rows.iter().map(Self::record_from_row).collect()
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT pipeline_name FROM runs ORDER BY pipeline_name",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list pipelines")?;

        Ok(rows
            .iter()
            .map(|row| row.get::<String, _>("pipeline_name"))
            .collect())
    }
}
