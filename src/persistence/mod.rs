//! Persistence layer for pipeline run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

pub use crate::core::EngineStatus;
use crate::core::{Pipeline, RunContext};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Summary of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    /// Unique run ID
    pub run_id: Uuid,

    /// Pipeline name
    pub pipeline_name: String,

    /// Final status
    pub status: EngineStatus,

    /// Trigger event kind ("push" or "manual")
    pub event: String,

    /// Branch for push events
    pub branch: Option<String>,

    /// Image tag the run built/deployed
    pub image_tag: String,

    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,

    pub stages_total: usize,
    pub stages_succeeded: usize,
    pub stages_failed: usize,
    pub stages_skipped: usize,
}

impl RunRecord {
    /// Fraction of stages in a terminal state
    pub fn progress(&self) -> f64 {
        if self.stages_total == 0 {
            return 0.0;
        }
        (self.stages_succeeded + self.stages_failed + self.stages_skipped) as f64
            / self.stages_total as f64
    }
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save a pipeline run
    async fn save_run(&self, record: &RunRecord) -> Result<()>;

    /// Load a run by ID
    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunRecord>>;

    /// List all runs for a pipeline
    async fn list_runs(&self, pipeline_name: &str) -> Result<Vec<RunRecord>>;

    /// List all pipeline names
    async fn list_pipelines(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or `--no-history` runs)
pub struct InMemoryPersistence {
    runs: tokio::sync::RwLock<std::collections::HashMap<Uuid, RunRecord>>,
    by_pipeline: tokio::sync::RwLock<std::collections::HashMap<String, Vec<Uuid>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self {
            runs: tokio::sync::RwLock::new(std::collections::HashMap::new()),
            by_pipeline: tokio::sync::RwLock::new(std::collections::HashMap::new()),
        }
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_run(&self, record: &RunRecord) -> Result<()> {
        let mut runs = self.runs.write().await;
        runs.insert(record.run_id, record.clone());

        let mut by_pipeline = self.by_pipeline.write().await;
        by_pipeline
            .entry(record.pipeline_name.clone())
            .or_default()
            .push(record.run_id);

        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunRecord>> {
        let runs = self.runs.read().await;
        Ok(runs.get(&run_id).cloned())
    }

    async fn list_runs(&self, pipeline_name: &str) -> Result<Vec<RunRecord>> {
        let runs = self.runs.read().await;
        let by_pipeline = self.by_pipeline.read().await;

        Ok(by_pipeline
            .get(pipeline_name)
            .map(|ids| ids.iter().filter_map(|id| runs.get(id).cloned()).collect())
            .unwrap_or_default())
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let by_pipeline = self.by_pipeline.read().await;
        Ok(by_pipeline.keys().cloned().collect())
    }
}

/// Create a run record from a finished pipeline
pub fn create_record(pipeline: &Pipeline, context: &RunContext) -> RunRecord {
    RunRecord {
        run_id: pipeline.state.run_id,
        pipeline_name: pipeline.name.clone(),
        status: pipeline.state.status,
        event: context.event.kind.to_string(),
        branch: context.event.branch.clone(),
        image_tag: context.image_tag.clone(),
        started_at: pipeline.state.started_at.unwrap_or_else(Utc::now),
        completed_at: pipeline.state.completed_at,
        stages_total: pipeline.state.total_stages,
        stages_succeeded: pipeline.state.succeeded_stages,
        stages_failed: pipeline.state.failed_stages,
        stages_skipped: pipeline.state.skipped_stages,
    }
}
