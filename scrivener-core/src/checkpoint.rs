//! Run checkpoints.
//!
//! A checkpoint captures everything needed to resume a run: the topic, a
//! configuration snapshot, the current plan and gate state, partitioned
//! sections, every research loop state, finished no-research sections and the
//! compiled report. The run id doubles as the opaque resumption token.
//!
//! `FileCheckpointStore` writes one JSON document per run using a write to a
//! `.tmp` sibling followed by a rename, so a crash never leaves a torn file.

use crate::config::ReportConfig;
use crate::error::CheckpointError;
use crate::gate::{GateState, PartitionedPlan};
use crate::refine::RefinementState;
use crate::types::{CompletedReport, Section};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Coarse position of a run in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    /// A plan is being generated (initially or after feedback).
    Planning,
    /// Suspended at the approval gate.
    AwaitingApproval,
    /// Research sections are being refined.
    Researching,
    /// Introduction and conclusion sections are being written.
    WritingFinal,
    Completed,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStage::Planning => "planning",
            RunStage::AwaitingApproval => "awaiting_approval",
            RunStage::Researching => "researching",
            RunStage::WritingFinal => "writing_final",
            RunStage::Completed => "completed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: Uuid,
    pub topic: String,
    pub config: ReportConfig,
    pub stage: RunStage,
    pub gate: GateState,
    #[serde(default)]
    pub plan: Vec<Section>,
    /// Most recent reviewer feedback.
    #[serde(default)]
    pub feedback: Option<String>,
    /// Number of planner invocations so far.
    #[serde(default)]
    pub plan_count: u32,
    #[serde(default)]
    pub partition: Option<PartitionedPlan>,
    /// Research loop states keyed by ordinal.
    #[serde(default)]
    pub research: BTreeMap<u32, RefinementState>,
    /// Written no-research sections keyed by ordinal.
    #[serde(default)]
    pub final_sections: BTreeMap<u32, Section>,
    #[serde(default)]
    pub report: Option<CompletedReport>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(topic: impl Into<String>, config: ReportConfig) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            topic: topic.into(),
            config,
            stage: RunStage::Planning,
            gate: GateState::Planned,
            plan: Vec::new(),
            feedback: None,
            plan_count: 0,
            partition: None,
            research: BTreeMap::new(),
            final_sections: BTreeMap::new(),
            report: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id,
            topic: self.topic.clone(),
            stage: self.stage,
            updated_at: self.updated_at,
        }
    }
}

/// One line of `runs` output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub topic: String,
    pub stage: RunStage,
    pub updated_at: DateTime<Utc>,
}

/// Durable storage for run checkpoints.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;

    async fn load(&self, run_id: Uuid) -> Result<Checkpoint, CheckpointError>;

    /// All runs, most recently updated first.
    async fn list(&self) -> Result<Vec<RunSummary>, CheckpointError>;

    async fn delete(&self, run_id: Uuid) -> Result<(), CheckpointError>;
}

/// One pretty-printed JSON file per run under a directory.
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, run_id: Uuid) -> PathBuf {
        self.dir.join(format!("{run_id}.json"))
    }
}

fn persistence_error(action: &str, path: &Path, e: impl fmt::Display) -> CheckpointError {
    CheckpointError::Persistence {
        message: format!("failed to {action} {}: {e}", path.display()),
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let path = self.path_for(checkpoint.run_id);
        let json = serde_json::to_string_pretty(checkpoint).map_err(|e| CheckpointError::Persistence {
            message: format!("failed to serialize run {}: {e}", checkpoint.run_id),
        })?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| persistence_error("create", &self.dir, e))?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, json.as_bytes())
            .await
            .map_err(|e| persistence_error("write", &tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| persistence_error("rename", &tmp, e))?;
        debug!(run_id = %checkpoint.run_id, stage = %checkpoint.stage, "Checkpoint saved");
        Ok(())
    }

    async fn load(&self, run_id: Uuid) -> Result<Checkpoint, CheckpointError> {
        let path = self.path_for(run_id);
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CheckpointError::NotFound { run_id });
            }
            Err(e) => return Err(persistence_error("read", &path, e)),
        };
        serde_json::from_str(&data).map_err(|e| CheckpointError::Corrupt {
            run_id,
            message: e.to_string(),
        })
    }

    async fn list(&self) -> Result<Vec<RunSummary>, CheckpointError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(persistence_error("list", &self.dir, e)),
        };
        let mut runs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| persistence_error("list", &self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(run_id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| Uuid::parse_str(s).ok())
            else {
                continue;
            };
            match self.load(run_id).await {
                Ok(checkpoint) => runs.push(checkpoint.summary()),
                Err(e) => debug!(run_id = %run_id, error = %e, "Skipping unreadable checkpoint"),
            }
        }
        runs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(runs)
    }

    async fn delete(&self, run_id: Uuid) -> Result<(), CheckpointError> {
        let path = self.path_for(run_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(CheckpointError::NotFound { run_id }),
            Err(e) => Err(persistence_error("delete", &path, e)),
        }
    }
}

/// Process-local store for tests and embedding.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    runs: Mutex<HashMap<Uuid, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored runs.
    pub async fn len(&self) -> usize {
        self.runs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.runs.lock().await.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        self.runs
            .lock()
            .await
            .insert(checkpoint.run_id, checkpoint.clone());
        Ok(())
    }

    async fn load(&self, run_id: Uuid) -> Result<Checkpoint, CheckpointError> {
        self.runs
            .lock()
            .await
            .get(&run_id)
            .cloned()
            .ok_or(CheckpointError::NotFound { run_id })
    }

    async fn list(&self) -> Result<Vec<RunSummary>, CheckpointError> {
        let mut runs: Vec<_> = self.runs.lock().await.values().map(Checkpoint::summary).collect();
        runs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(runs)
    }

    async fn delete(&self, run_id: Uuid) -> Result<(), CheckpointError> {
        self.runs
            .lock()
            .await
            .remove(&run_id)
            .map(|_| ())
            .ok_or(CheckpointError::NotFound { run_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refine::LoopPhase;
    use tempfile::TempDir;

    fn sample() -> Checkpoint {
        let mut checkpoint = Checkpoint::new("Quantum cryptography", ReportConfig::default());
        checkpoint.stage = RunStage::Researching;
        checkpoint.plan = vec![Section::new(1, "Intro", "Overview", false)];
        let mut state = RefinementState::new(Section::new(2, "Body", "Shor", true));
        state.phase = LoopPhase::Drafting;
        state.context = "Sources:\n\nSource A".into();
        checkpoint.research.insert(2, state);
        checkpoint
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("runs"));
        let checkpoint = sample();
        store.save(&checkpoint).await.unwrap();

        let loaded = store.load(checkpoint.run_id).await.unwrap();
        assert_eq!(loaded.topic, "Quantum cryptography");
        assert_eq!(loaded.stage, RunStage::Researching);
        assert_eq!(loaded.research[&2].phase, LoopPhase::Drafting);
        assert_eq!(loaded.research[&2].context, "Sources:\n\nSource A");
        assert!(!dir.path().join("runs").join(format!("{}.tmp", checkpoint.run_id)).exists());
    }

    #[tokio::test]
    async fn test_file_store_not_found_and_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let missing = Uuid::new_v4();
        assert!(matches!(
            store.load(missing).await,
            Err(CheckpointError::NotFound { .. })
        ));

        let bad = Uuid::new_v4();
        std::fs::write(dir.path().join(format!("{bad}.json")), "{not json").unwrap();
        assert!(matches!(
            store.load(bad).await,
            Err(CheckpointError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn test_file_store_list_and_delete() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        assert!(store.list().await.unwrap().is_empty());

        let first = sample();
        let mut second = sample();
        second.topic = "Second".into();
        second.updated_at = first.updated_at + chrono::Duration::seconds(5);
        store.save(&first).await.unwrap();
        store.save(&second).await.unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();

        let runs = store.list().await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].topic, "Second");

        store.delete(first.run_id).await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 1);
        assert!(matches!(
            store.delete(first.run_id).await,
            Err(CheckpointError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("never-created"));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryCheckpointStore::new();
        let checkpoint = sample();
        store.save(&checkpoint).await.unwrap();
        assert_eq!(store.len().await, 1);
        assert_eq!(store.load(checkpoint.run_id).await.unwrap().topic, checkpoint.topic);
        store.delete(checkpoint.run_id).await.unwrap();
        assert!(store.is_empty().await);
    }
}
