//! # Scrivener Core
//!
//! Core library for the Scrivener research report generator.
//! Plans a report from a topic, pauses for human approval of the plan,
//! researches each section through a search/draft/grade loop, writes the
//! introduction and conclusion from that research and compiles the result.

pub mod brain;
pub mod checkpoint;
pub mod compiler;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod gate;
pub mod planner;
pub mod prompts;
pub mod providers;
pub mod refine;
pub mod search;
pub mod sources;
pub mod types;
pub mod writer;

// Re-export commonly used types at the crate root.
pub use brain::{CompletionRequest, LlmProvider, MockLlmProvider, ModelRouter};
pub use checkpoint::{
    Checkpoint, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, RunStage, RunSummary,
};
pub use compiler::compile_report;
pub use config::{ConfigOverrides, ModelRole, ReportConfig, RoleModelConfig, load_config};
pub use engine::{NoOpCallback, ReportWorkflow, RunOutcome, WorkflowCallback};
pub use error::{Result, ScrivenerError};
pub use gate::{GateState, PartitionedPlan, ResumeValue};
pub use refine::{LoopPhase, RefinementState, SectionResearcher};
pub use search::{MockSearchProvider, SearchDispatcher, SearchProvider};
pub use types::{
    CompletedReport, Grade, GradeVerdict, PlannedSections, Queries, SearchQuery, SearchResponse,
    SearchResult, Section,
};
