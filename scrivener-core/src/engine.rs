//! Report workflow engine.
//!
//! Drives a run from topic to compiled report: plan, suspend at the approval
//! gate, resume with approval or feedback, research every section that needs
//! it, write the remaining sections from that research, compile. State is
//! checkpointed at the gate, after partitioning, after every research step,
//! after each final section and on completion, so an interrupted run can be
//! picked up with [`ReportWorkflow::continue_run`].

use crate::brain::ModelRouter;
use crate::checkpoint::{Checkpoint, CheckpointStore, RunStage, RunSummary};
use crate::compiler::compile_report;
use crate::config::ReportConfig;
use crate::coordinator::{StepObserver, run_research};
use crate::error::{CheckpointError, ConfigError, GateError, Result};
use crate::gate::{self, GateDecision, GateState};
use crate::planner::ReportPlanner;
use crate::refine::{RefinementState, SectionResearcher};
use crate::search::{SearchDispatcher, SearchProvider, create_search_provider};
use crate::types::{CompletedReport, Section};
use crate::writer::FinalSectionWriter;
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Progress notifications from a running workflow. All methods default to no-ops.
#[async_trait]
pub trait WorkflowCallback: Send + Sync {
    async fn on_stage_change(&self, _run_id: Uuid, _stage: RunStage) {}

    /// A plan is ready for review. `revision` counts planner invocations.
    async fn on_plan_ready(&self, _run_id: Uuid, _plan: &[Section], _revision: u32) {}

    async fn on_section_step(&self, _state: &RefinementState) {}

    /// A section's content is final.
    async fn on_section_complete(&self, _section: &Section) {}

    async fn on_report_complete(&self, _run_id: Uuid, _report: &CompletedReport) {}
}

pub struct NoOpCallback;

impl WorkflowCallback for NoOpCallback {}

/// Result of advancing a run.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Suspended at the approval gate. Resume with `run_id`.
    AwaitingApproval {
        run_id: Uuid,
        plan: Vec<Section>,
        /// Human-readable plan and approval question.
        prompt: String,
    },
    Completed {
        run_id: Uuid,
        report: CompletedReport,
    },
}

impl RunOutcome {
    pub fn run_id(&self) -> Uuid {
        match self {
            RunOutcome::AwaitingApproval { run_id, .. } | RunOutcome::Completed { run_id, .. } => {
                *run_id
            }
        }
    }
}

/// The research report workflow.
pub struct ReportWorkflow {
    config: ReportConfig,
    router: Arc<ModelRouter>,
    search: Arc<SearchDispatcher>,
    store: Arc<dyn CheckpointStore>,
    callback: Arc<dyn WorkflowCallback>,
}

impl ReportWorkflow {
    /// Build the workflow with the configured search backend and model providers.
    ///
    /// Configuration problems (unknown backend or provider, missing API key)
    /// surface here, before any network call.
    pub fn from_config(config: ReportConfig, store: Arc<dyn CheckpointStore>) -> Result<Self> {
        config.validate()?;
        let search = create_search_provider(&config.search)?;
        let router = ModelRouter::from_config(&config)?;
        Ok(Self::new(config, router, search, store))
    }

    /// Build the workflow from explicit providers.
    pub fn new(
        config: ReportConfig,
        router: ModelRouter,
        search: Arc<dyn SearchProvider>,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        let dispatcher = SearchDispatcher::new(search, &config.search);
        Self {
            config,
            router: Arc::new(router),
            search: Arc::new(dispatcher),
            store,
            callback: Arc::new(NoOpCallback),
        }
    }

    pub fn with_callback(mut self, callback: Arc<dyn WorkflowCallback>) -> Self {
        self.callback = callback;
        self
    }

    pub fn config(&self) -> &ReportConfig {
        &self.config
    }

    /// Plan a new report and suspend at the approval gate.
    pub async fn start(&self, topic: &str) -> Result<RunOutcome> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(ConfigError::MissingField {
                field: "topic".into(),
            }
            .into());
        }
        let mut checkpoint = Checkpoint::new(topic, self.config.clone());
        info!(run_id = %checkpoint.run_id, topic, "Starting report run");
        self.save(&mut checkpoint).await?;
        self.plan_and_suspend(checkpoint).await
    }

    /// Resume a run suspended at the approval gate.
    ///
    /// `true` approves the plan and runs the report to completion; a string
    /// replans with that feedback and suspends again. Any other value is
    /// rejected and the suspended run is left as it was.
    pub async fn resume(&self, run_id: Uuid, value: Value) -> Result<RunOutcome> {
        let mut checkpoint = self.store.load(run_id).await?;
        if checkpoint.stage != RunStage::AwaitingApproval {
            return Err(GateError::NotAwaitingApproval {
                run_id,
                stage: checkpoint.stage.to_string(),
            }
            .into());
        }

        let decision = gate::decide(&value, &checkpoint.plan)?;
        checkpoint.gate = decision.next_state();
        match decision {
            GateDecision::Revise { feedback } => {
                info!(run_id = %run_id, "Plan feedback received; replanning");
                checkpoint.feedback = Some(feedback);
                self.set_stage(&mut checkpoint, RunStage::Planning).await?;
                self.plan_and_suspend(checkpoint).await
            }
            GateDecision::Approved(partition) => {
                info!(
                    run_id = %run_id,
                    research = partition.research.len(),
                    no_research = partition.no_research.len(),
                    "Plan approved"
                );
                checkpoint.research = partition
                    .research
                    .iter()
                    .map(|task| (task.section.ordinal, RefinementState::new(task.section.clone())))
                    .collect();
                checkpoint.final_sections.clear();
                checkpoint.partition = Some(partition);
                self.set_stage(&mut checkpoint, RunStage::Researching).await?;
                self.execute(checkpoint).await
            }
        }
    }

    /// Pick up a run that was interrupted after planning started.
    pub async fn continue_run(&self, run_id: Uuid) -> Result<RunOutcome> {
        let checkpoint = self.store.load(run_id).await?;
        match checkpoint.stage {
            RunStage::Planning => self.plan_and_suspend(checkpoint).await,
            RunStage::Researching | RunStage::WritingFinal => self.execute(checkpoint).await,
            RunStage::Completed => match checkpoint.report {
                Some(report) => Ok(RunOutcome::Completed { run_id, report }),
                None => Err(CheckpointError::Corrupt {
                    run_id,
                    message: "completed run has no report".into(),
                }
                .into()),
            },
            RunStage::AwaitingApproval => Err(CheckpointError::WrongStage {
                run_id,
                stage: checkpoint.stage.to_string(),
            }
            .into()),
        }
    }

    pub async fn list_runs(&self) -> Result<Vec<RunSummary>> {
        Ok(self.store.list().await?)
    }

    pub async fn checkpoint(&self, run_id: Uuid) -> Result<Checkpoint> {
        Ok(self.store.load(run_id).await?)
    }

    async fn plan_and_suspend(&self, mut checkpoint: Checkpoint) -> Result<RunOutcome> {
        let planner = ReportPlanner::new(&checkpoint.config, &self.router, &self.search);
        let plan = planner
            .plan(&checkpoint.topic, checkpoint.feedback.as_deref())
            .await?;

        checkpoint.plan = plan.sections;
        checkpoint.plan_count += 1;
        checkpoint.gate = GateState::Planned;
        self.set_stage(&mut checkpoint, RunStage::AwaitingApproval).await?;
        self.callback
            .on_plan_ready(checkpoint.run_id, &checkpoint.plan, checkpoint.plan_count)
            .await;

        Ok(RunOutcome::AwaitingApproval {
            run_id: checkpoint.run_id,
            prompt: gate::render_plan(&checkpoint.plan),
            plan: checkpoint.plan,
        })
    }

    async fn execute(&self, mut checkpoint: Checkpoint) -> Result<RunOutcome> {
        if checkpoint.stage == RunStage::Researching {
            let researcher =
                SectionResearcher::new(&checkpoint.config, self.router.clone(), self.search.clone());
            let states = checkpoint.research.clone();
            let mut observer = CheckpointObserver {
                store: self.store.clone(),
                callback: self.callback.clone(),
                checkpoint,
            };
            let states = run_research(&researcher, states, &mut observer).await?;
            checkpoint = observer.checkpoint;
            for state in states.values() {
                self.callback.on_section_complete(&state.section).await;
            }
            checkpoint.research = states;
            self.set_stage(&mut checkpoint, RunStage::WritingFinal).await?;
        }

        let research_sections: Vec<Section> = checkpoint
            .research
            .values()
            .map(|state| state.section.clone())
            .collect();
        self.write_final_sections(&mut checkpoint, &research_sections)
            .await?;

        let final_sections: Vec<Section> = checkpoint.final_sections.values().cloned().collect();
        let report = compile_report(&research_sections, &final_sections)?;
        info!(
            run_id = %checkpoint.run_id,
            sections = report.sections.len(),
            chars = report.text.len(),
            "Report compiled"
        );
        checkpoint.report = Some(report.clone());
        self.set_stage(&mut checkpoint, RunStage::Completed).await?;
        self.callback
            .on_report_complete(checkpoint.run_id, &report)
            .await;

        Ok(RunOutcome::Completed {
            run_id: checkpoint.run_id,
            report,
        })
    }

    async fn write_final_sections(
        &self,
        checkpoint: &mut Checkpoint,
        research_sections: &[Section],
    ) -> Result<()> {
        let Some(partition) = checkpoint.partition.clone() else {
            return Err(CheckpointError::Corrupt {
                run_id: checkpoint.run_id,
                message: "approved run has no partitioned plan".into(),
            }
            .into());
        };
        let writer = FinalSectionWriter::new(self.router.clone());
        let mut pending: FuturesUnordered<_> = partition
            .no_research
            .iter()
            .filter(|task| !checkpoint.final_sections.contains_key(&task.section.ordinal))
            .map(|task| {
                let writer = writer.clone();
                let section = task.section.clone();
                async move { writer.write(&section, research_sections).await }
            })
            .collect();

        while let Some(written) = pending.next().await {
            let section = written?;
            self.callback.on_section_complete(&section).await;
            checkpoint.final_sections.insert(section.ordinal, section);
            self.save(checkpoint).await?;
        }
        Ok(())
    }

    async fn set_stage(&self, checkpoint: &mut Checkpoint, stage: RunStage) -> Result<()> {
        checkpoint.stage = stage;
        self.save(checkpoint).await?;
        self.callback.on_stage_change(checkpoint.run_id, stage).await;
        Ok(())
    }

    async fn save(&self, checkpoint: &mut Checkpoint) -> Result<()> {
        checkpoint.touch();
        self.store.save(checkpoint).await?;
        Ok(())
    }
}

/// Checkpoints the run after every research step.
struct CheckpointObserver {
    store: Arc<dyn CheckpointStore>,
    callback: Arc<dyn WorkflowCallback>,
    checkpoint: Checkpoint,
}

#[async_trait]
impl StepObserver for CheckpointObserver {
    async fn on_step(
        &mut self,
        updated: &RefinementState,
        _states: &BTreeMap<u32, RefinementState>,
    ) -> Result<()> {
        self.checkpoint
            .research
            .insert(updated.ordinal(), updated.clone());
        self.checkpoint.touch();
        if let Err(e) = self.store.save(&self.checkpoint).await {
            warn!(run_id = %self.checkpoint.run_id, error = %e, "Failed to checkpoint research step");
            return Err(e.into());
        }
        self.callback.on_section_step(updated).await;
        Ok(())
    }
}
