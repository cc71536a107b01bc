//! Per-section research refinement loop.
//!
//! A research section moves through
//! `NeedsQueries → Searching → Drafting → Grading`, then either finishes or
//! searches the grader's follow-up queries and drafts again. Each call to
//! [`SectionResearcher::step`] performs exactly one transition so the caller
//! can checkpoint between steps.
//!
//! Query generation runs once. Search context accumulates across
//! iterations while the section content is replaced by every draft. The loop
//! stops on a passing grade or once `max_search_depth` follow-up rounds have
//! run, giving at most `max_search_depth + 1` drafts.

use crate::brain::ModelRouter;
use crate::config::{ModelRole, ReportConfig};
use crate::error::Result;
use crate::prompts;
use crate::search::SearchDispatcher;
use crate::types::{Grade, SearchQuery, Section};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    NeedsQueries,
    Searching,
    Drafting,
    Grading,
    Done,
}

impl fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopPhase::NeedsQueries => "needs_queries",
            LoopPhase::Searching => "searching",
            LoopPhase::Drafting => "drafting",
            LoopPhase::Grading => "grading",
            LoopPhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Resumable state of one section's refinement loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementState {
    pub section: Section,
    pub phase: LoopPhase,
    /// Follow-up search rounds completed so far.
    pub iterations: u32,
    pub drafts: u32,
    /// Queries from the initial generation step, reused when a failing grade
    /// carries no follow-ups.
    #[serde(default)]
    pub initial_queries: Vec<SearchQuery>,
    /// Queries to run on the next search step.
    #[serde(default)]
    pub pending_queries: Vec<SearchQuery>,
    /// Formatted sources gathered across all search rounds.
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub last_grade: Option<Grade>,
}

impl RefinementState {
    pub fn new(section: Section) -> Self {
        Self {
            section,
            phase: LoopPhase::NeedsQueries,
            iterations: 0,
            drafts: 0,
            initial_queries: Vec::new(),
            pending_queries: Vec::new(),
            context: String::new(),
            last_grade: None,
        }
    }

    pub fn ordinal(&self) -> u32 {
        self.section.ordinal
    }

    pub fn is_done(&self) -> bool {
        self.phase == LoopPhase::Done
    }

    fn append_context(&mut self, sources: &str) {
        if sources.trim().is_empty() {
            return;
        }
        if !self.context.is_empty() {
            self.context.push_str("\n\n");
        }
        self.context.push_str(sources);
    }
}

/// Runs refinement steps for research sections.
#[derive(Clone)]
pub struct SectionResearcher {
    router: Arc<ModelRouter>,
    search: Arc<SearchDispatcher>,
    number_of_queries: usize,
    max_search_depth: u32,
}

impl SectionResearcher {
    pub fn new(config: &ReportConfig, router: Arc<ModelRouter>, search: Arc<SearchDispatcher>) -> Self {
        Self {
            router,
            search,
            number_of_queries: config.number_of_queries,
            max_search_depth: config.max_search_depth,
        }
    }

    pub fn max_search_depth(&self) -> u32 {
        self.max_search_depth
    }

    /// Advance the loop by one transition. A `Done` state is returned unchanged.
    pub async fn step(&self, mut state: RefinementState) -> Result<RefinementState> {
        let ordinal = state.ordinal();
        match state.phase {
            LoopPhase::NeedsQueries => {
                let (system, prompt) = prompts::section_queries(&state.section, self.number_of_queries);
                let queries = self
                    .router
                    .generate_queries(ModelRole::QueryWriter, system, prompt)
                    .await?;
                debug!(ordinal, count = queries.queries.len(), "Section queries generated");
                state.initial_queries = queries.queries.clone();
                state.pending_queries = queries.queries;
                state.phase = LoopPhase::Searching;
            }
            LoopPhase::Searching => {
                let queries = std::mem::take(&mut state.pending_queries);
                let sources = self.search.search_and_format(&queries).await;
                state.append_context(&sources);
                debug!(ordinal, queries = queries.len(), context_len = state.context.len(), "Section sources gathered");
                state.phase = LoopPhase::Drafting;
            }
            LoopPhase::Drafting => {
                let (system, prompt) = prompts::section_writer(&state.section, &state.context);
                let content = self
                    .router
                    .write_text(ModelRole::SectionWriter, system, prompt)
                    .await?;
                state.section.content = content;
                state.drafts += 1;
                debug!(ordinal, draft = state.drafts, "Section drafted");
                state.phase = LoopPhase::Grading;
            }
            LoopPhase::Grading => {
                let (system, prompt) = prompts::section_grader(&state.section, self.number_of_queries);
                let verdict = self.router.grade_section(system, prompt).await?;
                state.last_grade = Some(verdict.grade);

                if verdict.passed() {
                    info!(ordinal, drafts = state.drafts, "Section passed grading");
                    state.phase = LoopPhase::Done;
                } else if state.iterations >= self.max_search_depth {
                    warn!(
                        ordinal,
                        name = %state.section.name,
                        drafts = state.drafts,
                        "Section still failing at max search depth; keeping last draft"
                    );
                    state.phase = LoopPhase::Done;
                } else {
                    state.iterations += 1;
                    state.pending_queries = if verdict.follow_up_queries.is_empty() {
                        debug!(ordinal, "Grader gave no follow-up queries; reusing initial queries");
                        state.initial_queries.clone()
                    } else {
                        verdict.follow_up_queries
                    };
                    info!(ordinal, iteration = state.iterations, "Section failed grading; searching follow-ups");
                    state.phase = LoopPhase::Searching;
                }
            }
            LoopPhase::Done => {}
        }
        Ok(state)
    }

    /// Drive the loop to completion without intermediate observation.
    pub async fn run(&self, mut state: RefinementState) -> Result<RefinementState> {
        while !state.is_done() {
            state = self.step(state).await?;
        }
        Ok(state)
    }
}
