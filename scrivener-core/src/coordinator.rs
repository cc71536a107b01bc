//! Research coordinator.
//!
//! Spawns one worker task per unfinished research section. Workers own their
//! section and report a state snapshot after every loop step over an mpsc
//! channel; the coordinator folds snapshots into the ordinal-keyed state map
//! and hands it to a [`StepObserver`] (the workflow checkpoints there).

use crate::error::{Result, ScrivenerError};
use crate::refine::{RefinementState, SectionResearcher};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::mpsc;
use tokio::task::{self, JoinSet};
use tracing::{debug, error, info};

/// Receives the full state map after each applied worker step.
#[async_trait]
pub trait StepObserver: Send {
    async fn on_step(
        &mut self,
        updated: &RefinementState,
        states: &BTreeMap<u32, RefinementState>,
    ) -> Result<()>;
}

enum WorkerEvent {
    Step(Box<RefinementState>),
    Failed { ordinal: u32, error: ScrivenerError },
}

/// Drive every research section to `Done`.
///
/// Sections already `Done` are left untouched. The first worker error aborts
/// the remaining workers and is returned; the observer has by then seen the
/// last good state of every section.
pub async fn run_research(
    researcher: &SectionResearcher,
    mut states: BTreeMap<u32, RefinementState>,
    observer: &mut dyn StepObserver,
) -> Result<BTreeMap<u32, RefinementState>> {
    let pending: Vec<RefinementState> = states.values().filter(|s| !s.is_done()).cloned().collect();
    if pending.is_empty() {
        return Ok(states);
    }
    info!(sections = pending.len(), "Starting section research");

    let (tx, mut rx) = mpsc::channel::<WorkerEvent>(64);
    let mut workers = JoinSet::new();
    let mut worker_ordinals: HashMap<task::Id, u32> = HashMap::new();
    for state in pending {
        let researcher = researcher.clone();
        let tx = tx.clone();
        let ordinal = state.ordinal();
        let handle = workers.spawn(async move {
            let mut state = state;
            while !state.is_done() {
                match researcher.step(state.clone()).await {
                    Ok(next) => {
                        state = next;
                        if tx.send(WorkerEvent::Step(Box::new(state.clone()))).await.is_err() {
                            return;
                        }
                    }
                    Err(error) => {
                        let _ = tx.send(WorkerEvent::Failed { ordinal, error }).await;
                        return;
                    }
                }
            }
        });
        worker_ordinals.insert(handle.id(), ordinal);
    }
    drop(tx);

    while let Some(event) = rx.recv().await {
        match event {
            WorkerEvent::Step(state) => {
                debug!(ordinal = state.ordinal(), phase = %state.phase, "Section step applied");
                states.insert(state.ordinal(), (*state).clone());
                if let Err(e) = observer.on_step(&state, &states).await {
                    workers.abort_all();
                    return Err(e);
                }
            }
            WorkerEvent::Failed { ordinal, error } => {
                error!(ordinal, error = %error, "Section research failed");
                workers.abort_all();
                return Err(error);
            }
        }
    }

    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined
            && e.is_panic()
        {
            let ordinal = worker_ordinals.get(&e.id()).copied().unwrap_or_default();
            error!(ordinal, error = %e, "Section worker panicked");
            return Err(ScrivenerError::Worker {
                ordinal,
                message: e.to_string(),
            });
        }
    }

    if let Some(unfinished) = states.values().find(|s| !s.is_done()) {
        return Err(ScrivenerError::Worker {
            ordinal: unfinished.ordinal(),
            message: format!("worker exited in phase {}", unfinished.phase),
        });
    }
    info!("Section research complete");
    Ok(states)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::{MockLlmProvider, ModelRouter};
    use crate::config::{ModelRole, ReportConfig};
    use crate::error::LlmError;
    use crate::refine::LoopPhase;
    use crate::search::{MockSearchProvider, SearchDispatcher};
    use crate::types::Section;
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Default)]
    struct Recorder {
        steps: Vec<(u32, LoopPhase)>,
    }

    #[async_trait]
    impl StepObserver for Recorder {
        async fn on_step(
            &mut self,
            updated: &RefinementState,
            states: &BTreeMap<u32, RefinementState>,
        ) -> Result<()> {
            assert_eq!(states[&updated.ordinal()], *updated);
            self.steps.push((updated.ordinal(), updated.phase));
            Ok(())
        }
    }

    fn researcher(provider: Arc<MockLlmProvider>) -> SectionResearcher {
        let config = ReportConfig {
            max_search_depth: 1,
            ..Default::default()
        };
        let search = Arc::new(SearchDispatcher::new(
            Arc::new(MockSearchProvider::new()),
            &config.search,
        ));
        SectionResearcher::new(&config, Arc::new(ModelRouter::uniform(provider)), search)
    }

    fn passing_provider() -> Arc<MockLlmProvider> {
        Arc::new(MockLlmProvider::new(|req| match req.role {
            ModelRole::QueryWriter => Ok(json!({"queries": [{"search_query": req.system.lines().nth(3).unwrap_or("q")}]}).to_string()),
            ModelRole::SectionWriter => Ok("## Drafted".into()),
            ModelRole::SectionGrader => Ok(json!({"grade": "pass", "follow_up_queries": []}).to_string()),
            _ => Ok("x".into()),
        }))
    }

    fn states(ordinals: &[u32]) -> BTreeMap<u32, RefinementState> {
        ordinals
            .iter()
            .map(|o| (*o, RefinementState::new(Section::new(*o, format!("S{o}"), format!("topic {o}"), true))))
            .collect()
    }

    #[tokio::test]
    async fn test_all_sections_finish() {
        let mut recorder = Recorder::default();
        let done = run_research(&researcher(passing_provider()), states(&[2, 3, 5]), &mut recorder)
            .await
            .unwrap();
        assert_eq!(done.keys().copied().collect::<Vec<_>>(), vec![2, 3, 5]);
        assert!(done.values().all(|s| s.is_done() && s.section.content == "## Drafted"));
        // queries, search, draft, grade per section
        assert_eq!(recorder.steps.len(), 12);
        for ordinal in [2, 3, 5] {
            let phases: Vec<_> = recorder
                .steps
                .iter()
                .filter(|(o, _)| *o == ordinal)
                .map(|(_, p)| *p)
                .collect();
            assert_eq!(
                phases,
                vec![LoopPhase::Searching, LoopPhase::Drafting, LoopPhase::Grading, LoopPhase::Done]
            );
        }
    }

    #[tokio::test]
    async fn test_done_sections_are_skipped() {
        let provider = passing_provider();
        let mut input = states(&[2, 3]);
        if let Some(state) = input.get_mut(&2) {
            state.phase = LoopPhase::Done;
            state.section.content = "kept".into();
        }
        let mut recorder = Recorder::default();
        let done = run_research(&researcher(provider.clone()), input, &mut recorder)
            .await
            .unwrap();
        assert_eq!(done[&2].section.content, "kept");
        assert!(recorder.steps.iter().all(|(o, _)| *o == 3));
        assert_eq!(provider.call_count(ModelRole::SectionWriter), 1);
    }

    #[tokio::test]
    async fn test_worker_error_is_returned() {
        let provider = Arc::new(MockLlmProvider::new(|req| match req.role {
            ModelRole::QueryWriter => Err(LlmError::ApiRequest {
                message: "boom".into(),
            }),
            _ => Ok("x".into()),
        }));
        let mut recorder = Recorder::default();
        let err = run_research(&researcher(provider), states(&[2]), &mut recorder)
            .await
            .unwrap_err();
        assert!(matches!(err, ScrivenerError::Llm(LlmError::ApiRequest { .. })));
        assert!(recorder.steps.is_empty());
    }

    #[tokio::test]
    async fn test_panicking_worker_reports_its_ordinal() {
        let provider = Arc::new(MockLlmProvider::new(|req| match req.role {
            ModelRole::QueryWriter => panic!("query writer crashed"),
            _ => Ok("x".into()),
        }));
        let mut recorder = Recorder::default();
        let err = run_research(&researcher(provider), states(&[4]), &mut recorder)
            .await
            .unwrap_err();
        match err {
            ScrivenerError::Worker { ordinal, message } => {
                assert_eq!(ordinal, 4);
                assert!(message.contains("panicked"), "{message}");
            }
            other => panic!("expected worker error, got {other:?}"),
        }
        assert!(recorder.steps.is_empty());
    }
}
