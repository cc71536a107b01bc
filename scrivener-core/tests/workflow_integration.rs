//! End-to-end tests for the report workflow.
//!
//! These drive plan → gate → research → final sections → compile with mock
//! model and search providers.

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use scrivener_core::brain::{CompletionRequest, LlmProvider, MockLlmProvider, ModelRouter};
use scrivener_core::checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, RunStage};
use scrivener_core::config::{ModelRole, ReportConfig};
use scrivener_core::engine::{ReportWorkflow, RunOutcome, WorkflowCallback};
use scrivener_core::error::{LlmError, ScrivenerError};
use scrivener_core::refine::LoopPhase;
use scrivener_core::search::MockSearchProvider;
use scrivener_core::types::{SearchResult, Section};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

const TOPIC: &str = "Impact of quantum computing on cryptography";

/// Line following `header` in a prompt.
fn field_after<'a>(text: &'a str, header: &str) -> &'a str {
    text.lines()
        .skip_while(|l| l.trim() != header)
        .nth(1)
        .unwrap_or_default()
        .trim()
}

fn three_section_plan() -> serde_json::Value {
    json!({"sections": [
        {"section_number": 1, "name": "Introduction", "description": "Why quantum computing matters for cryptography", "research": false},
        {"section_number": 2, "name": "Quantum Threats", "description": "Shor and Grover against deployed cryptography", "research": true},
        {"section_number": 3, "name": "Conclusion", "description": "Summary and migration outlook", "research": false}
    ]})
}

fn plan_with_signatures() -> serde_json::Value {
    json!({"sections": [
        {"section_number": 1, "name": "Introduction", "description": "Overview", "research": false},
        {"section_number": 2, "name": "Quantum Threats", "description": "Shor and Grover", "research": true},
        {"section_number": 3, "name": "Post-Quantum Signatures", "description": "Dilithium, Falcon and SPHINCS+", "research": true},
        {"section_number": 4, "name": "Conclusion", "description": "Summary", "research": false}
    ]})
}

/// Answers every role deterministically. The grader fails each section once.
fn scripted_provider() -> Arc<MockLlmProvider> {
    let grades = Arc::new(Mutex::new(std::collections::HashMap::<String, u32>::new()));
    Arc::new(MockLlmProvider::new(move |req| match req.role {
        ModelRole::QueryWriter => Ok(json!({"queries": [
            {"search_query": "quantum computing cryptography threat"},
            {"search_query": "post-quantum cryptography standards"}
        ]})
        .to_string()),
        ModelRole::Planner => {
            if req.system.contains("post-quantum signatures") {
                Ok(plan_with_signatures().to_string())
            } else {
                Ok(three_section_plan().to_string())
            }
        }
        ModelRole::SectionWriter => {
            let name = field_after(&req.system, "## Section title");
            Ok(format!("## {name}\nResearched body of {name}."))
        }
        ModelRole::SectionGrader => {
            let topic = field_after(&req.system, "<Section topic>").to_string();
            let mut seen = grades.lock().unwrap();
            let count = seen.entry(topic.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                Ok(json!({"grade": "fail", "follow_up_queries": [
                    {"search_query": format!("{topic} details")}
                ]})
                .to_string())
            } else {
                Ok(json!({"grade": "pass", "follow_up_queries": []}).to_string())
            }
        }
        ModelRole::FinalSectionWriter => {
            let name = field_after(&req.system, "<Section title>");
            if name == "Introduction" {
                Ok("# Quantum Computing and Cryptography\nIntro text.".into())
            } else {
                Ok(format!("## {name}\nClosing text."))
            }
        }
    }))
}

fn config(depth: u32) -> ReportConfig {
    ReportConfig {
        number_of_queries: 2,
        max_search_depth: depth,
        ..Default::default()
    }
}

fn expect_suspended(outcome: RunOutcome) -> (Uuid, Vec<Section>) {
    match outcome {
        RunOutcome::AwaitingApproval { run_id, plan, .. } => (run_id, plan),
        other => panic!("expected suspension, got {other:?}"),
    }
}

#[tokio::test]
async fn test_quantum_report_end_to_end() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(FileCheckpointStore::new(dir.path()));
    let provider = scripted_provider();
    let search = Arc::new(MockSearchProvider::new());
    let workflow = ReportWorkflow::new(
        config(1),
        ModelRouter::uniform(provider.clone()),
        search.clone(),
        store.clone(),
    );

    let (run_id, plan) = expect_suspended(workflow.start(TOPIC).await.unwrap());
    assert_eq!(plan.len(), 3);
    assert!(!plan[0].research);
    assert!(plan[1].research);
    assert!(!plan[2].research);

    let outcome = workflow.resume(run_id, json!(true)).await.unwrap();
    let RunOutcome::Completed { report, .. } = outcome else {
        panic!("expected completion");
    };

    assert_eq!(
        report.text,
        "# Quantum Computing and Cryptography\nIntro text.\n\n\
         ## Quantum Threats\nResearched body of Quantum Threats.\n\n\
         ## Conclusion\nClosing text."
    );
    assert_eq!(provider.call_count(ModelRole::SectionWriter), 2);
    assert_eq!(provider.call_count(ModelRole::FinalSectionWriter), 2);
    assert_eq!(provider.call_count(ModelRole::Planner), 1);

    let checkpoint = store.load(run_id).await.unwrap();
    assert_eq!(checkpoint.stage, RunStage::Completed);
    assert_eq!(checkpoint.research[&2].drafts, 2);
    assert_eq!(checkpoint.research[&2].phase, LoopPhase::Done);
    assert_eq!(checkpoint.report.unwrap().text, report.text);

    // The final writers saw the researched body as context.
    let final_request = provider
        .requests()
        .into_iter()
        .find(|r| r.role == ModelRole::FinalSectionWriter)
        .unwrap();
    assert!(final_request.system.contains("Researched body of Quantum Threats."));
}

#[tokio::test]
async fn test_feedback_replans_exactly_once() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let provider = scripted_provider();
    let workflow = ReportWorkflow::new(
        config(1),
        ModelRouter::uniform(provider.clone()),
        Arc::new(MockSearchProvider::new()),
        store.clone(),
    );

    let (run_id, _) = expect_suspended(workflow.start(TOPIC).await.unwrap());
    assert_eq!(provider.call_count(ModelRole::Planner), 1);

    let outcome = workflow
        .resume(run_id, json!("add a section on post-quantum signatures"))
        .await
        .unwrap();
    let (same_id, plan) = expect_suspended(outcome);
    assert_eq!(same_id, run_id);
    assert_eq!(provider.call_count(ModelRole::Planner), 2);
    assert_eq!(plan.len(), 4);
    assert_eq!(plan[2].name, "Post-Quantum Signatures");

    let checkpoint = store.load(run_id).await.unwrap();
    assert_eq!(checkpoint.plan_count, 2);
    assert_eq!(
        checkpoint.feedback.as_deref(),
        Some("add a section on post-quantum signatures")
    );

    let RunOutcome::Completed { report, .. } = workflow.resume(run_id, json!(true)).await.unwrap()
    else {
        panic!("expected completion");
    };
    let names: Vec<_> = report.sections.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["Introduction", "Quantum Threats", "Post-Quantum Signatures", "Conclusion"]
    );
    assert_eq!(provider.call_count(ModelRole::Planner), 2);
}

/// Writer that takes longer for lower ordinals so completion order is reversed.
struct SlowFirstWriter {
    inner: Arc<MockLlmProvider>,
}

#[async_trait]
impl LlmProvider for SlowFirstWriter {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        if request.role == ModelRole::SectionWriter {
            let name = field_after(&request.system, "## Section title");
            let delay = match name {
                "Alpha" => 60,
                "Beta" => 30,
                _ => 0,
            };
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.inner.complete(request).await
    }

    fn model_name(&self) -> &str {
        "slow-first"
    }
}

#[tokio::test]
async fn test_report_order_follows_ordinals() {
    let inner = Arc::new(MockLlmProvider::new(|req| match req.role {
        ModelRole::QueryWriter => Ok(json!({"queries": [{"search_query": "q"}]}).to_string()),
        ModelRole::Planner => Ok(json!({"sections": [
            {"section_number": 1, "name": "Intro", "description": "i", "research": false},
            {"section_number": 2, "name": "Alpha", "description": "a", "research": true},
            {"section_number": 3, "name": "Beta", "description": "b", "research": true},
            {"section_number": 4, "name": "Gamma", "description": "g", "research": true},
            {"section_number": 5, "name": "Outro", "description": "o", "research": false}
        ]})
        .to_string()),
        ModelRole::SectionWriter => Ok(field_after(&req.system, "## Section title").to_string()),
        ModelRole::SectionGrader => Ok(json!({"grade": "pass", "follow_up_queries": []}).to_string()),
        ModelRole::FinalSectionWriter => Ok(field_after(&req.system, "<Section title>").to_string()),
    }));
    let completions = Arc::new(Mutex::new(Vec::new()));

    struct Order(Arc<Mutex<Vec<u32>>>);

    #[async_trait]
    impl WorkflowCallback for Order {
        async fn on_section_step(&self, state: &scrivener_core::RefinementState) {
            if state.phase == LoopPhase::Grading {
                self.0.lock().unwrap().push(state.ordinal());
            }
        }
    }

    let workflow = ReportWorkflow::new(
        config(2),
        ModelRouter::uniform(Arc::new(SlowFirstWriter { inner })),
        Arc::new(MockSearchProvider::new()),
        Arc::new(MemoryCheckpointStore::new()),
    )
    .with_callback(Arc::new(Order(completions.clone())));

    let (run_id, _) = expect_suspended(workflow.start("Ordering").await.unwrap());
    let RunOutcome::Completed { report, .. } = workflow.resume(run_id, json!(true)).await.unwrap()
    else {
        panic!("expected completion");
    };

    assert_eq!(report.text, "Intro\n\nAlpha\n\nBeta\n\nGamma\n\nOutro");
    assert_eq!(*completions.lock().unwrap(), vec![4, 3, 2]);
}

#[tokio::test]
async fn test_interrupted_research_continues_from_checkpoint() {
    let failed_once = Arc::new(AtomicBool::new(false));
    let flag = failed_once.clone();
    let provider = Arc::new(MockLlmProvider::new(move |req| match req.role {
        ModelRole::QueryWriter => Ok(json!({"queries": [{"search_query": "q"}]}).to_string()),
        ModelRole::Planner => Ok(three_section_plan().to_string()),
        ModelRole::SectionWriter => {
            if !flag.swap(true, Ordering::SeqCst) {
                Err(LlmError::ApiRequest {
                    message: "connection reset".into(),
                })
            } else {
                Ok("## Quantum Threats\nBody".into())
            }
        }
        ModelRole::SectionGrader => Ok(json!({"grade": "pass", "follow_up_queries": []}).to_string()),
        ModelRole::FinalSectionWriter => Ok(format!("## {}", field_after(&req.system, "<Section title>"))),
    }));
    let store = Arc::new(MemoryCheckpointStore::new());
    let workflow = ReportWorkflow::new(
        config(2),
        ModelRouter::uniform(provider.clone()),
        Arc::new(MockSearchProvider::new()),
        store.clone(),
    );

    let (run_id, _) = expect_suspended(workflow.start(TOPIC).await.unwrap());
    let err = workflow.resume(run_id, json!(true)).await.unwrap_err();
    assert!(matches!(err, ScrivenerError::Llm(LlmError::ApiRequest { .. })));

    let checkpoint = store.load(run_id).await.unwrap();
    assert_eq!(checkpoint.stage, RunStage::Researching);
    assert_eq!(checkpoint.research[&2].phase, LoopPhase::Drafting);
    assert!(checkpoint.research[&2].context.contains("Result for q"));

    let RunOutcome::Completed { report, .. } = workflow.continue_run(run_id).await.unwrap() else {
        panic!("expected completion");
    };
    assert_eq!(report.text, "## Introduction\n\n## Quantum Threats\nBody\n\n## Conclusion");
    // planning queries + one section generation; never regenerated on continue
    assert_eq!(provider.call_count(ModelRole::QueryWriter), 2);
}

#[tokio::test]
async fn test_search_concurrency_cap_spans_sections() {
    let provider = Arc::new(MockLlmProvider::new(|req| match req.role {
        ModelRole::QueryWriter => Ok(json!({"queries": [
            {"search_query": format!("{} one", field_after(&req.system, "<Section topic>"))},
            {"search_query": format!("{} two", field_after(&req.system, "<Section topic>"))},
            {"search_query": format!("{} three", field_after(&req.system, "<Section topic>"))}
        ]})
        .to_string()),
        ModelRole::Planner => Ok(plan_with_signatures().to_string()),
        ModelRole::SectionGrader => Ok(json!({"grade": "pass", "follow_up_queries": []}).to_string()),
        _ => Ok("## Text".into()),
    }));
    let search = Arc::new(MockSearchProvider::new().with_latency(Duration::from_millis(15)));
    let mut cfg = config(1);
    cfg.search.max_concurrent_searches = 2;
    let workflow = ReportWorkflow::new(
        cfg,
        ModelRouter::uniform(provider),
        search.clone(),
        Arc::new(MemoryCheckpointStore::new()),
    );

    let (run_id, _) = expect_suspended(workflow.start(TOPIC).await.unwrap());
    workflow.resume(run_id, json!(true)).await.unwrap();
    assert!(search.peak_in_flight() <= 2);
    // 3 planning-stage queries plus 3 per research section
    assert_eq!(search.calls().len(), 9);
}

#[tokio::test]
async fn test_duplicate_urls_keep_later_result() {
    let hit = |content: &str| SearchResult {
        title: "Shared".into(),
        url: "https://example.com/shared".into(),
        content: content.into(),
        raw_content: None,
        score: None,
    };
    let search = Arc::new(
        MockSearchProvider::new()
            .with_results("first", vec![hit("earlier snippet")])
            .with_results("second", vec![hit("later snippet")]),
    );
    let provider = Arc::new(MockLlmProvider::new(|req| match req.role {
        ModelRole::QueryWriter => Ok(json!({"queries": [
            {"search_query": "first"}, {"search_query": "second"}
        ]})
        .to_string()),
        ModelRole::Planner => Ok(three_section_plan().to_string()),
        ModelRole::SectionGrader => Ok(json!({"grade": "pass", "follow_up_queries": []}).to_string()),
        _ => Ok("## Text".into()),
    }));
    let workflow = ReportWorkflow::new(
        config(0),
        ModelRouter::uniform(provider.clone()),
        search,
        Arc::new(MemoryCheckpointStore::new()),
    );

    let (run_id, _) = expect_suspended(workflow.start(TOPIC).await.unwrap());
    workflow.resume(run_id, json!(true)).await.unwrap();

    let writer_request = provider
        .requests()
        .into_iter()
        .find(|r| r.role == ModelRole::SectionWriter)
        .unwrap();
    assert_eq!(
        writer_request.system.matches("URL: https://example.com/shared").count(),
        1
    );
    assert!(writer_request.system.contains("later snippet"));
    assert!(!writer_request.system.contains("earlier snippet"));
}

#[tokio::test]
async fn test_checkpoint_written_after_every_step() {
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryCheckpointStore,
        saves: AtomicU32,
    }

    #[async_trait]
    impl CheckpointStore for CountingStore {
        async fn save(
            &self,
            checkpoint: &scrivener_core::Checkpoint,
        ) -> Result<(), scrivener_core::error::CheckpointError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            self.inner.save(checkpoint).await
        }
        async fn load(
            &self,
            run_id: Uuid,
        ) -> Result<scrivener_core::Checkpoint, scrivener_core::error::CheckpointError> {
            self.inner.load(run_id).await
        }
        async fn list(
            &self,
        ) -> Result<Vec<scrivener_core::RunSummary>, scrivener_core::error::CheckpointError> {
            self.inner.list().await
        }
        async fn delete(&self, run_id: Uuid) -> Result<(), scrivener_core::error::CheckpointError> {
            self.inner.delete(run_id).await
        }
    }

    let store = Arc::new(CountingStore::default());
    let workflow = ReportWorkflow::new(
        config(1),
        ModelRouter::uniform(scripted_provider()),
        Arc::new(MockSearchProvider::new()),
        store.clone(),
    );
    let (run_id, _) = expect_suspended(workflow.start(TOPIC).await.unwrap());
    let at_gate = store.saves.load(Ordering::SeqCst);
    // created + suspended
    assert_eq!(at_gate, 2);

    workflow.resume(run_id, json!(true)).await.unwrap();
    let total = store.saves.load(Ordering::SeqCst) - at_gate;
    // fail once then pass: queries, search, draft, grade, search, draft, grade
    let loop_steps = 7;
    // partitioned, loop steps, writing-final stage, two final sections, completed
    assert_eq!(total, 1 + loop_steps + 1 + 2 + 1);
}
