//! Progress output for long-running report generation.

use async_trait::async_trait;
use scrivener_core::{
    CompletedReport, LoopPhase, RefinementState, RunStage, Section, WorkflowCallback,
};
use uuid::Uuid;

/// Prints workflow progress to stderr so stdout stays clean for the report.
pub struct ProgressPrinter {
    quiet: bool,
}

impl ProgressPrinter {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }

    fn print(&self, line: &str) {
        if !self.quiet {
            eprintln!("{}", line);
        }
    }
}

#[async_trait]
impl WorkflowCallback for ProgressPrinter {
    async fn on_stage_change(&self, _run_id: Uuid, stage: RunStage) {
        self.print(&format!("[{}]", stage));
    }

    async fn on_plan_ready(&self, _run_id: Uuid, plan: &[Section], revision: u32) {
        let research = plan.iter().filter(|s| s.research).count();
        self.print(&format!(
            "  plan #{}: {} sections ({} need research)",
            revision,
            plan.len(),
            research
        ));
    }

    async fn on_section_step(&self, state: &RefinementState) {
        if let Some(line) = step_line(state) {
            self.print(&line);
        }
    }

    async fn on_section_complete(&self, section: &Section) {
        self.print(&format!("  written: {}", section.name));
    }

    async fn on_report_complete(&self, _run_id: Uuid, report: &CompletedReport) {
        self.print(&format!(
            "  report complete: {} sections, {} characters",
            report.sections.len(),
            report.text.len()
        ));
    }
}

/// One line per draft and per final grade; intermediate phases stay silent.
fn step_line(state: &RefinementState) -> Option<String> {
    let name = &state.section.name;
    match state.phase {
        LoopPhase::Grading => Some(format!("  {}: draft {}", name, state.drafts)),
        LoopPhase::Done => {
            let grade = state
                .last_grade
                .map(|g| g.to_string())
                .unwrap_or_else(|| "ungraded".into());
            Some(format!(
                "  {}: done after {} follow-up round(s), grade {}",
                name, state.iterations, grade
            ))
        }
        _ => None,
    }
}
