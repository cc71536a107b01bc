//! Report planner: topic → planning queries → sources → ordered section list.

use crate::brain::ModelRouter;
use crate::config::{ModelRole, ReportConfig};
use crate::error::Result;
use crate::prompts;
use crate::search::SearchDispatcher;
use crate::sources::{SourceFormat, deduplicate_and_format};
use crate::types::PlannedSections;
use tracing::{debug, info};

/// Produces report plans. Stateless; one instance can plan many times.
pub struct ReportPlanner<'a> {
    config: &'a ReportConfig,
    router: &'a ModelRouter,
    search: &'a SearchDispatcher,
}

impl<'a> ReportPlanner<'a> {
    pub fn new(config: &'a ReportConfig, router: &'a ModelRouter, search: &'a SearchDispatcher) -> Self {
        Self {
            config,
            router,
            search,
        }
    }

    /// Generate a plan for `topic`, optionally revising against reviewer feedback.
    ///
    /// Raw page content is never included in planning context.
    pub async fn plan(&self, topic: &str, feedback: Option<&str>) -> Result<PlannedSections> {
        self.config.search.backend()?;
        info!(topic, revising = feedback.is_some(), "Planning report");

        let (system, prompt) = prompts::planner_queries(
            topic,
            &self.config.report_structure,
            self.config.number_of_queries,
        );
        let queries = self
            .router
            .generate_queries(ModelRole::QueryWriter, system, prompt)
            .await?;
        debug!(count = queries.queries.len(), "Planning queries generated");

        let responses = self.search.search(&queries.queries).await;
        let context = deduplicate_and_format(&responses, SourceFormat::SnippetOnly);

        let (system, prompt) =
            prompts::planner_sections(topic, &self.config.report_structure, &context, feedback);
        let plan = self.router.generate_sections(system, prompt).await?;
        info!(
            sections = plan.sections.len(),
            research = plan.sections.iter().filter(|s| s.research).count(),
            "Report plan ready"
        );
        Ok(plan)
    }
}
