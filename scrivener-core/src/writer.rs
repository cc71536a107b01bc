//! Final section writer for sections that need no research.
//!
//! Introductions and conclusions are written once from the finished research
//! sections; there is no search, grading or retry.

use crate::brain::ModelRouter;
use crate::config::ModelRole;
use crate::error::Result;
use crate::prompts;
use crate::types::Section;
use std::sync::Arc;
use tracing::info;

const RULE: &str = "============================================================";

/// Render sections as a context block for the final writer, in the order given.
pub fn format_sections(sections: &[Section]) -> String {
    let mut text = String::new();
    for (idx, section) in sections.iter().enumerate() {
        let content = if section.has_content() {
            section.content.as_str()
        } else {
            "[Not yet written]"
        };
        text.push_str(&format!(
            "{RULE}\nSection {}: {}\n{RULE}\nDescription:\n{}\nRequires Research:\n{}\n\nContent:\n{}\n\n",
            idx + 1,
            section.name,
            section.description,
            section.research,
            content
        ));
    }
    text
}

#[derive(Clone)]
pub struct FinalSectionWriter {
    router: Arc<ModelRouter>,
}

impl FinalSectionWriter {
    pub fn new(router: Arc<ModelRouter>) -> Self {
        Self { router }
    }

    /// Write `section` using `completed` research sections as context.
    pub async fn write(&self, section: &Section, completed: &[Section]) -> Result<Section> {
        let mut ordered = completed.to_vec();
        ordered.sort_by_key(|s| s.ordinal);
        let context = format_sections(&ordered);

        let (system, prompt) = prompts::final_section_writer(section, &context);
        let content = self
            .router
            .write_text(ModelRole::FinalSectionWriter, system, prompt)
            .await?;
        info!(ordinal = section.ordinal, name = %section.name, "Final section written");

        let mut written = section.clone();
        written.content = content;
        Ok(written)
    }
}
