//! Core type definitions for Scrivener.
//!
//! Report sections, search queries and results, grade verdicts and the
//! compiled report. Structured model outputs (`Queries`, `PlannedSections`,
//! `GradeVerdict`) are validated here before they enter the pipeline.

use crate::error::LlmError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One addressable unit of the final report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    /// Position in the report, 1-based and unique within a plan.
    #[serde(alias = "section_number")]
    pub ordinal: u32,
    /// Section title.
    pub name: String,
    /// Brief overview of the topics the section covers.
    pub description: String,
    /// Whether the section needs its own web research.
    pub research: bool,
    /// Section body; empty until the first draft is written.
    #[serde(default)]
    pub content: String,
}

impl Section {
    pub fn new(
        ordinal: u32,
        name: impl Into<String>,
        description: impl Into<String>,
        research: bool,
    ) -> Self {
        Self {
            ordinal,
            name: name.into(),
            description: description.into(),
            research,
            content: String::new(),
        }
    }

    /// Whether a writer has produced non-blank content for this section.
    pub fn has_content(&self) -> bool {
        !self.content.trim().is_empty()
    }
}

/// A single web search query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchQuery {
    pub search_query: String,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            search_query: query.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.search_query
    }
}

impl From<&str> for SearchQuery {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SearchQuery {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.search_query)
    }
}

/// A single ranked hit returned by a search backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    /// Deduplication key across a batch.
    pub url: String,
    /// Snippet or summary of the page.
    pub content: String,
    /// Full page content, when the backend provides it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_content: Option<String>,
    /// Backend relevance score, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// All results returned for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResult>,
}

impl SearchResponse {
    /// An empty response, used when a query fails and is degraded.
    pub fn empty(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            results: Vec::new(),
        }
    }
}

/// Structured output of a query-writing call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Queries {
    pub queries: Vec<SearchQuery>,
}

impl Queries {
    /// Validate a raw model object into a query list, dropping blank queries.
    pub fn from_value(value: serde_json::Value) -> Result<Self, LlmError> {
        let parsed: Queries =
            serde_json::from_value(value).map_err(|e| LlmError::SchemaViolation {
                schema: "Queries".into(),
                message: e.to_string(),
            })?;
        let queries: Vec<SearchQuery> = parsed
            .queries
            .into_iter()
            .filter(|q| !q.search_query.trim().is_empty())
            .collect();
        if queries.is_empty() {
            return Err(LlmError::SchemaViolation {
                schema: "Queries".into(),
                message: "no non-empty queries returned".into(),
            });
        }
        Ok(Self { queries })
    }

    pub fn json_schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "queries": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": { "search_query": { "type": "string" } },
                        "required": ["search_query"]
                    }
                }
            },
            "required": ["queries"]
        })
    }
}

/// Structured output of the planning call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedSections {
    pub sections: Vec<Section>,
}

impl PlannedSections {
    /// Validate a raw model object into an ordered plan.
    ///
    /// Sections are ordered by the model's numbering (stable for ties) and
    /// then renumbered 1..n, so ordinals never have gaps or duplicates.
    /// Content supplied by the planner is discarded.
    pub fn from_value(value: serde_json::Value) -> Result<Self, LlmError> {
        let parsed: PlannedSections =
            serde_json::from_value(value).map_err(|e| LlmError::SchemaViolation {
                schema: "Sections".into(),
                message: e.to_string(),
            })?;
        if parsed.sections.is_empty() {
            return Err(LlmError::SchemaViolation {
                schema: "Sections".into(),
                message: "plan contains no sections".into(),
            });
        }
        let mut sections = parsed.sections;
        sections.sort_by_key(|s| s.ordinal);
        for (idx, section) in sections.iter_mut().enumerate() {
            section.ordinal = idx as u32 + 1;
            section.content.clear();
        }
        Ok(Self { sections })
    }

    pub fn json_schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "sections": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "section_number": { "type": "integer" },
                            "name": { "type": "string" },
                            "description": { "type": "string" },
                            "research": { "type": "boolean" },
                            "content": { "type": "string" }
                        },
                        "required": ["section_number", "name", "description", "research"]
                    }
                }
            },
            "required": ["sections"]
        })
    }
}

/// Pass/fail outcome of grading a drafted section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grade {
    Pass,
    Fail,
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Grade::Pass => write!(f, "pass"),
            Grade::Fail => write!(f, "fail"),
        }
    }
}

/// Structured output of the grading call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeVerdict {
    pub grade: Grade,
    #[serde(default)]
    pub follow_up_queries: Vec<SearchQuery>,
}

impl GradeVerdict {
    pub fn pass() -> Self {
        Self {
            grade: Grade::Pass,
            follow_up_queries: Vec::new(),
        }
    }

    pub fn fail(follow_up_queries: Vec<SearchQuery>) -> Self {
        Self {
            grade: Grade::Fail,
            follow_up_queries,
        }
    }

    pub fn passed(&self) -> bool {
        self.grade == Grade::Pass
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, LlmError> {
        let mut verdict: GradeVerdict =
            serde_json::from_value(value).map_err(|e| LlmError::SchemaViolation {
                schema: "SectionGrade".into(),
                message: e.to_string(),
            })?;
        verdict
            .follow_up_queries
            .retain(|q| !q.search_query.trim().is_empty());
        Ok(verdict)
    }

    pub fn json_schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "grade": { "type": "string", "enum": ["pass", "fail"] },
                "follow_up_queries": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": { "search_query": { "type": "string" } },
                        "required": ["search_query"]
                    }
                }
            },
            "required": ["grade", "follow_up_queries"]
        })
    }
}

/// The final compiled document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedReport {
    /// All sections in ordinal order.
    pub sections: Vec<Section>,
    /// Section contents joined with blank lines.
    pub text: String,
}

impl fmt::Display for CompletedReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
