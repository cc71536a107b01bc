//! Plan approval gate.
//!
//! A run suspends after every plan is produced. Resuming with JSON `true`
//! approves the plan and partitions its sections; a JSON string is reviewer
//! feedback that triggers exactly one replanning. Any other value is rejected
//! and leaves the suspended run untouched.

use crate::error::GateError;
use crate::types::Section;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Where a plan sits in the approval cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    /// Plan produced; waiting for a reviewer.
    Planned,
    /// Plan accepted; research may start.
    Approved,
    /// Feedback received; a new plan is being generated.
    Revising,
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateState::Planned => write!(f, "planned"),
            GateState::Approved => write!(f, "approved"),
            GateState::Revising => write!(f, "revising"),
        }
    }
}

/// A validated resumption value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeValue {
    Approve,
    Feedback(String),
}

impl ResumeValue {
    /// Interpret a raw resumption value.
    ///
    /// Only `true` and strings are accepted; `false` is not a rejection.
    pub fn from_json(value: &Value) -> Result<Self, GateError> {
        match value {
            Value::Bool(true) => Ok(ResumeValue::Approve),
            Value::String(text) => Ok(ResumeValue::Feedback(text.clone())),
            other => Err(GateError::InvalidResumptionInput {
                found: json_type_name(other).to_string(),
            }),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(false) => "boolean false",
        Value::Bool(true) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A section paired with its refinement iteration counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionTask {
    pub section: Section,
    pub iterations: u32,
}

impl SectionTask {
    pub fn new(section: Section) -> Self {
        Self {
            section,
            iterations: 0,
        }
    }
}

/// An approved plan split by research flag. Every section of the plan appears
/// in exactly one of the two sets, in plan order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionedPlan {
    pub research: Vec<SectionTask>,
    pub no_research: Vec<SectionTask>,
}

impl PartitionedPlan {
    pub fn from_sections(sections: &[Section]) -> Result<Self, GateError> {
        if sections.is_empty() {
            return Err(GateError::EmptyPlan);
        }
        let (research, no_research): (Vec<_>, Vec<_>) = sections
            .iter()
            .cloned()
            .map(SectionTask::new)
            .partition(|task| task.section.research);
        Ok(Self {
            research,
            no_research,
        })
    }

    pub fn len(&self) -> usize {
        self.research.len() + self.no_research.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of resuming a suspended gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Approved(PartitionedPlan),
    Revise { feedback: String },
}

impl GateDecision {
    /// The state the gate moves to on this decision.
    pub fn next_state(&self) -> GateState {
        match self {
            GateDecision::Approved(_) => GateState::Approved,
            GateDecision::Revise { .. } => GateState::Revising,
        }
    }
}

/// Apply a raw resumption value to the current plan.
pub fn decide(value: &Value, sections: &[Section]) -> Result<GateDecision, GateError> {
    match ResumeValue::from_json(value)? {
        ResumeValue::Approve => Ok(GateDecision::Approved(PartitionedPlan::from_sections(
            sections,
        )?)),
        ResumeValue::Feedback(feedback) => Ok(GateDecision::Revise { feedback }),
    }
}

/// Render a plan for human review.
pub fn render_plan(sections: &[Section]) -> String {
    let body = sections
        .iter()
        .map(|s| {
            format!(
                "{} - Section: {}\nDescription: {}\nResearch needed: {}\n",
                s.ordinal,
                s.name,
                s.description,
                if s.research { "Yes" } else { "No" }
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "Please provide feedback on the following report plan.\n\n{body}\n\n\
         Does the report plan meet your needs? Pass 'true' to approve the report plan \
         or provide feedback to regenerate the report plan:"
    )
}
