//! Brain module: generation provider abstraction and structured calls.
//!
//! Defines the `LlmProvider` trait for model-agnostic completions, the
//! `ModelRouter` that binds each pipeline role to a provider, and the typed
//! helpers that turn model output into validated `Queries`, `PlannedSections`
//! and `GradeVerdict` values.

use crate::config::{ModelRole, ReportConfig};
use crate::error::{ConfigError, LlmError};
use crate::providers::create_provider;
use crate::types::{GradeVerdict, PlannedSections, Queries};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// A single-turn generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// Pipeline role issuing the request.
    pub role: ModelRole,
    /// System instructions.
    pub system: String,
    /// User-turn instruction.
    pub prompt: String,
    /// When set, the provider must answer with a JSON object matching this schema.
    pub json_schema: Option<Value>,
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    pub fn text(role: ModelRole, system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            role,
            system: system.into(),
            prompt: prompt.into(),
            json_schema: None,
            temperature: None,
        }
    }

    pub fn structured(
        role: ModelRole,
        system: impl Into<String>,
        prompt: impl Into<String>,
        schema: Value,
    ) -> Self {
        Self {
            json_schema: Some(schema),
            ..Self::text(role, system, prompt)
        }
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn wants_json(&self) -> bool {
        self.json_schema.is_some()
    }
}

/// Trait for generation providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform a full completion and return the response text.
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError>;

    /// Return the model name.
    fn model_name(&self) -> &str;
}

/// Binds every pipeline role to a provider and exposes typed calls.
#[derive(Clone)]
pub struct ModelRouter {
    routes: HashMap<ModelRole, Arc<dyn LlmProvider>>,
    temperatures: HashMap<ModelRole, f32>,
}

impl ModelRouter {
    /// Build providers for every role from configuration.
    ///
    /// Roles configured with the same provider and model share one client.
    pub fn from_config(config: &ReportConfig) -> Result<Self, ConfigError> {
        let mut cache: HashMap<(String, String), Arc<dyn LlmProvider>> = HashMap::new();
        let mut routes = HashMap::new();
        let mut temperatures = HashMap::new();
        for role in ModelRole::ALL {
            let model = config.models.get(role);
            let kind = model.provider_kind(role)?;
            let key = (model.provider.to_ascii_lowercase(), model.model.clone());
            let provider = match cache.get(&key) {
                Some(provider) => provider.clone(),
                None => {
                    let provider = create_provider(kind, &model.model, &config.llm)?;
                    cache.insert(key, provider.clone());
                    provider
                }
            };
            debug!(role = %role, provider = %model.provider, model = %model.model, "Bound model role");
            routes.insert(role, provider);
            if let Some(t) = model.temperature {
                temperatures.insert(role, t);
            }
        }
        Ok(Self {
            routes,
            temperatures,
        })
    }

    /// Route every role to the same provider.
    pub fn uniform(provider: Arc<dyn LlmProvider>) -> Self {
        let routes = ModelRole::ALL
            .into_iter()
            .map(|role| (role, provider.clone()))
            .collect();
        Self {
            routes,
            temperatures: HashMap::new(),
        }
    }

    /// Replace the provider for one role.
    pub fn with_role(mut self, role: ModelRole, provider: Arc<dyn LlmProvider>) -> Self {
        self.routes.insert(role, provider);
        self
    }

    pub fn provider(&self, role: ModelRole) -> Result<&Arc<dyn LlmProvider>, LlmError> {
        self.routes.get(&role).ok_or_else(|| LlmError::ApiRequest {
            message: format!("no provider bound for role {role}"),
        })
    }

    async fn call(&self, request: CompletionRequest) -> Result<String, LlmError> {
        let role = request.role;
        let provider = self.provider(role)?;
        let request = match request.temperature {
            Some(_) => request,
            None => {
                let t = self
                    .temperatures
                    .get(&role)
                    .copied()
                    .or_else(|| default_temperature(role));
                request.with_temperature(t)
            }
        };
        debug!(role = %role, model = provider.model_name(), json = request.wants_json(), "Model call");
        provider.complete(request).await
    }

    /// Generate search queries.
    pub async fn generate_queries(
        &self,
        role: ModelRole,
        system: String,
        prompt: String,
    ) -> Result<Queries, LlmError> {
        let request = CompletionRequest::structured(role, system, prompt, Queries::json_schema());
        let value = parse_json_object(&self.call(request).await?, "Queries")?;
        Queries::from_value(value)
    }

    /// Generate a report plan.
    pub async fn generate_sections(
        &self,
        system: String,
        prompt: String,
    ) -> Result<PlannedSections, LlmError> {
        let request = CompletionRequest::structured(
            ModelRole::Planner,
            system,
            prompt,
            PlannedSections::json_schema(),
        );
        let value = parse_json_object(&self.call(request).await?, "Sections")?;
        PlannedSections::from_value(value)
    }

    /// Grade a drafted section.
    pub async fn grade_section(
        &self,
        system: String,
        prompt: String,
    ) -> Result<GradeVerdict, LlmError> {
        let request = CompletionRequest::structured(
            ModelRole::SectionGrader,
            system,
            prompt,
            GradeVerdict::json_schema(),
        );
        let value = parse_json_object(&self.call(request).await?, "SectionGrade")?;
        GradeVerdict::from_value(value)
    }

    /// Generate free text for a writer role.
    pub async fn write_text(
        &self,
        role: ModelRole,
        system: String,
        prompt: String,
    ) -> Result<String, LlmError> {
        let text = self.call(CompletionRequest::text(role, system, prompt)).await?;
        if text.trim().is_empty() {
            warn!(role = %role, "Model returned blank text");
            return Err(LlmError::EmptyResponse {
                purpose: role.to_string(),
            });
        }
        Ok(text.trim().to_string())
    }
}

/// Writers, graders and query writers sample deterministically; the planner
/// keeps the provider default.
fn default_temperature(role: ModelRole) -> Option<f32> {
    match role {
        ModelRole::Planner => None,
        _ => Some(0.0),
    }
}

/// Extract a JSON object from model output.
///
/// Accepts a bare object, an object wrapped in a markdown code fence, or an
/// object embedded in surrounding prose.
pub fn parse_json_object(text: &str, schema: &str) -> Result<Value, LlmError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(LlmError::EmptyResponse {
            purpose: schema.to_string(),
        });
    }
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed);

    let candidate = match (unfenced.find('{'), unfenced.rfind('}')) {
        (Some(start), Some(end)) if start < end => &unfenced[start..=end],
        _ => unfenced,
    };
    let value: Value = serde_json::from_str(candidate).map_err(|e| LlmError::SchemaViolation {
        schema: schema.to_string(),
        message: format!("output is not valid JSON: {e}"),
    })?;
    if !value.is_object() {
        return Err(LlmError::SchemaViolation {
            schema: schema.to_string(),
            message: "output is not a JSON object".into(),
        });
    }
    Ok(value)
}

type MockHandler = Box<dyn Fn(&CompletionRequest) -> Result<String, LlmError> + Send + Sync>;

/// A mock provider for tests and offline runs.
///
/// Answers through a handler closure and records every request it receives.
pub struct MockLlmProvider {
    handler: MockHandler,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlmProvider {
    pub fn new(
        handler: impl Fn(&CompletionRequest) -> Result<String, LlmError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A provider that always returns the given text.
    pub fn with_response(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_| Ok(text.clone()))
    }

    /// All requests received so far.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of calls issued for a role.
    pub fn call_count(&self, role: ModelRole) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.role == role)
            .count()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        (self.handler)(&request)
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }
}
