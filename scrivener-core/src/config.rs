//! Configuration system for Scrivener.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> explicit config file -> environment -> CLI overrides.
//! A `ReportConfig` is built once per run and passed by reference through every
//! component; nothing reads configuration from globals.

use crate::error::ConfigError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml, Yaml},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Report layout used when none is configured.
pub const DEFAULT_REPORT_STRUCTURE: &str = "\
The report structure should focus on breaking down the user-provided topic:

1. Introduction (no research needed)
   - Brief overview of the topic area

2. Main Body Sections:
   - Each section should focus on a sub-topic of the user-provided topic
   - Include any key concepts and definitions
   - Provide real-world examples or case studies where applicable

3. Conclusion (no research needed)
   - Aim for 1 structural element (either a list or table) that distills the main body sections
   - Provide a concise summary of the report";

/// Top-level configuration for a report run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Free-text template describing the desired report layout.
    pub report_structure: String,
    /// Number of search queries generated per planning or section step.
    pub number_of_queries: usize,
    /// Maximum number of follow-up search rounds per research section.
    pub max_search_depth: u32,
    pub search: SearchConfig,
    pub models: ModelRoles,
    pub llm: LlmConfig,
    pub checkpoint: CheckpointConfig,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            report_structure: DEFAULT_REPORT_STRUCTURE.to_string(),
            number_of_queries: 2,
            max_search_depth: 2,
            search: SearchConfig::default(),
            models: ModelRoles::default(),
            llm: LlmConfig::default(),
            checkpoint: CheckpointConfig::default(),
        }
    }
}

impl ReportConfig {
    /// Reject configurations that cannot run, naming the offending value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.number_of_queries == 0 {
            return Err(ConfigError::Invalid {
                message: "number_of_queries must be at least 1".into(),
            });
        }
        if self.report_structure.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "report_structure".into(),
            });
        }
        if self.search.max_concurrent_searches == 0 {
            return Err(ConfigError::Invalid {
                message: "search.max_concurrent_searches must be at least 1".into(),
            });
        }
        if self.search.max_tokens_per_source == 0 {
            return Err(ConfigError::Invalid {
                message: "search.max_tokens_per_source must be at least 1".into(),
            });
        }
        self.search.backend()?;
        for role in ModelRole::ALL {
            self.models.get(role).provider_kind(role)?;
        }
        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
    }
}

/// Search backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Backend identifier: `tavily` or `duckduckgo`.
    pub search_api: String,
    /// Results requested per query.
    pub max_results: usize,
    /// Per-source budget for raw content, in tokens (~4 chars each).
    pub max_tokens_per_source: usize,
    /// Whether formatted sources include the backend's raw page content.
    pub include_raw_content: bool,
    /// Hard cap on simultaneously in-flight queries.
    pub max_concurrent_searches: usize,
    /// Delay after each request for backends that throttle.
    pub request_delay_ms: u64,
    /// HTTP timeout per request.
    pub timeout_secs: u64,
    /// Environment variable holding the Tavily API key.
    pub tavily_api_key_env: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            search_api: "tavily".to_string(),
            max_results: 5,
            max_tokens_per_source: 600,
            include_raw_content: false,
            max_concurrent_searches: 3,
            request_delay_ms: 1500,
            timeout_secs: 30,
            tavily_api_key_env: "TAVILY_API_KEY".to_string(),
        }
    }
}

impl SearchConfig {
    pub fn backend(&self) -> Result<SearchApi, ConfigError> {
        self.search_api.parse()
    }
}

/// Supported search backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchApi {
    /// Full-content backend; results may carry raw page content.
    Tavily,
    /// Snippet-only backend; rate limited.
    DuckDuckGo,
}

impl FromStr for SearchApi {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tavily" => Ok(SearchApi::Tavily),
            "duckduckgo" => Ok(SearchApi::DuckDuckGo),
            _ => Err(ConfigError::UnsupportedSearchApi { api: s.to_string() }),
        }
    }
}

impl fmt::Display for SearchApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchApi::Tavily => write!(f, "tavily"),
            SearchApi::DuckDuckGo => write!(f, "duckduckgo"),
        }
    }
}

/// The distinct model-backed roles in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelRole {
    QueryWriter,
    Planner,
    SectionWriter,
    SectionGrader,
    FinalSectionWriter,
}

impl ModelRole {
    pub const ALL: [ModelRole; 5] = [
        ModelRole::QueryWriter,
        ModelRole::Planner,
        ModelRole::SectionWriter,
        ModelRole::SectionGrader,
        ModelRole::FinalSectionWriter,
    ];
}

impl fmt::Display for ModelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelRole::QueryWriter => write!(f, "query_writer"),
            ModelRole::Planner => write!(f, "planner"),
            ModelRole::SectionWriter => write!(f, "section_writer"),
            ModelRole::SectionGrader => write!(f, "section_grader"),
            ModelRole::FinalSectionWriter => write!(f, "final_section_writer"),
        }
    }
}

/// Provider and model selection for one role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleModelConfig {
    /// Provider name: "openai", "anthropic", "groq" or "ollama".
    pub provider: String,
    /// Model identifier, e.g. "gpt-4o".
    pub model: String,
    /// Sampling temperature; writers and graders default to 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl RoleModelConfig {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            temperature: None,
        }
    }

    pub fn provider_kind(&self, role: ModelRole) -> Result<ProviderKind, ConfigError> {
        ProviderKind::parse(&self.provider).ok_or_else(|| ConfigError::UnsupportedProvider {
            role: role.to_string(),
            provider: self.provider.clone(),
        })
    }
}

/// Per-role model selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelRoles {
    pub query_writer: RoleModelConfig,
    pub planner: RoleModelConfig,
    pub section_writer: RoleModelConfig,
    pub section_grader: RoleModelConfig,
    pub final_section_writer: RoleModelConfig,
}

impl Default for ModelRoles {
    fn default() -> Self {
        Self {
            query_writer: RoleModelConfig::new("openai", "gpt-4o-mini"),
            planner: RoleModelConfig::new("openai", "gpt-4o"),
            section_writer: RoleModelConfig::new("openai", "gpt-4o-mini"),
            section_grader: RoleModelConfig::new("openai", "gpt-4o"),
            final_section_writer: RoleModelConfig::new("openai", "gpt-4o-mini"),
        }
    }
}

impl ModelRoles {
    pub fn get(&self, role: ModelRole) -> &RoleModelConfig {
        match role {
            ModelRole::QueryWriter => &self.query_writer,
            ModelRole::Planner => &self.planner,
            ModelRole::SectionWriter => &self.section_writer,
            ModelRole::SectionGrader => &self.section_grader,
            ModelRole::FinalSectionWriter => &self.final_section_writer,
        }
    }

    pub fn get_mut(&mut self, role: ModelRole) -> &mut RoleModelConfig {
        match role {
            ModelRole::QueryWriter => &mut self.query_writer,
            ModelRole::Planner => &mut self.planner,
            ModelRole::SectionWriter => &mut self.section_writer,
            ModelRole::SectionGrader => &mut self.section_grader,
            ModelRole::FinalSectionWriter => &mut self.final_section_writer,
        }
    }
}

/// Known generation providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Groq,
    Ollama,
}

impl ProviderKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "openai" => Some(ProviderKind::OpenAi),
            "anthropic" => Some(ProviderKind::Anthropic),
            "groq" => Some(ProviderKind::Groq),
            "ollama" => Some(ProviderKind::Ollama),
            _ => None,
        }
    }
}

/// Connection settings for one provider endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Optional base URL override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl EndpointConfig {
    fn new(api_key_env: &str, base_url: Option<&str>) -> Self {
        Self {
            api_key_env: api_key_env.to_string(),
            base_url: base_url.map(str::to_string),
        }
    }
}

/// Generation provider endpoints shared by all roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub openai: EndpointConfig,
    pub anthropic: EndpointConfig,
    pub groq: EndpointConfig,
    pub ollama: EndpointConfig,
    /// Maximum tokens to generate per response.
    pub max_tokens: usize,
    /// HTTP timeout per request.
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            openai: EndpointConfig::new("OPENAI_API_KEY", None),
            anthropic: EndpointConfig::new("ANTHROPIC_API_KEY", None),
            groq: EndpointConfig::new("GROQ_API_KEY", Some("https://api.groq.com/openai/v1")),
            ollama: EndpointConfig::new("OLLAMA_API_KEY", Some("http://localhost:11434/v1")),
            max_tokens: 4096,
            timeout_secs: 120,
        }
    }
}

impl LlmConfig {
    pub fn endpoint(&self, kind: ProviderKind) -> &EndpointConfig {
        match kind {
            ProviderKind::OpenAi => &self.openai,
            ProviderKind::Anthropic => &self.anthropic,
            ProviderKind::Groq => &self.groq,
            ProviderKind::Ollama => &self.ollama,
        }
    }
}

/// Where run checkpoints are stored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Directory for checkpoint files; defaults to the platform data dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl CheckpointConfig {
    /// Resolve the checkpoint directory, falling back to `<workspace>/.scrivener/runs`.
    pub fn resolve_dir(&self, workspace: &Path) -> PathBuf {
        if let Some(dir) = &self.dir {
            return dir.clone();
        }
        directories::ProjectDirs::from("dev", "scrivener", "scrivener")
            .map(|d| d.data_dir().join("runs"))
            .unwrap_or_else(|| workspace.join(".scrivener").join("runs"))
    }
}

/// Per-invocation overrides applied after the layered configuration is loaded.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub report_structure: Option<String>,
    pub number_of_queries: Option<usize>,
    pub max_search_depth: Option<u32>,
    pub search_api: Option<String>,
    pub checkpoint_dir: Option<PathBuf>,
    pub models: Vec<(ModelRole, RoleModelConfig)>,
}

impl ConfigOverrides {
    pub fn apply(&self, config: &mut ReportConfig) {
        if let Some(structure) = &self.report_structure {
            config.report_structure = structure.clone();
        }
        if let Some(n) = self.number_of_queries {
            config.number_of_queries = n;
        }
        if let Some(depth) = self.max_search_depth {
            config.max_search_depth = depth;
        }
        if let Some(api) = &self.search_api {
            config.search.search_api = api.clone();
        }
        if let Some(dir) = &self.checkpoint_dir {
            config.checkpoint.dir = Some(dir.clone());
        }
        for (role, model) in &self.models {
            *config.models.get_mut(*role) = model.clone();
        }
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with `SCRIVENER_`, `__` for nesting)
/// 2. Explicit config file (`explicit`, or the `CONFIG_FILEPATH` env var), TOML or YAML
/// 3. Workspace-local config (`.scrivener/config.toml`)
/// 4. User config (`~/.config/scrivener/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    explicit: Option<&Path>,
) -> Result<ReportConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(ReportConfig::default()));

    if let Some(config_dir) = directories::ProjectDirs::from("dev", "scrivener", "scrivener") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = merge_file(figment, &user_config)?;
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".scrivener").join("config.toml");
        if ws_config.exists() {
            figment = merge_file(figment, &ws_config)?;
        }
    }

    let explicit = explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os("CONFIG_FILEPATH").map(PathBuf::from));
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(ConfigError::FileNotFound { path });
        }
        figment = merge_file(figment, &path)?;
    }

    // SCRIVENER_NUMBER_OF_QUERIES, SCRIVENER_SEARCH__SEARCH_API, ...
    figment = figment.merge(Env::prefixed("SCRIVENER_").split("__"));

    figment.extract().map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })
}

/// Merge one config file, TOML or YAML by extension, followed by its flat keys.
fn merge_file(figment: Figment, path: &Path) -> Result<Figment, ConfigError> {
    let is_yaml = path.extension().is_some_and(|e| e == "yaml" || e == "yml");
    let (figment, flat) = if is_yaml {
        (
            figment.merge(Yaml::file(path)),
            Figment::from(Yaml::file(path)).extract::<FlatFileKeys>(),
        )
    } else {
        (
            figment.merge(Toml::file(path)),
            Figment::from(Toml::file(path)).extract::<FlatFileKeys>(),
        )
    };
    let flat = flat.map_err(|e| ConfigError::ParseError {
        message: format!("{}: {}", path.display(), e),
    })?;
    Ok(figment.merge(Serialized::defaults(flat.into_nested())))
}

/// Single-level keys accepted in config files alongside the nested layout:
/// `search_api`, `default_report_structure` and a `<role>_provider` /
/// `<role>_model` pair per role. They win over nested keys in the same file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FlatFileKeys {
    default_report_structure: Option<String>,
    search_api: Option<String>,
    query_writer_provider: Option<String>,
    query_writer_model: Option<String>,
    planner_provider: Option<String>,
    planner_model: Option<String>,
    section_writer_provider: Option<String>,
    section_writer_model: Option<String>,
    section_grader_provider: Option<String>,
    section_grader_model: Option<String>,
    final_section_writer_provider: Option<String>,
    final_section_writer_model: Option<String>,
}

impl FlatFileKeys {
    fn role(&self, role: ModelRole) -> (&Option<String>, &Option<String>) {
        match role {
            ModelRole::QueryWriter => (&self.query_writer_provider, &self.query_writer_model),
            ModelRole::Planner => (&self.planner_provider, &self.planner_model),
            ModelRole::SectionWriter => (&self.section_writer_provider, &self.section_writer_model),
            ModelRole::SectionGrader => (&self.section_grader_provider, &self.section_grader_model),
            ModelRole::FinalSectionWriter => (
                &self.final_section_writer_provider,
                &self.final_section_writer_model,
            ),
        }
    }

    /// Rewrite the flat keys into the nested layout, leaving unset keys out.
    fn into_nested(self) -> serde_json::Value {
        let mut root = serde_json::Map::new();
        let mut models = serde_json::Map::new();
        for role in ModelRole::ALL {
            let mut entry = serde_json::Map::new();
            let (provider, model) = self.role(role);
            if let Some(provider) = provider {
                entry.insert("provider".into(), provider.clone().into());
            }
            if let Some(model) = model {
                entry.insert("model".into(), model.clone().into());
            }
            if !entry.is_empty() {
                models.insert(role.to_string(), entry.into());
            }
        }
        if !models.is_empty() {
            root.insert("models".into(), models.into());
        }
        if let Some(structure) = self.default_report_structure {
            root.insert("report_structure".into(), structure.into());
        }
        if let Some(api) = self.search_api {
            root.insert("search".into(), serde_json::json!({ "search_api": api }));
        }
        serde_json::Value::Object(root)
    }
}
