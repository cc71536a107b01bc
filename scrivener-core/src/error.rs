//! Error types for the Scrivener core library.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering configuration, search, generation, the approval gate, report
//! compilation and checkpoint persistence.

use std::path::PathBuf;
use uuid::Uuid;

/// Top-level error type for the Scrivener core library.
#[derive(Debug, thiserror::Error)]
pub enum ScrivenerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Approval gate error: {0}")]
    Gate(#[from] GateError),

    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Section worker for ordinal {ordinal} failed: {message}")]
    Worker { ordinal: u32, message: String },
}

/// Errors from the configuration system. Always fatal for the run.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unsupported search API: {api}")]
    UnsupportedSearchApi { api: String },

    #[error("Unsupported model provider '{provider}' for role {role}")]
    UnsupportedProvider { role: String, provider: String },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Errors from an individual search request.
///
/// These never abort a batch: the dispatcher logs them and degrades the
/// query to an empty result set.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Search request for '{query}' failed: {message}")]
    Request { query: String, message: String },

    #[error("Search response for '{query}' could not be parsed: {message}")]
    ResponseParse { query: String, message: String },

    #[error("Search backend rate limited query '{query}'")]
    RateLimited { query: String },

    #[error("Search backend rejected credentials ({backend})")]
    AuthFailed { backend: String },
}

/// Errors from generation provider interactions.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Structured output for {schema} did not validate: {message}")]
    SchemaViolation { schema: String, message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Model returned an empty response for {purpose}")]
    EmptyResponse { purpose: String },
}

/// Errors raised at the plan approval gate.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("Resumption value of type {found} is not supported; pass true to approve or a string of feedback")]
    InvalidResumptionInput { found: String },

    #[error("Run {run_id} is not waiting for plan approval (stage: {stage})")]
    NotAwaitingApproval { run_id: Uuid, stage: String },

    #[error("Report plan is empty")]
    EmptyPlan,
}

/// Errors from final report compilation.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("Section {ordinal} ('{name}') has no content")]
    MissingContent { ordinal: u32, name: String },

    #[error("Section ordinal {ordinal} appears more than once")]
    DuplicateOrdinal { ordinal: u32 },

    #[error("Report has no sections")]
    NoSections,
}

/// Errors from the checkpoint store.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("No checkpoint found for run {run_id}")]
    NotFound { run_id: Uuid },

    #[error("Checkpoint for run {run_id} is corrupt: {message}")]
    Corrupt { run_id: Uuid, message: String },

    #[error("Run {run_id} cannot be continued from stage {stage}")]
    WrongStage { run_id: Uuid, stage: String },

    #[error("Checkpoint persistence failed: {message}")]
    Persistence { message: String },
}

/// A type alias for results using the top-level `ScrivenerError`.
pub type Result<T> = std::result::Result<T, ScrivenerError>;
