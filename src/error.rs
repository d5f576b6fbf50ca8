//! Error types for leadflow.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Lead ledger errors.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Ledger IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Ledger CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Collaborator channel errors (mail provider, chat notifications, website fetch).
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to send on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Failed to fetch from channel {name}: {reason}")]
    FetchFailed { name: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Empty completion from {provider}")]
    EmptyResponse { provider: String },
}

/// Enrichment stage errors. Each variant short-circuits the enrichment.
#[derive(Debug, thiserror::Error)]
pub enum EnrichError {
    #[error("Website {website} returned no usable content")]
    EmptyWebsite { website: String },

    #[error("Website fetch failed for {website}: {reason}")]
    Fetch { website: String, reason: String },

    #[error("Summary generation produced no text")]
    EmptySummary,

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

/// No viable document converter exists in the execution environment.
///
/// Continuing would accumulate leads that can never be completed, so this is
/// surfaced all the way to the binary, which terminates.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Fatal environment error: {reason}")]
pub struct FatalEnvironmentError {
    pub reason: String,
}

impl FatalEnvironmentError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Document rendering and conversion errors.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("Template not found: {0}")]
    TemplateMissing(PathBuf),

    #[error("Template is not a valid document archive: {0}")]
    Archive(String),

    #[error("Template XML error: {0}")]
    Xml(String),

    #[error("Document IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Conversion failed with {converter}: {reason}")]
    ConversionFailed { converter: String, reason: String },

    #[error("Conversion timed out after {0:?}")]
    ConversionTimedOut(Duration),

    #[error(transparent)]
    Fatal(#[from] FatalEnvironmentError),
}

impl DocumentError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

impl From<zip::result::ZipError> for DocumentError {
    fn from(e: zip::result::ZipError) -> Self {
        Self::Archive(e.to_string())
    }
}

impl From<quick_xml::Error> for DocumentError {
    fn from(e: quick_xml::Error) -> Self {
        Self::Xml(e.to_string())
    }
}

/// Pipeline (orchestrator) errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Mail fetch failed: {0}")]
    Fetch(ChannelError),

    #[error("Ledger unavailable: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Enrichment failed: {0}")]
    Enrichment(#[from] EnrichError),

    #[error("Document stage failed: {0}")]
    Document(DocumentError),

    #[error("Delivery failed: {0}")]
    Delivery(ChannelError),

    #[error(transparent)]
    Fatal(#[from] FatalEnvironmentError),
}

impl PipelineError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

impl From<DocumentError> for PipelineError {
    fn from(e: DocumentError) -> Self {
        match e {
            DocumentError::Fatal(fatal) => Self::Fatal(fatal),
            other => Self::Document(other),
        }
    }
}

/// Result type alias for leadflow.
pub type Result<T> = std::result::Result<T, Error>;
