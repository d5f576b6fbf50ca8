//! Configuration types, built from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::channels::email::EmailConfig;
use crate::channels::telegram::TelegramConfig;
use crate::document::ConverterConfig;
use crate::error::ConfigError;
use crate::llm::{DEFAULT_MODEL, LlmConfig};
use crate::pipeline::classifier::ClassifierConfig;

/// Default seconds between inbox checks.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 15;

/// Default name used for our own organization in replies and prompts.
pub const DEFAULT_COMPANY_NAME: &str = "Our Organization";

/// Filesystem layout for persisted state and artifacts.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Flat CSV ledger of qualified leads.
    pub ledger: PathBuf,
    /// `.docx` template with bracketed placeholders.
    pub template: PathBuf,
    /// Directory receiving filled documents and their converted output.
    pub output_dir: PathBuf,
    /// Append-only activity log.
    pub activity_log: PathBuf,
    /// Append-only failure log.
    pub failure_log: PathBuf,
}

impl Paths {
    /// Standard layout rooted at `dir`.
    pub fn under(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            ledger: dir.join("qualified_leads.csv"),
            template: dir.join("template.docx"),
            output_dir: dir.join("personalised"),
            activity_log: dir.join("master_log.txt"),
            failure_log: dir.join("failed_steps.txt"),
        }
    }
}

/// Everything the orchestrator needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Sleep between poll cycles.
    pub poll_interval: Duration,
    /// Our organization's name, used in prompts and the reply letter.
    pub company_name: String,
    /// Address quoted in the reply letter for follow-up questions.
    pub reply_from: String,
    /// Subject used when the inbound message had none.
    pub fallback_subject: String,
    pub paths: Paths,
    pub classifier: ClassifierConfig,
    pub converter: ConverterConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            company_name: DEFAULT_COMPANY_NAME.to_string(),
            reply_from: String::new(),
            fallback_subject: "Professional Solutions for Your Organization".to_string(),
            paths: Paths::under("."),
            classifier: ClassifierConfig::default(),
            converter: ConverterConfig::default(),
        }
    }
}

/// Full process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub llm: LlmConfig,
    pub email: EmailConfig,
    /// `None` when the chat notification channel is disabled.
    pub telegram: Option<TelegramConfig>,
}

impl Config {
    /// Build the configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let poll_interval = match std::env::var("LEADFLOW_POLL_INTERVAL_SECS") {
            Ok(raw) => parse_interval_secs("LEADFLOW_POLL_INTERVAL_SECS", &raw)?,
            Err(_) => Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        };

        let data_dir = std::env::var("LEADFLOW_DATA_DIR").unwrap_or_else(|_| ".".to_string());
        let mut paths = Paths::under(&data_dir);
        if let Ok(template) = std::env::var("LEADFLOW_TEMPLATE") {
            paths.template = PathBuf::from(template);
        }

        let email = EmailConfig::from_env()
            .ok_or_else(|| ConfigError::MissingEnvVar("EMAIL_IMAP_HOST".to_string()))?;

        let company_name = std::env::var("LEADFLOW_COMPANY_NAME")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_COMPANY_NAME.to_string());

        let mut converter = ConverterConfig::default();
        if let Ok(list) = std::env::var("LEADFLOW_PRIMARY_CONVERTERS") {
            converter.primary_programs = split_list(&list);
        }
        if let Ok(program) = std::env::var("LEADFLOW_SECONDARY_CONVERTER") {
            converter.secondary_program = Some(program).filter(|p| !p.trim().is_empty());
        }

        let pipeline = PipelineConfig {
            poll_interval,
            company_name,
            reply_from: email.from_address.clone(),
            fallback_subject: std::env::var("LEADFLOW_REPLY_SUBJECT")
                .unwrap_or_else(|_| PipelineConfig::default().fallback_subject),
            paths,
            classifier: ClassifierConfig::default(),
            converter,
        };

        let api_key = std::env::var("LEADFLOW_LLM_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("LEADFLOW_LLM_API_KEY".to_string()))?;
        let model = std::env::var("LEADFLOW_LLM_MODEL")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let llm = LlmConfig {
            api_key: SecretString::from(api_key),
            model,
        };

        let telegram = TelegramConfig::from_env(poll_interval)?;

        Ok(Self {
            pipeline,
            llm,
            email,
            telegram,
        })
    }
}

/// Parse a whole number of seconds. Zero is rejected: the poll loop and the
/// notification flusher both need a non-zero period.
pub(crate) fn parse_interval_secs(key: &str, raw: &str) -> Result<Duration, ConfigError> {
    let secs: u64 = raw.trim().parse().map_err(|e: std::num::ParseIntError| {
        ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }
    })?;
    if secs == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be at least 1 second".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}

/// Split a comma-separated list, dropping empty entries.
pub(crate) fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
