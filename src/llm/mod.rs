//! LLM integration.
//!
//! Completions go to OpenAI through rig-core; `RigAdapter` bridges rig's
//! `CompletionModel` trait to our `LlmProvider` trait.

pub mod provider;
mod rig_adapter;

pub use provider::*;
pub use rig_adapter::RigAdapter;

use std::sync::Arc;

use rig::client::CompletionClient;
use rig::providers::openai;
use secrecy::{ExposeSecret, SecretString};

use crate::error::LlmError;

/// Model used when `LEADFLOW_LLM_MODEL` is unset.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: SecretString,
    pub model: String,
}

/// Build the completion provider used for enrichment.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        openai::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "openai".to_string(),
                reason: format!("client setup failed: {e}"),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!(model = %config.model, "LLM provider ready");
    Ok(Arc::new(RigAdapter::new(model, &config.model)))
}

/// Startup connectivity check: a tiny prompt that must come back non-empty.
pub async fn probe_connection(llm: &dyn LlmProvider) -> Result<String, LlmError> {
    let request = CompletionRequest::prompt("Say 'API works!'")
        .with_max_tokens(10)
        .with_temperature(0.1);
    let response = llm.complete(request).await?;
    let reply = response.content.trim().to_string();
    if reply.is_empty() {
        return Err(LlmError::EmptyResponse {
            provider: llm.model_name().to_string(),
        });
    }
    tracing::info!(model = llm.model_name(), reply = %reply, "LLM connection test passed");
    Ok(reply)
}
