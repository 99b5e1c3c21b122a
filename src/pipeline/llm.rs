//! LLM interaction: send the structuring prompt and return the raw answer.
//!
//! The orchestrator only sees the [`LlmClient`] trait. The production
//! adapter, [`ProviderClient`], wraps an `edgequake_llm` provider and owns
//! retry, backoff and timeout so callers never reason about transport.
//! Whatever goes wrong in here surfaces as an [`LlmError`], which the
//! orchestrator treats the same as an empty answer.
//!
//! ## Retry Strategy
//!
//! Rate limits and gateway errors are transient. Retries back off
//! exponentially (`retry_backoff_ms * 2^(attempt-1)`); with the defaults
//! (500 ms, 2 retries) a failing call costs at most 1.5 s of waiting on top
//! of the per-attempt timeout.

use crate::config::PipelineConfig;
use crate::error::LlmError;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Sampling settings for one completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionSettings {
    pub temperature: f32,
    pub max_tokens: usize,
}

/// A chat-completion capability: one system message, one user message, text
/// back.
///
/// `Ok` may still be blank; the caller decides what an empty answer means.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, system: &str, user: &str, settings: &CompletionSettings) -> Result<String, LlmError>;
}

/// [`LlmClient`] backed by an `edgequake_llm` provider.
pub struct ProviderClient {
    provider: Arc<dyn LLMProvider>,
    max_retries: u32,
    retry_backoff_ms: u64,
    api_timeout_secs: u64,
}

impl ProviderClient {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            api_timeout_secs: config.api_timeout_secs,
        }
    }

    /// Resolve a provider from `config` (see [`resolve_provider`]) and wrap it.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, LlmError> {
        Ok(Self::new(resolve_provider(config)?, config))
    }
}

#[async_trait]
impl LlmClient for ProviderClient {
    async fn complete(&self, system: &str, user: &str, settings: &CompletionSettings) -> Result<String, LlmError> {
        let messages = vec![ChatMessage::system(system), ChatMessage::user(user)];
        let options = build_options(settings);
        let per_call = Duration::from_secs(self.api_timeout_secs);
        let start = Instant::now();

        let mut last_err = LlmError::Api {
            message: "no attempt made".to_string(),
        };

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!("LLM retry {}/{} after {}ms", attempt, self.max_retries, backoff);
                sleep(Duration::from_millis(backoff)).await;
            }

            match timeout(per_call, self.provider.chat(&messages, Some(&options))).await {
                Ok(Ok(response)) => {
                    debug!(
                        "LLM answered: {} input tokens, {} output tokens, {:?}",
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    return Ok(response.content);
                }
                Ok(Err(e)) => {
                    warn!("LLM attempt {} failed: {}", attempt + 1, e);
                    last_err = LlmError::Api { message: e.to_string() };
                }
                Err(_) => {
                    warn!("LLM attempt {} timed out after {}s", attempt + 1, self.api_timeout_secs);
                    last_err = LlmError::Timeout {
                        secs: self.api_timeout_secs,
                    };
                }
            }
        }

        Err(last_err)
    }
}

/// An [`LlmClient`] that never answers.
///
/// Used when no provider could be resolved: runs still proceed through OCR
/// and land on the fallback path instead of refusing to start.
#[derive(Debug, Clone)]
pub struct UnavailableClient {
    error: LlmError,
}

impl UnavailableClient {
    pub fn new(error: LlmError) -> Self {
        Self { error }
    }
}

#[async_trait]
impl LlmClient for UnavailableClient {
    async fn complete(&self, _system: &str, _user: &str, _settings: &CompletionSettings) -> Result<String, LlmError> {
        Err(self.error.clone())
    }
}

fn build_options(settings: &CompletionSettings) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(settings.temperature),
        max_tokens: Some(settings.max_tokens),
        ..Default::default()
    }
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, LlmError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| LlmError::ProviderNotConfigured {
        provider: provider_name.to_string(),
        hint: e.to_string(),
    })
}

/// Resolve the LLM provider, most specific first:
///
/// 1. `config.provider`, used as-is
/// 2. `config.provider_name` with the configured (or default) model
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, when both are set
/// 4. OpenAI when `OPENAI_API_KEY` is set, else whatever
///    [`ProviderFactory::from_env`] detects
pub fn resolve_provider(config: &PipelineConfig) -> Result<Arc<dyn LLMProvider>, LlmError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        return create_provider(name, config.model_or_default());
    }

    if let (Ok(prov), Ok(model)) = (std::env::var("EDGEQUAKE_LLM_PROVIDER"), std::env::var("EDGEQUAKE_MODEL")) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        return create_provider("openai", config.model_or_default());
    }

    let (llm_provider, _embedding) = ProviderFactory::from_env().map_err(|e| LlmError::ProviderNotConfigured {
        provider: "auto".to_string(),
        hint: format!(
            "No LLM provider could be auto-detected from environment.\n\
             Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
             Error: {e}"
        ),
    })?;

    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_carry_settings() {
        let opts = build_options(&PipelineConfig::default().completion_settings());
        assert_eq!(opts.temperature, Some(0.0));
        assert_eq!(opts.max_tokens, Some(3000));
    }

    #[tokio::test]
    async fn unavailable_client_always_errors() {
        let client = UnavailableClient::new(LlmError::ProviderNotConfigured {
            provider: "auto".into(),
            hint: "set OPENAI_API_KEY".into(),
        });
        let settings = PipelineConfig::default().completion_settings();
        let err = client.complete("sys", "user", &settings).await.unwrap_err();
        assert!(matches!(err, LlmError::ProviderNotConfigured { .. }));
    }
}
