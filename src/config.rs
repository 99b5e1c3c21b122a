//! Configuration types for the run pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share a config between the orchestrator and the collaborators
//! it wires up, and to log exactly which settings a run used.

use crate::error::PipelineError;
use crate::pipeline::llm::CompletionSettings;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// What the orchestrator does when structuring fails (blank or malformed
/// model output).
///
/// OCR failures are unaffected: they always fail the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FallbackPolicy {
    /// Persist an empty result carrying the failure as a warning and mark the
    /// run `COMPLETED`. A degraded success: the caller still gets an artifact.
    CompleteWithWarning,
    /// Mark the run `FAILED` with the failure text as its error.
    FailRun,
}

/// The policy used unless a caller opts out.
pub const DEFAULT_FALLBACK_POLICY: FallbackPolicy = FallbackPolicy::CompleteWithWarning;

impl Default for FallbackPolicy {
    fn default() -> Self {
        DEFAULT_FALLBACK_POLICY
    }
}

/// Configuration for the OCR → LLM structuring pipeline.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_docstruct::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .model("gpt-4o-mini")
///     .max_tokens(3000)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    // ── LLM ───────────────────────────────────────────────────────────────
    /// LLM model identifier, e.g. "gpt-4o-mini". If None, uses the default
    /// structuring model.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, the provider is auto-detected from the
    /// environment.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.0.
    ///
    /// Structuring is transcription into a schema; any creativity shows up
    /// as invented field values.
    pub temperature: f32,

    /// Maximum tokens the model may generate. Default: 3000.
    ///
    /// A truncated answer is unparseable JSON and ends in the fallback path,
    /// so this must cover the largest expected form.
    pub max_tokens: usize,

    /// Retry attempts on a failed LLM call. Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call LLM timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Custom system prompt. If None, uses the built-in structuring prompt.
    pub system_prompt: Option<String>,

    /// What to do when the model output is absent or malformed.
    /// Default: [`DEFAULT_FALLBACK_POLICY`].
    pub fallback_policy: FallbackPolicy,

    // ── OCR ───────────────────────────────────────────────────────────────
    /// Directory holding `<lang>.traineddata`. If None, resolved from
    /// `TESSDATA_PATH`, then `TESSDATA_PREFIX`, then `/usr/share/tessdata`.
    pub tessdata_dir: Option<PathBuf>,

    /// Tesseract language(s), e.g. "eng" or "eng+fra". Default: "eng".
    pub ocr_language: String,

    /// Tesseract executable. Default: "tesseract".
    pub tesseract_bin: String,
}

/// Model used when neither the config nor the environment names one.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 3000,
            max_retries: 2,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            system_prompt: None,
            fallback_policy: DEFAULT_FALLBACK_POLICY,
            tessdata_dir: None,
            ocr_language: "eng".to_string(),
            tesseract_bin: "tesseract".to_string(),
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("system_prompt", &self.system_prompt.as_ref().map(|p| p.len()))
            .field("fallback_policy", &self.fallback_policy)
            .field("tessdata_dir", &self.tessdata_dir)
            .field("ocr_language", &self.ocr_language)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// The sampling settings sent with every structuring call.
    pub fn completion_settings(&self) -> CompletionSettings {
        CompletionSettings {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    /// The configured model, or [`DEFAULT_MODEL`].
    pub fn model_or_default(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn fallback_policy(mut self, policy: FallbackPolicy) -> Self {
        self.config.fallback_policy = policy;
        self
    }

    pub fn tessdata_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.tessdata_dir = Some(dir.into());
        self
    }

    pub fn ocr_language(mut self, lang: impl Into<String>) -> Self {
        self.config.ocr_language = lang.into();
        self
    }

    pub fn tesseract_bin(mut self, bin: impl Into<String>) -> Self {
        self.config.tesseract_bin = bin.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.max_tokens == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(PipelineError::InvalidConfig(
                "api_timeout_secs must be ≥ 1".into(),
            ));
        }
        if c.ocr_language.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "ocr_language must name at least one Tesseract language".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_deterministic() {
        let config = PipelineConfig::default();
        assert_eq!(config.temperature, 0.0);
        assert_eq!(config.max_tokens, 3000);
        assert_eq!(config.fallback_policy, FallbackPolicy::CompleteWithWarning);
        assert_eq!(config.model_or_default(), DEFAULT_MODEL);
        assert_eq!(config.ocr_language, "eng");
    }

    #[test]
    fn default_policy_constant_matches_default() {
        assert_eq!(FallbackPolicy::default(), DEFAULT_FALLBACK_POLICY);
    }

    #[test]
    fn temperature_is_clamped() {
        let config = PipelineConfig::builder().temperature(5.0).build().unwrap();
        assert_eq!(config.temperature, 2.0);
    }

    #[test]
    fn zero_max_tokens_rejected() {
        let err = PipelineConfig::builder().max_tokens(0).build().unwrap_err();
        assert!(err.to_string().contains("max_tokens"));
    }

    #[test]
    fn empty_language_rejected() {
        assert!(PipelineConfig::builder().ocr_language(" ").build().is_err());
    }

    #[test]
    fn completion_settings_follow_config() {
        let config = PipelineConfig::builder().max_tokens(1200).build().unwrap();
        let settings = config.completion_settings();
        assert_eq!(settings.max_tokens, 1200);
        assert_eq!(settings.temperature, 0.0);
    }
}
