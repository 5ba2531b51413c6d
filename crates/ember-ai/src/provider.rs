use std::sync::Arc;

use async_trait::async_trait;

use ember_core::config::AiConfig;

/// Request to an LLM provider. Temperature arrives on the tenant config's
/// 0..20 integer scale and is converted to the provider's 0.0..2.0 float.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    /// 0..20, scaled by /10 before it reaches the API.
    pub temperature: u8,
    pub max_tokens: u32,
}

impl GenerateRequest {
    pub fn temperature_f(&self) -> f32 {
        f32::from(self.temperature.min(20)) / 10.0
    }
}

/// Common interface for text-generation providers (OpenAI, Ollama).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    /// Generate one completion, waiting for the full response.
    async fn generate(&self, req: &GenerateRequest) -> Result<String, ProviderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}

/// Pick the provider for a deployment: local Ollama when `local_only` is
/// set or no OpenAI key exists, OpenAI otherwise.
pub fn build_provider(ai: &AiConfig) -> Arc<dyn LlmProvider> {
    match (&ai.openai_api_key, ai.local_only) {
        (Some(key), false) => Arc::new(crate::openai::OpenAiProvider::new(key.clone())),
        _ => Arc::new(crate::ollama::OllamaProvider::new(ai.ollama_url.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temperature_scales_to_float() {
        let req = GenerateRequest {
            model: "m".into(),
            prompt: "p".into(),
            temperature: 13,
            max_tokens: 100,
        };
        assert!((req.temperature_f() - 1.3).abs() < 1e-6);

        let clamped = GenerateRequest {
            temperature: 40,
            ..req
        };
        assert!((clamped.temperature_f() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn local_only_forces_ollama() {
        let ai = AiConfig {
            local_only: true,
            ollama_url: "http://localhost:11434".into(),
            openai_api_key: Some("sk-abc".into()),
        };
        assert_eq!(build_provider(&ai).name(), "ollama");
    }

    #[test]
    fn key_without_local_only_selects_openai() {
        let ai = AiConfig {
            local_only: false,
            ollama_url: "http://localhost:11434".into(),
            openai_api_key: Some("sk-abc".into()),
        };
        assert_eq!(build_provider(&ai).name(), "openai");
    }
}
