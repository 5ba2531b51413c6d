use std::sync::Arc;

use tracing::debug;

use crate::provider::{GenerateRequest, LlmProvider, ProviderError};

/// Hard cap on generated chat content; individual adapters may trim further.
const MAX_FACT_CHARS: usize = 400;

/// Generates the short chat "facts" posted on schedule or keyword trigger.
pub struct FactGenerator {
    provider: Arc<dyn LlmProvider>,
}

impl FactGenerator {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Render one fact from the tenant's prompt template.
    ///
    /// The output is flattened to a single line and truncated on a char
    /// boundary so no platform rejects it for length.
    pub async fn generate(
        &self,
        model: &str,
        prompt_template: &str,
        temperature: u8,
    ) -> Result<String, ProviderError> {
        let req = GenerateRequest {
            model: model.to_string(),
            prompt: prompt_template.to_string(),
            temperature,
            max_tokens: 200,
        };
        let raw = self.provider.generate(&req).await?;
        let fact = sanitize(&raw);
        debug!(provider = self.provider.name(), chars = fact.len(), "fact generated");
        if fact.is_empty() {
            return Err(ProviderError::Parse("model returned empty fact".to_string()));
        }
        Ok(fact)
    }
}

/// Collapse whitespace/newlines and clamp length.
fn sanitize(raw: &str) -> String {
    let flat = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = flat.trim_matches('"').trim();
    trimmed.chars().take(MAX_FACT_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct CannedProvider(String);

    #[async_trait]
    impl LlmProvider for CannedProvider {
        fn name(&self) -> &str {
            "canned"
        }
        async fn generate(&self, _req: &GenerateRequest) -> Result<String, ProviderError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn facts_are_flattened_and_clamped() {
        let long = format!("\"Did you know?\n\n {}\"", "x".repeat(600));
        let generator = FactGenerator::new(Arc::new(CannedProvider(long)));
        let fact = generator.generate("m", "tell me a fact", 10).await.unwrap();
        assert!(!fact.contains('\n'));
        assert!(fact.len() <= MAX_FACT_CHARS);
        assert!(fact.starts_with("Did you know?"));
    }

    #[tokio::test]
    async fn empty_output_is_an_error() {
        let generator = FactGenerator::new(Arc::new(CannedProvider("   ".into())));
        assert!(generator.generate("m", "p", 10).await.is_err());
    }
}
