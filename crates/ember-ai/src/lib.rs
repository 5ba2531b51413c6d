pub mod facts;
pub mod moderation;
pub mod ollama;
pub mod openai;
pub mod provider;

pub use facts::FactGenerator;
pub use moderation::{ToxicSeverity, ToxicityClassifier, ToxicityVerdict};
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use provider::{build_provider, GenerateRequest, LlmProvider, ProviderError};
