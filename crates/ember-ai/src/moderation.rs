//! Toxicity classification via the OpenAI moderation endpoint, with a
//! per-text decision cache so repeated chat spam costs one API call.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, warn};

use ember_core::config::DEFAULT_TIMEOUT_MS;

use crate::provider::ProviderError;

/// Cached decisions live this long.
const CACHE_TTL: Duration = Duration::from_secs(3600);

/// Severity derived from the strongest category score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ToxicSeverity {
    Low,
    Medium,
    High,
}

/// Classifier verdict for one message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToxicityVerdict {
    pub flagged: bool,
    /// Strongest category score, 0.0..1.0.
    pub score: f64,
    pub severity: ToxicSeverity,
}

/// Map a category score onto the contractual severity tiers.
pub fn severity_for_score(score: f64) -> ToxicSeverity {
    if score > 0.8 {
        ToxicSeverity::High
    } else if score > 0.5 {
        ToxicSeverity::Medium
    } else {
        ToxicSeverity::Low
    }
}

/// OpenAI moderation client + 1-hour decision cache.
///
/// Constructed without a key (LOCAL_AI_ONLY deployments) every call returns
/// `Ok(None)` — the toxic rule is effectively disabled.
pub struct ToxicityClassifier {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    cache: Mutex<HashMap<String, (ToxicityVerdict, Instant)>>,
}

impl ToxicityClassifier {
    pub fn new(api_key: Option<String>) -> Self {
        Self::with_base_url(api_key, "https://api.openai.com".to_string())
    }

    pub fn with_base_url(api_key: Option<String>, base_url: String) -> Self {
        if api_key.is_none() {
            warn!("no moderation API key configured; toxic rule will be skipped");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key,
            base_url,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Classify a message. `Ok(None)` means no classifier is available.
    ///
    /// Decisions are cached by exact lowercased text for one hour.
    pub async fn classify(&self, text: &str) -> Result<Option<ToxicityVerdict>, ProviderError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Ok(None);
        };

        let key = text.to_lowercase();
        if let Some(verdict) = self.cached(&key) {
            debug!("moderation cache hit");
            return Ok(Some(verdict));
        }

        let resp = self
            .client
            .post(format!("{}/v1/moderations", self.base_url))
            .bearer_auth(api_key)
            .json(&serde_json::json!({ "input": text }))
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    ProviderError::Unavailable(e.to_string())
                } else {
                    ProviderError::Http(e)
                }
            })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status,
                message: body,
            });
        }

        let api_resp: ModerationResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        let result = api_resp
            .results
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Parse("empty moderation result".to_string()))?;

        let score = result
            .category_scores
            .values()
            .copied()
            .fold(0.0_f64, f64::max);
        let verdict = ToxicityVerdict {
            flagged: result.flagged,
            score,
            severity: severity_for_score(score),
        };

        self.cache
            .lock()
            .unwrap()
            .insert(key, (verdict, Instant::now()));
        Ok(Some(verdict))
    }

    fn cached(&self, key: &str) -> Option<ToxicityVerdict> {
        let cache = self.cache.lock().unwrap();
        cache
            .get(key)
            .filter(|(_, at)| at.elapsed() < CACHE_TTL)
            .map(|(verdict, _)| *verdict)
    }

    /// Evict expired entries. Called from the 60-second maintenance sweep.
    pub fn sweep(&self) {
        let mut cache = self.cache.lock().unwrap();
        cache.retain(|_, (_, at)| at.elapsed() < CACHE_TTL);
    }

    /// Seed a decision (tests).
    #[cfg(test)]
    fn seed(&self, text: &str, verdict: ToxicityVerdict) {
        self.cache
            .lock()
            .unwrap()
            .insert(text.to_lowercase(), (verdict, Instant::now()));
    }
}

#[derive(Deserialize)]
struct ModerationResponse {
    results: Vec<ModerationResult>,
}

#[derive(Deserialize)]
struct ModerationResult {
    flagged: bool,
    category_scores: HashMap<String, f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_tiers() {
        assert_eq!(severity_for_score(0.95), ToxicSeverity::High);
        assert_eq!(severity_for_score(0.8), ToxicSeverity::Medium);
        assert_eq!(severity_for_score(0.6), ToxicSeverity::Medium);
        assert_eq!(severity_for_score(0.5), ToxicSeverity::Low);
        assert_eq!(severity_for_score(0.1), ToxicSeverity::Low);
    }

    #[tokio::test]
    async fn no_key_disables_classifier() {
        let classifier = ToxicityClassifier::new(None);
        assert!(classifier.classify("anything").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cache_is_keyed_by_lowercased_text() {
        let classifier = ToxicityClassifier::new(Some("sk-test".into()));
        let verdict = ToxicityVerdict {
            flagged: true,
            score: 0.9,
            severity: ToxicSeverity::High,
        };
        classifier.seed("You Are Terrible", verdict);

        // different casing, same decision, no network call
        let hit = classifier.classify("you are TERRIBLE").await.unwrap();
        assert_eq!(hit, Some(verdict));
    }

    #[test]
    fn sweep_retains_fresh_entries() {
        let classifier = ToxicityClassifier::new(Some("sk-test".into()));
        classifier.seed(
            "fresh",
            ToxicityVerdict {
                flagged: false,
                score: 0.1,
                severity: ToxicSeverity::Low,
            },
        );
        classifier.sweep();
        assert!(classifier.cached("fresh").is_some());
    }
}
