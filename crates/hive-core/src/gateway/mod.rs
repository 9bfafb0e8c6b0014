//! Collaborator seams: the model gateway and the search provider.
//!
//! Both are async traits so the orchestrator can run against a real
//! endpoint ([`http::HttpModelGateway`]) or the deterministic fakes in
//! [`fakes`].

pub mod fakes;
pub mod http;

use async_trait::async_trait;
use hive_state::VersionId;
use serde::{Deserialize, Serialize};

use crate::text::estimate_tokens;

/// Line separating an agent prompt's instructions from the material it
/// works on.
pub const MATERIAL_SEPARATOR: &str = "\n---\n";

/// Gateway failures. Only some are worth retrying.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("rate limited")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("request timed out")]
    Timeout,

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

impl GatewayError {
    /// Timeouts, rate limits and malformed output are transient.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GatewayError::RateLimited { .. } | GatewayError::Timeout | GatewayError::Malformed(_)
        )
    }
}

/// What a generation is for. Gateways may use it to pick a system prompt;
/// fakes use it to route scripted replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    Plan,
    Execute,
    Revise,
    Review,
    Distill,
    Benchmark,
}

impl std::fmt::Display for Purpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Purpose::Plan => "plan",
            Purpose::Execute => "execute",
            Purpose::Revise => "revise",
            Purpose::Review => "review",
            Purpose::Distill => "distill",
            Purpose::Benchmark => "benchmark",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConstraints {
    pub purpose: Purpose,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

impl GenerationConstraints {
    pub fn new(purpose: Purpose, max_tokens: u32) -> Self {
        Self {
            purpose,
            max_tokens,
            temperature: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    /// Estimate usage when the backend does not report it.
    pub fn estimate(prompt: &str, completion: &str) -> Self {
        Self {
            prompt_tokens: estimate_tokens(prompt),
            completion_tokens: estimate_tokens(completion),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub usage: TokenUsage,
}

/// Text generation under an explicit policy version.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    async fn generate(
        &self,
        policy: VersionId,
        prompt: &str,
        constraints: &GenerationConstraints,
    ) -> Result<Generation, GatewayError>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilters {
    pub domain: Option<String>,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub source: String,
    pub snippet: String,
    pub score: f64,
}

/// External search. Results are a finite, already materialised list.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn query(&self, text: &str, filters: &SearchFilters)
        -> Result<Vec<SearchHit>, GatewayError>;
}

/// Search provider that never finds anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSearch;

#[async_trait]
impl SearchProvider for NoSearch {
    async fn query(&self, _: &str, _: &SearchFilters) -> Result<Vec<SearchHit>, GatewayError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_classification() {
        assert!(GatewayError::Timeout.is_recoverable());
        assert!(GatewayError::RateLimited { retry_after_ms: None }.is_recoverable());
        assert!(GatewayError::Malformed("x".into()).is_recoverable());
        assert!(!GatewayError::Unavailable("down".into()).is_recoverable());
    }

    #[test]
    fn usage_estimate_counts_both_sides() {
        let usage = TokenUsage::estimate("abcdefgh", "abcd");
        assert_eq!(usage.prompt_tokens, 2);
        assert_eq!(usage.completion_tokens, 1);
        assert_eq!(usage.total(), 3);
    }
}
