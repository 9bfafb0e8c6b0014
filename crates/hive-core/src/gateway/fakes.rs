//! Deterministic gateway and search implementations.
//!
//! - [`EchoGateway`] backs `hive --offline` and smoke tests.
//! - [`ScriptedGateway`] lets tests decide every reply (text, error, delay)
//!   from the call it receives, and records what was asked.
//! - [`StaticSearch`] serves a fixed hit list.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use hive_state::VersionId;
use tokio::time::Instant;

use super::{
    Generation, GatewayError, GenerationConstraints, ModelGateway, Purpose, SearchFilters,
    SearchHit, SearchProvider, TokenUsage, MATERIAL_SEPARATOR,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn material(prompt: &str) -> &str {
    prompt
        .rsplit_once(MATERIAL_SEPARATOR)
        .map(|(_, tail)| tail)
        .unwrap_or(prompt)
        .trim()
}

// ---------------------------------------------------------------------------
// EchoGateway
// ---------------------------------------------------------------------------

/// Offline gateway that derives a plausible reply from the prompt alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoGateway;

impl EchoGateway {
    fn reply(purpose: Purpose, prompt: &str) -> String {
        let body = material(prompt);
        match purpose {
            Purpose::Plan => format!(
                "1. Background and current state: {body}\n2. Risks and open questions: {body}"
            ),
            Purpose::Execute => {
                let first = body.lines().next().unwrap_or(body);
                format!("Offline notes on {first}.\n- No live sources were consulted.")
            }
            Purpose::Review => "SCORE: 80\nNOTES: offline review, no issues raised".to_string(),
            Purpose::Revise | Purpose::Distill | Purpose::Benchmark => body.to_string(),
        }
    }
}

#[async_trait]
impl ModelGateway for EchoGateway {
    async fn generate(
        &self,
        _policy: VersionId,
        prompt: &str,
        constraints: &GenerationConstraints,
    ) -> Result<Generation, GatewayError> {
        let text = Self::reply(constraints.purpose, prompt);
        Ok(Generation {
            usage: TokenUsage::estimate(prompt, &text),
            text,
        })
    }
}

// ---------------------------------------------------------------------------
// ScriptedGateway
// ---------------------------------------------------------------------------

/// One request seen by a [`ScriptedGateway`].
#[derive(Debug, Clone)]
pub struct GatewayCall {
    pub policy: VersionId,
    pub purpose: Purpose,
    pub prompt: String,
    pub started_at: Instant,
    /// Set once the scripted delay has elapsed.
    pub finished_at: Option<Instant>,
}

impl GatewayCall {
    /// The material after the prompt's separator line.
    pub fn material(&self) -> &str {
        material(&self.prompt)
    }
}

/// Scripted answer: an optional delay, then text or an error.
#[derive(Debug, Clone)]
pub struct Reply {
    pub delay: Duration,
    pub result: Result<String, GatewayError>,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Ok(text.into()),
        }
    }

    pub fn error(err: GatewayError) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Err(err),
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

type Script = Box<dyn Fn(&GatewayCall) -> Reply + Send + Sync>;

pub struct ScriptedGateway {
    script: Script,
    calls: Mutex<Vec<GatewayCall>>,
}

impl ScriptedGateway {
    pub fn new(script: impl Fn(&GatewayCall) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every call so far, in arrival order.
    pub fn calls(&self) -> Vec<GatewayCall> {
        lock(&self.calls).clone()
    }

    pub fn calls_for(&self, purpose: Purpose) -> Vec<GatewayCall> {
        lock(&self.calls)
            .iter()
            .filter(|c| c.purpose == purpose)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    async fn generate(
        &self,
        policy: VersionId,
        prompt: &str,
        constraints: &GenerationConstraints,
    ) -> Result<Generation, GatewayError> {
        let call = GatewayCall {
            policy,
            purpose: constraints.purpose,
            prompt: prompt.to_string(),
            started_at: Instant::now(),
            finished_at: None,
        };
        let reply = (self.script)(&call);
        let index = {
            let mut calls = lock(&self.calls);
            calls.push(call);
            calls.len() - 1
        };
        if !reply.delay.is_zero() {
            tokio::time::sleep(reply.delay).await;
        }
        if let Some(c) = lock(&self.calls).get_mut(index) {
            c.finished_at = Some(Instant::now());
        }
        let text = reply.result?;
        Ok(Generation {
            usage: TokenUsage::estimate(prompt, &text),
            text,
        })
    }
}

// ---------------------------------------------------------------------------
// StaticSearch
// ---------------------------------------------------------------------------

/// Returns the same hits for every query, best score first.
#[derive(Debug, Clone, Default)]
pub struct StaticSearch {
    hits: Vec<SearchHit>,
}

impl StaticSearch {
    pub fn new(mut hits: Vec<SearchHit>) -> Self {
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        Self { hits }
    }

    pub fn hit(source: &str, snippet: &str, score: f64) -> SearchHit {
        SearchHit {
            source: source.to_string(),
            snippet: snippet.to_string(),
            score,
        }
    }
}

#[async_trait]
impl SearchProvider for StaticSearch {
    async fn query(
        &self,
        _text: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>, GatewayError> {
        Ok(self.hits.iter().take(filters.limit).cloned().collect())
    }
}
