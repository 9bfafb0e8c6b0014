//! OpenAI-compatible chat-completions gateway.
//!
//! Each policy version maps to a model name through
//! `GatewayConfig::model_template` (`hive-policy-v{version}` by default),
//! so the inference backend decides which adapter serves which version.

use std::time::Duration;

use async_trait::async_trait;
use hive_state::VersionId;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Generation, GatewayError, GenerationConstraints, ModelGateway, Purpose, TokenUsage};
use crate::config::GatewayConfig;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: String,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Deserialize)]
struct ChatContent {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

pub struct HttpModelGateway {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model_template: String,
    default_temperature: Option<f32>,
}

impl HttpModelGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let base = config
            .base_url
            .as_deref()
            .ok_or_else(|| GatewayError::Unavailable("no gateway base_url configured".into()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model_template: config.model_template.clone(),
            default_temperature: config.temperature,
        })
    }

    pub fn model_for(&self, policy: VersionId) -> String {
        self.model_template.replace("{version}", &policy.0.to_string())
    }
}

fn system_prompt(purpose: Purpose) -> &'static str {
    match purpose {
        Purpose::Plan => "You split research questions into independent sub-objectives.",
        Purpose::Execute => "You are a focused research agent. Answer only the objective given.",
        Purpose::Revise => "You revise research syntheses to address reviewer notes.",
        Purpose::Review => "You are a strict reviewer. Always include a line 'SCORE: <0-100>'.",
        Purpose::Distill | Purpose::Benchmark => "You are a careful research analyst.",
    }
}

fn map_transport(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout
    } else if err.is_decode() {
        GatewayError::Malformed(err.to_string())
    } else {
        GatewayError::Unavailable(err.to_string())
    }
}

#[async_trait]
impl ModelGateway for HttpModelGateway {
    async fn generate(
        &self,
        policy: VersionId,
        prompt: &str,
        constraints: &GenerationConstraints,
    ) -> Result<Generation, GatewayError> {
        let body = ChatRequest {
            model: self.model_for(policy),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt(constraints.purpose),
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens: constraints.max_tokens,
            temperature: constraints.temperature.or(self.default_temperature),
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        debug!(model = %body.model, purpose = %constraints.purpose, "gateway request");

        let response = request.send().await.map_err(map_transport)?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000);
            return Err(GatewayError::RateLimited { retry_after_ms });
        }
        if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
            return Err(GatewayError::Timeout);
        }
        if !status.is_success() {
            return Err(GatewayError::Unavailable(format!("HTTP {status}")));
        }

        let parsed: ChatResponse = response.json().await.map_err(map_transport)?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GatewayError::Malformed("response has no content".into()))?;
        let usage = match parsed.usage {
            Some(u) => TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            },
            None => TokenUsage::estimate(prompt, &text),
        };
        Ok(Generation { text, usage })
    }
}
