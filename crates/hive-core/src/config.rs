//! TOML configuration (`hive.toml`).
//!
//! Every section and field has a default, so an empty file (or no file)
//! yields a working configuration. Gateway credentials can also come from
//! `HIVE_GATEWAY_URL` and `HIVE_GATEWAY_API_KEY`.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const GATEWAY_URL_ENV: &str = "HIVE_GATEWAY_URL";
pub const GATEWAY_API_KEY_ENV: &str = "HIVE_GATEWAY_API_KEY";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HiveConfig {
    pub planner: PlannerConfig,
    pub executor: ExecutorConfig,
    pub retry: RetryConfig,
    pub observer: ObserverConfig,
    pub validation: ValidationConfig,
    pub trainer: TrainerConfig,
    pub governor: GovernorConfig,
    pub runtime: RuntimeConfig,
    pub gateway: GatewayConfig,
}

// ============= Planner =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub max_tasks: usize,
    /// Phrases that mark an objective as depending on another task's output.
    pub dependency_markers: Vec<String>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_tasks: 8,
            dependency_markers: vec![
                "depends on".into(),
                "based on the result".into(),
                "using the output".into(),
                "after completing".into(),
                "previous task".into(),
            ],
        }
    }
}

// ============= Executor =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Model and search calls allowed per task.
    pub max_steps: u32,
    pub max_tokens_budget: u64,
    /// Tasks executing concurrently within one run.
    pub worker_pool: usize,
    pub search_results: usize,
    pub memory_snippets: usize,
    pub memory_token_budget: u64,
    pub max_summary_bytes: usize,
    pub max_key_points: usize,
    /// Prefix a generation uses to ask for another step.
    pub continue_marker: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_steps: 4,
            max_tokens_budget: 4000,
            worker_pool: 4,
            search_results: 5,
            memory_snippets: 3,
            memory_token_budget: 300,
            max_summary_bytes: 600,
            max_key_points: 5,
            continue_marker: "CONTINUE:".into(),
        }
    }
}

// ============= Retry =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 200,
            max_backoff_ms: 5000,
            multiplier: 2.0,
        }
    }
}

// ============= Observer =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    pub max_context_bytes: usize,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            max_context_bytes: 2048,
        }
    }
}

// ============= Validation =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionConfig {
    pub name: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Minimum weighted mean, 0–100.
    pub pass_score: f64,
    /// Minimum score for every individual dimension.
    pub floor_score: f64,
    pub dimensions: Vec<DimensionConfig>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        let dim = |name: &str| DimensionConfig {
            name: name.into(),
            weight: 1.0,
        };
        Self {
            pass_score: 70.0,
            floor_score: 40.0,
            dimensions: vec![dim("factual"), dim("risk"), dim("completeness")],
        }
    }
}

// ============= Trainer =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Completed runs between training cycles.
    pub every_runs: usize,
    /// Most recent runs considered when collecting demonstrations.
    pub window: usize,
    pub min_examples: usize,
    pub buffer_capacity: usize,
    pub learning_rate: f64,
    /// KL budget against the active version on the regression domains.
    pub max_divergence: f64,
    pub max_backtracks: u32,
    /// Held-out domains; empty means the benchmark suite's domains.
    pub regression_domains: Vec<String>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            every_runs: 10,
            window: 50,
            min_examples: 10,
            buffer_capacity: 256,
            learning_rate: 0.5,
            max_divergence: 0.05,
            max_backtracks: 4,
            regression_domains: Vec::new(),
        }
    }
}

// ============= Governor =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Completed runs between scheduled evaluations.
    pub every_runs: usize,
    /// Relative improvement a candidate needs over the active version.
    pub promote_margin: f64,
    pub ewma_alpha: f64,
    /// Drop below the benchmark baseline that triggers rollback.
    pub degradation_threshold: f64,
    pub min_live_samples: usize,
    /// JSON benchmark suite; the built-in suite is used when unset.
    pub suite_path: Option<PathBuf>,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            every_runs: 20,
            promote_margin: 0.03,
            ewma_alpha: 0.2,
            degradation_threshold: 0.05,
            min_live_samples: 5,
            suite_path: None,
        }
    }
}

// ============= Runtime =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub run_timeout_ms: u64,
    /// Capacity of the completed-run channel feeding the learning loop.
    pub event_buffer: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            run_timeout_ms: 120_000,
            event_buffer: 256,
        }
    }
}

impl RuntimeConfig {
    pub fn run_timeout(&self) -> Duration {
        Duration::from_millis(self.run_timeout_ms)
    }
}

// ============= Gateway =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Base URL of an OpenAI-compatible endpoint.
    pub base_url: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Model name per policy version; `{version}` is replaced by the number.
    pub model_template: String,
    pub request_timeout_ms: u64,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            model_template: "hive-policy-v{version}".into(),
            request_timeout_ms: 60_000,
            max_tokens: 1024,
            temperature: None,
        }
    }
}

// ============= Loading =============

impl HiveConfig {
    /// Read, apply environment overrides, validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse without environment overrides or validation.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(GATEWAY_URL_ENV) {
            if !url.trim().is_empty() {
                self.gateway.base_url = Some(url);
            }
        }
        if let Ok(key) = std::env::var(GATEWAY_API_KEY_ENV) {
            if !key.trim().is_empty() {
                self.gateway.api_key = Some(key);
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.planner.max_tasks == 0 {
            return invalid("planner.max_tasks must be at least 1".into());
        }
        if self.executor.max_steps == 0 {
            return invalid("executor.max_steps must be at least 1".into());
        }
        if self.executor.max_tokens_budget == 0 {
            return invalid("executor.max_tokens_budget must be positive".into());
        }
        if self.executor.worker_pool == 0 {
            return invalid("executor.worker_pool must be at least 1".into());
        }
        if self.executor.continue_marker.trim().is_empty() {
            return invalid("executor.continue_marker must not be empty".into());
        }
        if self.retry.multiplier < 1.0 {
            return invalid("retry.multiplier must be >= 1.0".into());
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return invalid("retry.initial_backoff_ms exceeds retry.max_backoff_ms".into());
        }
        if self.observer.max_context_bytes < 256 {
            return invalid("observer.max_context_bytes must be at least 256".into());
        }

        let v = &self.validation;
        if !(0.0..=100.0).contains(&v.pass_score) || !(0.0..=100.0).contains(&v.floor_score) {
            return invalid("validation scores must lie in 0..=100".into());
        }
        if v.floor_score > v.pass_score {
            return invalid("validation.floor_score exceeds validation.pass_score".into());
        }
        if v.dimensions.is_empty() {
            return invalid("validation.dimensions must not be empty".into());
        }
        let mut seen = BTreeSet::new();
        for d in &v.dimensions {
            if d.weight <= 0.0 {
                return invalid(format!("dimension '{}' needs a positive weight", d.name));
            }
            if !seen.insert(d.name.as_str()) {
                return invalid(format!("dimension '{}' listed twice", d.name));
            }
        }

        let t = &self.trainer;
        if t.every_runs == 0 || t.min_examples == 0 || t.buffer_capacity == 0 {
            return invalid(
                "trainer.every_runs, min_examples and buffer_capacity must be positive".into(),
            );
        }
        if t.window < t.min_examples {
            return invalid("trainer.window is smaller than trainer.min_examples".into());
        }
        if t.learning_rate <= 0.0 || t.max_divergence <= 0.0 {
            return invalid("trainer.learning_rate and max_divergence must be positive".into());
        }

        let g = &self.governor;
        if g.every_runs == 0 {
            return invalid("governor.every_runs must be at least 1".into());
        }
        if !(g.ewma_alpha > 0.0 && g.ewma_alpha <= 1.0) {
            return invalid("governor.ewma_alpha must lie in (0, 1]".into());
        }
        if g.promote_margin < 0.0 || g.degradation_threshold < 0.0 {
            return invalid("governor margins must not be negative".into());
        }

        if self.runtime.run_timeout_ms == 0 || self.runtime.event_buffer == 0 {
            return invalid("runtime.run_timeout_ms and event_buffer must be positive".into());
        }
        if !self.gateway.model_template.contains("{version}") {
            return invalid("gateway.model_template must contain {version}".into());
        }
        Ok(())
    }
}
