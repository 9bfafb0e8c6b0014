use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{Result, RunError};

/// A research request. `id` doubles as the run id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub id: Uuid,
    pub domain: String,
    pub text: String,
    /// Minimum acceptable overall validation score, 0–100.
    #[serde(default)]
    pub quality_target: Option<f64>,
}

impl Query {
    pub fn new(domain: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            domain: domain.into(),
            text: text.into(),
            quality_target: None,
        }
    }

    pub fn with_quality_target(mut self, target: f64) -> Self {
        self.quality_target = Some(target);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(t) = self.quality_target {
            if !(0.0..=100.0).contains(&t) || t.is_nan() {
                return Err(RunError::InvalidRequest(format!(
                    "quality target {t} outside 0..=100"
                )));
            }
        }
        Ok(())
    }
}
