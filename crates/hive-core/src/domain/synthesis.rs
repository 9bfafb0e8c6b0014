use serde::{Deserialize, Serialize};

/// How much of the plan produced usable findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Coverage {
    Full,
    Partial,
    None,
}

impl std::fmt::Display for Coverage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Coverage::Full => "full",
            Coverage::Partial => "partial",
            Coverage::None => "none",
        };
        write!(f, "{s}")
    }
}

/// The Observer's output: merged findings within a fixed byte budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesizedContext {
    pub text: String,
    pub coverage: Coverage,
    /// (ok + 0.5 * partial) / total, in 0.0–1.0.
    pub confidence: f64,
    pub task_count: usize,
    pub usable_count: usize,
    pub missing_tasks: Vec<String>,
    /// Number of revision passes applied.
    pub revision: u32,
}

impl SynthesizedContext {
    /// Wrap free text (e.g. a student generation) so it can be scored.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            coverage: Coverage::Full,
            confidence: 1.0,
            task_count: 1,
            usable_count: 1,
            missing_tasks: Vec::new(),
            revision: 0,
        }
    }
}
