//! Evaluation settings.

use serde::{Deserialize, Serialize};

/// What happens to a rule that fails after scheduling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Record zero, keep the error in the trace and carry on.
    #[default]
    ContinueWithZero,
    /// Abort the evaluation with the first rule failure.
    FailFast,
}

/// Which environment rules are evaluated against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressingMode {
    /// Component names only; group references read as zero.
    Plain,
    /// Group references sum exactly the named group.
    Group,
    /// Group references sum every group up to the one named, restricted to
    /// strictly earlier groups; toggle groups available.
    #[default]
    Cumulative,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    pub error_policy: ErrorPolicy,
    pub addressing: AddressingMode,
    /// Input holding the work-time percentage for `workPercent` rules.
    pub work_percent_input: String,
    /// Decimal places each recorded component is rounded to, if any.
    pub round_results: Option<u32>,
}

impl Default for EvalConfig {
    fn default() -> Self {
        EvalConfig {
            error_policy: ErrorPolicy::ContinueWithZero,
            addressing: AddressingMode::Cumulative,
            work_percent_input: "WorkPercent".to_string(),
            round_results: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("work_percent_input must not be empty")]
    EmptyWorkPercentInput,

    #[error("round_results must be at most 28, got {0}")]
    RoundingOutOfRange(u32),
}

impl EvalConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.work_percent_input.trim().is_empty() {
            return Err(ConfigError::EmptyWorkPercentInput);
        }
        if let Some(places) = self.round_results {
            if places > 28 {
                return Err(ConfigError::RoundingOutOfRange(places));
            }
        }
        Ok(())
    }
}
