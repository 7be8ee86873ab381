use std::fmt;

use payrule_core::FormulaError;
use serde::Serialize;

/// Where in the per-rule pipeline a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleStage {
    Parsing,
    Evaluating,
    /// Work-percent scaling and caps.
    PostProcessing,
    /// Final rounding before the value is stored.
    Recording,
}

impl fmt::Display for RuleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RuleStage::Parsing => "parsing",
            RuleStage::Evaluating => "evaluating",
            RuleStage::PostProcessing => "post-processing",
            RuleStage::Recording => "recording",
        };
        write!(f, "{}", s)
    }
}

/// Errors that abort a ruleset evaluation as a whole.
///
/// Per-rule formula failures only surface here under the fail-fast policy;
/// otherwise they are recorded on the component and evaluation continues.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    /// The dependency graph of the active rules is not a DAG. `path` lists
    /// the cycle members, first member repeated at the end.
    #[error("cycle error: {}", path.join(" \u{2192} "))]
    Cycle { path: Vec<String> },

    /// Two rules active on the same date write the same target.
    #[error("duplicate target '{target}' on {date}")]
    DuplicateTarget { target: String, date: String },

    /// A rule that cannot be evaluated at all (e.g. empty target).
    #[error("invalid rule #{index}: {message}")]
    InvalidRule { index: usize, message: String },

    /// A rule failed and the error policy is fail-fast.
    #[error("rule '{target}' failed while {stage}: {source}")]
    RuleFailed {
        target: String,
        stage: RuleStage,
        source: FormulaError,
    },

    /// Summing the recorded components overflowed.
    #[error("arithmetic error: {0}")]
    Arithmetic(String),
}

impl EvalError {
    /// Stable machine-readable kind, used by JSON error output.
    pub fn kind(&self) -> &'static str {
        match self {
            EvalError::Cycle { .. } => "cycle",
            EvalError::DuplicateTarget { .. } => "duplicate_target",
            EvalError::InvalidRule { .. } => "invalid_rule",
            EvalError::RuleFailed { .. } => "rule_failed",
            EvalError::Arithmetic(_) => "arithmetic",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_lists_path() {
        let e = EvalError::Cycle {
            path: vec!["A".into(), "B".into(), "A".into()],
        };
        assert_eq!(e.to_string(), "cycle error: A \u{2192} B \u{2192} A");
        assert_eq!(e.kind(), "cycle");
    }

    #[test]
    fn rule_failed_names_stage_and_cause() {
        let e = EvalError::RuleFailed {
            target: "Bonus".into(),
            stage: RuleStage::Evaluating,
            source: FormulaError::arithmetic("division by zero"),
        };
        let msg = e.to_string();
        assert!(msg.contains("Bonus"));
        assert!(msg.contains("evaluating"));
        assert!(msg.contains("division by zero"));
    }
}
