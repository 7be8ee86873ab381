//! payrule-eval: ruleset scheduling and evaluation.
//!
//! Takes a [`RuleSet`] and an [`EvalContext`], orders the rules active on
//! the period date by their dependencies, and evaluates them one by one
//! against a growing environment, producing an [`EvaluationResult`] with a
//! per-component amount and trace.
//!
//! # Public API
//!
//! - [`Evaluator`] -- configurable evaluation with an optional table service
//! - [`schedule::order`] -- dependency order of the active rules
//! - [`validate()`] -- issues and cycles, without computing values
//! - [`InMemoryTableService`] -- a complete [`TableService`]
//! - [`evaluate()`] -- built-in functions, no tables, default settings

pub mod config;
pub mod environment;
pub mod error;
pub mod evaluator;
pub mod groups;
pub mod model;
pub mod schedule;
pub mod tables;
pub mod trace;
pub mod validate;

pub use config::{AddressingMode, ConfigError, ErrorPolicy, EvalConfig};
pub use error::{EvalError, RuleStage};
pub use evaluator::{ComponentResult, EvaluationResult, Evaluator, RuleFailure};
pub use model::{EvalContext, Rule, RuleMeta, RuleSet};
pub use schedule::{Fallback, Schedule};
pub use tables::{
    InMemoryTableService, ScopedTableLookup, TableError, TableRequest, TableService,
};
pub use validate::{validate, IssueKind, ValidationIssue, ValidationOptions, ValidationReport};

use payrule_core::FunctionRegistry;

/// Evaluate `ruleset` for `ctx` with the built-in functions, no table
/// service and the default configuration.
pub fn evaluate(ruleset: &RuleSet, ctx: &EvalContext) -> Result<EvaluationResult, EvalError> {
    let functions = FunctionRegistry::with_builtins();
    Evaluator::new(&functions).evaluate_all(ruleset, ctx)
}
