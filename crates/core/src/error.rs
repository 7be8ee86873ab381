use serde::{Deserialize, Serialize};

/// Errors raised while parsing or evaluating a single formula.
///
/// Every variant is fatal to the one expression it came from. Whether that
/// aborts a whole ruleset evaluation is the evaluator's decision, not ours.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FormulaError {
    /// Malformed expression text. `position` is a 0-based character offset.
    #[error("syntax error at position {position}: {message}")]
    Syntax { position: usize, message: String },

    /// Unknown function, or an unknown component when names are bound.
    #[error("name error: {message}")]
    Name { name: String, message: String },

    /// Operator or function applied to an incompatible value kind.
    #[error("type error: {message}")]
    Type { message: String },

    /// Overflow, division by zero, or an undefined power.
    #[error("arithmetic error: {message}")]
    Arithmetic { message: String },

    /// Table collaborator failure (not found, ambiguous, bad schema).
    #[error("table error: {message}")]
    Table { message: String },

    /// A rule addressed its own group or a later one.
    #[error(
        "group scope error: '{reference}' addresses group {group}, \
         but only groups before {own_group} are visible here"
    )]
    GroupScope {
        reference: String,
        group: usize,
        own_group: usize,
    },
}

impl FormulaError {
    pub fn syntax(position: usize, message: impl Into<String>) -> Self {
        FormulaError::Syntax {
            position,
            message: message.into(),
        }
    }

    pub fn name(name: &str, message: impl Into<String>) -> Self {
        FormulaError::Name {
            name: name.to_owned(),
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        FormulaError::Type {
            message: message.into(),
        }
    }

    pub fn arithmetic(message: impl Into<String>) -> Self {
        FormulaError::Arithmetic {
            message: message.into(),
        }
    }

    pub fn table(message: impl Into<String>) -> Self {
        FormulaError::Table {
            message: message.into(),
        }
    }

    /// Short machine-readable kind, matching the serialized `kind` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            FormulaError::Syntax { .. } => "syntax",
            FormulaError::Name { .. } => "name",
            FormulaError::Type { .. } => "type",
            FormulaError::Arithmetic { .. } => "arithmetic",
            FormulaError::Table { .. } => "table",
            FormulaError::GroupScope { .. } => "group_scope",
        }
    }
}
