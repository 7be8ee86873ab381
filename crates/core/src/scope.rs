//! The seams an expression is evaluated through.
//!
//! An [`Expr`](crate::ast::Expr) holds no state. Everything it reads comes
//! from a [`Scope`]: an [`Environment`] for component and group values, the
//! [`FunctionRegistry`] for calls, and an optional [`TableLookup`] handle for
//! `TBL`. The table handle is passed per evaluation, never registered
//! globally, so concurrent evaluations cannot see each other's binding.

use rust_decimal::Decimal;

use crate::ast::Reference;
use crate::error::FormulaError;
use crate::functions::FunctionRegistry;
use crate::value::Value;

/// Name resolution for component, group and toggle-group references.
pub trait Environment {
    /// Resolve a reference. `Ok(None)` means "unknown here"; the expression
    /// then evaluates it as zero. An `Err` aborts the expression (used for
    /// group-scope violations).
    fn resolve(&self, reference: &Reference) -> Result<Option<Value>, FormulaError>;
}

/// Bridge from `TBL(...)` to external tabular data.
pub trait TableLookup {
    fn lookup(&self, table: &str, keys: &[Value]) -> Result<Decimal, FormulaError>;
}

/// Everything one expression evaluation may touch.
#[derive(Clone, Copy)]
pub struct Scope<'a> {
    pub env: &'a dyn Environment,
    pub functions: &'a FunctionRegistry,
    pub tables: Option<&'a dyn TableLookup>,
}

impl<'a> Scope<'a> {
    pub fn new(env: &'a dyn Environment, functions: &'a FunctionRegistry) -> Self {
        Scope {
            env,
            functions,
            tables: None,
        }
    }

    pub fn with_tables(mut self, tables: &'a dyn TableLookup) -> Self {
        self.tables = Some(tables);
        self
    }
}

/// An environment that knows no names; every reference reads as zero.
pub struct EmptyEnvironment;

impl Environment for EmptyEnvironment {
    fn resolve(&self, _reference: &Reference) -> Result<Option<Value>, FormulaError> {
        Ok(None)
    }
}

impl Environment for std::collections::BTreeMap<String, Value> {
    /// Plain component lookup; group references are unknown.
    fn resolve(&self, reference: &Reference) -> Result<Option<Value>, FormulaError> {
        match reference {
            Reference::Component(name) => Ok(self.get(name).cloned()),
            _ => Ok(None),
        }
    }
}
