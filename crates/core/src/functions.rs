//! Named functions callable from formulas.
//!
//! The registry is a plain value: build one, register extra functions if
//! needed, and share it read-only across evaluations. `TBL` is an ordinary
//! built-in; its external state arrives through [`CallContext::tables`] on
//! every call rather than being bound into the registry.

use std::collections::BTreeMap;
use std::fmt;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::error::FormulaError;
use crate::numeric;
use crate::scope::TableLookup;
use crate::value::Value;

/// Per-call state handed to a native function.
#[derive(Clone, Copy)]
pub struct CallContext<'a> {
    pub tables: Option<&'a dyn TableLookup>,
}

pub type NativeFn = fn(&[Value], &CallContext<'_>) -> Result<Value, FormulaError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Between(usize, usize),
}

impl Arity {
    pub fn accepts(self, n: usize) -> bool {
        match self {
            Arity::Exact(k) => n == k,
            Arity::AtLeast(k) => n >= k,
            Arity::Between(lo, hi) => n >= lo && n <= hi,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(1) => write!(f, "exactly 1 argument"),
            Arity::Exact(k) => write!(f, "exactly {} arguments", k),
            Arity::AtLeast(1) => write!(f, "at least 1 argument"),
            Arity::AtLeast(k) => write!(f, "at least {} arguments", k),
            Arity::Between(lo, hi) => write!(f, "{} to {} arguments", lo, hi),
        }
    }
}

#[derive(Clone)]
pub struct FunctionDef {
    pub name: String,
    pub arity: Arity,
    pub func: NativeFn,
}

impl fmt::Debug for FunctionDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionDef")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

/// Name -> function table. Names are case-insensitive.
#[derive(Debug, Clone)]
pub struct FunctionRegistry {
    functions: BTreeMap<String, FunctionDef>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl FunctionRegistry {
    /// A registry with no functions at all.
    pub fn empty() -> Self {
        FunctionRegistry {
            functions: BTreeMap::new(),
        }
    }

    /// IF, MIN, MAX, ROUND, ABS, FLOOR, CEIL and TBL.
    pub fn with_builtins() -> Self {
        let mut r = Self::empty();
        r.register("IF", Arity::Exact(3), builtin_if);
        r.register("MIN", Arity::AtLeast(1), builtin_min);
        r.register("MAX", Arity::AtLeast(1), builtin_max);
        r.register("ROUND", Arity::Between(1, 2), builtin_round);
        r.register("ABS", Arity::Exact(1), builtin_abs);
        r.register("FLOOR", Arity::Exact(1), builtin_floor);
        r.register("CEIL", Arity::Exact(1), builtin_ceil);
        r.register("TBL", Arity::AtLeast(1), builtin_tbl);
        r
    }

    /// Add or replace a function.
    pub fn register(&mut self, name: &str, arity: Arity, func: NativeFn) {
        let key = name.to_ascii_uppercase();
        self.functions.insert(
            key.clone(),
            FunctionDef {
                name: key,
                arity,
                func,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.get(&name.to_ascii_uppercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    /// Look up and invoke `name` with already-evaluated arguments.
    pub fn call(
        &self,
        name: &str,
        args: &[Value],
        ctx: &CallContext<'_>,
    ) -> Result<Value, FormulaError> {
        let def = self
            .get(name)
            .ok_or_else(|| FormulaError::name(name, format!("unknown function '{}'", name)))?;
        if !def.arity.accepts(args.len()) {
            return Err(FormulaError::type_error(format!(
                "{} expects {}, got {}",
                def.name,
                def.arity,
                args.len()
            )));
        }
        (def.func)(args, ctx)
    }
}

// ──────────────────────────────────────────────
// Built-ins
// ──────────────────────────────────────────────

fn builtin_if(args: &[Value], _ctx: &CallContext<'_>) -> Result<Value, FormulaError> {
    if args[0].to_bool()? {
        Ok(args[1].clone())
    } else {
        Ok(args[2].clone())
    }
}

fn numbers(args: &[Value]) -> Result<Vec<Decimal>, FormulaError> {
    args.iter().map(Value::to_number).collect()
}

fn builtin_min(args: &[Value], _ctx: &CallContext<'_>) -> Result<Value, FormulaError> {
    numbers(args)?
        .into_iter()
        .min()
        .map(Value::Number)
        .ok_or_else(|| FormulaError::type_error("MIN needs at least one argument"))
}

fn builtin_max(args: &[Value], _ctx: &CallContext<'_>) -> Result<Value, FormulaError> {
    numbers(args)?
        .into_iter()
        .max()
        .map(Value::Number)
        .ok_or_else(|| FormulaError::type_error("MAX needs at least one argument"))
}

fn builtin_round(args: &[Value], _ctx: &CallContext<'_>) -> Result<Value, FormulaError> {
    let value = args[0].to_number()?;
    let places = match args.get(1) {
        Some(p) => {
            let p = p.to_number()?;
            if !p.fract().is_zero() {
                return Err(FormulaError::type_error(format!(
                    "ROUND precision must be a whole number, got {}",
                    p
                )));
            }
            p.to_i64().ok_or_else(|| {
                FormulaError::type_error(format!("ROUND precision {} out of range", p))
            })?
        }
        None => 0,
    };
    Ok(Value::Number(numeric::round_half_up(value, places)?))
}

fn builtin_abs(args: &[Value], _ctx: &CallContext<'_>) -> Result<Value, FormulaError> {
    Ok(Value::Number(args[0].to_number()?.abs()))
}

fn builtin_floor(args: &[Value], _ctx: &CallContext<'_>) -> Result<Value, FormulaError> {
    Ok(Value::Number(args[0].to_number()?.floor()))
}

fn builtin_ceil(args: &[Value], _ctx: &CallContext<'_>) -> Result<Value, FormulaError> {
    Ok(Value::Number(args[0].to_number()?.ceil()))
}

/// `TBL(tableName, key1, key2, ...)`
fn builtin_tbl(args: &[Value], ctx: &CallContext<'_>) -> Result<Value, FormulaError> {
    let tables = ctx
        .tables
        .ok_or_else(|| FormulaError::table("TBL used without a table service in scope"))?;
    let table = match &args[0] {
        Value::String(s) => s.clone(),
        other => {
            return Err(FormulaError::type_error(format!(
                "TBL table name must be a string, got {}",
                other.type_name()
            )))
        }
    };
    Ok(Value::Number(tables.lookup(&table, &args[1..])?))
}
