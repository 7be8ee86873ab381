//! payrule-core: the payroll formula language.
//!
//! Formula text is lexed and parsed into an [`Expr`] tree, which evaluates
//! to a [`Value`] against a [`Scope`]. Nothing in this crate performs I/O;
//! table data arrives through the [`TableLookup`] seam.
//!
//! # Public API
//!
//! - [`parse()`] / [`parse_syntax()`] -- text to tree, with or without
//!   component-name binding
//! - [`Expr::evaluate`] -- tree to value
//! - [`FunctionRegistry`] -- IF, MIN, MAX, ROUND, ABS, FLOOR, CEIL, TBL
//! - [`extract_dependencies()`] -- component names a formula reads
//! - [`evaluate()`] -- parse and evaluate in one step

pub mod ast;
pub mod deps;
pub mod error;
pub mod functions;
pub mod lexer;
pub mod numeric;
pub mod parser;
pub mod scope;
pub mod value;

// ── Convenience re-exports ───────────────────────────────────────────

pub use ast::{BinaryOp, Expr, GroupSelector, Reference, UnaryOp};
pub use deps::{extract_dependencies, Dependencies, ExtractDependencies, ExtractionStrategy};
pub use error::FormulaError;
pub use functions::{Arity, CallContext, FunctionRegistry, NativeFn};
pub use parser::{parse, parse_syntax, ParseOptions};
pub use scope::{EmptyEnvironment, Environment, Scope, TableLookup};
pub use value::Value;

/// Parse `source` (syntax only) and evaluate it against `env` with the
/// built-in functions and no table service.
pub fn evaluate(source: &str, env: &dyn Environment) -> Result<Value, FormulaError> {
    let functions = FunctionRegistry::with_builtins();
    let expr = parse_syntax(source, &functions)?;
    expr.evaluate(&Scope::new(env, &functions))
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::collections::BTreeMap;
    use std::str::FromStr;

    fn num(s: &str) -> Value {
        Value::Number(Decimal::from_str(s).unwrap())
    }

    fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), num(v)))
            .collect()
    }

    #[test]
    fn precedence_end_to_end() {
        assert_eq!(evaluate("10 + 5 * 3", &EmptyEnvironment).unwrap(), num("25"));
        assert_eq!(evaluate("(10 + 5) * 3", &EmptyEnvironment).unwrap(), num("45"));
        assert_eq!(evaluate("2 ^ 3 ^ 2", &EmptyEnvironment).unwrap(), num("512"));
        assert_eq!(evaluate("-2 ^ 2", &EmptyEnvironment).unwrap(), num("4"));
    }

    #[test]
    fn unknown_component_reads_as_zero() {
        assert_eq!(evaluate("UnknownThing", &EmptyEnvironment).unwrap(), num("0"));
        assert_eq!(
            evaluate("UnknownThing + 5", &env(&[("Base", "1")])).unwrap(),
            num("5")
        );
    }

    #[test]
    fn evaluation_is_repeatable() {
        let functions = FunctionRegistry::with_builtins();
        let expr = parse_syntax("2 + 3 * 4", &functions).unwrap();
        let scope = Scope::new(&EmptyEnvironment, &functions);
        let first = expr.evaluate(&scope).unwrap();
        for _ in 0..5 {
            assert_eq!(expr.evaluate(&scope).unwrap(), first);
        }
        assert_eq!(first, num("14"));
    }

    #[test]
    fn comparisons_and_logic() {
        let e = env(&[("Base", "3000"), ("Years", "6")]);
        assert_eq!(
            evaluate("Base > 2500 AND Years >= 5", &e).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            evaluate("IF Base > 5000 THEN 100 ELSE 50", &e).unwrap(),
            num("50")
        );
        assert_eq!(evaluate("1 = TRUE", &e).unwrap(), Value::Boolean(true));
        assert_eq!(
            evaluate(r#""abc" != "abd""#, &e).unwrap(),
            Value::Boolean(true)
        );
    }

    #[test]
    fn arithmetic_on_string_is_type_error() {
        let err = evaluate(r#""abc" * 2"#, &EmptyEnvironment).unwrap_err();
        assert_eq!(err.kind(), "type");
    }

    #[test]
    fn ordering_on_boolean_is_type_error() {
        let err = evaluate("TRUE > 0", &EmptyEnvironment).unwrap_err();
        assert_eq!(err.kind(), "type");
    }

    #[test]
    fn division_precision_survives_chains() {
        let v = evaluate("1 / 3 * 3", &EmptyEnvironment).unwrap();
        match v {
            Value::Number(d) => assert_eq!(d.round_dp(20), Decimal::ONE),
            other => panic!("expected number, got {:?}", other),
        }
    }

    #[test]
    fn round_min_max_compose() {
        let e = env(&[("Base", "1234.5678")]);
        assert_eq!(
            evaluate("ROUND(MIN(Base, 2000) * 0.1, 2)", &e).unwrap(),
            num("123.46")
        );
    }
}
