//! Runtime values of the formula language.
//!
//! A value is one of Number, Boolean or String. Arithmetic coerces to
//! Number; logic coerces to Boolean; equality is loose across
//! Number/Boolean and falls back to text comparison when a String is
//! involved.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::FormulaError;
use crate::numeric;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Number(Decimal),
    Boolean(bool),
    String(String),
}

impl Value {
    pub fn zero() -> Self {
        Value::Number(Decimal::ZERO)
    }

    /// Returns a human-readable type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "Number",
            Value::Boolean(_) => "Boolean",
            Value::String(_) => "String",
        }
    }

    /// Coerce to a number. Booleans become 1/0; strings must parse.
    pub fn to_number(&self) -> Result<Decimal, FormulaError> {
        match self {
            Value::Number(d) => Ok(*d),
            Value::Boolean(b) => Ok(if *b { Decimal::ONE } else { Decimal::ZERO }),
            Value::String(s) => numeric::parse_decimal(s).ok_or_else(|| {
                FormulaError::type_error(format!("cannot use string \"{}\" as a number", s))
            }),
        }
    }

    /// Coerce to a boolean. Numbers are true when nonzero.
    pub fn to_bool(&self) -> Result<bool, FormulaError> {
        match self {
            Value::Boolean(b) => Ok(*b),
            Value::Number(d) => Ok(!d.is_zero()),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
            Value::String(s) => Err(FormulaError::type_error(format!(
                "cannot use string \"{}\" as a boolean",
                s
            ))),
        }
    }

    /// Strict number extraction for ordering operators.
    fn expect_number(&self, op: &str) -> Result<Decimal, FormulaError> {
        match self {
            Value::Number(d) => Ok(*d),
            other => Err(FormulaError::type_error(format!(
                "operator '{}' requires numbers, got {}",
                op,
                other.type_name()
            ))),
        }
    }

    pub fn add(&self, other: &Value) -> Result<Value, FormulaError> {
        Ok(Value::Number(numeric::add(
            self.to_number()?,
            other.to_number()?,
        )?))
    }

    pub fn sub(&self, other: &Value) -> Result<Value, FormulaError> {
        Ok(Value::Number(numeric::sub(
            self.to_number()?,
            other.to_number()?,
        )?))
    }

    pub fn mul(&self, other: &Value) -> Result<Value, FormulaError> {
        Ok(Value::Number(numeric::mul(
            self.to_number()?,
            other.to_number()?,
        )?))
    }

    pub fn div(&self, other: &Value) -> Result<Value, FormulaError> {
        Ok(Value::Number(numeric::div(
            self.to_number()?,
            other.to_number()?,
        )?))
    }

    pub fn pow(&self, other: &Value) -> Result<Value, FormulaError> {
        Ok(Value::Number(numeric::pow(
            self.to_number()?,
            other.to_number()?,
        )?))
    }

    /// Unary minus. Only defined for numbers.
    pub fn neg(&self) -> Result<Value, FormulaError> {
        Ok(Value::Number(-self.expect_number("-")?))
    }

    pub fn not(&self) -> Result<Value, FormulaError> {
        Ok(Value::Boolean(!self.to_bool()?))
    }

    /// Both operands are already evaluated; there is no short-circuit.
    pub fn and(&self, other: &Value) -> Result<Value, FormulaError> {
        let l = self.to_bool()?;
        let r = other.to_bool()?;
        Ok(Value::Boolean(l && r))
    }

    pub fn or(&self, other: &Value) -> Result<Value, FormulaError> {
        let l = self.to_bool()?;
        let r = other.to_bool()?;
        Ok(Value::Boolean(l || r))
    }

    /// Loose equality used by `=` and `!=`.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(l), Value::Number(r)) => l == r,
            (Value::Boolean(l), Value::Boolean(r)) => l == r,
            (Value::Number(n), Value::Boolean(b)) | (Value::Boolean(b), Value::Number(n)) => {
                !n.is_zero() == *b
            }
            _ => self.to_string() == other.to_string(),
        }
    }

    pub fn lt(&self, other: &Value) -> Result<Value, FormulaError> {
        Ok(Value::Boolean(
            self.expect_number("<")? < other.expect_number("<")?,
        ))
    }

    pub fn lte(&self, other: &Value) -> Result<Value, FormulaError> {
        Ok(Value::Boolean(
            self.expect_number("<=")? <= other.expect_number("<=")?,
        ))
    }

    pub fn gt(&self, other: &Value) -> Result<Value, FormulaError> {
        Ok(Value::Boolean(
            self.expect_number(">")? > other.expect_number(">")?,
        ))
    }

    pub fn gte(&self, other: &Value) -> Result<Value, FormulaError> {
        Ok(Value::Boolean(
            self.expect_number(">=")? >= other.expect_number(">=")?,
        ))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(d) => write!(f, "{}", numeric::normalize(*d)),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<Decimal> for Value {
    fn from(d: Decimal) -> Self {
        Value::Number(d)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Number(Decimal::from(i))
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Number(Decimal::from(i))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl TryFrom<f64> for Value {
    type Error = FormulaError;

    /// Goes through the shortest round-trip text form, so `0.06_f64`
    /// becomes exactly `0.06`.
    fn try_from(f: f64) -> Result<Self, Self::Error> {
        if !f.is_finite() {
            return Err(FormulaError::type_error(format!(
                "non-finite number {} cannot be used",
                f
            )));
        }
        Decimal::from_str(&f.to_string())
            .or_else(|_| Decimal::from_scientific(&format!("{:e}", f)))
            .map(Value::Number)
            .map_err(|e| FormulaError::type_error(format!("number {} out of range: {}", f, e)))
    }
}

// ──────────────────────────────────────────────
// Serde
// ──────────────────────────────────────────────

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Number(d) => serializer.serialize_str(&numeric::normalize(*d).to_string()),
            Value::Boolean(b) => serializer.serialize_bool(*b),
            Value::String(s) => serializer.serialize_str(s),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl<'de> Deserialize<'de> for Value {
    /// JSON numbers become Numbers; strings stay Strings and are coerced
    /// lazily when used in arithmetic.
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match RawValue::deserialize(deserializer)? {
            RawValue::Bool(b) => Ok(Value::Boolean(b)),
            RawValue::Int(i) => Ok(Value::from(i)),
            RawValue::Float(f) => Value::try_from(f).map_err(serde::de::Error::custom),
            RawValue::Text(s) => Ok(Value::String(s)),
        }
    }
}
