//! Decimal arithmetic used by the formula language.
//!
//! All numbers are `rust_decimal::Decimal` (96-bit mantissa, 28 significant
//! digits). No `f64` anywhere in the evaluation path, so long dependency
//! chains never accumulate binary floating error.

use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, MathematicalOps, RoundingStrategy};

use crate::error::FormulaError;

/// Parse a numeric literal exactly as written.
pub fn parse_decimal(text: &str) -> Option<Decimal> {
    Decimal::from_str(text.trim()).ok()
}

pub fn add(left: Decimal, right: Decimal) -> Result<Decimal, FormulaError> {
    left.checked_add(right)
        .ok_or_else(|| FormulaError::arithmetic(format!("overflow in {} + {}", left, right)))
}

pub fn sub(left: Decimal, right: Decimal) -> Result<Decimal, FormulaError> {
    left.checked_sub(right)
        .ok_or_else(|| FormulaError::arithmetic(format!("overflow in {} - {}", left, right)))
}

pub fn mul(left: Decimal, right: Decimal) -> Result<Decimal, FormulaError> {
    left.checked_mul(right)
        .ok_or_else(|| FormulaError::arithmetic(format!("overflow in {} * {}", left, right)))
}

/// Checked division at full decimal precision.
pub fn div(left: Decimal, right: Decimal) -> Result<Decimal, FormulaError> {
    if right.is_zero() {
        return Err(FormulaError::arithmetic(format!(
            "division by zero in {} / {}",
            left, right
        )));
    }
    left.checked_div(right)
        .ok_or_else(|| FormulaError::arithmetic(format!("overflow in {} / {}", left, right)))
}

/// Raise `base` to `exponent`.
///
/// Integral exponents are computed by exact multiplication (negative ones
/// invert the result). Fractional exponents go through `powd` and are only
/// defined for non-negative bases.
pub fn pow(base: Decimal, exponent: Decimal) -> Result<Decimal, FormulaError> {
    if exponent.fract().is_zero() {
        let exp = exponent.to_i64().ok_or_else(|| {
            FormulaError::arithmetic(format!("exponent {} out of range", exponent))
        })?;
        if base.is_zero() && exp < 0 {
            return Err(FormulaError::arithmetic(format!(
                "zero raised to negative power {}",
                exp
            )));
        }
        return base.checked_powi(exp).ok_or_else(|| {
            FormulaError::arithmetic(format!("overflow in {} ^ {}", base, exponent))
        });
    }
    if base.is_sign_negative() {
        return Err(FormulaError::arithmetic(format!(
            "negative base {} with fractional exponent {}",
            base, exponent
        )));
    }
    base.checked_powd(exponent)
        .ok_or_else(|| FormulaError::arithmetic(format!("overflow in {} ^ {}", base, exponent)))
}

/// Round half away from zero to `places` decimal digits.
///
/// Negative `places` rounds to tens, hundreds and so on.
pub fn round_half_up(value: Decimal, places: i64) -> Result<Decimal, FormulaError> {
    if places >= 0 {
        let dp = u32::try_from(places.min(28)).unwrap_or(28);
        return Ok(value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero));
    }
    let factor = pow(Decimal::TEN, Decimal::from(-places))?;
    let scaled = div(value, factor)?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    mul(scaled, factor)
}

/// Strip trailing zeros so `551.200` prints as `551.2`.
pub fn normalize(value: Decimal) -> Decimal {
    value.normalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn division_keeps_precision() {
        let third = div(dec("1"), dec("3")).unwrap();
        assert_eq!(mul(third, dec("3")).unwrap().round_dp(10), dec("1"));
    }

    #[test]
    fn division_by_zero_is_arithmetic_error() {
        let err = div(dec("10"), Decimal::ZERO).unwrap_err();
        assert_eq!(err.kind(), "arithmetic");
    }

    #[test]
    fn integral_power_is_exact() {
        assert_eq!(pow(dec("1.1"), dec("2")).unwrap(), dec("1.21"));
        assert_eq!(pow(dec("2"), dec("-2")).unwrap(), dec("0.25"));
        assert_eq!(pow(dec("5"), Decimal::ZERO).unwrap(), Decimal::ONE);
    }

    #[test]
    fn fractional_power_of_negative_base_fails() {
        assert!(pow(dec("-4"), dec("0.5")).is_err());
    }

    #[test]
    fn fractional_power() {
        let root = pow(dec("16"), dec("0.5")).unwrap();
        assert_eq!(root.round_dp(6), dec("4"));
    }

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(round_half_up(dec("2.5"), 0).unwrap(), dec("3"));
        assert_eq!(round_half_up(dec("-2.5"), 0).unwrap(), dec("-3"));
        assert_eq!(round_half_up(dec("1.005"), 2).unwrap(), dec("1.01"));
        assert_eq!(round_half_up(dec("1250"), -2).unwrap(), dec("1300"));
    }

    #[test]
    fn normalize_strips_trailing_zeros() {
        assert_eq!(normalize(dec("551.200")).to_string(), "551.2");
    }
}
