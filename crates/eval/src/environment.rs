//! The three addressing environments a rule can be evaluated against.
//!
//! Each wraps the previous one and adds a kind of reference:
//!
//! - [`PlainEnv`]: component names only
//! - [`GroupEnv`]: plus group references, summing exactly that group
//! - [`CumulativeGroupEnv`]: group references sum every group up to the one
//!   addressed and are only legal for strictly earlier groups; toggle groups
//!   are exposed too
//!
//! Unknown names resolve to `None` and read as zero in the expression.

use std::collections::BTreeMap;

use payrule_core::{numeric, Environment, FormulaError, Reference, Value};
use rust_decimal::Decimal;

use crate::groups::GroupMap;

/// Sum the current values of `targets`. Missing targets count as zero.
fn sum_of<'t>(
    values: &BTreeMap<String, Value>,
    targets: impl Iterator<Item = &'t str>,
) -> Result<Value, FormulaError> {
    let mut total = Decimal::ZERO;
    for target in targets {
        if let Some(v) = values.get(target) {
            total = numeric::add(total, v.to_number()?)?;
        }
    }
    Ok(Value::Number(total))
}

pub struct PlainEnv<'a> {
    pub values: &'a BTreeMap<String, Value>,
}

impl Environment for PlainEnv<'_> {
    fn resolve(&self, reference: &Reference) -> Result<Option<Value>, FormulaError> {
        match reference {
            Reference::Component(name) => Ok(self.values.get(name).cloned()),
            Reference::Group(_) | Reference::ToggleGroup(_) => Ok(None),
        }
    }
}

pub struct GroupEnv<'a> {
    pub plain: PlainEnv<'a>,
    pub groups: &'a GroupMap,
}

impl Environment for GroupEnv<'_> {
    fn resolve(&self, reference: &Reference) -> Result<Option<Value>, FormulaError> {
        match reference {
            Reference::Group(selector) => match self.groups.resolve(selector) {
                Some(rank) => sum_of(
                    self.plain.values,
                    self.groups.members_of(rank).iter().map(String::as_str),
                )
                .map(Some),
                None => Ok(None),
            },
            other => self.plain.resolve(other),
        }
    }
}

pub struct CumulativeGroupEnv<'a> {
    pub inner: GroupEnv<'a>,
    /// The rule currently being evaluated; decides which groups are visible.
    pub target: &'a str,
}

impl Environment for CumulativeGroupEnv<'_> {
    fn resolve(&self, reference: &Reference) -> Result<Option<Value>, FormulaError> {
        let groups = self.inner.groups;
        let values = self.inner.plain.values;
        match reference {
            Reference::Group(selector) => {
                let Some(rank) = groups.resolve(selector) else {
                    return Ok(None);
                };
                if !groups.may_address(self.target, rank) {
                    return Err(FormulaError::GroupScope {
                        reference: reference.to_string(),
                        group: rank,
                        own_group: groups.rank_of(self.target).unwrap_or(0),
                    });
                }
                sum_of(values, groups.members_up_to(rank)).map(Some)
            }
            Reference::ToggleGroup(flag) => sum_of(
                values,
                groups
                    .flagged(flag)
                    .iter()
                    .map(String::as_str)
                    .filter(|t| *t != self.target),
            )
            .map(Some),
            Reference::Component(_) => self.inner.resolve(reference),
        }
    }
}
