//! Rule, RuleSet and EvalContext: the value objects handed to the evaluator.
//!
//! These are built by whatever stores and edits rulesets; the evaluator
//! only reads them.

use std::collections::{BTreeMap, HashMap};

use payrule_core::Value;
use serde::{Deserialize, Serialize};
use time::Date;

use crate::error::EvalError;

// ──────────────────────────────────────────────
// Dates
// ──────────────────────────────────────────────

/// ISO `YYYY-MM-DD` parsing and formatting.
pub mod dates {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::macros::format_description;
    use time::Date;

    pub fn parse(s: &str) -> Result<Date, time::error::Parse> {
        Date::parse(s, format_description!("[year]-[month]-[day]"))
    }

    pub fn format(date: Date) -> String {
        date.format(format_description!("[year]-[month]-[day]"))
            .unwrap_or_else(|_| date.to_string())
    }

    pub fn serialize<S: Serializer>(date: &Date, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(*date))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Date, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            date: &Option<Date>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match date {
                Some(d) => serializer.serialize_some(&super::format(*d)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Date>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|s| super::parse(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

// ──────────────────────────────────────────────
// Rule
// ──────────────────────────────────────────────

/// Typed rule metadata. Unknown keys survive in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleMeta {
    /// Group tier this component belongs to (compared case-insensitively).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default)]
    pub taxable: bool,
    /// Scale the result by `WorkPercent / 100`.
    #[serde(default)]
    pub work_percent: bool,
    /// Upper bound expression; the recorded value is `min(result, cap)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cap: Option<String>,
    /// Toggle-group membership: `flags["pension"]` puts the component into
    /// `pension_group`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub flags: BTreeMap<String, bool>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl RuleMeta {
    /// Whether the toggle flag `name` is set. `taxable` is a first-class
    /// field but answers here too.
    pub fn flag(&self, name: &str) -> bool {
        if name == "taxable" {
            return self.taxable;
        }
        self.flags.get(name).copied().unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub target: String,
    pub expression: String,
    /// Extra dependencies not visible in the expression.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(
        default,
        with = "dates::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub effective_from: Option<Date>,
    #[serde(
        default,
        with = "dates::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub effective_to: Option<Date>,
    #[serde(default)]
    pub meta: RuleMeta,
}

impl Rule {
    pub fn new(target: &str, expression: &str) -> Self {
        Rule {
            target: target.to_owned(),
            expression: expression.to_owned(),
            depends_on: Vec::new(),
            effective_from: None,
            effective_to: None,
            meta: RuleMeta::default(),
        }
    }

    pub fn in_group(mut self, group: &str) -> Self {
        self.meta.group = Some(group.to_owned());
        self
    }

    pub fn depends_on(mut self, deps: &[&str]) -> Self {
        self.depends_on = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn effective(mut self, from: Option<Date>, to: Option<Date>) -> Self {
        self.effective_from = from;
        self.effective_to = to;
        self
    }

    pub fn with_flag(mut self, flag: &str) -> Self {
        if flag == "taxable" {
            self.meta.taxable = true;
        } else {
            self.meta.flags.insert(flag.to_owned(), true);
        }
        self
    }

    pub fn scaled_by_work_percent(mut self) -> Self {
        self.meta.work_percent = true;
        self
    }

    pub fn capped_at(mut self, cap: &str) -> Self {
        self.meta.cap = Some(cap.to_owned());
        self
    }

    /// Inclusive on both ends; an open bound is unbounded.
    pub fn is_active_on(&self, date: Date) -> bool {
        let after_start = match self.effective_from {
            Some(from) => from <= date,
            None => true,
        };
        let before_end = match self.effective_to {
            Some(to) => date <= to,
            None => true,
        };
        after_start && before_end
    }

    /// Whether the effective ranges of two rules share at least one day.
    pub fn overlaps(&self, other: &Rule) -> bool {
        let starts_before_other_ends = match (self.effective_from, other.effective_to) {
            (Some(from), Some(to)) => from <= to,
            _ => true,
        };
        let other_starts_before_self_ends = match (other.effective_from, self.effective_to) {
            (Some(from), Some(to)) => from <= to,
            _ => true,
        };
        starts_before_other_ends && other_starts_before_self_ends
    }
}

// ──────────────────────────────────────────────
// RuleSet
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub id: String,
    /// Group names in declaration order; group numbers are 1-based
    /// positions in this list.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    pub rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(id: &str, rules: Vec<Rule>) -> Self {
        RuleSet {
            id: id.to_owned(),
            groups: Vec::new(),
            rules,
        }
    }

    pub fn with_groups(mut self, groups: &[&str]) -> Self {
        self.groups = groups.iter().map(|g| g.to_string()).collect();
        self
    }

    /// One rule per target among the rules active on `date`.
    ///
    /// Fails if a target is empty or two active rules share a target.
    pub fn active_rules(&self, date: Date) -> Result<ActiveRules<'_>, EvalError> {
        let mut active = ActiveRules::default();
        for (i, rule) in self.rules.iter().enumerate() {
            if rule.target.trim().is_empty() {
                return Err(EvalError::InvalidRule {
                    index: i,
                    message: "rule target is empty".to_string(),
                });
            }
            if !rule.is_active_on(date) {
                continue;
            }
            if !active.insert(rule) {
                return Err(EvalError::DuplicateTarget {
                    target: rule.target.clone(),
                    date: dates::format(date),
                });
            }
        }
        Ok(active)
    }

    /// Rules active on `date` (every rule when `None`), first declaration
    /// winning for a repeated target. Used by validation, which reports
    /// duplicates separately instead of failing on them.
    pub fn lenient_rules(&self, date: Option<Date>) -> ActiveRules<'_> {
        let mut active = ActiveRules::default();
        for rule in &self.rules {
            if rule.target.trim().is_empty() {
                continue;
            }
            if date.is_some_and(|d| !rule.is_active_on(d)) {
                continue;
            }
            active.insert(rule);
        }
        active
    }
}

/// Rules resolved to at most one per target, in declaration order.
#[derive(Debug, Default)]
pub struct ActiveRules<'a> {
    rules: Vec<&'a Rule>,
    index: HashMap<&'a str, usize>,
}

impl<'a> ActiveRules<'a> {
    /// Returns false (and keeps the existing rule) if the target is taken.
    fn insert(&mut self, rule: &'a Rule) -> bool {
        if self.index.contains_key(rule.target.as_str()) {
            return false;
        }
        self.index.insert(rule.target.as_str(), self.rules.len());
        self.rules.push(rule);
        true
    }

    pub fn get(&self, target: &str) -> Option<&'a Rule> {
        self.index.get(target).map(|&i| self.rules[i])
    }

    pub fn contains(&self, target: &str) -> bool {
        self.index.contains_key(target)
    }

    /// Declaration position of `target`, used for deterministic ordering.
    pub fn position(&self, target: &str) -> Option<usize> {
        self.index.get(target).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a Rule> + '_ {
        self.rules.iter().copied()
    }

    pub fn targets(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.rules.iter().map(|r| r.target.as_str())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

// ──────────────────────────────────────────────
// EvalContext
// ──────────────────────────────────────────────

/// Inputs for one employee on one date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalContext {
    /// Tenant the table lookups are scoped to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    #[serde(with = "dates")]
    pub period_date: Date,
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,
}

impl EvalContext {
    pub fn new(period_date: Date) -> Self {
        EvalContext {
            tenant: None,
            period_date,
            inputs: BTreeMap::new(),
        }
    }

    pub fn for_tenant(mut self, tenant: &str) -> Self {
        self.tenant = Some(tenant.to_owned());
        self
    }

    pub fn with_input(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.inputs.insert(name.to_owned(), value.into());
        self
    }

    /// Inputs no expression can name. They are carried along but never read.
    pub fn unreachable_inputs(&self) -> impl Iterator<Item = &str> {
        self.inputs
            .keys()
            .map(String::as_str)
            .filter(|name| !is_component_name(name))
    }
}

/// Whether an expression can reference `name` as a component: CamelCase or a
/// single upper-case letter.
pub fn is_component_name(name: &str) -> bool {
    let first_upper = name.chars().next().is_some_and(|c| c.is_ascii_uppercase());
    let word = name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    let camel = name.len() == 1 || name.chars().any(|c| c.is_ascii_lowercase());
    first_upper && word && camel
}
