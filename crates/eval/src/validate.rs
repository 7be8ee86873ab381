//! Whole-ruleset validation, run before a ruleset is saved.
//!
//! Validation never computes values. It parses every expression and cap
//! (binding component names when the caller knows the inputs), checks group
//! scope statically, looks for overlapping versions of a target and runs the
//! scheduler to find cycles. Every problem becomes an issue; nothing fails
//! early.

use std::collections::BTreeSet;

use payrule_core::{parse, FormulaError, FunctionRegistry, ParseOptions, Reference};
use serde::Serialize;
use time::Date;

use crate::config::AddressingMode;
use crate::error::EvalError;
use crate::groups::GroupMap;
use crate::model::{dates, is_component_name, Rule, RuleSet};
use crate::schedule::schedule_active;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Syntax,
    Name,
    GroupScope,
    DuplicateTarget,
    Cycle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub kind: IssueKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub message: String,
    /// Character offset into the expression, for syntax issues.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
    pub cycles: Vec<Vec<String>>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }

    fn push(&mut self, kind: IssueKind, target: Option<&str>, message: String) {
        self.issues.push(ValidationIssue {
            kind,
            target: target.map(str::to_owned),
            message,
            position: None,
        });
    }

    fn push_formula_error(&mut self, target: &str, what: &str, error: &FormulaError) {
        let kind = match error {
            FormulaError::Name { .. } => IssueKind::Name,
            FormulaError::GroupScope { .. } => IssueKind::GroupScope,
            _ => IssueKind::Syntax,
        };
        let position = match error {
            FormulaError::Syntax { position, .. } => Some(*position),
            _ => None,
        };
        self.issues.push(ValidationIssue {
            kind,
            target: Some(target.to_owned()),
            message: format!("{}: {}", what, error),
            position,
        });
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationOptions {
    /// Validate only the rules active on this date. `None` validates every
    /// rule, first declaration winning for a repeated target.
    pub date: Option<Date>,
    /// When set, component references must be a target or one of these.
    /// Inputs no expression could name are reported too.
    pub known_inputs: Option<BTreeSet<String>>,
    /// The mode the ruleset will be evaluated under. Decides which group
    /// references are legal and which group members must run first.
    pub addressing: AddressingMode,
}

pub fn validate(
    ruleset: &RuleSet,
    options: &ValidationOptions,
    functions: &FunctionRegistry,
) -> ValidationReport {
    let mut report = ValidationReport::default();

    for (i, rule) in ruleset.rules.iter().enumerate() {
        if rule.target.trim().is_empty() {
            report.push(IssueKind::Name, None, format!("rule #{} has an empty target", i));
        }
    }
    check_overlaps(ruleset, options.date, &mut report);
    for name in options.known_inputs.iter().flatten() {
        if !is_component_name(name) {
            report.push(
                IssueKind::Name,
                None,
                format!(
                    "input '{}' cannot be referenced; components are CamelCase \
                     or a single upper-case letter",
                    name
                ),
            );
        }
    }

    let rules = ruleset.lenient_rules(options.date);
    let groups = GroupMap::build(&ruleset.groups, &rules);
    let known: BTreeSet<String> = match &options.known_inputs {
        Some(inputs) => rules
            .targets()
            .map(str::to_owned)
            .chain(inputs.iter().cloned())
            .collect(),
        None => BTreeSet::new(),
    };
    let parse_options = ParseOptions {
        known_components: &known,
        functions,
    };

    for rule in rules.iter() {
        let sources =
            std::iter::once(("expression", rule.expression.as_str())).chain(
                rule.meta.cap.as_deref().map(|cap| ("cap", cap)),
            );
        for (what, source) in sources {
            match parse(source, &parse_options) {
                Ok(expr) => check_group_scope(
                    rule,
                    &expr.references(),
                    &groups,
                    options.addressing,
                    &mut report,
                ),
                Err(e) => report.push_formula_error(&rule.target, what, &e),
            }
        }
    }

    if let Err(EvalError::Cycle { path }) =
        schedule_active(&rules, &groups, options.addressing, functions)
    {
        report.push(
            IssueKind::Cycle,
            path.first().map(String::as_str),
            format!("dependency cycle: {}", path.join(" \u{2192} ")),
        );
        report.cycles.push(path);
    }
    report
}

fn check_overlaps(ruleset: &RuleSet, date: Option<Date>, report: &mut ValidationReport) {
    let relevant: Vec<&Rule> = ruleset
        .rules
        .iter()
        .filter(|r| date.map_or(true, |d| r.is_active_on(d)))
        .collect();
    for (i, a) in relevant.iter().enumerate() {
        for b in &relevant[i + 1..] {
            if a.target == b.target && !a.target.trim().is_empty() && a.overlaps(b) {
                report.push(
                    IssueKind::DuplicateTarget,
                    Some(a.target.as_str()),
                    format!(
                        "two versions of '{}' are active at the same time ({} .. {} and {} .. {})",
                        a.target,
                        bound(a.effective_from),
                        bound(a.effective_to),
                        bound(b.effective_from),
                        bound(b.effective_to)
                    ),
                );
            }
        }
    }
}

fn bound(date: Option<Date>) -> String {
    date.map(dates::format).unwrap_or_else(|| "open".to_string())
}

fn check_group_scope(
    rule: &Rule,
    references: &BTreeSet<Reference>,
    groups: &GroupMap,
    addressing: AddressingMode,
    report: &mut ValidationReport,
) {
    if addressing == AddressingMode::Plain {
        return;
    }
    for reference in references {
        let Reference::Group(selector) = reference else {
            continue;
        };
        match groups.resolve(selector) {
            Some(rank)
                if addressing == AddressingMode::Cumulative
                    && !groups.may_address(&rule.target, rank) =>
            {
                let error = FormulaError::GroupScope {
                    reference: reference.to_string(),
                    group: rank,
                    own_group: groups.rank_of(&rule.target).unwrap_or(0),
                };
                report.push_formula_error(&rule.target, "expression", &error);
            }
            Some(_) => {}
            None => report.push(
                IssueKind::Name,
                Some(rule.target.as_str()),
                format!("unknown group '{}'", reference),
            ),
        }
    }
}
