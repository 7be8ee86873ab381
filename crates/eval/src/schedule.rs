//! Dependency graph and topological ordering of the active rules.
//!
//! Nodes are rule targets. A rule depends on:
//!
//! - every `dependsOn` entry that is itself a target
//! - every component its expression (or cap) reads that is a target
//! - every member of a group it reads, as far as the addressing mode
//!   gives group references a value
//! - every other member of a toggle group it reads (cumulative mode)
//!
//! Inputs are not nodes. Ordering is Kahn's algorithm; among ready nodes the
//! earliest-declared goes first, so the order is stable across runs.

use std::collections::{BTreeMap, BTreeSet};

use payrule_core::{extract_dependencies, FormulaError, FunctionRegistry, Reference};
use serde::Serialize;
use time::Date;
use tracing::warn;

use crate::config::AddressingMode;
use crate::error::EvalError;
use crate::groups::GroupMap;
use crate::model::{ActiveRules, RuleSet};

/// A rule whose dependencies came from the pattern scan because its text
/// did not parse.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fallback {
    pub target: String,
    pub error: FormulaError,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Schedule {
    /// Targets in evaluation order.
    pub order: Vec<String>,
    /// Target -> the targets it must wait for.
    pub dependencies: BTreeMap<String, BTreeSet<String>>,
    pub fallbacks: Vec<Fallback>,
}

/// Order the rules active on `date` under the default (cumulative)
/// addressing mode.
pub fn order(
    ruleset: &RuleSet,
    date: Date,
    functions: &FunctionRegistry,
) -> Result<Schedule, EvalError> {
    order_with(ruleset, date, AddressingMode::default(), functions)
}

/// Order the rules active on `date` for the given addressing mode.
pub fn order_with(
    ruleset: &RuleSet,
    date: Date,
    addressing: AddressingMode,
    functions: &FunctionRegistry,
) -> Result<Schedule, EvalError> {
    let active = ruleset.active_rules(date)?;
    let groups = GroupMap::build(&ruleset.groups, &active);
    schedule_active(&active, &groups, addressing, functions)
}

/// Order an already-resolved set of active rules.
pub fn schedule_active(
    active: &ActiveRules<'_>,
    groups: &GroupMap,
    addressing: AddressingMode,
    functions: &FunctionRegistry,
) -> Result<Schedule, EvalError> {
    let (dependencies, fallbacks) = build_graph(active, groups, addressing, functions);
    let order = topological_order(active, &dependencies)?;
    Ok(Schedule {
        order,
        dependencies,
        fallbacks,
    })
}

// ──────────────────────────────────────────────
// Graph construction
// ──────────────────────────────────────────────

type Graph = BTreeMap<String, BTreeSet<String>>;

fn build_graph(
    active: &ActiveRules<'_>,
    groups: &GroupMap,
    addressing: AddressingMode,
    functions: &FunctionRegistry,
) -> (Graph, Vec<Fallback>) {
    let known: BTreeSet<String> = active.targets().map(str::to_owned).collect();
    let mut graph = Graph::new();
    let mut fallbacks = Vec::new();

    for rule in active.iter() {
        let target = rule.target.as_str();
        let mut deps: BTreeSet<String> = rule
            .depends_on
            .iter()
            .filter(|d| known.contains(*d))
            .cloned()
            .collect();

        let sources = std::iter::once(rule.expression.as_str()).chain(rule.meta.cap.as_deref());
        for source in sources {
            let extracted = extract_dependencies(source, &known, functions);
            if let Some(error) = extracted.parse_error {
                warn!(
                    rule = %target,
                    error = %error,
                    "dependency extraction fell back to pattern scan"
                );
                fallbacks.push(Fallback {
                    target: target.to_owned(),
                    error,
                });
            }
            deps.extend(
                extracted
                    .components
                    .into_iter()
                    .filter(|c| known.contains(c)),
            );
            for reference in &extracted.group_refs {
                implicit_edges(target, reference, groups, addressing, &mut deps);
            }
        }

        deps.remove(target);
        graph.insert(target.to_owned(), deps);
    }
    (graph, fallbacks)
}

/// Edges for a group reference mirror what the environment of `addressing`
/// sums for it:
///
/// - plain: nothing, group references read as zero
/// - group: the members of exactly that group, whatever its rank
/// - cumulative: every member up to the group when the reference is legal
///   (an illegal one fails at evaluation and adds no edges), and the
///   flagged members of a toggle group
fn implicit_edges(
    target: &str,
    reference: &Reference,
    groups: &GroupMap,
    addressing: AddressingMode,
    deps: &mut BTreeSet<String>,
) {
    match (addressing, reference) {
        (AddressingMode::Plain, _) | (_, Reference::Component(_)) => {}
        (AddressingMode::Group, Reference::Group(selector)) => {
            if let Some(rank) = groups.resolve(selector) {
                deps.extend(groups.members_of(rank).iter().cloned());
            }
        }
        (AddressingMode::Group, Reference::ToggleGroup(_)) => {}
        (AddressingMode::Cumulative, Reference::Group(selector)) => {
            if let Some(rank) = groups.resolve(selector) {
                if groups.may_address(target, rank) {
                    deps.extend(groups.members_up_to(rank).map(str::to_owned));
                }
            }
        }
        (AddressingMode::Cumulative, Reference::ToggleGroup(flag)) => {
            deps.extend(groups.flagged(flag).iter().cloned());
        }
    }
}

// ──────────────────────────────────────────────
// Kahn's algorithm
// ──────────────────────────────────────────────

fn topological_order(active: &ActiveRules<'_>, graph: &Graph) -> Result<Vec<String>, EvalError> {
    let targets: Vec<&str> = active.targets().collect();
    let position = |t: &str| active.position(t).unwrap_or(usize::MAX);

    let mut in_degree: Vec<usize> = vec![0; targets.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); targets.len()];
    for (i, target) in targets.iter().enumerate() {
        for dep in graph.get(*target).into_iter().flatten() {
            let d = position(dep.as_str());
            if d < targets.len() {
                in_degree[i] += 1;
                dependents[d].push(i);
            }
        }
    }

    let mut ready: BTreeSet<usize> = (0..targets.len()).filter(|i| in_degree[*i] == 0).collect();
    let mut order = Vec::with_capacity(targets.len());
    while let Some(next) = ready.pop_first() {
        order.push(targets[next].to_owned());
        for &dependent in &dependents[next] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() < targets.len() {
        let path = cycle_path(&targets, graph, &in_degree);
        return Err(EvalError::Cycle { path });
    }
    Ok(order)
}

/// Walk dependency edges among the nodes Kahn could not emit until a node
/// repeats. Every such node has at least one unemitted dependency, so the
/// walk always closes.
fn cycle_path(targets: &[&str], graph: &Graph, in_degree: &[usize]) -> Vec<String> {
    let stuck: BTreeSet<&str> = targets
        .iter()
        .zip(in_degree)
        .filter(|(_, d)| **d > 0)
        .map(|(t, _)| *t)
        .collect();
    let Some(&start) = targets.iter().find(|t| stuck.contains(**t)) else {
        return Vec::new();
    };

    let mut path: Vec<&str> = vec![start];
    let mut current = start;
    loop {
        let next = graph
            .get(current)
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|d| stuck.contains(d));
        let Some(next) = next else {
            break;
        };
        if let Some(at) = path.iter().position(|p| *p == next) {
            let mut cycle: Vec<String> = path[at..].iter().map(|s| s.to_string()).collect();
            cycle.push(next.to_owned());
            return cycle;
        }
        path.push(next);
        current = next;
    }
    path.into_iter().map(str::to_owned).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Rule;
    use time::macros::date;

    const DAY: Date = date!(2024 - 01 - 01);

    fn run(rules: Vec<Rule>) -> Result<Schedule, EvalError> {
        order(
            &RuleSet::new("rs", rules),
            DAY,
            &FunctionRegistry::with_builtins(),
        )
    }

    #[test]
    fn dependency_chain_is_ordered() {
        let s = run(vec![
            Rule::new("FullBonus", "(Base + ExpertBonus + ResponsibilityBonus) * 0.05"),
            Rule::new("ResponsibilityBonus", "(Base + ExpertBonus) * 0.04"),
            Rule::new("FixedTravel", "200"),
            Rule::new("ExpertBonus", "Base * 0.06"),
        ])
        .unwrap();
        assert_eq!(
            s.order,
            vec!["FixedTravel", "ExpertBonus", "ResponsibilityBonus", "FullBonus"]
        );
        assert!(!s.dependencies["ExpertBonus"].contains("Base"));
    }

    #[test]
    fn independent_rules_keep_declaration_order() {
        let s = run(vec![
            Rule::new("C", "1"),
            Rule::new("Alpha", "2"),
            Rule::new("Beta", "3"),
        ])
        .unwrap();
        assert_eq!(s.order, vec!["C", "Alpha", "Beta"]);
    }

    #[test]
    fn explicit_depends_on_adds_edges() {
        let s = run(vec![
            Rule::new("Net", "100").depends_on(&["Gross", "NotATarget"]),
            Rule::new("Gross", "50"),
        ])
        .unwrap();
        assert_eq!(s.order, vec!["Gross", "Net"]);
        assert!(!s.dependencies["Net"].contains("NotATarget"));
    }

    #[test]
    fn self_reference_is_not_a_cycle() {
        let s = run(vec![Rule::new("Bonus", "Bonus + 1")]).unwrap();
        assert_eq!(s.order, vec!["Bonus"]);
    }

    #[test]
    fn cycle_reports_path() {
        let err = run(vec![
            Rule::new("Free", "1"),
            Rule::new("A", "B + 1"),
            Rule::new("B", "C + 1"),
            Rule::new("C", "A + 1"),
        ])
        .unwrap_err();
        match err {
            EvalError::Cycle { path } => {
                assert_eq!(path, vec!["A", "B", "C", "A"]);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn malformed_rule_falls_back_and_is_reported() {
        let s = run(vec![
            Rule::new("Broken", "(ExpertBonus * "),
            Rule::new("ExpertBonus", "Base * 0.06"),
        ])
        .unwrap();
        assert_eq!(s.order, vec!["ExpertBonus", "Broken"]);
        assert_eq!(s.fallbacks.len(), 1);
        assert_eq!(s.fallbacks[0].target, "Broken");
    }

    #[test]
    fn cap_expression_contributes_edges() {
        let s = run(vec![
            Rule::new("Bonus", "Base * 0.1").capped_at("Ceiling"),
            Rule::new("Ceiling", "500"),
        ])
        .unwrap();
        assert_eq!(s.order, vec!["Ceiling", "Bonus"]);
    }

    #[test]
    fn legal_group_reference_waits_for_members() {
        let s = run(vec![
            Rule::new("Bonus", "group1 * 0.1").in_group("extras"),
            Rule::new("Salary", "3000").in_group("base"),
        ])
        .unwrap();
        // "extras" appears first so it is group 1; Bonus addresses its own group.
        assert_eq!(s.order, vec!["Bonus", "Salary"]);

        let rs = RuleSet::new(
            "rs",
            vec![
                Rule::new("Bonus", "group1 * 0.1").in_group("extras"),
                Rule::new("Salary", "3000").in_group("base"),
            ],
        )
        .with_groups(&["base", "extras"]);
        let s = order(&rs, DAY, &FunctionRegistry::with_builtins()).unwrap();
        assert_eq!(s.order, vec!["Salary", "Bonus"]);
    }

    #[test]
    fn toggle_group_waits_for_flagged_members() {
        let s = run(vec![
            Rule::new("Pension", "pension_group * 0.07"),
            Rule::new("Salary", "3000").with_flag("pension"),
            Rule::new("Overtime", "200").with_flag("pension"),
        ])
        .unwrap();
        assert_eq!(s.order, vec!["Salary", "Overtime", "Pension"]);
    }

    fn grouped_forward_reference() -> RuleSet {
        RuleSet::new(
            "rs",
            vec![
                Rule::new("Summary", "extras * 1").in_group("base"),
                Rule::new("Bonus", "500").in_group("extras"),
            ],
        )
        .with_groups(&["base", "extras"])
    }

    #[test]
    fn group_mode_waits_for_later_group_members() {
        let functions = FunctionRegistry::with_builtins();
        let rs = grouped_forward_reference();
        let s = order_with(&rs, DAY, AddressingMode::Group, &functions).unwrap();
        assert_eq!(s.order, vec!["Bonus", "Summary"]);
        assert!(s.dependencies["Summary"].contains("Bonus"));

        // cumulative mode rejects the reference at evaluation, so no edge
        let s = order_with(&rs, DAY, AddressingMode::Cumulative, &functions).unwrap();
        assert_eq!(s.order, vec!["Summary", "Bonus"]);
    }

    #[test]
    fn plain_mode_adds_no_group_edges() {
        let rs = RuleSet::new(
            "rs",
            vec![
                Rule::new("Pension", "pension_group * 0.07 + group1").in_group("extras"),
                Rule::new("Salary", "3000").with_flag("pension").in_group("base"),
            ],
        )
        .with_groups(&["base", "extras"]);
        let functions = FunctionRegistry::with_builtins();
        let s = order_with(&rs, DAY, AddressingMode::Plain, &functions).unwrap();
        assert!(s.dependencies["Pension"].is_empty());
        assert_eq!(s.order, vec!["Pension", "Salary"]);
    }

    #[test]
    fn group_mode_siblings_reading_their_own_group_cycle() {
        let rs = RuleSet::new(
            "rs",
            vec![
                Rule::new("Salary", "3000").in_group("base"),
                Rule::new("Share", "base * 0.1").in_group("base"),
                Rule::new("Other", "base * 0.2").in_group("base"),
            ],
        );
        let functions = FunctionRegistry::with_builtins();
        let err = order_with(&rs, DAY, AddressingMode::Group, &functions).unwrap_err();
        assert!(matches!(err, EvalError::Cycle { .. }));
    }

    #[test]
    fn toggle_member_reading_own_toggle_group_is_cycle() {
        let err = run(vec![
            Rule::new("Salary", "3000 + pension_group").with_flag("pension"),
            Rule::new("Overtime", "pension_group * 0.1").with_flag("pension"),
        ])
        .unwrap_err();
        assert!(matches!(err, EvalError::Cycle { .. }));
    }
}
