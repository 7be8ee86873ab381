//! Ruleset evaluation.
//!
//! Rules run in schedule order against an environment that starts as the
//! context inputs and grows by one component per rule. Each rule goes
//! through parsing, evaluation, post-processing (work percent, cap) and
//! recording. A failing rule is zeroed and traced, or aborts the run,
//! depending on the [`ErrorPolicy`].

use std::collections::BTreeMap;

use payrule_core::{
    numeric, parse_syntax, Environment, FormulaError, FunctionRegistry, Scope, Value,
};
use rust_decimal::Decimal;
use serde::Serialize;
use time::Date;
use tracing::{debug, info, warn};

use crate::config::{AddressingMode, ErrorPolicy, EvalConfig};
use crate::environment::{CumulativeGroupEnv, GroupEnv, PlainEnv};
use crate::error::{EvalError, RuleStage};
use crate::groups::GroupMap;
use crate::model::{dates, EvalContext, Rule, RuleSet};
use crate::schedule::{schedule_active, Fallback};
use crate::tables::{ScopedTableLookup, TableService};
use crate::trace::{Recorded, TraceCollector};

// ──────────────────────────────────────────────
// Results
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleFailure {
    pub stage: RuleStage,
    pub error: FormulaError,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentResult {
    pub amount: Decimal,
    pub trace: Vec<String>,
    /// Set when the rule failed and was recorded as zero.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<RuleFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub ruleset_id: String,
    #[serde(with = "dates")]
    pub period_date: Date,
    /// Targets in the order they were evaluated.
    pub order: Vec<String>,
    pub components: BTreeMap<String, ComponentResult>,
    pub total: Decimal,
    /// Rules scheduled from a pattern scan because they did not parse.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fallbacks: Vec<Fallback>,
}

impl EvaluationResult {
    pub fn amount(&self, target: &str) -> Option<Decimal> {
        self.components.get(target).map(|c| c.amount)
    }

    pub fn failed(&self) -> impl Iterator<Item = (&str, &RuleFailure)> {
        self.components
            .iter()
            .filter_map(|(t, c)| c.failure.as_ref().map(|f| (t.as_str(), f)))
    }
}

// ──────────────────────────────────────────────
// Evaluator
// ──────────────────────────────────────────────

/// Evaluates rulesets. Holds only shared, read-only collaborators, so one
/// evaluator can serve many threads at once.
pub struct Evaluator<'a> {
    functions: &'a FunctionRegistry,
    tables: Option<&'a dyn TableService>,
    config: EvalConfig,
}

impl<'a> Evaluator<'a> {
    pub fn new(functions: &'a FunctionRegistry) -> Self {
        Evaluator {
            functions,
            tables: None,
            config: EvalConfig::default(),
        }
    }

    pub fn with_tables(mut self, tables: &'a dyn TableService) -> Self {
        self.tables = Some(tables);
        self
    }

    pub fn with_config(mut self, config: EvalConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_policy(mut self, policy: ErrorPolicy) -> Self {
        self.config.error_policy = policy;
        self
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// Evaluate every rule of `ruleset` active on the context's period date.
    pub fn evaluate_all(
        &self,
        ruleset: &RuleSet,
        ctx: &EvalContext,
    ) -> Result<EvaluationResult, EvalError> {
        for name in ctx.unreachable_inputs() {
            warn!(input = %name, "input cannot be referenced from an expression; ignored");
        }
        let active = ruleset.active_rules(ctx.period_date)?;
        let groups = GroupMap::build(&ruleset.groups, &active);
        let schedule =
            schedule_active(&active, &groups, self.config.addressing, self.functions)?;

        let mut values: BTreeMap<String, Value> = ctx.inputs.clone();
        let mut components = BTreeMap::new();

        for target in &schedule.order {
            let Some(rule) = active.get(target) else {
                continue;
            };
            let mut trace = TraceCollector::new();
            let outcome = self.evaluate_rule(rule, &values, &groups, ctx, &mut trace);
            let (amount, failure) = match outcome {
                Ok(amount) => {
                    trace.line(format!("result: {}", amount));
                    debug!(rule = %target, amount = %amount, "rule evaluated");
                    (amount, None)
                }
                Err((stage, error)) => {
                    trace.line(format!("error while {}: {}", stage, error));
                    if self.config.error_policy == ErrorPolicy::FailFast {
                        return Err(EvalError::RuleFailed {
                            target: target.clone(),
                            stage,
                            source: error,
                        });
                    }
                    warn!(rule = %target, stage = %stage, error = %error, "rule zeroed");
                    trace.line("result: 0");
                    (Decimal::ZERO, Some(RuleFailure { stage, error }))
                }
            };
            values.insert(target.clone(), Value::Number(amount));
            components.insert(
                target.clone(),
                ComponentResult {
                    amount,
                    trace: trace.into_lines(),
                    failure,
                },
            );
        }

        let mut total = Decimal::ZERO;
        for c in components.values() {
            total = total
                .checked_add(c.amount)
                .ok_or_else(|| EvalError::Arithmetic("total overflows".to_string()))?;
        }
        let total = numeric::normalize(total);
        info!(
            ruleset = %ruleset.id,
            components = components.len(),
            total = %total,
            "evaluation finished"
        );

        Ok(EvaluationResult {
            ruleset_id: ruleset.id.clone(),
            period_date: ctx.period_date,
            order: schedule.order,
            components,
            total,
            fallbacks: schedule.fallbacks,
        })
    }

    fn environment<'e>(
        &self,
        values: &'e BTreeMap<String, Value>,
        groups: &'e GroupMap,
        target: &'e str,
    ) -> Box<dyn Environment + 'e> {
        let plain = PlainEnv { values };
        match self.config.addressing {
            AddressingMode::Plain => Box::new(plain),
            AddressingMode::Group => Box::new(GroupEnv { plain, groups }),
            AddressingMode::Cumulative => Box::new(CumulativeGroupEnv {
                inner: GroupEnv { plain, groups },
                target,
            }),
        }
    }

    /// Run one rule through its stages. The trace receives every step up to
    /// the failure, if any.
    fn evaluate_rule(
        &self,
        rule: &Rule,
        values: &BTreeMap<String, Value>,
        groups: &GroupMap,
        ctx: &EvalContext,
        trace: &mut TraceCollector,
    ) -> Result<Decimal, (RuleStage, FormulaError)> {
        trace.line(format!("expression: {}", rule.expression));

        // Scoping: this rule's environment and table binding.
        let env = self.environment(values, groups, &rule.target);
        let tables = self.tables.map(|service| {
            ScopedTableLookup::new(
                service,
                ctx.tenant.as_deref(),
                &rule.target,
                ctx.period_date,
            )
        });

        let (evaluated, cap) = {
            let recorded = Recorded {
                inner: env.as_ref(),
                collector: &*trace,
            };
            let mut scope = Scope::new(&recorded, self.functions);
            if let Some(t) = &tables {
                scope = scope.with_tables(t);
            }

            let evaluated = parse_syntax(&rule.expression, self.functions)
                .map_err(|e| (RuleStage::Parsing, e))
                .and_then(|expr| {
                    expr.evaluate(&scope)
                        .and_then(|v| v.to_number())
                        .map_err(|e| (RuleStage::Evaluating, e))
                });
            let cap = match (&evaluated, &rule.meta.cap) {
                (Ok(_), Some(cap)) => Some(
                    parse_syntax(cap, self.functions)
                        .and_then(|c| c.evaluate(&scope))
                        .and_then(|v| v.to_number())
                        .map_err(|e| (RuleStage::PostProcessing, e)),
                ),
                _ => None,
            };
            (evaluated, cap)
        };
        trace.flush_reads();
        for line in tables.iter().flat_map(|t| t.take_log()) {
            trace.line(line);
        }

        let mut value = evaluated?;
        trace.line(format!("value: {}", numeric::normalize(value)));

        // Post-processing
        if rule.meta.work_percent {
            let percent = values
                .get(&self.config.work_percent_input)
                .and_then(|v| v.to_number().ok())
                .unwrap_or(Decimal::ONE_HUNDRED);
            value = numeric::mul(value, percent)
                .and_then(|v| numeric::div(v, Decimal::ONE_HUNDRED))
                .map_err(|e| (RuleStage::PostProcessing, e))?;
            trace.line(format!(
                "work percent {}%: {}",
                numeric::normalize(percent),
                numeric::normalize(value)
            ));
        }
        if let Some(cap) = cap {
            let cap = cap?;
            if cap < value {
                value = cap;
            }
            trace.line(format!(
                "cap {}: {}",
                numeric::normalize(cap),
                numeric::normalize(value)
            ));
        }

        // Recording
        if let Some(places) = self.config.round_results {
            value = numeric::round_half_up(value, i64::from(places))
                .map_err(|e| (RuleStage::Recording, e))?;
        }
        Ok(numeric::normalize(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::{TableError, TableRequest};
    use std::str::FromStr;
    use std::sync::Mutex;
    use time::macros::date;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn ctx() -> EvalContext {
        EvalContext::new(date!(2024 - 03 - 31)).with_input("Base", 10000)
    }

    fn run(rules: Vec<Rule>, ctx: &EvalContext) -> EvaluationResult {
        let functions = FunctionRegistry::with_builtins();
        Evaluator::new(&functions)
            .evaluate_all(&RuleSet::new("rs", rules), ctx)
            .unwrap()
    }

    struct Fixed(Mutex<Vec<String>>);

    impl TableService for Fixed {
        fn lookup(&self, request: &TableRequest<'_>) -> Result<Decimal, TableError> {
            self.0.lock().unwrap().push(request.table.to_string());
            match request.table {
                "missing" => Err(TableError::NotFound {
                    table: "missing".into(),
                    keys: String::new(),
                }),
                _ => Ok(dec("100")),
            }
        }
    }

    #[test]
    fn trace_records_expression_reads_and_result() {
        let result = run(vec![Rule::new("Bonus", "Base * 0.06")], &ctx());
        let c = &result.components["Bonus"];
        assert_eq!(c.amount, dec("600"));
        assert_eq!(
            c.trace,
            vec![
                "expression: Base * 0.06",
                "reads: Base = 10000",
                "value: 600",
                "result: 600"
            ]
        );
    }

    #[test]
    fn failing_rule_is_zeroed_and_traced() {
        let result = run(
            vec![
                Rule::new("Bad", "Base / 0"),
                Rule::new("Good", "Base * 0.1"),
            ],
            &ctx(),
        );
        let bad = &result.components["Bad"];
        assert_eq!(bad.amount, Decimal::ZERO);
        let failure = bad.failure.as_ref().unwrap();
        assert_eq!(failure.stage, RuleStage::Evaluating);
        assert_eq!(failure.error.kind(), "arithmetic");
        assert!(bad.trace.iter().any(|l| l.contains("division by zero")));
        assert_eq!(result.total, dec("1000"));
        assert_eq!(result.failed().count(), 1);
    }

    #[test]
    fn syntax_error_fails_at_parsing_stage() {
        let result = run(vec![Rule::new("Bad", "Base *")], &ctx());
        let failure = result.components["Bad"].failure.as_ref().unwrap();
        assert_eq!(failure.stage, RuleStage::Parsing);
        assert_eq!(result.fallbacks.len(), 1);
    }

    #[test]
    fn fail_fast_aborts() {
        let functions = FunctionRegistry::with_builtins();
        let err = Evaluator::new(&functions)
            .with_policy(ErrorPolicy::FailFast)
            .evaluate_all(
                &RuleSet::new("rs", vec![Rule::new("Bad", "\"x\" * 2")]),
                &ctx(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            EvalError::RuleFailed { ref target, stage: RuleStage::Evaluating, .. } if target == "Bad"
        ));
    }

    #[test]
    fn boolean_result_records_as_number() {
        let result = run(vec![Rule::new("Eligible", "Base > 5000")], &ctx());
        assert_eq!(result.amount("Eligible"), Some(Decimal::ONE));
    }

    #[test]
    fn work_percent_scales_and_defaults_to_full_time() {
        let rules = vec![Rule::new("Salary", "Base").scaled_by_work_percent()];
        let result = run(rules.clone(), &ctx().with_input("WorkPercent", 80));
        assert_eq!(result.amount("Salary"), Some(dec("8000")));
        let result = run(rules.clone(), &ctx());
        assert_eq!(result.amount("Salary"), Some(dec("10000")));
        let result = run(rules, &ctx().with_input("WorkPercent", "n/a"));
        assert_eq!(result.amount("Salary"), Some(dec("10000")));
    }

    #[test]
    fn cap_applies_after_work_percent() {
        let rules = vec![Rule::new("Bonus", "Base * 0.2")
            .scaled_by_work_percent()
            .capped_at("1500")];
        let result = run(rules.clone(), &ctx().with_input("WorkPercent", 50));
        assert_eq!(result.amount("Bonus"), Some(dec("1000")));
        let result = run(rules, &ctx());
        assert_eq!(result.amount("Bonus"), Some(dec("1500")));
    }

    #[test]
    fn failing_cap_fails_rule_in_post_processing() {
        let result = run(vec![Rule::new("Bonus", "100").capped_at("1 / 0")], &ctx());
        let failure = result.components["Bonus"].failure.as_ref().unwrap();
        assert_eq!(failure.stage, RuleStage::PostProcessing);
    }

    #[test]
    fn rounding_applies_when_configured() {
        let functions = FunctionRegistry::with_builtins();
        let config = EvalConfig {
            round_results: Some(2),
            ..EvalConfig::default()
        };
        let result = Evaluator::new(&functions)
            .with_config(config)
            .evaluate_all(
                &RuleSet::new("rs", vec![Rule::new("Third", "Base / 3")]),
                &ctx(),
            )
            .unwrap();
        assert_eq!(result.amount("Third"), Some(dec("3333.33")));
    }

    #[test]
    fn table_lookups_are_traced_and_scoped() {
        let functions = FunctionRegistry::with_builtins();
        let service = Fixed(Mutex::new(Vec::new()));
        let result = Evaluator::new(&functions)
            .with_tables(&service)
            .evaluate_all(
                &RuleSet::new(
                    "rs",
                    vec![
                        Rule::new("Rate", r#"TBL("rates", 1)"#),
                        Rule::new("Missing", r#"TBL("missing", 1)"#),
                    ],
                ),
                &ctx(),
            )
            .unwrap();
        assert_eq!(result.amount("Rate"), Some(dec("100")));
        assert!(result.components["Rate"]
            .trace
            .iter()
            .any(|l| l == "table: TBL(\"rates\", 1) @ 2024-03-31 = 100"));
        let missing = result.components["Missing"].failure.as_ref().unwrap();
        assert_eq!(missing.error.kind(), "table");
    }

    #[test]
    fn tbl_without_service_is_table_error() {
        let result = run(vec![Rule::new("Rate", r#"TBL("rates", 1)"#)], &ctx());
        let failure = result.components["Rate"].failure.as_ref().unwrap();
        assert_eq!(failure.error.kind(), "table");
    }

    #[test]
    fn unreachable_input_names_do_not_stop_evaluation() {
        let ctx = ctx()
            .with_input("Base", 1000)
            .with_input("employeeId", "E-17")
            .with_input("WORK_PCT", 80);
        let result = run(vec![Rule::new("Bonus", "Base * 0.1")], &ctx);
        assert_eq!(result.amount("Bonus"), Some(dec("100")));
        assert_eq!(result.total, dec("100"));
        assert!(!result.components.contains_key("employeeId"));
    }

    #[test]
    fn group_mode_evaluates_forward_group_reference_after_its_members() {
        let functions = FunctionRegistry::with_builtins();
        let config = EvalConfig {
            addressing: AddressingMode::Group,
            ..EvalConfig::default()
        };
        let rs = RuleSet::new(
            "rs",
            vec![
                Rule::new("Summary", "extras * 1").in_group("base"),
                Rule::new("Bonus", "500").in_group("extras"),
            ],
        )
        .with_groups(&["base", "extras"]);
        let result = Evaluator::new(&functions)
            .with_config(config)
            .evaluate_all(&rs, &ctx())
            .unwrap();
        assert_eq!(result.order, vec!["Bonus", "Summary"]);
        assert_eq!(result.amount("Summary"), Some(dec("500")));
        assert_eq!(result.total, dec("1000"));
    }

    #[test]
    fn plain_addressing_reads_groups_as_zero() {
        let functions = FunctionRegistry::with_builtins();
        let config = EvalConfig {
            addressing: AddressingMode::Plain,
            ..EvalConfig::default()
        };
        let rs = RuleSet::new(
            "rs",
            vec![
                Rule::new("Salary", "Base").in_group("base"),
                Rule::new("Bonus", "group1 * 0.1 + 5").in_group("extras"),
            ],
        );
        let result = Evaluator::new(&functions)
            .with_config(config)
            .evaluate_all(&rs, &ctx())
            .unwrap();
        assert_eq!(result.amount("Bonus"), Some(dec("5")));
    }
}
