//! End-to-end evaluation behaviour through the public API.

use std::str::FromStr;
use std::sync::Mutex;

use payrule_core::{FormulaError, FunctionRegistry};
use payrule_eval::{
    evaluate, EvalContext, EvalError, Evaluator, Rule, RuleSet, RuleStage, TableError,
    TableRequest, TableService,
};
use rust_decimal::Decimal;
use time::macros::date;

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

/// Returns 100 for every lookup and remembers what was asked.
#[derive(Default)]
struct StubTables {
    calls: Mutex<Vec<String>>,
}

impl TableService for StubTables {
    fn lookup(&self, request: &TableRequest<'_>) -> Result<Decimal, TableError> {
        self.calls.lock().unwrap().push(format!(
            "{}:{}:{}",
            request.component,
            request.table,
            request
                .keys
                .iter()
                .map(|k| k.to_string())
                .collect::<Vec<_>>()
                .join(",")
        ));
        Ok(dec("100"))
    }
}

#[test]
fn tbl_composes_inside_arithmetic() {
    let tables = StubTables::default();
    let functions = FunctionRegistry::with_builtins();
    let rs = RuleSet::new("rs", vec![Rule::new("Scaled", r#"(TBL("t", 1) / 100) * X"#)]);
    let ctx = EvalContext::new(date!(2024 - 01 - 31)).with_input("X", 1000);
    let result = Evaluator::new(&functions)
        .with_tables(&tables)
        .evaluate_all(&rs, &ctx)
        .unwrap();
    assert_eq!(result.amount("Scaled"), Some(dec("1000")));
    assert_eq!(*tables.calls.lock().unwrap(), vec!["Scaled:t:1"]);
}

#[test]
fn if_evaluates_the_unused_branch_lookup() {
    let tables = StubTables::default();
    let functions = FunctionRegistry::with_builtins();
    let rs = RuleSet::new(
        "rs",
        vec![Rule::new(
            "Allowance",
            r#"IF Manager THEN TBL("managers", Grade) ELSE TBL("staff", Grade)"#,
        )],
    );
    let ctx = EvalContext::new(date!(2024 - 01 - 31))
        .with_input("Manager", true)
        .with_input("Grade", 3);
    let result = Evaluator::new(&functions)
        .with_tables(&tables)
        .evaluate_all(&rs, &ctx)
        .unwrap();
    assert_eq!(result.amount("Allowance"), Some(dec("100")));
    let calls = tables.calls.lock().unwrap();
    assert!(calls.contains(&"Allowance:managers:3".to_string()));
    assert!(calls.contains(&"Allowance:staff:3".to_string()));
    // both lookups appear in the trace too
    let trace = &result.components["Allowance"].trace;
    assert_eq!(trace.iter().filter(|l| l.starts_with("table:")).count(), 2);
}

#[test]
fn group_reference_reads_current_values_of_earlier_group() {
    let rs = RuleSet::new(
        "rs",
        vec![
            Rule::new("Salary", "Base").in_group("base"),
            Rule::new("Overtime", "250").in_group("base"),
            Rule::new("Bonus", "group1 * 0.1").in_group("extras"),
        ],
    )
    .with_groups(&["base", "extras"]);
    let ctx = EvalContext::new(date!(2024 - 01 - 31)).with_input("Base", 3000);
    let result = evaluate(&rs, &ctx).unwrap();
    assert_eq!(result.amount("Bonus"), Some(dec("325")));
}

#[test]
fn own_group_reference_is_group_scope_error() {
    let rs = RuleSet::new(
        "rs",
        vec![
            Rule::new("Salary", "Base").in_group("base"),
            Rule::new("Bonus", "group2 * 0.1").in_group("extras"),
        ],
    )
    .with_groups(&["base", "extras"]);
    let ctx = EvalContext::new(date!(2024 - 01 - 31)).with_input("Base", 3000);
    let result = evaluate(&rs, &ctx).unwrap();
    assert_eq!(result.amount("Bonus"), Some(Decimal::ZERO));
    let failure = result.components["Bonus"].failure.as_ref().unwrap();
    assert_eq!(failure.stage, RuleStage::Evaluating);
    assert!(matches!(
        failure.error,
        FormulaError::GroupScope {
            group: 2,
            own_group: 2,
            ..
        }
    ));
    // the rest of the ruleset still counts
    assert_eq!(result.total, dec("3000"));
}

#[test]
fn toggle_group_sums_flagged_components() {
    let rs = RuleSet::new(
        "rs",
        vec![
            Rule::new("PensionDeduction", "-(pension_group * 0.07)"),
            Rule::new("Salary", "Base").with_flag("pension"),
            Rule::new("Overtime", "500"),
            Rule::new("Shift", "200").with_flag("pension"),
            Rule::new("TaxableTotal", "taxable_group").with_flag("reported"),
            Rule::new("Meal", "80").with_flag("taxable"),
        ],
    );
    let ctx = EvalContext::new(date!(2024 - 01 - 31)).with_input("Base", 3000);
    let result = evaluate(&rs, &ctx).unwrap();
    assert_eq!(result.amount("PensionDeduction"), Some(dec("-224")));
    assert_eq!(result.amount("TaxableTotal"), Some(dec("80")));
}

#[test]
fn cycle_aborts_and_names_a_member() {
    let rs = RuleSet::new(
        "rs",
        vec![
            Rule::new("A", "B + 1"),
            Rule::new("B", "A + 1"),
            Rule::new("C", "5"),
        ],
    );
    let ctx = EvalContext::new(date!(2024 - 01 - 31));
    match evaluate(&rs, &ctx) {
        Err(EvalError::Cycle { path }) => {
            assert!(path.iter().any(|p| p == "A" || p == "B"));
            assert!(!path.contains(&"C".to_string()));
        }
        other => panic!("expected cycle error, got {:?}", other),
    }
}

#[test]
fn explicit_dependency_cycle_is_detected() {
    let rs = RuleSet::new(
        "rs",
        vec![
            Rule::new("A", "1").depends_on(&["B"]),
            Rule::new("B", "2").depends_on(&["A"]),
        ],
    );
    let ctx = EvalContext::new(date!(2024 - 01 - 31));
    assert!(matches!(evaluate(&rs, &ctx), Err(EvalError::Cycle { .. })));
}

#[test]
fn duplicate_active_target_is_rejected() {
    let rs = RuleSet::new("rs", vec![Rule::new("Bonus", "1"), Rule::new("Bonus", "2")]);
    let ctx = EvalContext::new(date!(2024 - 01 - 31));
    assert!(matches!(
        evaluate(&rs, &ctx),
        Err(EvalError::DuplicateTarget { .. })
    ));
}

#[test]
fn unknown_reference_reads_as_zero_in_a_rule() {
    let rs = RuleSet::new("rs", vec![Rule::new("Bonus", "DeletedComponent + 5")]);
    let ctx = EvalContext::new(date!(2024 - 01 - 31));
    let result = evaluate(&rs, &ctx).unwrap();
    assert_eq!(result.amount("Bonus"), Some(dec("5")));
    assert!(result.components["Bonus"]
        .trace
        .iter()
        .any(|l| l.contains("DeletedComponent = 0 (unknown)")));
}

#[test]
fn evaluation_is_deterministic() {
    let rs = RuleSet::new(
        "rs",
        vec![
            Rule::new("A", "Base / 7"),
            Rule::new("B", "A * 7"),
            Rule::new("C", "ROUND(B, 2)"),
        ],
    );
    let ctx = EvalContext::new(date!(2024 - 01 - 31)).with_input("Base", 100);
    let first = evaluate(&rs, &ctx).unwrap();
    for _ in 0..3 {
        assert_eq!(evaluate(&rs, &ctx).unwrap(), first);
    }
    assert_eq!(first.amount("C"), Some(dec("100")));
}

#[test]
fn independent_evaluations_run_in_parallel() {
    let tables = StubTables::default();
    let functions = FunctionRegistry::with_builtins();
    let evaluator = Evaluator::new(&functions).with_tables(&tables);
    let rs = RuleSet::new(
        "rs",
        vec![
            Rule::new("Rate", r#"TBL("rates", Grade) / 100"#),
            Rule::new("Pay", "Base * Rate"),
        ],
    );

    let results: Vec<Decimal> = std::thread::scope(|s| {
        let handles: Vec<_> = (1..=8)
            .map(|i| {
                let evaluator = &evaluator;
                let rs = &rs;
                s.spawn(move || {
                    let ctx = EvalContext::new(date!(2024 - 01 - 31))
                        .with_input("Base", 1000 * i)
                        .with_input("Grade", i);
                    evaluator.evaluate_all(rs, &ctx).unwrap().total
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for (i, total) in results.iter().enumerate() {
        let base = Decimal::from(1000 * (i as i64 + 1));
        assert_eq!(*total, base + Decimal::ONE);
    }
    assert_eq!(tables.calls.lock().unwrap().len(), 8);
}
