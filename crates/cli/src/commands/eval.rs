use std::path::Path;
use std::process;

use payrule_core::FunctionRegistry;
use payrule_eval::{EvalContext, EvaluationResult, Evaluator, InMemoryTableService, RuleSet};
use tracing::debug;

use super::{print_json, read_json};
use crate::config::read_config;
use crate::{report_error, OutputFormat};

#[allow(clippy::too_many_arguments)]
pub(crate) fn cmd_eval(
    ruleset_path: &Path,
    inputs_path: &Path,
    tables_path: Option<&Path>,
    config_path: Option<&Path>,
    show_trace: bool,
    output: OutputFormat,
    quiet: bool,
) {
    let ruleset: RuleSet = read_json(ruleset_path, "ruleset", output, quiet);
    let ctx: EvalContext = read_json(inputs_path, "context", output, quiet);
    let tables: Option<InMemoryTableService> =
        tables_path.map(|p| read_json(p, "tables", output, quiet));

    let config = match config_path.map(read_config).transpose() {
        Ok(c) => c.unwrap_or_default(),
        Err(msg) => {
            report_error(&format!("error: {}", msg), output, quiet);
            process::exit(1);
        }
    };

    debug!(
        ruleset = %ruleset.id,
        rules = ruleset.rules.len(),
        inputs = ctx.inputs.len(),
        tables = tables.as_ref().map_or(0, |t| t.tables.len()),
        "loaded evaluation inputs"
    );

    let functions = FunctionRegistry::with_builtins();
    let mut evaluator = Evaluator::new(&functions).with_config(config);
    if let Some(tables) = &tables {
        evaluator = evaluator.with_tables(tables);
    }

    let result = match evaluator.evaluate_all(&ruleset, &ctx) {
        Ok(r) => r,
        Err(e) => {
            report_error(&format!("error: {}", e), output, quiet);
            process::exit(1);
        }
    };

    match output {
        OutputFormat::Json => print_json(&result, output, quiet),
        OutputFormat::Text => print_text(&result, show_trace),
    }
}

fn print_text(result: &EvaluationResult, show_trace: bool) {
    let width = result.order.iter().map(|t| t.len()).max().unwrap_or(0);
    for target in &result.order {
        let Some(component) = result.components.get(target) else {
            continue;
        };
        match &component.failure {
            Some(f) => println!(
                "{:<width$}  {}  (failed while {}: {})",
                target,
                component.amount,
                f.stage,
                f.error,
                width = width
            ),
            None => println!("{:<width$}  {}", target, component.amount, width = width),
        }
        if show_trace {
            for line in &component.trace {
                println!("{:<width$}    {}", "", line, width = width);
            }
        }
    }
    for fallback in &result.fallbacks {
        println!(
            "note: {} was scheduled from a name scan ({})",
            fallback.target, fallback.error
        );
    }
    println!("total {}", result.total);
}
