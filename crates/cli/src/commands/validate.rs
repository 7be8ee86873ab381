use std::collections::BTreeSet;
use std::path::Path;
use std::process;

use payrule_core::FunctionRegistry;
use payrule_eval::model::dates;
use payrule_eval::{validate, EvalContext, RuleSet, ValidationOptions, ValidationReport};

use super::{print_json, read_json};
use crate::config::read_config;
use crate::{report_error, OutputFormat};

pub(crate) fn cmd_validate(
    ruleset_path: &Path,
    inputs_path: Option<&Path>,
    date: Option<&str>,
    config_path: Option<&Path>,
    output: OutputFormat,
    quiet: bool,
) {
    let ruleset: RuleSet = read_json(ruleset_path, "ruleset", output, quiet);

    let date = match date.map(dates::parse).transpose() {
        Ok(d) => d,
        Err(e) => {
            let msg = format!("error: --date must be YYYY-MM-DD: {}", e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };
    let known_inputs = inputs_path.map(|p| {
        let ctx: EvalContext = read_json(p, "context", output, quiet);
        ctx.inputs.into_keys().collect::<BTreeSet<String>>()
    });

    let addressing = match config_path.map(read_config).transpose() {
        Ok(c) => c.unwrap_or_default().addressing,
        Err(msg) => {
            report_error(&format!("error: {}", msg), output, quiet);
            process::exit(1);
        }
    };

    let options = ValidationOptions {
        date,
        known_inputs,
        addressing,
    };
    let report = validate(&ruleset, &options, &FunctionRegistry::with_builtins());

    match output {
        OutputFormat::Json => print_json(&report, output, quiet),
        OutputFormat::Text => print_text(&ruleset, &report),
    }
    if !report.is_ok() {
        process::exit(1);
    }
}

fn print_text(ruleset: &RuleSet, report: &ValidationReport) {
    if report.is_ok() {
        println!("{}: ok ({} rules)", ruleset.id, ruleset.rules.len());
        return;
    }
    for issue in &report.issues {
        let target = issue.target.as_deref().unwrap_or("-");
        let kind = serde_json::to_value(issue.kind)
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_default();
        match issue.position {
            Some(pos) => println!("{} [{}] at {}: {}", target, kind, pos, issue.message),
            None => println!("{} [{}]: {}", target, kind, issue.message),
        }
    }
    println!("{}: {} issue(s)", ruleset.id, report.issues.len());
}
