use std::collections::BTreeMap;
use std::process;
use std::str::FromStr;

use payrule_core::{evaluate, Value};
use rust_decimal::Decimal;

use crate::{report_error, OutputFormat};

/// `Base=10000` binds a number, `Manager=true` a boolean, anything else a
/// string.
fn parse_binding(binding: &str) -> Result<(String, Value), String> {
    let (name, raw) = binding
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", binding))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing name in '{}'", binding));
    }
    let raw = raw.trim();
    let value = if let Ok(d) = Decimal::from_str(raw) {
        Value::Number(d)
    } else {
        match raw {
            "true" => Value::Boolean(true),
            "false" => Value::Boolean(false),
            _ => Value::String(raw.to_string()),
        }
    };
    Ok((name.to_string(), value))
}

pub(crate) fn cmd_expr(expression: &str, bindings: &[String], output: OutputFormat, quiet: bool) {
    let mut env: BTreeMap<String, Value> = BTreeMap::new();
    for binding in bindings {
        match parse_binding(binding) {
            Ok((name, value)) => {
                env.insert(name, value);
            }
            Err(msg) => {
                report_error(&format!("error: --set {}", msg), output, quiet);
                process::exit(1);
            }
        }
    }

    match evaluate(expression, &env) {
        Ok(value) => match output {
            OutputFormat::Text => println!("{}", value),
            OutputFormat::Json => println!("{}", serde_json::json!({ "value": value })),
        },
        Err(e) => {
            report_error(&format!("error: {}", e), output, quiet);
            process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bindings_prefer_numbers_then_booleans() {
        assert_eq!(
            parse_binding("Base=10000").unwrap(),
            ("Base".to_string(), Value::Number(Decimal::from(10000)))
        );
        assert_eq!(
            parse_binding("Manager = true").unwrap(),
            ("Manager".to_string(), Value::Boolean(true))
        );
        assert_eq!(
            parse_binding("City=Oslo").unwrap().1,
            Value::String("Oslo".to_string())
        );
    }

    #[test]
    fn binding_needs_a_name_and_equals() {
        assert!(parse_binding("Base").is_err());
        assert!(parse_binding("=3").is_err());
    }
}
