mod eval;
mod expr;
mod validate;

pub(crate) use eval::cmd_eval;
pub(crate) use expr::cmd_expr;
pub(crate) use validate::cmd_validate;

use std::path::Path;
use std::process;

use serde::de::DeserializeOwned;

use crate::{report_error, OutputFormat};

/// Read and deserialize a JSON file, or report the failure and exit 1.
pub(crate) fn read_json<T: DeserializeOwned>(
    path: &Path,
    what: &str,
    output: OutputFormat,
    quiet: bool,
) -> T {
    let text = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            let msg = format!("error: could not read {} '{}': {}", what, path.display(), e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };
    match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(e) => {
            let msg = format!("error: invalid {} JSON in '{}': {}", what, path.display(), e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    }
}

pub(crate) fn print_json(value: &impl serde::Serialize, output: OutputFormat, quiet: bool) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => {
            report_error(&format!("error: serialization failed: {}", e), output, quiet);
            process::exit(1);
        }
    }
}
