//! Evaluation settings file for `payrule eval --config`.
//!
//! Every key is optional; anything left out keeps its default.
//!
//! # Example
//!
//! ```toml
//! [evaluation]
//! error_policy = "fail_fast"        # or "continue_with_zero"
//! addressing = "cumulative"         # "plain", "group" or "cumulative"
//! work_percent_input = "WorkPercent"
//! round_results = 2
//! ```

use std::path::Path;

use payrule_eval::EvalConfig;
use serde::Deserialize;

// ── Types ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CliConfig {
    #[serde(default)]
    pub evaluation: EvalConfig,
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Parse a settings file from its TOML text and check the values.
pub fn parse_config(content: &str) -> Result<EvalConfig, String> {
    let config: CliConfig = toml::from_str(content).map_err(|e| e.to_string())?;
    config.evaluation.validate().map_err(|e| e.to_string())?;
    Ok(config.evaluation)
}

/// Read and parse a settings file from disk.
pub fn read_config(path: &Path) -> Result<EvalConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("could not read '{}': {}", path.display(), e))?;
    parse_config(&content).map_err(|e| format!("could not parse '{}': {}", path.display(), e))
}
