mod commands;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use commands::{cmd_eval, cmd_expr, cmd_validate};

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Payroll formula rulesets: validate, evaluate and try expressions.
#[derive(Parser)]
#[command(
    name = "payrule",
    version,
    about = "Payroll formula rulesets: validate, evaluate and try expressions"
)]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress error messages on stderr
    #[arg(long, global = true)]
    quiet: bool,

    /// Log every rule evaluation (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a ruleset for syntax, name, group-scope, overlap and cycle issues
    Validate {
        /// Path to the ruleset JSON file
        ruleset: PathBuf,
        /// Context JSON whose input names are bound alongside the targets
        #[arg(long)]
        inputs: Option<PathBuf>,
        /// Only validate rules active on this date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<String>,
        /// TOML file with an [evaluation] section; its addressing mode applies
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Evaluate a ruleset for one period
    Eval {
        /// Path to the ruleset JSON file
        ruleset: PathBuf,
        /// Context JSON with periodDate, optional tenant and inputs
        #[arg(long)]
        inputs: PathBuf,
        /// Table JSON served to TBL lookups
        #[arg(long)]
        tables: Option<PathBuf>,
        /// TOML file with an [evaluation] section
        #[arg(long)]
        config: Option<PathBuf>,
        /// Include the per-component trace in text output
        #[arg(long)]
        trace: bool,
    },

    /// Evaluate a single expression
    Expr {
        /// The expression source
        expression: String,
        /// Bind a component, e.g. --set Base=10000 (repeatable)
        #[arg(long = "set", value_name = "NAME=VALUE")]
        set: Vec<String>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Validate {
            ruleset,
            inputs,
            date,
            config,
        } => {
            cmd_validate(
                &ruleset,
                inputs.as_deref(),
                date.as_deref(),
                config.as_deref(),
                cli.output,
                cli.quiet,
            );
        }
        Commands::Eval {
            ruleset,
            inputs,
            tables,
            config,
            trace,
        } => {
            cmd_eval(
                &ruleset,
                &inputs,
                tables.as_deref(),
                config.as_deref(),
                trace,
                cli.output,
                cli.quiet,
            );
        }
        Commands::Expr { expression, set } => {
            cmd_expr(&expression, &set, cli.output, cli.quiet);
        }
    }
}

pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}
