//! Dependency extraction from formula text.
//!
//! Two strategies sit behind [`ExtractDependencies`]:
//!
//! - [`AstExtractor`] parses the formula and walks the tree. Exact, but
//!   fails on malformed text.
//! - [`PatternScanExtractor`] scans for identifiers outside string literals
//!   and keeps only names that are already known targets. Never fails.
//!
//! [`extract_dependencies`] tries the first and falls back to the second,
//! recording which one produced the answer so callers can surface it.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::ast::Reference;
use crate::error::FormulaError;
use crate::functions::FunctionRegistry;
use crate::parser;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    Ast,
    PatternScan,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependencies {
    /// CamelCase component names the formula reads.
    pub components: BTreeSet<String>,
    /// Group and toggle-group references. Only the AST strategy finds these.
    pub group_refs: BTreeSet<Reference>,
    pub strategy: ExtractionStrategy,
    /// The parse failure that forced a pattern scan, if any.
    pub parse_error: Option<FormulaError>,
}

pub trait ExtractDependencies {
    fn extract(
        &self,
        source: &str,
        known_targets: &BTreeSet<String>,
    ) -> Result<Dependencies, FormulaError>;
}

/// Parse and walk. Syntax-only parse: names are not bound.
pub struct AstExtractor<'a> {
    pub functions: &'a FunctionRegistry,
}

impl ExtractDependencies for AstExtractor<'_> {
    fn extract(
        &self,
        source: &str,
        _known_targets: &BTreeSet<String>,
    ) -> Result<Dependencies, FormulaError> {
        let expr = parser::parse_syntax(source, self.functions)?;
        let mut components = BTreeSet::new();
        let mut group_refs = BTreeSet::new();
        for r in expr.references() {
            match r {
                Reference::Component(name) => {
                    components.insert(name);
                }
                other => {
                    group_refs.insert(other);
                }
            }
        }
        Ok(Dependencies {
            components,
            group_refs,
            strategy: ExtractionStrategy::Ast,
            parse_error: None,
        })
    }
}

pub struct PatternScanExtractor;

fn string_literal_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""(?:[^"\\]|\\.)*"?"#).expect("string literal pattern"))
}

fn camel_word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[A-Z][A-Za-z0-9_]*\b").expect("identifier pattern"))
}

impl PatternScanExtractor {
    /// The scan itself; it cannot fail.
    pub fn scan(&self, source: &str, known_targets: &BTreeSet<String>) -> Dependencies {
        let without_strings = string_literal_re().replace_all(source, " ");
        let components = camel_word_re()
            .find_iter(&without_strings)
            .map(|m| m.as_str())
            .filter(|w| known_targets.contains(*w))
            .map(str::to_owned)
            .collect();
        Dependencies {
            components,
            group_refs: BTreeSet::new(),
            strategy: ExtractionStrategy::PatternScan,
            parse_error: None,
        }
    }
}

impl ExtractDependencies for PatternScanExtractor {
    fn extract(
        &self,
        source: &str,
        known_targets: &BTreeSet<String>,
    ) -> Result<Dependencies, FormulaError> {
        Ok(self.scan(source, known_targets))
    }
}

/// AST walk first; pattern scan restricted to `known_targets` if parsing
/// fails.
pub fn extract_dependencies(
    source: &str,
    known_targets: &BTreeSet<String>,
    functions: &FunctionRegistry,
) -> Dependencies {
    match (AstExtractor { functions }).extract(source, known_targets) {
        Ok(deps) => deps,
        Err(parse_error) => Dependencies {
            parse_error: Some(parse_error),
            ..PatternScanExtractor.scan(source, known_targets)
        },
    }
}
