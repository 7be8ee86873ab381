//! Per-rule audit trace.
//!
//! A trace is an ordered list of human-readable lines: the expression,
//! the values it read, any table lookups, and the final result or error.
//! It is write-only; nothing in the evaluator reads it back.

use std::cell::RefCell;

use payrule_core::{Environment, FormulaError, Reference, Value};

/// Collects references read during one rule's evaluation.
#[derive(Debug, Default)]
pub struct TraceCollector {
    reads: RefCell<Vec<(String, String)>>,
    lines: Vec<String>,
}

impl TraceCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reference read. Repeated reads of the same name are kept once.
    pub fn record_read(&self, name: &str, value: &str) {
        let mut reads = self.reads.borrow_mut();
        if !reads.iter().any(|(n, _)| n == name) {
            reads.push((name.to_owned(), value.to_owned()));
        }
    }

    pub fn line(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    /// Flush the reads gathered so far as one `reads:` line.
    pub fn flush_reads(&mut self) {
        let reads = std::mem::take(&mut *self.reads.borrow_mut());
        if reads.is_empty() {
            return;
        }
        let joined = reads
            .iter()
            .map(|(n, v)| format!("{} = {}", n, v))
            .collect::<Vec<_>>()
            .join(", ");
        self.lines.push(format!("reads: {}", joined));
    }

    pub fn into_lines(mut self) -> Vec<String> {
        self.flush_reads();
        self.lines
    }
}

/// An environment that records every resolved reference into a collector.
pub struct Recorded<'a> {
    pub inner: &'a dyn Environment,
    pub collector: &'a TraceCollector,
}

impl Environment for Recorded<'_> {
    fn resolve(&self, reference: &Reference) -> Result<Option<Value>, FormulaError> {
        let resolved = self.inner.resolve(reference)?;
        let shown = match &resolved {
            Some(v) => v.to_string(),
            None => "0 (unknown)".to_string(),
        };
        self.collector.record_read(&reference.to_string(), &shown);
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn collector_deduplicates_reads() {
        let c = TraceCollector::new();
        c.record_read("Base", "100");
        c.record_read("Rate", "0.5");
        c.record_read("Base", "100");
        assert_eq!(
            c.into_lines(),
            vec!["reads: Base = 100, Rate = 0.5".to_string()]
        );
    }

    #[test]
    fn lines_keep_order() {
        let mut c = TraceCollector::new();
        c.line("expression: Base * 2");
        c.record_read("Base", "3");
        c.flush_reads();
        c.line("result: 6");
        assert_eq!(
            c.into_lines(),
            vec!["expression: Base * 2", "reads: Base = 3", "result: 6"]
        );
    }

    #[test]
    fn recorded_env_marks_unknown_names() {
        let values: BTreeMap<String, Value> =
            [("Base".to_string(), Value::from(5))].into_iter().collect();
        let c = TraceCollector::new();
        let env = Recorded {
            inner: &values,
            collector: &c,
        };
        env.resolve(&Reference::Component("Base".into())).unwrap();
        env.resolve(&Reference::Component("Missing".into())).unwrap();
        assert_eq!(
            c.into_lines(),
            vec!["reads: Base = 5, Missing = 0 (unknown)".to_string()]
        );
    }
}
