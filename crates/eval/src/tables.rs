//! The bridge from `TBL(...)` to tabular lookup data.
//!
//! [`TableService`] is the collaborator the host supplies. It is called
//! synchronously and must tolerate concurrent reads. [`ScopedTableLookup`]
//! binds one rule's tenant, component and date around it and implements the
//! core [`TableLookup`] seam; a fresh one is built for every rule.
//! [`InMemoryTableService`] is a complete service over JSON-loadable tables.

use std::cell::RefCell;

use payrule_core::{FormulaError, TableLookup, Value};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::Date;

use crate::model::dates;

// ──────────────────────────────────────────────
// Service contract
// ──────────────────────────────────────────────

/// One lookup, with the scope of the rule that asked.
#[derive(Debug, Clone, Copy)]
pub struct TableRequest<'a> {
    pub tenant: Option<&'a str>,
    /// The component being evaluated. Rows may be restricted to it.
    pub component: &'a str,
    pub table: &'a str,
    pub keys: &'a [Value],
    pub date: Date,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    #[error("unknown table '{table}'")]
    UnknownTable { table: String },

    #[error("no row of table '{table}' matches keys ({keys})")]
    NotFound { table: String, keys: String },

    /// More than one row matches; the table design is ambiguous.
    #[error("{matches} rows of table '{table}' match keys ({keys})")]
    Ambiguous {
        table: String,
        keys: String,
        matches: usize,
    },

    #[error("table '{table}' schema error: {message}")]
    Schema { table: String, message: String },
}

impl From<TableError> for FormulaError {
    fn from(e: TableError) -> Self {
        FormulaError::table(e.to_string())
    }
}

pub trait TableService: Send + Sync {
    fn lookup(&self, request: &TableRequest<'_>) -> Result<Decimal, TableError>;
}

fn show_keys(keys: &[Value]) -> String {
    keys.iter()
        .map(|k| match k {
            Value::String(s) => format!("\"{}\"", s),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

// ──────────────────────────────────────────────
// Per-rule adapter
// ──────────────────────────────────────────────

/// Binds a [`TableService`] to the rule being evaluated.
///
/// A trailing `YYYY-MM-DD` string argument overrides the period date and is
/// not passed on as a key. Every lookup, successful or not, is logged for
/// the rule's trace.
pub struct ScopedTableLookup<'a> {
    service: &'a dyn TableService,
    tenant: Option<&'a str>,
    component: &'a str,
    date: Date,
    log: RefCell<Vec<String>>,
}

impl<'a> ScopedTableLookup<'a> {
    pub fn new(
        service: &'a dyn TableService,
        tenant: Option<&'a str>,
        component: &'a str,
        date: Date,
    ) -> Self {
        ScopedTableLookup {
            service,
            tenant,
            component,
            date,
            log: RefCell::new(Vec::new()),
        }
    }

    /// Drain the lookups logged so far.
    pub fn take_log(&self) -> Vec<String> {
        std::mem::take(&mut *self.log.borrow_mut())
    }
}

impl TableLookup for ScopedTableLookup<'_> {
    fn lookup(&self, table: &str, keys: &[Value]) -> Result<Decimal, FormulaError> {
        let (keys, date) = match keys.split_last() {
            Some((Value::String(last), rest)) => match dates::parse(last) {
                Ok(d) => (rest, d),
                Err(_) => (keys, self.date),
            },
            _ => (keys, self.date),
        };
        let request = TableRequest {
            tenant: self.tenant,
            component: self.component,
            table,
            keys,
            date,
        };
        let result = self.service.lookup(&request);
        let call = format!(
            "TBL(\"{}\"{}{}) @ {}",
            table,
            if keys.is_empty() { "" } else { ", " },
            show_keys(keys),
            dates::format(date)
        );
        self.log.borrow_mut().push(match &result {
            Ok(v) => format!("table: {} = {}", call, v.normalize()),
            Err(e) => format!("table: {} failed: {}", call, e),
        });
        Ok(result?)
    }
}

// ──────────────────────────────────────────────
// In-memory service
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    #[default]
    Exact,
    /// Numeric range; min inclusive, max exclusive, either bound optional.
    Range,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(default)]
    pub kind: ColumnKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Range {
        #[serde(default)]
        min: Option<Decimal>,
        #[serde(default)]
        max: Option<Decimal>,
    },
    Exact(Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    pub cells: Vec<Cell>,
    pub value: Decimal,
    /// Only applies to lookups made while evaluating this component.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(default, with = "dates::option", skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<Date>,
    #[serde(default, with = "dates::option", skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<Date>,
}

impl Row {
    fn valid_on(&self, date: Date) -> bool {
        self.valid_from.map_or(true, |from| from <= date)
            && self.valid_to.map_or(true, |to| date <= to)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    /// A tenant-specific table shadows the global table of the same name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
}

impl Table {
    fn cell_matches(&self, column: &Column, cell: &Cell, key: &Value) -> Result<bool, TableError> {
        match (column.kind, cell) {
            (ColumnKind::Exact, Cell::Exact(expected)) => Ok(expected.loose_eq(key)),
            (ColumnKind::Range, Cell::Range { min, max }) => {
                let k = key.to_number().map_err(|e| TableError::Schema {
                    table: self.name.clone(),
                    message: format!("range column '{}': {}", column.name, e),
                })?;
                Ok(min.map_or(true, |m| m <= k) && max.map_or(true, |m| k < m))
            }
            _ => Err(TableError::Schema {
                table: self.name.clone(),
                message: format!("cell kind does not match column '{}'", column.name),
            }),
        }
    }

    fn lookup(&self, request: &TableRequest<'_>) -> Result<Decimal, TableError> {
        if request.keys.len() != self.columns.len() {
            return Err(TableError::Schema {
                table: self.name.clone(),
                message: format!(
                    "expected {} key(s), got {}",
                    self.columns.len(),
                    request.keys.len()
                ),
            });
        }

        let mut matches: Vec<&Row> = Vec::new();
        for row in &self.rows {
            if row.cells.len() != self.columns.len() {
                return Err(TableError::Schema {
                    table: self.name.clone(),
                    message: format!(
                        "row has {} cell(s) for {} column(s)",
                        row.cells.len(),
                        self.columns.len()
                    ),
                });
            }
            if !row.valid_on(request.date) {
                continue;
            }
            if row.component.as_deref().is_some_and(|c| c != request.component) {
                continue;
            }
            let mut all = true;
            for ((column, cell), key) in self.columns.iter().zip(&row.cells).zip(request.keys) {
                if !self.cell_matches(column, cell, key)? {
                    all = false;
                    break;
                }
            }
            if all {
                matches.push(row);
            }
        }

        // Rows restricted to this component win over generic rows.
        if matches.iter().any(|r| r.component.is_some()) {
            matches.retain(|r| r.component.is_some());
        }

        match matches.as_slice() {
            [row] => Ok(row.value),
            [] => Err(TableError::NotFound {
                table: self.name.clone(),
                keys: show_keys(request.keys),
            }),
            many => Err(TableError::Ambiguous {
                table: self.name.clone(),
                keys: show_keys(request.keys),
                matches: many.len(),
            }),
        }
    }
}

/// Tables held in memory, typically deserialized from JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InMemoryTableService {
    pub tables: Vec<Table>,
}

impl InMemoryTableService {
    pub fn new(tables: Vec<Table>) -> Self {
        InMemoryTableService { tables }
    }

    fn table_for(&self, name: &str, tenant: Option<&str>) -> Option<&Table> {
        let same_name = || self.tables.iter().filter(move |t| t.name == name);
        tenant
            .and_then(|tenant| same_name().find(|t| t.tenant.as_deref() == Some(tenant)))
            .or_else(|| same_name().find(|t| t.tenant.is_none()))
    }
}

impl TableService for InMemoryTableService {
    fn lookup(&self, request: &TableRequest<'_>) -> Result<Decimal, TableError> {
        self.table_for(request.table, request.tenant)
            .ok_or_else(|| TableError::UnknownTable {
                table: request.table.to_owned(),
            })?
            .lookup(request)
    }
}
