//! Declarative placement of group data onto a document template.
//!
//! ```yaml
//! cells:
//!   - { kind: static, cell: A4, field: Customer Name }
//!   - { kind: computed, cell: G6, compute: { fn: identifier } }
//!   - { kind: computed, cell: F25, compute: { fn: subtotal }, format: european_amount }
//!   - { kind: repeating, cell: A29, field: Product, capacity: 12 }
//! ```

use serde::{Deserialize, Serialize};

use crate::cells::CellRef;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Value as read (or as computed).
    #[default]
    Plain,
    /// Two decimals, dot separator: `1234.50`.
    Amount,
    /// Two decimals, grouped: `1.234,50`.
    EuropeanAmount,
    /// ISO date: `2024-05-06`.
    Date,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "fn", rename_all = "snake_case")]
pub enum ComputedField {
    /// The identifier allocated to the document.
    Identifier,
    /// Run date, `chrono` format string (default `%Y-%m-%d`).
    Today {
        #[serde(default)]
        format: Option<String>,
    },
    /// English month name of a date column on the first member.
    MonthName { column: String },
    Subtotal,
    TaxAmount,
    TaxLabel,
    /// Subtotal plus tax.
    Total,
    /// Non-blank values of `columns` on the first member, joined.
    Concat {
        columns: Vec<String>,
        #[serde(default = "default_separator")]
        separator: String,
    },
    /// `evalexpr` expression over the first member's columns.
    Expression { expr: String },
}

fn default_separator() -> String {
    " ".to_string()
}

fn default_stride() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MappingEntry {
    /// `field` of the group's first record.
    Static {
        cell: CellRef,
        field: String,
        #[serde(default)]
        format: OutputFormat,
    },
    Computed {
        cell: CellRef,
        compute: ComputedField,
        #[serde(default)]
        format: OutputFormat,
    },
    /// `field` of member `i` goes to `cell` moved down `i * stride` rows.
    Repeating {
        cell: CellRef,
        field: String,
        #[serde(default = "default_stride")]
        stride: usize,
        #[serde(default)]
        format: OutputFormat,
        #[serde(default)]
        capacity: Option<usize>,
    },
}

impl MappingEntry {
    pub fn cell(&self) -> CellRef {
        match self {
            MappingEntry::Static { cell, .. }
            | MappingEntry::Computed { cell, .. }
            | MappingEntry::Repeating { cell, .. } => *cell,
        }
    }

    /// Short label used in logs and errors.
    pub fn describe(&self) -> String {
        match self {
            MappingEntry::Static { field, .. } => field.clone(),
            MappingEntry::Computed { compute, .. } => format!("{compute:?}"),
            MappingEntry::Repeating { field, .. } => format!("{field}[]"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellMapping {
    pub entries: Vec<MappingEntry>,
}

impl CellMapping {
    pub fn new(entries: Vec<MappingEntry>) -> Self {
        Self { entries }
    }

    pub fn columns_read(&self) -> Vec<&str> {
        let mut columns = Vec::new();
        for entry in &self.entries {
            match entry {
                MappingEntry::Static { field, .. } | MappingEntry::Repeating { field, .. } => {
                    columns.push(field.as_str())
                }
                MappingEntry::Computed { compute, .. } => match compute {
                    ComputedField::MonthName { column } => columns.push(column.as_str()),
                    ComputedField::Concat { columns: sources, .. } => {
                        columns.extend(sources.iter().map(String::as_str))
                    }
                    _ => {}
                },
            }
        }
        columns
    }
}
