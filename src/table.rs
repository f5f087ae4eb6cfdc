//! In-memory tables.
//!
//! A [`Table`] is an ordered list of uniquely named columns plus rows of
//! [`Value`]s aligned to those columns. Every component of the reconcile
//! pipeline consumes and produces tables; [`RecordView`] gives a borrowed,
//! name-addressable view of one row.

use std::{collections::HashMap, fmt::Write as _};

use crate::{data::Value, error::ReconcileError};

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    name: String,
    columns: Vec<String>,
    index: HashMap<String, usize>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Result<Self, ReconcileError> {
        let mut index = HashMap::with_capacity(columns.len());
        for (idx, column) in columns.iter().enumerate() {
            if index.insert(column.clone(), idx).is_some() {
                return Err(ReconcileError::DuplicateColumn(column.clone()));
            }
        }
        Ok(Self {
            name: name.into(),
            columns,
            index,
            rows: Vec::new(),
        })
    }

    /// Builds a table from string cells; handy for fixtures.
    pub fn from_strings<S: AsRef<str>>(
        name: &str,
        columns: &[S],
        rows: &[Vec<S>],
    ) -> Result<Self, ReconcileError> {
        let mut table = Table::new(
            name,
            columns.iter().map(|c| c.as_ref().to_string()).collect(),
        )?;
        for row in rows {
            table.push_row(row.iter().map(|cell| Value::from_cell(cell.as_ref())).collect())?;
        }
        Ok(table)
    }

    /// An empty table with the same name and columns.
    pub fn empty_like(&self) -> Self {
        Self {
            name: self.name.clone(),
            columns: self.columns.clone(),
            index: self.index.clone(),
            rows: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn require_column(&self, name: &str) -> Result<usize, ReconcileError> {
        self.column_index(name)
            .ok_or_else(|| ReconcileError::key_missing(&self.name, name))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<(), ReconcileError> {
        if row.len() != self.columns.len() {
            return Err(ReconcileError::RowWidth {
                expected: self.columns.len(),
                found: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn value(&self, row: usize, column: usize) -> &Value {
        &self.rows[row][column]
    }

    pub fn set_value(&mut self, row: usize, column: usize, value: Value) {
        self.rows[row][column] = value;
    }

    /// Returns the index of `name`, appending an all-absent column if needed.
    pub fn ensure_column(&mut self, name: &str) -> usize {
        if let Some(idx) = self.column_index(name) {
            return idx;
        }
        let idx = self.columns.len();
        self.columns.push(name.to_string());
        self.index.insert(name.to_string(), idx);
        for row in &mut self.rows {
            row.push(Value::Absent);
        }
        idx
    }

    pub fn record(&self, row: usize) -> RecordView<'_> {
        RecordView { table: self, row }
    }

    pub fn records(&self) -> impl Iterator<Item = RecordView<'_>> {
        (0..self.rows.len()).map(move |row| RecordView { table: self, row })
    }

    /// Rows as display strings, in column order.
    pub fn display_rows(&self) -> Vec<Vec<String>> {
        self.rows
            .iter()
            .map(|row| row.iter().map(Value::as_display).collect())
            .collect()
    }
}

/// Borrowed view of one row, addressable by column name.
#[derive(Debug, Clone, Copy)]
pub struct RecordView<'a> {
    table: &'a Table,
    row: usize,
}

impl<'a> RecordView<'a> {
    /// Position of this record in its table.
    pub fn index(&self) -> usize {
        self.row
    }

    /// `None` when the column does not exist; `Some(Value::Absent)` when it
    /// exists but the cell is empty.
    pub fn get(&self, column: &str) -> Option<&'a Value> {
        self.table
            .column_index(column)
            .map(|idx| &self.table.rows[self.row][idx])
    }

    pub fn values(&self) -> &'a [Value] {
        &self.table.rows[self.row]
    }

    pub fn columns(&self) -> &'a [String] {
        &self.table.columns
    }
}

/// Renders headers and rows as an aligned plain-text table.
pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut widths = headers
        .iter()
        .map(|h| h.chars().count().max(3))
        .collect::<Vec<_>>();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(flatten_cell(cell).chars().count());
        }
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_line(headers, &widths));
    let rule = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_line(&rule, &widths));
    for row in rows {
        let _ = writeln!(output, "{}", format_line(row, &widths));
    }
    output
}

fn format_line(cells: &[String], widths: &[usize]) -> String {
    let line = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| {
            let flat = flatten_cell(cell);
            let pad = width.saturating_sub(flat.chars().count());
            format!("{flat}{}", " ".repeat(pad))
        })
        .collect::<Vec<_>>()
        .join("  ");
    line.trim_end().to_string()
}

fn flatten_cell(value: &str) -> String {
    value.replace(['\n', '\r', '\t'], " ")
}
