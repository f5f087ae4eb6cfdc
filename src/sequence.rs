//! Document numbering.
//!
//! A [`SequenceCounter`] is a plain value: allocating returns the identifier
//! together with the advanced counter, so whoever owns the counter is the only
//! one able to hand out numbers. [`CounterStore`] keeps the next value of each
//! prefix in a two-column sheet so numbering continues across runs.

use log::{debug, info};

use crate::{
    client::SheetClient,
    data::Value,
    error::{ReconcileError, SheetError},
    table::Table,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceCounter {
    prefix: String,
    next: u64,
    width: usize,
}

impl SequenceCounter {
    pub fn new(prefix: impl Into<String>, start: u64, width: usize) -> Self {
        Self {
            prefix: prefix.into(),
            next: start,
            width,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn next_value(&self) -> u64 {
        self.next
    }

    pub fn format(&self, value: u64) -> String {
        format!("{}-{:0width$}", self.prefix, value, width = self.width)
    }

    /// The identifier the next allocation will return.
    pub fn peek(&self) -> String {
        self.format(self.next)
    }

    /// Allocates one identifier.
    pub fn next(self) -> (String, SequenceCounter) {
        let identifier = self.peek();
        let advanced = SequenceCounter {
            next: self.next + 1,
            ..self
        };
        (identifier, advanced)
    }

    /// Moves the counter forward to `value` if it is behind.
    pub fn seed_at_least(self, value: u64) -> SequenceCounter {
        SequenceCounter {
            next: self.next.max(value),
            ..self
        }
    }
}

const PREFIX_COLUMN: &str = "prefix";
const NEXT_COLUMN: &str = "next";

/// Persists `(prefix, next)` pairs in a sheet.
pub struct CounterStore<'c> {
    client: &'c dyn SheetClient,
    sheet: String,
}

impl<'c> CounterStore<'c> {
    pub fn new(client: &'c dyn SheetClient, sheet: impl Into<String>) -> Self {
        Self {
            client,
            sheet: sheet.into(),
        }
    }

    /// Stored next value for `prefix`. A missing sheet reads as no value.
    pub fn load(&self, prefix: &str) -> Result<Option<u64>, ReconcileError> {
        let table = match self.client.read_table(&self.sheet, None) {
            Ok(table) => table,
            Err(SheetError::SourceUnavailable { .. }) => {
                debug!("Counter sheet '{}' not found; starting fresh", self.sheet);
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        if table.is_empty() {
            return Ok(None);
        }
        let prefix_idx = table.require_column(PREFIX_COLUMN)?;
        let next_idx = table.require_column(NEXT_COLUMN)?;
        for row in table.rows() {
            if row[prefix_idx].as_display().trim() == prefix {
                let raw = row[next_idx].as_display();
                let value = raw.trim().parse::<u64>().map_err(|_| {
                    ReconcileError::Config(format!(
                        "counter sheet '{}' holds '{raw}' for prefix '{prefix}'",
                        self.sheet
                    ))
                })?;
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Writes `counter.next_value()` for the counter's prefix, keeping other rows.
    pub fn save(&self, counter: &SequenceCounter) -> Result<(), SheetError> {
        let mut table = match self.client.read_table(&self.sheet, None) {
            Ok(table) if !table.columns().is_empty() => table,
            Ok(_) | Err(SheetError::SourceUnavailable { .. }) => {
                Table::new(&self.sheet, vec![PREFIX_COLUMN.into(), NEXT_COLUMN.into()])
                    .map_err(|err| SheetError::Transient(err.to_string()))?
            }
            Err(err) => return Err(err),
        };
        let prefix_idx = table.ensure_column(PREFIX_COLUMN);
        let next_idx = table.ensure_column(NEXT_COLUMN);
        let next = Value::text(counter.next_value().to_string());
        let existing = (0..table.len())
            .find(|row| table.value(*row, prefix_idx).as_display().trim() == counter.prefix());
        match existing {
            Some(row) => table.set_value(row, next_idx, next),
            None => {
                let mut row = vec![Value::Absent; table.columns().len()];
                row[prefix_idx] = Value::text(counter.prefix());
                row[next_idx] = next;
                table
                    .push_row(row)
                    .map_err(|err| SheetError::Transient(err.to_string()))?;
            }
        }
        self.client.write_table(&self.sheet, &table)?;
        info!(
            "Counter '{}' saved at {} in '{}'",
            counter.prefix(),
            counter.next_value(),
            self.sheet
        );
        Ok(())
    }
}
