//! In-memory [`SheetClient`] with failure injection.

use std::{
    collections::{BTreeMap, HashSet},
    sync::Mutex,
};

use crate::{
    cells::CellRef,
    client::{CellWrite, Grid, SheetClient, apply_cell_writes, select_range, table_to_grid},
    error::SheetError,
    table::Table,
};

#[derive(Debug, Default)]
pub struct MemoryWorkbook {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    sheets: BTreeMap<String, Grid>,
    calls: Vec<String>,
    rate_limit_remaining: usize,
    transient_remaining: usize,
    rejected: HashSet<String>,
}

impl MemoryWorkbook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_grid(&self, sheet: &str, grid: Grid) {
        self.with_state(|state| {
            state.sheets.insert(sheet.to_string(), grid);
        });
    }

    pub fn insert_table(&self, sheet: &str, table: &Table) {
        self.insert_grid(sheet, table_to_grid(table));
    }

    pub fn grid(&self, sheet: &str) -> Option<Grid> {
        self.with_state(|state| state.sheets.get(sheet).cloned())
    }

    /// Cell text at an A1 position; empty when the cell was never written.
    pub fn cell(&self, sheet: &str, a1: &str) -> Option<String> {
        let cell: CellRef = a1.parse().ok()?;
        let grid = self.grid(sheet)?;
        Some(
            grid.get(cell.row)
                .and_then(|row| row.get(cell.column))
                .cloned()
                .unwrap_or_default(),
        )
    }

    /// Every call made so far, as `operation:target`.
    pub fn calls(&self) -> Vec<String> {
        self.with_state(|state| state.calls.clone())
    }

    pub fn count_calls(&self, operation: &str) -> usize {
        let prefix = format!("{operation}:");
        self.calls()
            .iter()
            .filter(|call| call.starts_with(&prefix))
            .count()
    }

    /// The next `count` calls fail with [`SheetError::RateLimited`].
    pub fn rate_limit_next(&self, count: usize) {
        self.with_state(|state| state.rate_limit_remaining = count);
    }

    /// The next `count` calls fail with [`SheetError::Transient`].
    pub fn fail_next(&self, count: usize) {
        self.with_state(|state| state.transient_remaining = count);
    }

    /// Writes of any kind to `target` are refused with
    /// [`SheetError::WriteRejected`].
    pub fn reject_writes_to(&self, target: &str) {
        self.with_state(|state| {
            state.rejected.insert(target.to_string());
        });
    }

    pub fn accept_writes_to(&self, target: &str) {
        self.with_state(|state| {
            state.rejected.remove(target);
        });
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> T {
        let mut guard = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

impl MemoryState {
    /// Records the call and applies any injected failure.
    fn begin(&mut self, operation: &str, target: &str) -> Result<(), SheetError> {
        self.calls.push(format!("{operation}:{target}"));
        if self.rate_limit_remaining > 0 {
            self.rate_limit_remaining -= 1;
            return Err(SheetError::RateLimited(format!("{operation} {target}")));
        }
        if self.transient_remaining > 0 {
            self.transient_remaining -= 1;
            return Err(SheetError::Transient(format!("{operation} {target}")));
        }
        if operation != "read" && self.rejected.contains(target) {
            return Err(SheetError::WriteRejected {
                document: target.to_string(),
                reason: "target is protected".to_string(),
            });
        }
        Ok(())
    }
}

impl SheetClient for MemoryWorkbook {
    fn read_grid(&self, source_id: &str, selector: Option<&str>) -> Result<Grid, SheetError> {
        self.with_state(|state| {
            state.begin("read", source_id)?;
            let grid = state
                .sheets
                .get(source_id)
                .ok_or_else(|| SheetError::SourceUnavailable {
                    source_id: source_id.to_string(),
                    reason: "no such sheet".to_string(),
                })?;
            select_range(source_id, grid, selector)
        })
    }

    fn write_table(&self, destination_id: &str, table: &Table) -> Result<(), SheetError> {
        self.with_state(|state| {
            state.begin("write_table", destination_id)?;
            state
                .sheets
                .insert(destination_id.to_string(), table_to_grid(table));
            Ok(())
        })
    }

    fn copy_template(&self, template_id: &str, new_id: &str) -> Result<(), SheetError> {
        self.with_state(|state| {
            state.begin("copy_template", new_id)?;
            let template = state
                .sheets
                .get(template_id)
                .cloned()
                .ok_or_else(|| SheetError::TemplateNotFound(template_id.to_string()))?;
            state.sheets.insert(new_id.to_string(), template);
            Ok(())
        })
    }

    fn write_cells(&self, document_id: &str, writes: &[CellWrite]) -> Result<(), SheetError> {
        self.with_state(|state| {
            state.begin("write_cells", document_id)?;
            let grid = state.sheets.get_mut(document_id).ok_or_else(|| {
                SheetError::WriteRejected {
                    document: document_id.to_string(),
                    reason: "document does not exist".to_string(),
                }
            })?;
            apply_cell_writes(grid, writes);
            Ok(())
        })
    }

    fn list_sheets(&self) -> Result<Vec<String>, SheetError> {
        self.with_state(|state| {
            state.begin("list", "*")?;
            Ok(state.sheets.keys().cloned().collect())
        })
    }
}
