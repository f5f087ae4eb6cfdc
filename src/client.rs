//! The tabular store as seen by the engine.
//!
//! Everything that touches the outside world goes through [`SheetClient`]:
//! reading source tables, writing the reconciled and status tables back,
//! instantiating document templates and filling their cells. Implementations
//! deal in raw string grids; the helpers at the bottom of this module turn
//! grids into [`Table`]s and apply positional writes.

use std::sync::Arc;

use crate::{
    cells::{CellRef, RangeRef},
    columns::{DuplicateHeaders, table_from_grid},
    data::Value,
    error::SheetError,
    normalize::HeaderStyle,
    table::Table,
};

pub type Grid = Vec<Vec<String>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellWrite {
    pub cell: CellRef,
    pub value: Value,
}

impl CellWrite {
    pub fn new(cell: CellRef, value: impl Into<Value>) -> Self {
        Self {
            cell,
            value: value.into(),
        }
    }
}

pub trait SheetClient: Send + Sync {
    /// Raw cells of `source_id`, restricted to the A1 `selector` when given.
    /// The first row is the header row.
    fn read_grid(&self, source_id: &str, selector: Option<&str>) -> Result<Grid, SheetError>;

    /// Replaces the contents of `destination_id` with `table`.
    fn write_table(&self, destination_id: &str, table: &Table) -> Result<(), SheetError>;

    /// Creates `new_id` from `template_id`. An existing `new_id` left behind
    /// by an interrupted run is replaced.
    fn copy_template(&self, template_id: &str, new_id: &str) -> Result<(), SheetError>;

    fn write_cells(&self, document_id: &str, writes: &[CellWrite]) -> Result<(), SheetError>;

    fn list_sheets(&self) -> Result<Vec<String>, SheetError>;

    /// Header row plus data rows as a table, with trimmed headers and
    /// repeated headers coalesced. An existing but empty sheet is an empty
    /// table.
    fn read_table(&self, source_id: &str, selector: Option<&str>) -> Result<Table, SheetError> {
        let grid = self.read_grid(source_id, selector)?;
        grid_to_table(
            source_id,
            &grid,
            HeaderStyle::Trimmed,
            DuplicateHeaders::Coalesce,
        )
    }
}

impl<C: SheetClient + ?Sized> SheetClient for Arc<C> {
    fn read_grid(&self, source_id: &str, selector: Option<&str>) -> Result<Grid, SheetError> {
        (**self).read_grid(source_id, selector)
    }

    fn write_table(&self, destination_id: &str, table: &Table) -> Result<(), SheetError> {
        (**self).write_table(destination_id, table)
    }

    fn copy_template(&self, template_id: &str, new_id: &str) -> Result<(), SheetError> {
        (**self).copy_template(template_id, new_id)
    }

    fn write_cells(&self, document_id: &str, writes: &[CellWrite]) -> Result<(), SheetError> {
        (**self).write_cells(document_id, writes)
    }

    fn list_sheets(&self) -> Result<Vec<String>, SheetError> {
        (**self).list_sheets()
    }
}

/// Cuts `selector` out of a full sheet grid.
pub fn select_range(
    source_id: &str,
    grid: &[Vec<String>],
    selector: Option<&str>,
) -> Result<Grid, SheetError> {
    let Some(selector) = selector else {
        return Ok(grid.to_vec());
    };
    let range: RangeRef = selector
        .parse()
        .map_err(|reason| SheetError::SourceUnavailable {
            source_id: source_id.to_string(),
            reason,
        })?;
    Ok(grid
        .iter()
        .enumerate()
        .filter(|(row, _)| range.contains_row(*row))
        .map(|(_, cells)| {
            cells
                .iter()
                .enumerate()
                .filter(|(column, _)| range.contains_column(*column))
                .map(|(_, cell)| cell.clone())
                .collect()
        })
        .collect())
}

pub fn grid_to_table(
    source_id: &str,
    grid: &[Vec<String>],
    style: HeaderStyle,
    duplicates: DuplicateHeaders,
) -> Result<Table, SheetError> {
    let unavailable = |reason: String| SheetError::SourceUnavailable {
        source_id: source_id.to_string(),
        reason,
    };
    let Some((header, rows)) = grid.split_first() else {
        return Table::new(source_id, Vec::new()).map_err(|err| unavailable(err.to_string()));
    };
    // trailing blank lines are layout, not records
    let last_filled = rows
        .iter()
        .rposition(|row| row.iter().any(|cell| !cell.trim().is_empty()))
        .map_or(0, |idx| idx + 1);
    table_from_grid(source_id, header, &rows[..last_filled], style, duplicates)
        .map_err(|err| unavailable(err.to_string()))
}

pub fn table_to_grid(table: &Table) -> Grid {
    let mut grid = Vec::with_capacity(table.len() + 1);
    grid.push(table.columns().to_vec());
    grid.extend(table.display_rows());
    grid
}

/// Writes each value at its position, growing the grid as needed. New rows
/// get one empty cell so they survive a round trip through a delimited file.
pub fn apply_cell_writes(grid: &mut Grid, writes: &[CellWrite]) {
    for write in writes {
        let CellRef { column, row } = write.cell;
        if grid.len() <= row {
            grid.resize_with(row + 1, || vec![String::new()]);
        }
        let cells = &mut grid[row];
        if cells.len() <= column {
            cells.resize(column + 1, String::new());
        }
        cells[column] = write.value.as_display();
    }
}
