//! Which groups already have a document.
//!
//! [`StatusColumnTracker`] keeps the ledger in a sheet: every member row of a
//! finished group carries the done marker in the status column (and, when
//! configured, the document identifier). Member rows are found in the raw
//! cells of the sheet and only their status and identifier cells are
//! written, after each group, so the rest of the sheet stays as it was and an
//! interrupted run loses at most the group it was working on.

use std::{
    collections::{HashMap, HashSet},
    ops::Range,
};

use log::{debug, info, warn};

use crate::{
    cells::{CellRef, RangeRef},
    client::{CellWrite, Grid, SheetClient},
    data::Value,
    error::{ReconcileError, SheetError},
    normalize::{HeaderStyle, JoinKey, KeyPolicy, join_key, normalize, normalize_header},
};

pub const DEFAULT_DONE_MARKER: &str = "Done";

pub trait CompletionTracker {
    fn is_done(&self, key: &JoinKey) -> bool;

    /// Records `key` as finished under `identifier`.
    fn mark_done(&mut self, key: &JoinKey, identifier: &str) -> Result<(), SheetError>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryTracker {
    done: HashSet<JoinKey>,
    identifiers: HashMap<JoinKey, String>,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identifier(&self, key: &JoinKey) -> Option<&str> {
        self.identifiers.get(key).map(String::as_str)
    }
}

impl CompletionTracker for MemoryTracker {
    fn is_done(&self, key: &JoinKey) -> bool {
        self.done.contains(key)
    }

    fn mark_done(&mut self, key: &JoinKey, identifier: &str) -> Result<(), SheetError> {
        self.done.insert(key.clone());
        self.identifiers.insert(key.clone(), identifier.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusColumns {
    pub status: String,
    pub done_marker: String,
    /// Column that receives the document identifier, e.g. `CN Number`.
    pub identifier: Option<String>,
}

impl StatusColumns {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            done_marker: DEFAULT_DONE_MARKER.to_string(),
            identifier: None,
        }
    }
}

/// Where the ledger rows sit in the raw sheet and how their key cells turn
/// into group keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerLayout {
    pub sheet: String,
    /// Group column as named after ingestion.
    pub key_column: String,
    pub policy: KeyPolicy,
    /// Block the source was read from; the header is its first row.
    pub range: Option<RangeRef>,
    pub header_style: HeaderStyle,
    pub renames: Vec<(String, String)>,
    /// Rewrites the key cells went through at ingestion, in order.
    pub key_rewrites: Vec<KeyPolicy>,
}

impl LedgerLayout {
    pub fn new(sheet: impl Into<String>, key_column: impl Into<String>, policy: KeyPolicy) -> Self {
        Self {
            sheet: sheet.into(),
            key_column: key_column.into(),
            policy,
            range: None,
            header_style: HeaderStyle::Trimmed,
            renames: Vec::new(),
            key_rewrites: Vec::new(),
        }
    }

    fn header_row(&self) -> usize {
        self.range.map_or(0, |range| range.start_row)
    }

    fn member_rows(&self, grid: &Grid) -> Range<usize> {
        let end = self
            .range
            .and_then(|range| range.end_row)
            .map_or(grid.len(), |last| (last + 1).min(grid.len()));
        (self.header_row() + 1).min(end)..end
    }

    /// The name ingestion gives the raw header `raw`.
    fn ingested_name(&self, raw: &str) -> String {
        let styled = normalize_header(raw, self.header_style);
        self.renames
            .iter()
            .find(|(from, _)| *from == styled)
            .map_or(styled, |(_, to)| to.clone())
    }

    fn names(&self, raw: &str, name: &str) -> bool {
        raw.trim() == name.trim() || self.ingested_name(raw) == name
    }

    fn key_of(&self, cell: &str) -> Option<JoinKey> {
        let mut value = Value::from_cell(cell);
        for policy in &self.key_rewrites {
            value = Value::from_cell(&normalize(&value.as_display(), *policy));
        }
        join_key(&value, self.policy)
    }

    fn locate(&self, grid: &Grid, columns: &StatusColumns) -> Result<Located, String> {
        let header = grid
            .get(self.header_row())
            .map(Vec::as_slice)
            .unwrap_or_default();
        let key = header
            .iter()
            .enumerate()
            .filter(|(idx, raw)| {
                self.range.is_none_or(|range| range.contains_column(*idx))
                    && self.ingested_name(raw) == self.key_column
            })
            .map(|(idx, _)| idx)
            .collect::<Vec<_>>();
        if key.is_empty() {
            return Err(format!(
                "no '{}' column in row {} of '{}'",
                self.key_column,
                self.header_row() + 1,
                self.sheet
            ));
        }
        let find = |name: &str| header.iter().position(|raw| self.names(raw, name));
        Ok(Located {
            key,
            status: find(&columns.status),
            identifier: columns.identifier.as_deref().and_then(find),
            width: grid.iter().map(Vec::len).max().unwrap_or(0),
        })
    }

    /// Group key of a raw row; duplicate key columns give the first
    /// non-blank cell.
    fn row_key(&self, row: &[String], key_columns: &[usize]) -> Option<JoinKey> {
        key_columns
            .iter()
            .filter_map(|idx| row.get(*idx))
            .find(|cell| !Value::from_cell(cell).is_blank())
            .and_then(|cell| self.key_of(cell))
    }
}

struct Located {
    key: Vec<usize>,
    status: Option<usize>,
    identifier: Option<usize>,
    width: usize,
}

pub struct StatusColumnTracker<'c> {
    client: &'c dyn SheetClient,
    layout: LedgerLayout,
    columns: StatusColumns,
    done: HashSet<JoinKey>,
}

impl<'c> StatusColumnTracker<'c> {
    /// Reads the ledger sheet and collects the groups already marked done.
    pub fn new(
        client: &'c dyn SheetClient,
        layout: LedgerLayout,
        columns: StatusColumns,
    ) -> Result<Self, ReconcileError> {
        let grid = client
            .read_grid(&layout.sheet, None)
            .map_err(|err| ReconcileError::SourceUnavailable(layout.sheet.clone(), err))?;
        let located = layout
            .locate(&grid, &columns)
            .map_err(|_| ReconcileError::key_missing(&layout.sheet, &layout.key_column))?;

        let mut done = HashSet::new();
        if let Some(status) = located.status {
            let mut seen: HashMap<JoinKey, Vec<bool>> = HashMap::new();
            for row in &grid[layout.member_rows(&grid)] {
                let Some(key) = layout.row_key(row, &located.key) else {
                    continue;
                };
                let marked = row
                    .get(status)
                    .is_some_and(|cell| cell.trim().eq_ignore_ascii_case(&columns.done_marker));
                seen.entry(key).or_default().push(marked);
            }
            for (key, marks) in seen {
                if marks.iter().any(|marked| *marked) {
                    let unmarked = marks.iter().filter(|marked| !**marked).count();
                    if unmarked > 0 {
                        warn!(
                            "Group '{key}' is marked done but {unmarked} row(s) are not; treating the group as done"
                        );
                    }
                    done.insert(key);
                }
            }
        }
        info!(
            "{} group(s) already marked '{}' in '{}'",
            done.len(),
            columns.done_marker,
            layout.sheet
        );

        Ok(Self {
            client,
            layout,
            columns,
            done,
        })
    }
}

impl CompletionTracker for StatusColumnTracker<'_> {
    fn is_done(&self, key: &JoinKey) -> bool {
        self.done.contains(key)
    }

    fn mark_done(&mut self, key: &JoinKey, identifier: &str) -> Result<(), SheetError> {
        let sheet = &self.layout.sheet;
        let grid = self.client.read_grid(sheet, None)?;
        let located = self
            .layout
            .locate(&grid, &self.columns)
            .map_err(|reason| SheetError::SourceUnavailable {
                source_id: sheet.clone(),
                reason,
            })?;
        let members = self
            .layout
            .member_rows(&grid)
            .filter(|row| self.layout.row_key(&grid[*row], &located.key).as_ref() == Some(key))
            .collect::<Vec<_>>();
        if members.is_empty() {
            return Err(SheetError::WriteRejected {
                document: sheet.clone(),
                reason: format!("no rows for group '{key}'"),
            });
        }

        let header_row = self.layout.header_row();
        let mut writes = Vec::new();
        let mut next_column = located.width;
        let mut column_for = |found: Option<usize>, name: &str, writes: &mut Vec<CellWrite>| {
            found.unwrap_or_else(|| {
                let column = next_column;
                next_column += 1;
                writes.push(CellWrite::new(CellRef::new(column, header_row), name));
                column
            })
        };
        let status = column_for(located.status, &self.columns.status, &mut writes);
        let identifier_column = self
            .columns
            .identifier
            .as_deref()
            .map(|name| column_for(located.identifier, name, &mut writes));
        for row in &members {
            writes.push(CellWrite::new(
                CellRef::new(status, *row),
                self.columns.done_marker.as_str(),
            ));
            if let Some(column) = identifier_column {
                writes.push(CellWrite::new(CellRef::new(column, *row), identifier));
            }
        }
        debug!("Marking '{key}' with {} cell write(s)", writes.len());
        self.client.write_cells(sheet, &writes)?;

        self.done.insert(key.clone());
        info!(
            "Marked {} row(s) of '{key}' as '{}' in '{}'",
            members.len(),
            self.columns.done_marker,
            self.layout.sheet
        );
        Ok(())
    }
}
