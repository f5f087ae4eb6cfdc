//! Column shaping: header cleanup at ingestion, renames, projections and
//! concatenated columns.

use std::collections::HashMap;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    data::Value,
    error::ReconcileError,
    normalize::{HeaderStyle, KeyPolicy, normalize, normalize_header},
    table::Table,
};

/// What to do when a sheet carries the same header more than once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateHeaders {
    /// Merge into the first occurrence, keeping the first non-blank value per row.
    #[default]
    Coalesce,
    /// Keep every occurrence, renaming later ones `name.1`, `name.2`, ...
    Suffix,
    /// Fail with [`ReconcileError::DuplicateColumn`].
    Reject,
}

/// Turns a raw header row plus data rows into a [`Table`]. Short rows are
/// padded with absent cells and blank headers get positional names.
pub fn table_from_grid(
    name: &str,
    header: &[String],
    rows: &[Vec<String>],
    style: HeaderStyle,
    duplicates: DuplicateHeaders,
) -> Result<Table, ReconcileError> {
    let width = rows.iter().map(Vec::len).fold(header.len(), usize::max);
    let headers = (0..width)
        .map(|idx| {
            let raw = header.get(idx).map(String::as_str).unwrap_or("");
            let normalized = normalize_header(raw, style);
            if normalized.trim().is_empty() {
                format!("column_{}", idx + 1)
            } else {
                normalized
            }
        })
        .collect::<Vec<_>>();

    // target column for each source position
    let mut targets = Vec::with_capacity(width);
    let mut output_columns: Vec<String> = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();
    for header in &headers {
        match seen.get(header) {
            Some(&existing) => match duplicates {
                DuplicateHeaders::Coalesce => targets.push(existing),
                DuplicateHeaders::Reject => {
                    return Err(ReconcileError::DuplicateColumn(header.clone()));
                }
                DuplicateHeaders::Suffix => {
                    let mut counter = 1usize;
                    let mut candidate = format!("{header}.{counter}");
                    while seen.contains_key(&candidate) {
                        counter += 1;
                        candidate = format!("{header}.{counter}");
                    }
                    seen.insert(candidate.clone(), output_columns.len());
                    targets.push(output_columns.len());
                    output_columns.push(candidate);
                }
            },
            None => {
                seen.insert(header.clone(), output_columns.len());
                targets.push(output_columns.len());
                output_columns.push(header.clone());
            }
        }
    }
    if output_columns.len() < headers.len() {
        debug!(
            "Coalesced {} duplicate header(s) in '{name}'",
            headers.len() - output_columns.len()
        );
    }

    let mut table = Table::new(name, output_columns)?;
    let column_count = table.columns().len();
    for raw in rows {
        let mut values = vec![Value::Absent; column_count];
        for (position, target) in targets.iter().enumerate() {
            let cell = Value::from_cell(raw.get(position).map(String::as_str).unwrap_or(""));
            if values[*target].is_blank() && !cell.is_absent() {
                values[*target] = cell;
            }
        }
        table.push_row(values)?;
    }
    Ok(table)
}

/// Renames columns; names not present in the table are ignored.
pub fn rename_columns(table: &Table, renames: &[(String, String)]) -> Result<Table, ReconcileError> {
    let lookup: HashMap<&str, &str> = renames
        .iter()
        .map(|(from, to)| (from.as_str(), to.as_str()))
        .collect();
    for (from, _) in renames {
        if table.column_index(from).is_none() {
            debug!("Rename source '{from}' not present in '{}'", table.name());
        }
    }
    let columns = table
        .columns()
        .iter()
        .map(|c| lookup.get(c.as_str()).map_or_else(|| c.clone(), |to| to.to_string()))
        .collect();
    rebuild(table, columns, (0..table.columns().len()).collect())
}

/// Keeps only `columns`, in the given order.
pub fn select_columns(table: &Table, columns: &[String]) -> Result<Table, ReconcileError> {
    let indices = columns
        .iter()
        .map(|name| table.require_column(name))
        .collect::<Result<Vec<_>, _>>()?;
    rebuild(table, columns.to_vec(), indices)
}

/// Drops columns that are blank on every row.
pub fn drop_empty_columns(table: &Table) -> Result<Table, ReconcileError> {
    let keep = (0..table.columns().len())
        .filter(|idx| table.rows().iter().any(|row| !row[*idx].is_blank()))
        .collect::<Vec<_>>();
    let columns = keep.iter().map(|idx| table.columns()[*idx].clone()).collect();
    rebuild(table, columns, keep)
}

/// Adds (or overwrites) `name` with the non-blank values of `sources` joined
/// by `separator`; absent when every part is blank.
pub fn concat_column(
    table: &Table,
    name: &str,
    sources: &[String],
    separator: &str,
) -> Result<Table, ReconcileError> {
    let indices = sources
        .iter()
        .map(|source| table.require_column(source))
        .collect::<Result<Vec<_>, _>>()?;
    let mut output = table.clone();
    let target = output.ensure_column(name);
    for row in 0..table.len() {
        let parts = indices
            .iter()
            .map(|idx| table.value(row, *idx))
            .filter(|value| !value.is_blank())
            .map(|value| value.as_display().trim().to_string())
            .collect::<Vec<_>>();
        let value = if parts.is_empty() {
            Value::Absent
        } else {
            Value::Text(parts.join(separator))
        };
        output.set_value(row, target, value);
    }
    Ok(output)
}

/// Rewrites `column` in place with its normalized key form; placeholders
/// become absent.
pub fn normalize_column(
    table: &Table,
    column: &str,
    policy: KeyPolicy,
) -> Result<Table, ReconcileError> {
    let idx = table.require_column(column)?;
    let mut output = table.clone();
    for row in 0..table.len() {
        let normalized = normalize(&table.value(row, idx).as_display(), policy);
        output.set_value(row, idx, Value::from_cell(&normalized));
    }
    Ok(output)
}

fn rebuild(table: &Table, columns: Vec<String>, indices: Vec<usize>) -> Result<Table, ReconcileError> {
    let mut output = Table::new(table.name(), columns)?;
    for row in table.rows() {
        output.push_row(indices.iter().map(|idx| row[*idx].clone()).collect())?;
    }
    Ok(output)
}
