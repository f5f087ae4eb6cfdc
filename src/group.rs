//! Partitioning a table into document groups.
//!
//! Groups come out in first-appearance order of their key. A group is only
//! rendered when its required column is non-blank on every member; anything
//! else is reported and skipped as a whole.

use std::collections::HashMap;

use crate::{
    data::Value,
    error::ReconcileError,
    normalize::{JoinKey, KeyPolicy, join_key},
    table::{RecordView, Table},
};

#[derive(Debug, Clone)]
pub struct DocumentGroup<'a> {
    key: JoinKey,
    label: String,
    table: &'a Table,
    rows: Vec<usize>,
}

/// Why a group was not rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncompleteGroup {
    pub column: String,
    /// Zero-based table rows whose required cell is blank.
    pub missing_rows: Vec<usize>,
}

impl<'a> DocumentGroup<'a> {
    pub fn key(&self) -> &JoinKey {
        &self.key
    }

    /// Grouping value as it appeared on the first member.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row_indices(&self) -> &[usize] {
        &self.rows
    }

    pub fn first(&self) -> RecordView<'a> {
        self.table.record(self.rows[0])
    }

    pub fn members(&self) -> impl Iterator<Item = RecordView<'a>> + '_ {
        self.rows.iter().map(|row| self.table.record(*row))
    }

    pub fn check_complete(&self, required: &str) -> Result<(), IncompleteGroup> {
        let missing_rows = self
            .members()
            .filter(|record| record.get(required).is_none_or(Value::is_blank))
            .map(|record| record.index())
            .collect::<Vec<_>>();
        if missing_rows.is_empty() {
            Ok(())
        } else {
            Err(IncompleteGroup {
                column: required.to_string(),
                missing_rows,
            })
        }
    }
}

#[derive(Debug, Clone)]
pub struct Grouping<'a> {
    pub groups: Vec<DocumentGroup<'a>>,
    /// Rows whose grouping cell is blank.
    pub ungrouped: Vec<usize>,
}

pub fn group<'a>(
    table: &'a Table,
    key_column: &str,
    policy: KeyPolicy,
) -> Result<Grouping<'a>, ReconcileError> {
    let key_idx = table.require_column(key_column)?;
    let mut positions: HashMap<JoinKey, usize> = HashMap::new();
    let mut groups: Vec<DocumentGroup<'a>> = Vec::new();
    let mut ungrouped = Vec::new();

    for (row_idx, row) in table.rows().iter().enumerate() {
        let Some(key) = join_key(&row[key_idx], policy) else {
            ungrouped.push(row_idx);
            continue;
        };
        match positions.get(&key) {
            Some(&position) => groups[position].rows.push(row_idx),
            None => {
                positions.insert(key.clone(), groups.len());
                groups.push(DocumentGroup {
                    key,
                    label: row[key_idx].as_display().trim().to_string(),
                    table,
                    rows: vec![row_idx],
                });
            }
        }
    }

    Ok(Grouping { groups, ungrouped })
}
