use std::collections::HashSet;

use crate::{data::Value, error::ReconcileError, table::Table};

/// Keeps the first record for every distinct tuple of `key_columns`; later
/// duplicates are dropped without error.
pub fn dedupe(table: &Table, key_columns: &[String]) -> Result<Table, ReconcileError> {
    dedupe_with_count(table, key_columns).map(|(table, _)| table)
}

/// Same as [`dedupe`], also returning how many records were removed.
pub fn dedupe_with_count(
    table: &Table,
    key_columns: &[String],
) -> Result<(Table, usize), ReconcileError> {
    let indices = key_columns
        .iter()
        .map(|name| table.require_column(name))
        .collect::<Result<Vec<_>, _>>()?;
    let mut seen: HashSet<Vec<&Value>> = HashSet::with_capacity(table.len());
    let mut output = table.empty_like();
    let mut dropped = 0usize;
    for row in table.rows() {
        let key = indices.iter().map(|idx| &row[*idx]).collect::<Vec<_>>();
        if seen.insert(key) {
            output.push_row(row.clone())?;
        } else {
            dropped += 1;
        }
    }
    Ok((output, dropped))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_first_occurrence_in_order() {
        let table = Table::from_strings(
            "DB",
            &["trip_id", "invoice", "note"],
            &[
                vec!["t1", "INV-1", "first"],
                vec!["t2", "INV-1", "other trip"],
                vec!["t1", "INV-1", "second"],
                vec!["t1", "", "blank a"],
                vec!["t1", "", "blank b"],
            ],
        )
        .unwrap();
        let keys = vec!["trip_id".to_string(), "invoice".to_string()];
        let (deduped, dropped) = dedupe_with_count(&table, &keys).unwrap();
        assert_eq!(dropped, 2);
        let notes = deduped
            .rows()
            .iter()
            .map(|row| row[2].as_display())
            .collect::<Vec<_>>();
        assert_eq!(notes, vec!["first", "other trip", "blank a"]);
    }

    #[test]
    fn missing_key_column_fails() {
        let table = Table::from_strings("DB", &["a"], &[vec!["1"]]).unwrap();
        assert!(dedupe(&table, &["b".to_string()]).is_err());
    }
}
