use std::collections::{HashMap, HashSet};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    data::Value,
    error::ReconcileError,
    normalize::{JoinKey, KeyPolicy, join_key},
    table::Table,
};

pub const DEFAULT_SUFFIX: &str = "_right";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    Inner,
    #[default]
    Left,
}

#[derive(Debug, Clone)]
pub struct JoinSpec {
    pub left_key: String,
    pub right_key: String,
    pub policy: KeyPolicy,
    pub kind: JoinKind,
    pub suffix: String,
}

impl JoinSpec {
    pub fn left(key: &str, policy: KeyPolicy) -> Self {
        Self {
            left_key: key.to_string(),
            right_key: key.to_string(),
            policy,
            kind: JoinKind::Left,
            suffix: DEFAULT_SUFFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinStats {
    pub output_rows: usize,
    pub matched_rows: usize,
    pub unmatched_left: usize,
}

pub fn join(left: &Table, right: &Table, spec: &JoinSpec) -> Result<Table, ReconcileError> {
    join_with_stats(left, right, spec).map(|(table, _)| table)
}

/// Joins `right` onto `left`. A left record matching k right records yields k
/// output records; one with no match is kept (left join) with right-only
/// columns absent.
pub fn join_with_stats(
    left: &Table,
    right: &Table,
    spec: &JoinSpec,
) -> Result<(Table, JoinStats), ReconcileError> {
    let left_idx = left.require_column(&spec.left_key)?;
    let right_idx = right.require_column(&spec.right_key)?;

    let lookup = build_right_lookup(right, right_idx, spec.policy);
    let (headers, right_columns) =
        build_output_headers(left.columns(), right.columns(), right_idx, &spec.suffix);
    let mut output = Table::new(left.name(), headers)?;
    let mut stats = JoinStats::default();

    for row in left.rows() {
        let bucket = join_key(&row[left_idx], spec.policy).and_then(|key| lookup.get(&key));
        match bucket {
            Some(matches) => {
                for right_row in matches {
                    let mut combined = row.clone();
                    combined.extend(right_columns.iter().map(|idx| right.value(*right_row, *idx).clone()));
                    output.push_row(combined)?;
                    stats.matched_rows += 1;
                }
            }
            None => {
                stats.unmatched_left += 1;
                if spec.kind == JoinKind::Left {
                    let mut combined = row.clone();
                    combined.extend(right_columns.iter().map(|_| Value::Absent));
                    output.push_row(combined)?;
                }
            }
        }
    }

    stats.output_rows = output.len();
    debug!(
        "Joined '{}' with '{}' on {}={}: {} output row(s), {} matched, {} unmatched",
        left.name(),
        right.name(),
        spec.left_key,
        spec.right_key,
        stats.output_rows,
        stats.matched_rows,
        stats.unmatched_left
    );
    Ok((output, stats))
}

/// Right row indices per key, in right-table order. Rows with a blank key
/// cannot be matched and are left out.
fn build_right_lookup(
    right: &Table,
    key_idx: usize,
    policy: KeyPolicy,
) -> HashMap<JoinKey, Vec<usize>> {
    let mut map: HashMap<JoinKey, Vec<usize>> = HashMap::new();
    for (row_idx, row) in right.rows().iter().enumerate() {
        if let Some(key) = join_key(&row[key_idx], policy) {
            map.entry(key).or_default().push(row_idx);
        }
    }
    map
}

fn build_output_headers(
    left_headers: &[String],
    right_headers: &[String],
    right_key_idx: usize,
    suffix: &str,
) -> (Vec<String>, Vec<usize>) {
    let mut headers = left_headers.to_vec();
    let mut seen: HashSet<String> = headers.iter().cloned().collect();
    let mut right_columns = Vec::new();

    for (idx, name) in right_headers.iter().enumerate() {
        if idx == right_key_idx {
            continue;
        }
        let mut candidate = name.clone();
        if seen.contains(&candidate) {
            candidate = format!("{name}{suffix}");
            let mut counter = 2usize;
            while seen.contains(&candidate) {
                candidate = format!("{name}{suffix}_{counter}");
                counter += 1;
            }
        }
        seen.insert(candidate.clone());
        headers.push(candidate);
        right_columns.push(idx);
    }

    (headers, right_columns)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_headers_suffix_collisions_deterministically() {
        let left = vec!["trip_id".to_string(), "type".to_string(), "type_sf".to_string()];
        let right = vec!["trip_id".to_string(), "type".to_string(), "amount".to_string()];
        let (headers, right_columns) = build_output_headers(&left, &right, 0, "_sf");
        assert_eq!(headers, vec!["trip_id", "type", "type_sf", "type_sf_2", "amount"]);
        assert_eq!(right_columns, vec![1, 2]);
    }

    #[test]
    fn blank_left_keys_never_match_blank_right_keys() {
        let left = Table::from_strings("l", &["k", "a"], &[vec!["N/A", "1"]]).unwrap();
        let right = Table::from_strings("r", &["k", "b"], &[vec!["n/a", "x"]]).unwrap();
        let (joined, stats) =
            join_with_stats(&left, &right, &JoinSpec::left("k", KeyPolicy::Compact)).unwrap();
        assert_eq!(joined.len(), 1);
        assert_eq!(stats.unmatched_left, 1);
        assert!(joined.value(0, 2).is_absent());
    }

    #[test]
    fn inner_join_drops_unmatched_left_rows() {
        let left = Table::from_strings("l", &["k"], &[vec!["a"], vec!["b"]]).unwrap();
        let right = Table::from_strings("r", &["k", "v"], &[vec!["A ", "1"]]).unwrap();
        let mut spec = JoinSpec::left("k", KeyPolicy::Compact);
        spec.kind = JoinKind::Inner;
        let joined = join(&left, &right, &spec).unwrap();
        assert_eq!(joined.len(), 1);
        assert_eq!(joined.value(0, 1), &Value::text("1"));
    }
}
