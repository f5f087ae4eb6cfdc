//! Row expansion for comma-packed cells and repeated column blocks.
//!
//! A cell such as `INV-1, INV-2` turns its record into one record per token,
//! every other column copied verbatim. [`unpivot`] does the same for forms
//! that repeat a group of columns (`Quantity`, `Quantity.1`, ...): each
//! filled block becomes a record of its own under the base names.

use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    data::Value,
    error::ReconcileError,
    normalize::{KeyPolicy, normalize},
    table::Table,
};

pub const DEFAULT_SEPARATOR: &str = r"[,\s]+";

/// What follows a base name in a repeated column: `.1`, `.2`, ...
pub const DEFAULT_BLOCK_SUFFIX: &str = r"\.(\d+)";

/// Treatment of records whose target cell is blank (`""`, `N/A`, `none`, ...).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyPolicy {
    #[default]
    Keep,
    Drop,
}

#[derive(Debug, Clone)]
pub struct ExpansionSpec {
    pub column: String,
    pub separator: Regex,
    pub empty: EmptyPolicy,
}

impl ExpansionSpec {
    pub fn new(column: &str, pattern: &str, empty: EmptyPolicy) -> Result<Self, ReconcileError> {
        let separator = Regex::new(pattern).map_err(|err| ReconcileError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: err.to_string(),
        })?;
        Ok(Self {
            column: column.to_string(),
            separator,
            empty,
        })
    }

    pub fn tokens<'a>(&self, raw: &'a str) -> Vec<&'a str> {
        self.separator
            .split(raw)
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .collect()
    }
}

pub fn expand(table: &Table, spec: &ExpansionSpec) -> Result<Table, ReconcileError> {
    let column = table.require_column(&spec.column)?;
    let mut output = table.empty_like();
    for row in table.rows() {
        let value = &row[column];
        if value.is_blank() {
            if spec.empty == EmptyPolicy::Keep {
                output.push_row(row.clone())?;
            }
            continue;
        }
        let raw = value.as_display();
        let tokens = spec.tokens(&raw);
        if tokens.len() < 2 {
            output.push_row(row.clone())?;
            continue;
        }
        for token in tokens {
            let mut expanded = row.clone();
            expanded[column] = token.into();
            output.push_row(expanded)?;
        }
    }
    Ok(output)
}

/// Extra blocks are read only from records whose `column` equals `equals`
/// after whitespace and case normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnpivotGuard {
    pub column: String,
    pub equals: String,
}

impl UnpivotGuard {
    fn holds(&self, value: &Value) -> bool {
        normalize(&value.as_display(), KeyPolicy::Collapse)
            == normalize(&self.equals, KeyPolicy::Collapse)
    }
}

#[derive(Debug, Clone)]
pub struct UnpivotSpec {
    /// Base names of the repeated columns.
    pub columns: Vec<String>,
    /// Matches the whole remainder after a base name. Capture group 1, when
    /// present, labels the block.
    pub suffix: Regex,
    pub when: Option<UnpivotGuard>,
}

/// One repeated block: its label and, per base column, where its copy sits.
type Block = (String, Vec<Option<usize>>);

impl UnpivotSpec {
    pub fn new(
        columns: &[String],
        suffix: &str,
        when: Option<UnpivotGuard>,
    ) -> Result<Self, ReconcileError> {
        if columns.is_empty() {
            return Err(ReconcileError::Config(
                "unpivot needs at least one column".to_string(),
            ));
        }
        let anchored = Regex::new(&format!("^(?:{suffix})$")).map_err(|err| {
            ReconcileError::InvalidPattern {
                pattern: suffix.to_string(),
                reason: err.to_string(),
            }
        })?;
        Ok(Self {
            columns: columns.to_vec(),
            suffix: anchored,
            when,
        })
    }

    fn blocks(&self, table: &Table) -> Vec<Block> {
        let mut blocks: Vec<Block> = Vec::new();
        for (idx, name) in table.columns().iter().enumerate() {
            for (slot, base) in self.columns.iter().enumerate() {
                let Some(rest) = name.strip_prefix(base.as_str()) else {
                    continue;
                };
                if rest.is_empty() {
                    continue;
                }
                let Some(captures) = self.suffix.captures(rest) else {
                    continue;
                };
                let label = captures
                    .get(1)
                    .or_else(|| captures.get(0))
                    .map_or(rest, |found| found.as_str());
                let position = match blocks.iter().position(|(known, _)| known == label) {
                    Some(position) => position,
                    None => {
                        blocks.push((label.to_string(), vec![None; self.columns.len()]));
                        blocks.len() - 1
                    }
                };
                blocks[position].1[slot] = Some(idx);
                break;
            }
        }
        blocks
    }
}

/// Folds repeated column blocks into extra records. The block columns are
/// dropped; every record keeps its base values, and each block with at least
/// one non-blank cell adds a copy of the record carrying the block's values
/// under the base names.
pub fn unpivot(table: &Table, spec: &UnpivotSpec) -> Result<Table, ReconcileError> {
    let bases = spec
        .columns
        .iter()
        .map(|column| table.require_column(column))
        .collect::<Result<Vec<_>, _>>()?;
    let guard = spec
        .when
        .as_ref()
        .map(|when| table.require_column(&when.column).map(|idx| (idx, when)))
        .transpose()?;
    let blocks = spec.blocks(table);
    debug!(
        "Found {} repeated block(s) of {:?} in '{}'",
        blocks.len(),
        spec.columns,
        table.name()
    );

    let folded = blocks
        .iter()
        .flat_map(|(_, positions)| positions.iter().flatten().copied())
        .collect::<Vec<_>>();
    let kept = (0..table.columns().len())
        .filter(|idx| !folded.contains(idx))
        .collect::<Vec<_>>();
    let mut output = Table::new(
        table.name(),
        kept.iter().map(|idx| table.columns()[*idx].clone()).collect(),
    )?;
    // base column positions in the output
    let targets = bases
        .iter()
        .filter_map(|base| kept.iter().position(|idx| idx == base))
        .collect::<Vec<_>>();

    for row in table.rows() {
        let record = kept.iter().map(|idx| row[*idx].clone()).collect::<Vec<_>>();
        let extra = guard.is_none_or(|(idx, when)| when.holds(&row[idx]));
        output.push_row(record.clone())?;
        if !extra {
            continue;
        }
        for (_, positions) in &blocks {
            let values = positions
                .iter()
                .map(|position| position.map_or(Value::Absent, |idx| row[idx].clone()))
                .collect::<Vec<_>>();
            if values.iter().all(Value::is_blank) {
                continue;
            }
            let mut unfolded = record.clone();
            for (target, value) in targets.iter().zip(values) {
                unfolded[*target] = value;
            }
            output.push_row(unfolded)?;
        }
    }
    Ok(output)
}
