//! YAML job configuration.
//!
//! A job file names the reconcile pipelines to run and the document runs to
//! perform, plus the client retry policy and where sequence counters live.
//! See `docs/jobs.example.yaml` for a complete file.

use std::{collections::BTreeMap, fs::File, io::BufReader, path::Path};

use anyhow::{Context, Result};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    cells::RangeRef,
    columns::DuplicateHeaders,
    derive::{AmountSource, TaxRule},
    error::ReconcileError,
    expand::{
        DEFAULT_BLOCK_SUFFIX, DEFAULT_SEPARATOR, EmptyPolicy, ExpansionSpec, UnpivotGuard,
        UnpivotSpec,
    },
    join::{DEFAULT_SUFFIX, JoinKind},
    mapping::{CellMapping, ComputedField, MappingEntry},
    normalize::{HeaderStyle, KeyPolicy, normalize_header},
    retry::RetryPolicy,
    table::Table,
    tracker::{DEFAULT_DONE_MARKER, LedgerLayout, StatusColumns},
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Sheet holding `prefix,next` rows; counters are not persisted when unset.
    #[serde(default)]
    pub counters: Option<String>,
    #[serde(default)]
    pub reconcile: Vec<ReconcileJob>,
    #[serde(default)]
    pub documents: Vec<DocumentJob>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub sheet: String,
    /// A1 selector such as `A:AI` or `A2:F`.
    #[serde(default)]
    pub range: Option<String>,
    #[serde(default)]
    pub header_style: HeaderStyle,
    #[serde(default)]
    pub duplicates: DuplicateHeaders,
    /// Applied after header styling.
    #[serde(default)]
    pub rename: BTreeMap<String, String>,
    /// Repeated column blocks folded into extra records, before renaming.
    #[serde(default)]
    pub unpivot: Option<UnpivotConfig>,
    /// Columns rewritten to their normalized key form after renaming.
    #[serde(default)]
    pub normalize: Vec<NormalizeConfig>,
    #[serde(default)]
    pub drop_empty_columns: bool,
}

impl SourceConfig {
    pub fn renames(&self) -> Vec<(String, String)> {
        self.rename
            .iter()
            .map(|(from, to)| (from.clone(), to.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NormalizeConfig {
    pub column: String,
    #[serde(default)]
    pub policy: KeyPolicy,
}

fn default_block_suffix() -> String {
    DEFAULT_BLOCK_SUFFIX.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnpivotConfig {
    /// Base names of the repeated columns, as styled at ingestion.
    pub columns: Vec<String>,
    /// Regex for what follows a base name in a repeated column.
    #[serde(default = "default_block_suffix")]
    pub suffix: String,
    #[serde(default)]
    pub when: Option<UnpivotGuard>,
}

impl UnpivotConfig {
    pub fn spec(&self) -> Result<UnpivotSpec, ReconcileError> {
        UnpivotSpec::new(&self.columns, &self.suffix, self.when.clone())
    }
}

fn default_suffix() -> String {
    DEFAULT_SUFFIX.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JoinConfig {
    pub source: SourceConfig,
    pub left_key: String,
    /// Defaults to `left_key`.
    #[serde(default)]
    pub right_key: Option<String>,
    #[serde(default)]
    pub policy: KeyPolicy,
    #[serde(default)]
    pub kind: JoinKind,
    #[serde(default = "default_suffix")]
    pub suffix: String,
    /// Right-hand columns to bring over; all when empty. The key is always kept.
    #[serde(default)]
    pub select: Vec<String>,
    /// Deduplicate the right table on these columns before joining.
    #[serde(default)]
    pub dedupe_right: Vec<String>,
}

impl JoinConfig {
    pub fn right_key(&self) -> &str {
        self.right_key.as_deref().unwrap_or(&self.left_key)
    }
}

fn default_concat_separator() -> String {
    " ".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConcatConfig {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default = "default_concat_separator")]
    pub separator: String,
}

fn default_pattern() -> String {
    DEFAULT_SEPARATOR.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExpandConfig {
    pub column: String,
    #[serde(default = "default_pattern")]
    pub pattern: String,
    #[serde(default)]
    pub empty: EmptyPolicy,
}

impl ExpandConfig {
    pub fn spec(&self) -> Result<ExpansionSpec, ReconcileError> {
        ExpansionSpec::new(&self.column, &self.pattern, self.empty)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconcileJob {
    pub name: String,
    pub source: SourceConfig,
    #[serde(default)]
    pub joins: Vec<JoinConfig>,
    #[serde(default)]
    pub concat: Vec<ConcatConfig>,
    #[serde(default)]
    pub expand: Vec<ExpandConfig>,
    /// Keep-first on this column tuple after expansion.
    #[serde(default)]
    pub dedupe: Vec<String>,
    /// Output projection; all columns when empty.
    #[serde(default)]
    pub columns: Vec<String>,
    pub output: String,
    #[serde(default)]
    pub preserve: Option<PreserveConfig>,
}

/// Columns carried over from the previous contents of the output sheet onto
/// rows with the same key. Filled in from the status columns of a document
/// job that marks the output, unless given explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PreserveConfig {
    pub key: String,
    #[serde(default)]
    pub policy: KeyPolicy,
    pub columns: Vec<String>,
    /// Header style `key` and `columns` are written in.
    #[serde(default)]
    pub header_style: HeaderStyle,
}

impl PreserveConfig {
    /// Position of `name` in `table`, by exact or styled header.
    pub fn find(&self, table: &Table, name: &str) -> Option<usize> {
        table.column_index(name).or_else(|| {
            table
                .columns()
                .iter()
                .position(|column| normalize_header(column, self.header_style) == name)
        })
    }
}

fn default_width() -> usize {
    6
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SequenceConfig {
    pub prefix: String,
    pub start: u64,
    #[serde(default = "default_width")]
    pub width: usize,
}

fn default_done_marker() -> String {
    DEFAULT_DONE_MARKER.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatusConfig {
    pub column: String,
    #[serde(default = "default_done_marker")]
    pub done: String,
    #[serde(default)]
    pub identifier_column: Option<String>,
    /// Sheet holding the marks; defaults to the document source. Its rows are
    /// matched to groups through the source's header and key rewrites.
    #[serde(default)]
    pub sheet: Option<String>,
}

impl StatusConfig {
    pub fn columns(&self) -> StatusColumns {
        StatusColumns {
            status: self.column.clone(),
            done_marker: self.done.clone(),
            identifier: self.identifier_column.clone(),
        }
    }
}

fn default_document_name() -> String {
    "{identifier}".to_string()
}

fn default_batch_size() -> usize {
    50
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DocumentJob {
    pub name: String,
    pub source: SourceConfig,
    pub group_by: String,
    #[serde(default)]
    pub group_policy: KeyPolicy,
    /// Columns that must be non-blank on every member before a group renders.
    #[serde(default)]
    pub required: Vec<String>,
    pub sequence: SequenceConfig,
    pub template: String,
    /// Name of each new document; `{identifier}` and `{group}` are replaced.
    #[serde(default = "default_document_name")]
    pub document_name: String,
    /// Without a status column, completion is tracked for this run only.
    #[serde(default)]
    pub status: Option<StatusConfig>,
    #[serde(default)]
    pub amount: Option<AmountSource>,
    #[serde(default)]
    pub tax: Option<TaxRule>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    pub cells: CellMapping,
}

impl DocumentJob {
    pub fn document_name(&self, identifier: &str, group: &str) -> String {
        self.document_name
            .replace("{identifier}", identifier)
            .replace("{group}", group)
    }

    /// Source columns the run reads besides the group column.
    pub fn source_columns(&self) -> Vec<&str> {
        let mut columns = self.required.iter().map(String::as_str).collect::<Vec<_>>();
        if let Some(amount) = &self.amount {
            columns.extend(amount.columns());
        }
        if let Some(tax) = &self.tax {
            columns.push(&tax.column);
        }
        columns.into_iter().unique().collect()
    }

    /// How the rows of `status.sheet` map onto this job's groups.
    pub fn ledger_layout(&self, status: &StatusConfig) -> Result<LedgerLayout, ReconcileError> {
        let source = &self.source;
        let sheet = status.sheet.as_deref().unwrap_or(&source.sheet);
        let mut layout = LedgerLayout::new(sheet, self.group_by.as_str(), self.group_policy);
        layout.header_style = source.header_style;
        layout.renames = source.renames();
        layout.key_rewrites = source
            .normalize
            .iter()
            .filter(|rule| rule.column == self.group_by)
            .map(|rule| rule.policy)
            .collect();
        if sheet == source.sheet
            && let Some(range) = &source.range
        {
            let range = range
                .parse::<RangeRef>()
                .map_err(|reason| invalid(format!("job '{}': range '{range}': {reason}", self.name)))?;
            layout.range = Some(range);
        }
        Ok(layout)
    }
}

impl JobConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening job file {path:?}"))?;
        let reader = BufReader::new(file);
        let mut config: JobConfig = serde_yaml::from_reader(reader).context("Parsing job YAML")?;
        config.link_status_columns();
        config
            .validate()
            .with_context(|| format!("Validating job file {path:?}"))?;
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let mut config: JobConfig = serde_yaml::from_str(text).context("Parsing job YAML")?;
        config.link_status_columns();
        config.validate()?;
        Ok(config)
    }

    /// Gives every reconcile job whose output a document job marks a
    /// [`PreserveConfig`] for those marks, so a rerun keeps them.
    pub fn link_status_columns(&mut self) {
        for job in &mut self.reconcile {
            if job.preserve.is_some() {
                continue;
            }
            let marking = self.documents.iter().find_map(|doc| {
                let status = doc.status.as_ref()?;
                let ledger = status.sheet.as_deref().unwrap_or(&doc.source.sheet);
                (ledger == job.output).then_some((doc, status))
            });
            let Some((doc, status)) = marking else {
                continue;
            };
            let key = doc
                .source
                .rename
                .iter()
                .find(|(_, to)| **to == doc.group_by)
                .map_or_else(|| doc.group_by.clone(), |(from, _)| from.clone());
            let mut columns = vec![status.column.clone()];
            columns.extend(status.identifier_column.clone());
            job.preserve = Some(PreserveConfig {
                key,
                policy: doc.group_policy,
                columns,
                header_style: doc.source.header_style,
            });
        }
    }

    pub fn validate(&self) -> Result<(), ReconcileError> {
        let reconcile_names = self.reconcile.iter().map(|job| job.name.as_str());
        if let Some(name) = reconcile_names.duplicates().next() {
            return Err(invalid(format!("reconcile job '{name}' is defined twice")));
        }
        let document_names = self.documents.iter().map(|job| job.name.as_str());
        if let Some(name) = document_names.duplicates().next() {
            return Err(invalid(format!("document job '{name}' is defined twice")));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts must be at least 1"));
        }
        for job in &self.reconcile {
            validate_source(&job.name, &job.source)?;
            for join in &job.joins {
                validate_source(&job.name, &join.source)?;
            }
            for expand in &job.expand {
                expand.spec()?;
            }
            if let Some(preserve) = &job.preserve
                && preserve.columns.iter().any(|column| *column == preserve.key)
            {
                return Err(invalid(format!(
                    "reconcile job '{}': preserve.key '{}' cannot also be preserved",
                    job.name, preserve.key
                )));
            }
        }
        for job in &self.documents {
            validate_document(job)?;
        }
        Ok(())
    }

    pub fn reconcile_job(&self, name: &str) -> Option<&ReconcileJob> {
        self.reconcile.iter().find(|job| job.name == name)
    }

    pub fn document_job(&self, name: &str) -> Option<&DocumentJob> {
        self.documents.iter().find(|job| job.name == name)
    }
}

fn invalid(message: impl Into<String>) -> ReconcileError {
    ReconcileError::Config(message.into())
}

fn validate_source(job: &str, source: &SourceConfig) -> Result<(), ReconcileError> {
    if let Some(range) = &source.range {
        range
            .parse::<RangeRef>()
            .map_err(|reason| invalid(format!("job '{job}': range '{range}': {reason}")))?;
    }
    if let Some(unpivot) = &source.unpivot {
        unpivot.spec()?;
    }
    Ok(())
}

fn validate_document(job: &DocumentJob) -> Result<(), ReconcileError> {
    validate_source(&job.name, &job.source)?;
    let name = &job.name;
    if job.sequence.width == 0 || job.sequence.width > 18 {
        return Err(invalid(format!(
            "document job '{name}': sequence width must be between 1 and 18"
        )));
    }
    if job.sequence.prefix.trim().is_empty() {
        return Err(invalid(format!("document job '{name}': sequence prefix is empty")));
    }
    if job.batch_size == 0 {
        return Err(invalid(format!("document job '{name}': batch_size must be positive")));
    }
    if !job.document_name.contains("{identifier}") {
        return Err(invalid(format!(
            "document job '{name}': document_name must contain {{identifier}}"
        )));
    }
    for entry in &job.cells.entries {
        match entry {
            MappingEntry::Computed {
                compute: ComputedField::Subtotal | ComputedField::Total,
                ..
            } if job.amount.is_none() => {
                return Err(invalid(format!(
                    "document job '{name}': {} needs an `amount` source",
                    entry.describe()
                )));
            }
            MappingEntry::Computed {
                compute: ComputedField::TaxAmount,
                ..
            } if job.amount.is_none() || job.tax.is_none() => {
                return Err(invalid(format!(
                    "document job '{name}': tax_amount needs `amount` and `tax`"
                )));
            }
            MappingEntry::Repeating {
                stride: 0, field, ..
            } => {
                return Err(invalid(format!(
                    "document job '{name}': repeating field '{field}' has stride 0"
                )));
            }
            _ => {}
        }
    }
    let cells = job.cells.entries.iter().map(MappingEntry::cell);
    if let Some(cell) = cells.duplicates().next() {
        return Err(invalid(format!(
            "document job '{name}': cell {cell} is mapped twice"
        )));
    }
    Ok(())
}
