use std::time::Duration;

use thiserror::Error;

/// Failures reported by a [`SheetClient`](crate::client::SheetClient).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SheetError {
    /// The named sheet or range does not exist.
    #[error("source '{source_id}' is unavailable: {reason}")]
    SourceUnavailable { source_id: String, reason: String },

    #[error("template '{0}' not found")]
    TemplateNotFound(String),

    /// The store asked the caller to slow down. Retryable.
    #[error("rate limited while {0}")]
    RateLimited(String),

    /// The store refused the write (bad position, protected range). Not retryable.
    #[error("write to '{document}' rejected: {reason}")]
    WriteRejected { document: String, reason: String },

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// Any other I/O hiccup worth another attempt.
    #[error("transient failure: {0}")]
    Transient(String),
}

impl SheetError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SheetError::RateLimited(_) | SheetError::Timeout { .. } | SheetError::Transient(_)
        )
    }
}

/// Stage-level failures. Any of these aborts the run because downstream
/// processing would be meaningless.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("source '{0}' is unavailable")]
    SourceUnavailable(String, #[source] SheetError),

    #[error("required column '{column}' missing from {table}")]
    KeyMissing { table: String, column: String },

    #[error("duplicate column '{0}'")]
    DuplicateColumn(String),

    #[error("row has {found} value(s) but the table has {expected} column(s)")]
    RowWidth { expected: usize, found: usize },

    #[error("invalid separator pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Sheet(#[from] SheetError),
}

impl ReconcileError {
    pub fn key_missing(table: impl Into<String>, column: impl Into<String>) -> Self {
        ReconcileError::KeyMissing {
            table: table.into(),
            column: column.into(),
        }
    }
}

/// Raised while mapping a group onto its template.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("repeating field '{field}' has {members} member(s) but the template holds {capacity}")]
    Overflow {
        field: String,
        members: usize,
        capacity: usize,
    },

    #[error("column '{column}' holds '{value}', which is not an amount")]
    InvalidAmount { column: String, value: String },

    #[error("expression '{expr}' failed: {reason}")]
    Expression { expr: String, reason: String },

    #[error("cell position out of range: {0}")]
    Position(String),
}

/// Why a single group could not be turned into a document. Recorded in the
/// run summary; the group is left unmarked so a later run retries it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GroupError {
    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Sheet(#[from] SheetError),

    #[error("document written but completion marker failed: {0}")]
    Marking(SheetError),

    #[error("document written but counter could not be saved: {0}")]
    Counter(SheetError),
}
