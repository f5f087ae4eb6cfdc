//! The document run: one numbered document per complete, unfinished group.
//!
//! Per group the coordinator checks the tracker, checks completeness, renders
//! against the identifier the counter would hand out next, instantiates the
//! template, writes the cells in batches and only then marks the group done.
//! A failure at any step is recorded against that group and the run moves on;
//! the counter only advances once the document has been written.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use log::{debug, error, info, warn};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    client::SheetClient,
    clock::Clock,
    config::DocumentJob,
    derive::DeriveContext,
    error::{GroupError, ReconcileError},
    group::{DocumentGroup, group},
    reconcile::load_source,
    render::{RenderedDocument, render},
    sequence::{CounterStore, SequenceCounter},
    table::render_table,
    tracker::{CompletionTracker, MemoryTracker, StatusColumnTracker},
};

/// Cooperative cancellation, checked between groups.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerateOptions {
    /// Render and report without touching the workbook.
    pub dry_run: bool,
    /// Stop after this many groups have been attempted.
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedEntry {
    pub key: String,
    pub identifier: String,
    pub document: String,
    pub cells: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncompleteEntry {
    pub key: String,
    pub column: String,
    /// Zero-based data rows of the source table.
    pub missing_rows: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedEntry {
    pub key: String,
    /// Set when the document was written before the failure.
    pub identifier: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub job: String,
    pub dry_run: bool,
    pub rendered: Vec<RenderedEntry>,
    pub skipped_incomplete: Vec<IncompleteEntry>,
    pub skipped_done: Vec<String>,
    pub failed: Vec<FailedEntry>,
    pub ungrouped_rows: usize,
    pub stopped: bool,
    /// Groups never looked at because of a stop or the group limit.
    pub unvisited: usize,
    pub next_identifier: String,
}

impl RunSummary {
    fn new(job: &str, dry_run: bool, next_identifier: String) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            job: job.to_string(),
            dry_run,
            rendered: Vec::new(),
            skipped_incomplete: Vec::new(),
            skipped_done: Vec::new(),
            failed: Vec::new(),
            ungrouped_rows: 0,
            stopped: false,
            unvisited: 0,
            next_identifier,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && !self.stopped
    }

    /// One line per group outcome, as an aligned text table.
    pub fn to_table_string(&self) -> String {
        let headers = ["outcome", "group", "identifier", "detail"]
            .iter()
            .map(|h| h.to_string())
            .collect::<Vec<_>>();
        let mut rows = Vec::new();
        for entry in &self.rendered {
            rows.push(vec![
                "rendered".to_string(),
                entry.key.clone(),
                entry.identifier.clone(),
                format!("{} ({} cell(s))", entry.document, entry.cells),
            ]);
        }
        for entry in &self.failed {
            rows.push(vec![
                "failed".to_string(),
                entry.key.clone(),
                entry.identifier.clone().unwrap_or_default(),
                entry.reason.clone(),
            ]);
        }
        for entry in &self.skipped_incomplete {
            rows.push(vec![
                "incomplete".to_string(),
                entry.key.clone(),
                String::new(),
                format!("'{}' blank on row(s) {:?}", entry.column, entry.missing_rows),
            ]);
        }
        for key in &self.skipped_done {
            rows.push(vec![
                "done".to_string(),
                key.clone(),
                String::new(),
                String::new(),
            ]);
        }
        render_table(&headers, &rows)
    }
}

/// Runs one document job against `client`. Stage errors (unreadable source,
/// missing columns, unreadable counter) abort before any document is made;
/// everything after that is recorded per group in the summary.
pub fn run_documents(
    client: &dyn SheetClient,
    job: &DocumentJob,
    counters: Option<&str>,
    clock: &dyn Clock,
    stop: &StopSignal,
    options: GenerateOptions,
) -> Result<RunSummary, ReconcileError> {
    let table = load_source(client, &job.source)?;
    for column in job.source_columns() {
        table.require_column(column)?;
    }
    let grouping = group(&table, &job.group_by, job.group_policy)?;

    let store = counters.map(|sheet| CounterStore::new(client, sheet));
    let mut counter = SequenceCounter::new(
        job.sequence.prefix.as_str(),
        job.sequence.start,
        job.sequence.width,
    );
    if let Some(store) = &store
        && let Some(stored) = store.load(&job.sequence.prefix)?
    {
        counter = counter.seed_at_least(stored);
    }
    info!(
        "Document job '{}': {} group(s), next identifier {}",
        job.name,
        grouping.groups.len(),
        counter.peek()
    );

    let mut tracker: Box<dyn CompletionTracker + '_> = match &job.status {
        Some(status) => Box::new(StatusColumnTracker::new(
            client,
            job.ledger_layout(status)?,
            status.columns(),
        )?),
        None => Box::new(MemoryTracker::new()),
    };

    let context = DeriveContext {
        today: clock.today(),
        amount: job.amount.clone(),
        tax: job.tax.clone(),
    };

    let mut summary = RunSummary::new(&job.name, options.dry_run, counter.peek());
    summary.ungrouped_rows = grouping.ungrouped.len();
    if summary.ungrouped_rows > 0 {
        warn!(
            "{} row(s) have no '{}' and belong to no document",
            summary.ungrouped_rows, job.group_by
        );
    }

    let total = grouping.groups.len();
    let mut attempted = 0;
    'groups: for (position, group) in grouping.groups.iter().enumerate() {
        if stop.is_stopped() {
            summary.stopped = true;
            summary.unvisited = total - position;
            warn!("Stop requested; {} group(s) left unvisited", summary.unvisited);
            break;
        }
        if options.limit.is_some_and(|limit| attempted >= limit) {
            summary.unvisited = total - position;
            info!("Group limit reached; {} group(s) left for later", summary.unvisited);
            break;
        }

        let key = group.key().to_string();
        if tracker.is_done(group.key()) {
            debug!("Group '{key}' already has a document");
            summary.skipped_done.push(key);
            continue;
        }
        for required in &job.required {
            if let Err(incomplete) = group.check_complete(required) {
                info!(
                    "Skipping '{key}': '{}' is blank on {} row(s)",
                    incomplete.column,
                    incomplete.missing_rows.len()
                );
                summary.skipped_incomplete.push(IncompleteEntry {
                    key,
                    column: incomplete.column,
                    missing_rows: incomplete.missing_rows,
                });
                continue 'groups;
            }
        }
        attempted += 1;

        let document = match prepare(group, job, &counter, &context) {
            Ok(document) => document,
            Err(err) => {
                record_failure(&mut summary, key, None, &err);
                continue;
            }
        };
        if options.dry_run {
            info!(
                "Would write {} cell(s) to '{}' for '{key}'",
                document.writes.len(),
                document.document
            );
            counter = counter.next().1;
            summary.rendered.push(entry(key, &document));
            continue;
        }

        if let Err(err) = write_document(client, job, &document) {
            record_failure(&mut summary, key, None, &err);
            continue;
        }
        counter = counter.next().1;

        if let Some(store) = &store
            && let Err(err) = store.save(&counter)
        {
            // The stored counter still points at this identifier, so the group
            // is left unmarked and the run stops before numbers can repeat.
            let err = GroupError::Counter(err);
            record_failure(&mut summary, key, Some(&document.identifier), &err);
            summary.stopped = true;
            summary.unvisited = total - position - 1;
            break;
        }

        if let Err(err) = tracker.mark_done(group.key(), &document.identifier) {
            let err = GroupError::Marking(err);
            record_failure(&mut summary, key, Some(&document.identifier), &err);
            continue;
        }
        info!("Wrote '{}' for '{key}'", document.document);
        summary.rendered.push(entry(key, &document));
    }

    summary.next_identifier = counter.peek();
    info!(
        "Document job '{}': {} rendered, {} already done, {} incomplete, {} failed",
        job.name,
        summary.rendered.len(),
        summary.skipped_done.len(),
        summary.skipped_incomplete.len(),
        summary.failed.len()
    );
    Ok(summary)
}

/// Renders `group` against the identifier `counter` would allocate next.
fn prepare(
    group: &DocumentGroup<'_>,
    job: &DocumentJob,
    counter: &SequenceCounter,
    context: &DeriveContext,
) -> Result<RenderedDocument, GroupError> {
    let identifier = counter.peek();
    let writes = render(group, &job.cells, &identifier, context)?;
    Ok(RenderedDocument {
        document: job.document_name(&identifier, group.label()),
        identifier,
        writes,
    })
}

fn write_document(
    client: &dyn SheetClient,
    job: &DocumentJob,
    document: &RenderedDocument,
) -> Result<(), GroupError> {
    client.copy_template(&job.template, &document.document)?;
    for batch in document.writes.chunks(job.batch_size.max(1)) {
        client.write_cells(&document.document, batch)?;
        debug!("Wrote {} cell(s) to '{}'", batch.len(), document.document);
    }
    Ok(())
}

fn entry(key: String, document: &RenderedDocument) -> RenderedEntry {
    RenderedEntry {
        key,
        identifier: document.identifier.clone(),
        document: document.document.clone(),
        cells: document.writes.len(),
    }
}

fn record_failure(
    summary: &mut RunSummary,
    key: String,
    identifier: Option<&str>,
    err: &GroupError,
) {
    error!("Group '{key}' failed: {err}");
    summary.failed.push(FailedEntry {
        key,
        identifier: identifier.map(str::to_string),
        reason: err.to_string(),
    });
}
