//! The reconcile stage: raw source sheets in, one reconciled table out.
//!
//! Stages run in a fixed order: ingest (header styling, duplicate headers,
//! repeated column blocks, renames), joins (each right side optionally projected and deduplicated
//! first), concatenated columns, row expansion, keep-first deduplication and
//! the output projection. Columns listed under `preserve` are then carried
//! over from what the output sheet held before. Any stage error aborts the
//! job.

use std::collections::HashMap;

use log::{info, warn};
use serde::Serialize;

use crate::{
    client::{SheetClient, grid_to_table},
    columns::{
        concat_column, drop_empty_columns, normalize_column, rename_columns, select_columns,
    },
    config::{JoinConfig, PreserveConfig, ReconcileJob, SourceConfig},
    data::Value,
    dedupe::dedupe_with_count,
    error::{ReconcileError, SheetError},
    expand::{expand, unpivot},
    join::{JoinSpec, join_with_stats},
    normalize::{JoinKey, join_key},
    table::Table,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub job: String,
    pub output: String,
    pub source_rows: usize,
    pub joined_rows: usize,
    pub unmatched_left: usize,
    pub expanded_rows: usize,
    pub duplicates_dropped: usize,
    /// Rows that took over values from the previous output.
    pub preserved_rows: usize,
    pub output_rows: usize,
}

/// Reads `source` and applies its ingestion options.
pub fn load_source(client: &dyn SheetClient, source: &SourceConfig) -> Result<Table, ReconcileError> {
    let unavailable = |err| ReconcileError::SourceUnavailable(source.sheet.clone(), err);
    let grid = client
        .read_grid(&source.sheet, source.range.as_deref())
        .map_err(unavailable)?;
    let mut table = grid_to_table(&source.sheet, &grid, source.header_style, source.duplicates)
        .map_err(unavailable)?;
    if let Some(blocks) = &source.unpivot {
        let before = table.len();
        table = unpivot(&table, &blocks.spec()?)?;
        info!(
            "Unpivoted {:?} in '{}': {before} row(s) became {}",
            blocks.columns,
            source.sheet,
            table.len()
        );
    }
    if !source.rename.is_empty() {
        table = rename_columns(&table, &source.renames())?;
    }
    for rule in &source.normalize {
        table = normalize_column(&table, &rule.column, rule.policy)?;
    }
    if source.drop_empty_columns {
        table = drop_empty_columns(&table)?;
    }
    info!(
        "Loaded {} row(s) x {} column(s) from '{}'",
        table.len(),
        table.columns().len(),
        source.sheet
    );
    Ok(table)
}

/// Runs every stage of `job` and returns the reconciled table without
/// writing it.
pub fn reconcile(
    client: &dyn SheetClient,
    job: &ReconcileJob,
) -> Result<(Table, ReconcileReport), ReconcileError> {
    let mut report = ReconcileReport {
        job: job.name.clone(),
        output: job.output.clone(),
        ..ReconcileReport::default()
    };
    let mut table = load_source(client, &job.source)?;
    report.source_rows = table.len();

    for join in &job.joins {
        let right = prepare_right(client, join)?;
        let spec = JoinSpec {
            left_key: join.left_key.clone(),
            right_key: join.right_key().to_string(),
            policy: join.policy,
            kind: join.kind,
            suffix: join.suffix.clone(),
        };
        let (joined, stats) = join_with_stats(&table, &right, &spec)?;
        info!(
            "Joined '{}' on {}: {} row(s), {} without a match",
            join.source.sheet, join.left_key, stats.output_rows, stats.unmatched_left
        );
        report.unmatched_left += stats.unmatched_left;
        table = joined;
    }
    report.joined_rows = table.len();

    for concat in &job.concat {
        table = concat_column(&table, &concat.name, &concat.columns, &concat.separator)?;
    }

    for expansion in &job.expand {
        let before = table.len();
        table = expand(&table, &expansion.spec()?)?;
        info!(
            "Expanded '{}': {before} row(s) became {}",
            expansion.column,
            table.len()
        );
    }
    report.expanded_rows = table.len();

    if !job.dedupe.is_empty() {
        let (deduped, dropped) = dedupe_with_count(&table, &job.dedupe)?;
        report.duplicates_dropped = dropped;
        info!("Dropped {dropped} duplicate row(s) on {:?}", job.dedupe);
        table = deduped;
    }

    if !job.columns.is_empty() {
        table = select_columns(&table, &job.columns)?;
    }
    if let Some(preserve) = &job.preserve {
        report.preserved_rows = carry_over(client, &job.output, &mut table, preserve)?;
    }
    table.rename(job.output.as_str());
    report.output_rows = table.len();
    Ok((table, report))
}

/// Runs `job` and writes the result to its output sheet.
pub fn run_reconcile(
    client: &dyn SheetClient,
    job: &ReconcileJob,
) -> Result<ReconcileReport, ReconcileError> {
    let (table, report) = reconcile(client, job)?;
    client.write_table(&job.output, &table)?;
    info!(
        "Reconcile job '{}' wrote {} row(s) to '{}'",
        job.name, report.output_rows, job.output
    );
    Ok(report)
}

/// Copies `preserve.columns` from the current contents of `output` onto
/// rows of `table` with the same key. Only blank cells are filled, so values
/// the sources provide win. Returns the number of rows that took a value.
fn carry_over(
    client: &dyn SheetClient,
    output: &str,
    table: &mut Table,
    preserve: &PreserveConfig,
) -> Result<usize, ReconcileError> {
    let previous = match client.read_table(output, None) {
        Ok(previous) => previous,
        Err(SheetError::SourceUnavailable { .. }) => return Ok(0),
        Err(err) => return Err(ReconcileError::SourceUnavailable(output.to_string(), err)),
    };
    let Some(old_key) = preserve.find(&previous, &preserve.key) else {
        if !previous.is_empty() {
            warn!(
                "'{output}' has no '{}' column; its {:?} values are not carried over",
                preserve.key, preserve.columns
            );
        }
        return Ok(0);
    };
    let old_columns = preserve
        .columns
        .iter()
        .map(|name| preserve.find(&previous, name))
        .collect::<Vec<_>>();

    let mut kept: HashMap<JoinKey, Vec<Value>> = HashMap::new();
    for row in previous.rows() {
        let Some(key) = join_key(&row[old_key], preserve.policy) else {
            continue;
        };
        let values = kept
            .entry(key)
            .or_insert_with(|| vec![Value::Absent; old_columns.len()]);
        for (slot, column) in values.iter_mut().zip(&old_columns) {
            if let Some(idx) = column
                && slot.is_blank()
                && !row[*idx].is_blank()
            {
                *slot = row[*idx].clone();
            }
        }
    }
    kept.retain(|_, values| values.iter().any(|value| !value.is_blank()));
    if kept.is_empty() {
        return Ok(0);
    }

    let new_key = preserve
        .find(table, &preserve.key)
        .ok_or_else(|| ReconcileError::key_missing(table.name(), &preserve.key))?;
    let targets = preserve
        .columns
        .iter()
        .map(|name| match preserve.find(table, name) {
            Some(idx) => idx,
            None => table.ensure_column(name),
        })
        .collect::<Vec<_>>();
    let mut carried = 0;
    for row in 0..table.len() {
        let Some(values) = join_key(table.value(row, new_key), preserve.policy)
            .and_then(|key| kept.get(&key))
        else {
            continue;
        };
        let mut touched = false;
        for (target, value) in targets.iter().zip(values) {
            if !value.is_blank() && table.value(row, *target).is_blank() {
                table.set_value(row, *target, value.clone());
                touched = true;
            }
        }
        carried += usize::from(touched);
    }
    info!(
        "Carried {:?} over from '{output}' onto {carried} row(s)",
        preserve.columns
    );
    Ok(carried)
}

fn prepare_right(client: &dyn SheetClient, join: &JoinConfig) -> Result<Table, ReconcileError> {
    let mut right = load_source(client, &join.source)?;
    if !join.select.is_empty() {
        let key = join.right_key().to_string();
        let mut keep = vec![key.clone()];
        keep.extend(join.select.iter().filter(|column| **column != key).cloned());
        right = select_columns(&right, &keep)?;
    }
    if !join.dedupe_right.is_empty() {
        let (deduped, dropped) = dedupe_with_count(&right, &join.dedupe_right)?;
        if dropped > 0 {
            info!(
                "Dropped {dropped} duplicate row(s) from '{}' before joining",
                join.source.sheet
            );
        }
        right = deduped;
    }
    Ok(right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::JobConfig, memory::MemoryWorkbook};

    fn grid(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|row| row.iter().map(|cell| cell.to_string()).collect())
            .collect()
    }

    const JOB: &str = r#"
reconcile:
  - name: credit_card
    source:
      sheet: CC
      header_style: lower_underscore
      normalize: [{ column: trip_id, policy: compact }]
    joins:
      - source: { sheet: SF, header_style: lower_underscore }
        left_key: trip_id
        policy: compact
        suffix: _sf
        select: [agent, amount]
        dedupe_right: [trip_id, agent]
    expand:
      - { column: invoice_no }
    dedupe: [trip_id, invoice_no]
    output: CC_DB
"#;

    #[test]
    fn full_pipeline_fans_out_expands_and_dedupes() {
        let workbook = MemoryWorkbook::new();
        workbook.insert_grid(
            "CC",
            grid(&[
                &["Trip ID", "Invoice No", "Amount"],
                &["T-1 ", "INV-1, INV-2", "10"],
                &["t-1", "INV-2", "10"],
                &["T-2", "", "5"],
            ]),
        );
        workbook.insert_grid(
            "SF",
            grid(&[
                &["Trip ID", "Agent", "Amount", "Ignored"],
                &["T-1", "ann", "99", "x"],
                &["T-1", "ann", "99", "y"],
                &["T-2 ", "bob", "7", "z"],
            ]),
        );
        let config = JobConfig::from_yaml(JOB).unwrap();
        let report = run_reconcile(&workbook, &config.reconcile[0]).unwrap();

        assert_eq!(report.source_rows, 3);
        assert_eq!(report.joined_rows, 3);
        assert_eq!(report.expanded_rows, 4);
        assert_eq!(report.duplicates_dropped, 1);
        assert_eq!(report.output_rows, 3);

        let out = workbook.grid("CC_DB").unwrap();
        assert_eq!(
            out[0],
            vec!["trip_id", "invoice_no", "amount", "agent", "amount_sf"]
        );
        assert_eq!(out[1], vec!["t-1", "INV-1", "10", "ann", "99"]);
        assert_eq!(out[2], vec!["t-1", "INV-2", "10", "ann", "99"]);
        assert_eq!(out[3], vec!["t-2", "", "5", "bob", "7"]);
    }

    #[test]
    fn rerun_keeps_marks_of_the_previous_output() {
        let workbook = MemoryWorkbook::new();
        workbook.insert_grid(
            "CC",
            grid(&[
                &["Trip ID", "Invoice No"],
                &["T-1", "INV-1, INV-2"],
                &["T-2", "INV-3"],
            ]),
        );
        workbook.insert_grid("SF", grid(&[&["Trip ID", "Agent", "Amount"]]));
        let yaml = JOB.replace(
            "    output: CC_DB\n",
            "    output: CC_DB\n    preserve: { key: trip_id, policy: compact, columns: [Status, CN Number] }\n",
        );
        let config = JobConfig::from_yaml(&yaml).unwrap();
        let job = &config.reconcile[0];

        let first = run_reconcile(&workbook, job).unwrap();
        assert_eq!(first.preserved_rows, 0);
        assert_eq!(workbook.grid("CC_DB").unwrap()[0].len(), 4);

        let mut marked = workbook.grid("CC_DB").unwrap();
        marked[0].extend(["Status".to_string(), "CN Number".to_string()]);
        marked[1].extend(["Done".to_string(), "CN-1".to_string()]);
        marked[2].extend(["".to_string(), "".to_string()]);
        workbook.insert_grid("CC_DB", marked);

        let second = run_reconcile(&workbook, job).unwrap();
        assert_eq!(second.preserved_rows, 2);
        let out = workbook.grid("CC_DB").unwrap();
        assert_eq!(out[0][4..], ["Status", "CN Number"]);
        assert_eq!(out[1][4..], ["Done", "CN-1"]);
        assert_eq!(out[2][4..], ["Done", "CN-1"]);
        assert_eq!(out[3][4..], ["", ""]);
    }

    #[test]
    fn repeated_product_blocks_become_rows() {
        let workbook = MemoryWorkbook::new();
        workbook.insert_grid(
            "RINV",
            grid(&[
                &["Timestamp", "Product", "Quantity", "More than one?", "Product", "Quantity"],
                &["t1", "Tour", "2", "No", "", ""],
                &["t2", "Boat", "1", "Yes", "Bike", "3"],
            ]),
        );
        let yaml = r#"
reconcile:
  - name: invoices
    source:
      sheet: RINV
      duplicates: suffix
      unpivot:
        columns: [Product, Quantity]
        when: { column: "More than one?", equals: "yes" }
      rename: { Product: Item }
    output: InvDB
"#;
        let config = JobConfig::from_yaml(yaml).unwrap();
        let report = run_reconcile(&workbook, &config.reconcile[0]).unwrap();
        assert_eq!(report.source_rows, 3);

        let out = workbook.grid("InvDB").unwrap();
        assert_eq!(out[0], vec!["Timestamp", "Item", "Quantity", "More than one?"]);
        assert_eq!(out[1], vec!["t1", "Tour", "2", "No"]);
        assert_eq!(out[2], vec!["t2", "Boat", "1", "Yes"]);
        assert_eq!(out[3], vec!["t2", "Bike", "3", "Yes"]);
    }

    #[test]
    fn bad_block_suffix_is_a_config_error() {
        let yaml = r#"
reconcile:
  - name: invoices
    source: { sheet: RINV, unpivot: { columns: [Product], suffix: "(" } }
    output: InvDB
"#;
        assert!(JobConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn missing_source_aborts_the_job() {
        let workbook = MemoryWorkbook::new();
        let config = JobConfig::from_yaml(JOB).unwrap();
        let err = run_reconcile(&workbook, &config.reconcile[0]).unwrap_err();
        assert!(matches!(err, ReconcileError::SourceUnavailable(sheet, _) if sheet == "CC"));
        assert!(workbook.grid("CC_DB").is_none());
    }

    #[test]
    fn missing_join_key_is_reported() {
        let workbook = MemoryWorkbook::new();
        workbook.insert_grid("CC", grid(&[&["Trip", "Invoice No"], &["T-1", "INV-1"]]));
        workbook.insert_grid("SF", grid(&[&["Trip ID", "Agent", "Amount"]]));
        let config = JobConfig::from_yaml(JOB).unwrap();
        assert!(matches!(
            run_reconcile(&workbook, &config.reconcile[0]),
            Err(ReconcileError::KeyMissing { .. })
        ));
    }
}
