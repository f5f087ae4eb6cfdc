mod common;

use std::{sync::Arc, time::Duration};

use chrono::NaiveDate;
use common::TestWorkspace;
use encoding_rs::UTF_8;
use sheet_reconcile::{
    client::{CellWrite, Grid, SheetClient},
    clock::{Clock, ManualClock},
    config::JobConfig,
    error::SheetError,
    generate::{GenerateOptions, StopSignal, run_documents},
    memory::MemoryWorkbook,
    reconcile::run_reconcile,
    retry::{BackoffConfig, GuardedClient, RetryPolicy},
    sequence::CounterStore,
    table::Table,
    workbook::CsvWorkbook,
};

fn clock() -> ManualClock {
    ManualClock::new(NaiveDate::from_ymd_opt(2024, 5, 8).expect("date"))
}

fn open(workspace: &TestWorkspace) -> CsvWorkbook {
    CsvWorkbook::open(&workspace.book(), "csv", None, UTF_8).expect("open workbook")
}

#[test]
fn packed_invoices_become_one_credit_note() {
    let workspace = TestWorkspace::with_fixture_book();
    let config = JobConfig::load(&workspace.jobs()).expect("load jobs");
    let workbook = open(&workspace);

    let report = run_reconcile(&workbook, &config.reconcile[0]).expect("reconcile");
    assert_eq!(report.source_rows, 3);
    assert_eq!(report.expanded_rows, 4);
    assert_eq!(report.output_rows, 4);

    let summary = run_documents(
        &workbook,
        &config.documents[0],
        config.counters.as_deref(),
        &clock(),
        &StopSignal::new(),
        GenerateOptions::default(),
    )
    .expect("generate");

    assert_eq!(summary.rendered.len(), 1);
    assert_eq!(summary.rendered[0].identifier, "CN-001405");
    assert_eq!(summary.skipped_incomplete.len(), 1);
    assert_eq!(summary.skipped_incomplete[0].key, "07.05.2024 09:00:00");
    assert!(summary.failed.is_empty());

    let document = workbook.read_grid("CN-001405", None).expect("document");
    let cell = |row: usize, column: usize| document[row][column].as_str();
    assert_eq!(cell(0, 0), "Credit Note");
    assert_eq!(cell(3, 0), "Ann Agent");
    assert_eq!(cell(5, 6), "CN-001405");
    assert_eq!(cell(6, 6), "May");
    assert_eq!(cell(28, 0), "INV-1");
    assert_eq!(cell(29, 0), "INV-2");
    assert_eq!(cell(30, 0), "INV-3");
    assert_eq!(cell(31, 0), "");
    assert_eq!(cell(39, 5), "250,00");
    assert_eq!(cell(40, 4), "VAT 19%");
    assert_eq!(cell(40, 5), "47,50");
    assert_eq!(cell(41, 5), "297,50");

    let refunds = workbook.read_table("Refunds", None).expect("refunds");
    let status = refunds.column_index("Status").expect("status column");
    let number = refunds.column_index("CN Number").expect("identifier column");
    for row in 0..3 {
        assert_eq!(refunds.value(row, status).as_display(), "Done");
        assert_eq!(refunds.value(row, number).as_display(), "CN-001405");
    }
    assert!(refunds.value(3, status).is_absent());

    assert_eq!(
        CounterStore::new(&workbook, "Counters").load("CN").expect("counter"),
        Some(1406)
    );
}

#[test]
fn second_run_creates_nothing_new() {
    let workspace = TestWorkspace::with_fixture_book();
    let config = JobConfig::load(&workspace.jobs()).expect("load jobs");
    let workbook = open(&workspace);
    run_reconcile(&workbook, &config.reconcile[0]).expect("reconcile");

    let run = || {
        run_documents(
            &workbook,
            &config.documents[0],
            config.counters.as_deref(),
            &clock(),
            &StopSignal::new(),
            GenerateOptions::default(),
        )
        .expect("generate")
    };
    let first = run();
    let sheets_after_first = workbook.list_sheets().expect("sheets");
    let second = run();

    assert_eq!(first.rendered.len(), 1);
    assert!(second.rendered.is_empty());
    assert_eq!(second.skipped_done, vec!["06.05.2024 10:15:00".to_string()]);
    assert_eq!(second.next_identifier, "CN-001406");
    assert_eq!(workbook.list_sheets().expect("sheets"), sheets_after_first);
}

#[test]
fn reconciling_again_keeps_finished_groups_finished() {
    let workspace = TestWorkspace::with_fixture_book();
    let config = JobConfig::load(&workspace.jobs()).expect("load jobs");
    let workbook = open(&workspace);
    let generate = || {
        run_documents(
            &workbook,
            &config.documents[0],
            config.counters.as_deref(),
            &clock(),
            &StopSignal::new(),
            GenerateOptions::default(),
        )
        .expect("generate")
    };

    run_reconcile(&workbook, &config.reconcile[0]).expect("first reconcile");
    let first = generate();
    let again = run_reconcile(&workbook, &config.reconcile[0]).expect("second reconcile");
    let second = generate();

    assert_eq!(first.rendered.len(), 1);
    assert_eq!(again.preserved_rows, 3);
    assert!(second.rendered.is_empty());
    assert_eq!(second.skipped_done, vec!["06.05.2024 10:15:00".to_string()]);
    assert_eq!(second.next_identifier, "CN-001406");
    let sheets = workbook.list_sheets().expect("sheets");
    assert!(sheets.contains(&"CN-001405".to_string()));
    assert!(!sheets.contains(&"CN-001406".to_string()));

    let refunds = workbook.read_table("Refunds", None).expect("refunds");
    let status = refunds.column_index("Status").expect("status column");
    let number = refunds.column_index("CN Number").expect("identifier column");
    for row in 0..3 {
        assert_eq!(refunds.value(row, status).as_display(), "Done");
        assert_eq!(refunds.value(row, number).as_display(), "CN-001405");
    }
    assert!(refunds.value(3, status).is_blank());
}

#[test]
fn completing_a_group_later_continues_the_sequence() {
    let workspace = TestWorkspace::with_fixture_book();
    let config = JobConfig::load(&workspace.jobs()).expect("load jobs");
    let workbook = open(&workspace);
    run_reconcile(&workbook, &config.reconcile[0]).expect("reconcile");
    let options = GenerateOptions::default();
    let stop = StopSignal::new();
    let job = &config.documents[0];
    run_documents(&workbook, job, Some("Counters"), &clock(), &stop, options).expect("first");

    let refunds = workbook.read_table("Refunds", None).expect("refunds");
    let mut completed = refunds.clone();
    let invoice = completed.column_index("Invoice No.").expect("invoice column");
    completed.set_value(3, invoice, "INV-4".into());
    workbook.write_table("Refunds", &completed).expect("update refunds");

    let summary =
        run_documents(&workbook, job, Some("Counters"), &clock(), &stop, options).expect("second");
    assert_eq!(summary.rendered.len(), 1);
    assert_eq!(summary.rendered[0].identifier, "CN-001406");
    let document = workbook.read_grid("CN-001406", None).expect("document");
    assert_eq!(document[28][0], "INV-4");
    assert_eq!(document[40][4], "VAT 0%");
}

/// Delegates to a [`MemoryWorkbook`] but refuses every cell write as
/// rate limited.
struct AlwaysBusy(MemoryWorkbook);

impl SheetClient for AlwaysBusy {
    fn read_grid(&self, source_id: &str, selector: Option<&str>) -> Result<Grid, SheetError> {
        self.0.read_grid(source_id, selector)
    }

    fn write_table(&self, destination_id: &str, table: &Table) -> Result<(), SheetError> {
        self.0.write_table(destination_id, table)
    }

    fn copy_template(&self, template_id: &str, new_id: &str) -> Result<(), SheetError> {
        self.0.copy_template(template_id, new_id)
    }

    fn write_cells(&self, document_id: &str, _writes: &[CellWrite]) -> Result<(), SheetError> {
        Err(SheetError::RateLimited(format!("writing {document_id}")))
    }

    fn list_sheets(&self) -> Result<Vec<String>, SheetError> {
        self.0.list_sheets()
    }
}

#[test]
fn exhausted_retries_fail_only_that_group() {
    let memory = MemoryWorkbook::new();
    let table = Table::from_strings(
        "Refunds",
        &["Timestamp", "Agent Name", "Invoice No.", "Amount", "Tax Status"],
        &[vec!["t1", "Ann", "INV-1", "10", "Within Germany"]],
    )
    .expect("table");
    memory.insert_table("Refunds", &table);
    memory.insert_grid("CN-Template", vec![vec!["Credit Note".to_string()]]);

    let clock = Arc::new(clock());
    let shared: Arc<dyn Clock> = clock.clone();
    let policy = RetryPolicy {
        max_attempts: 3,
        min_interval_ms: 0,
        timeout_ms: None,
        backoff: BackoffConfig::Fixed { delay_ms: 10 },
    };
    let client = GuardedClient::new(Arc::new(AlwaysBusy(memory)), shared, &policy);

    let workspace = TestWorkspace::new();
    let config = JobConfig::load(&workspace.jobs()).expect("load jobs");
    let summary = run_documents(
        &client,
        &config.documents[0],
        None,
        clock.as_ref(),
        &StopSignal::new(),
        GenerateOptions::default(),
    )
    .expect("run completes");

    assert!(summary.rendered.is_empty());
    assert_eq!(summary.failed.len(), 1);
    assert!(summary.failed[0].reason.contains("rate limited"), "{}", summary.failed[0].reason);
    assert_eq!(summary.next_identifier, "CN-001405");
    assert_eq!(
        clock.sleeps(),
        vec![Duration::from_millis(10), Duration::from_millis(10)]
    );
    let refunds = client.read_table("Refunds", None).expect("refunds");
    assert!(refunds.column_index("Status").is_none());
}
