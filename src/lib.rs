pub mod cells;
pub mod cli;
pub mod client;
pub mod clock;
pub mod columns;
pub mod config;
pub mod data;
pub mod dedupe;
pub mod derive;
pub mod error;
pub mod expand;
pub mod generate;
pub mod group;
pub mod io_utils;
pub mod join;
pub mod mapping;
pub mod memory;
pub mod normalize;
pub mod reconcile;
pub mod render;
pub mod retry;
pub mod sequence;
pub mod table;
pub mod tracker;
pub mod workbook;

use std::{
    env,
    sync::{Arc, OnceLock},
};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::{
    cli::{Cli, Commands, WorkbookArgs},
    client::SheetClient,
    clock::SystemClock,
    config::JobConfig,
    generate::{GenerateOptions, RunSummary, StopSignal},
    retry::{GuardedClient, RetryPolicy},
    table::render_table,
    workbook::CsvWorkbook,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("sheet_reconcile", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Reconcile(args) => handle_reconcile(&args),
        Commands::Generate(args) => handle_generate(&args),
        Commands::Preview(args) => handle_preview(&args),
    }
}

fn open_client(args: &WorkbookArgs, policy: &RetryPolicy) -> Result<GuardedClient<CsvWorkbook>> {
    let encoding = io_utils::resolve_encoding(args.encoding.as_deref())?;
    let workbook = CsvWorkbook::open(&args.workbook, &args.extension, args.delimiter, encoding)
        .with_context(|| format!("Opening workbook {:?}", args.workbook))?;
    debug!(
        "Workbook {:?} opened with extension '{}' and encoding {}",
        workbook.root(),
        args.extension,
        encoding.name()
    );
    Ok(GuardedClient::new(
        Arc::new(workbook),
        Arc::new(SystemClock),
        policy,
    ))
}

/// Entries of `available` named by `requested`, or all of them when nothing
/// was requested.
fn select_jobs<'a, T>(
    kind: &str,
    requested: &[String],
    available: &'a [T],
    name: impl Fn(&T) -> &str,
) -> Result<Vec<&'a T>> {
    if requested.is_empty() {
        return Ok(available.iter().collect());
    }
    requested
        .iter()
        .map(|wanted| {
            available
                .iter()
                .find(|job| name(job) == wanted.as_str())
                .ok_or_else(|| anyhow!("Unknown {kind} job '{wanted}'"))
        })
        .collect()
}

fn handle_reconcile(args: &cli::ReconcileArgs) -> Result<()> {
    let config = JobConfig::load(&args.config)?;
    let client = open_client(&args.workbook, &config.retry)?;
    let jobs = select_jobs("reconcile", &args.jobs, &config.reconcile, |job| job.name.as_str())?;
    if jobs.is_empty() {
        return Err(anyhow!("No reconcile jobs defined in {:?}", args.config));
    }

    let mut rows = Vec::new();
    for job in jobs {
        info!("Running reconcile job '{}'", job.name);
        let report = reconcile::run_reconcile(&client, job)
            .with_context(|| format!("Reconcile job '{}'", job.name))?;
        rows.push(vec![
            report.job,
            report.output,
            report.source_rows.to_string(),
            report.joined_rows.to_string(),
            report.unmatched_left.to_string(),
            report.expanded_rows.to_string(),
            report.duplicates_dropped.to_string(),
            report.preserved_rows.to_string(),
            report.output_rows.to_string(),
        ]);
    }
    let headers = [
        "job",
        "output",
        "source",
        "joined",
        "unmatched",
        "expanded",
        "dropped",
        "kept",
        "written",
    ]
    .iter()
    .map(|h| h.to_string())
    .collect::<Vec<_>>();
    print!("{}", render_table(&headers, &rows));
    Ok(())
}

fn handle_generate(args: &cli::GenerateArgs) -> Result<()> {
    let config = JobConfig::load(&args.config)?;
    let client = open_client(&args.workbook, &config.retry)?;
    let jobs = select_jobs("document", &args.documents, &config.documents, |job| job.name.as_str())?;
    if jobs.is_empty() {
        return Err(anyhow!("No document jobs defined in {:?}", args.config));
    }
    let options = GenerateOptions {
        dry_run: args.dry_run,
        limit: args.limit,
    };
    if options.dry_run {
        info!("Dry run: nothing will be written");
    }

    let clock = SystemClock;
    let stop = StopSignal::new();
    let mut summaries: Vec<RunSummary> = Vec::new();
    for job in jobs {
        let summary = generate::run_documents(
            &client,
            job,
            config.counters.as_deref(),
            &clock,
            &stop,
            options,
        )
        .with_context(|| format!("Document job '{}'", job.name))?;
        println!("{} ({}):", summary.job, summary.run_id);
        print!("{}", summary.to_table_string());
        let stopped = summary.stopped;
        summaries.push(summary);
        if stopped {
            break;
        }
    }

    if let Some(path) = &args.summary_json {
        let json = serde_json::to_vec_pretty(&summaries).context("Serializing run summaries")?;
        io_utils::write_atomic(path, &json)
            .with_context(|| format!("Writing run summaries to {path:?}"))?;
        info!("Run summaries written to {path:?}");
    }

    let failed = summaries
        .iter()
        .map(|summary| summary.failed.len())
        .sum::<usize>();
    if failed > 0 {
        return Err(anyhow!(
            "{failed} group(s) failed; they stay unmarked and will be retried on the next run"
        ));
    }
    Ok(())
}

fn handle_preview(args: &cli::PreviewArgs) -> Result<()> {
    let client = open_client(&args.workbook, &RetryPolicy::immediate())?;
    let table = match client.read_table(&args.sheet, args.range.as_deref()) {
        Ok(table) => table,
        Err(err) => {
            let sheets = client.list_sheets().unwrap_or_default();
            return Err(anyhow::Error::new(err).context(format!(
                "Reading sheet '{}' (available: {})",
                args.sheet,
                sheets.join(", ")
            )));
        }
    };
    let rows = table
        .display_rows()
        .into_iter()
        .take(args.rows)
        .collect::<Vec<_>>();
    print!("{}", render_table(table.columns(), &rows));
    info!(
        "Displayed {} of {} row(s) from '{}'",
        rows.len(),
        table.len(),
        args.sheet
    );
    Ok(())
}
