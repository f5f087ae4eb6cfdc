use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Reconcile tabular sources and render numbered documents from templates",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run reconcile jobs: normalize, join, expand and deduplicate sources into one sheet
    Reconcile(ReconcileArgs),
    /// Render one document per complete, unfinished group
    Generate(GenerateArgs),
    /// Preview the first rows of a sheet in a formatted table
    Preview(PreviewArgs),
}

#[derive(Debug, Args)]
pub struct WorkbookArgs {
    /// Directory holding one delimited file per sheet
    #[arg(short = 'w', long = "workbook")]
    pub workbook: PathBuf,
    /// File extension of sheet files
    #[arg(long, default_value = "csv")]
    pub extension: String,
    /// Delimiter character (supports ',', 'tab', ';', '|'); follows the extension when omitted
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of sheet files (defaults to utf-8)
    #[arg(long)]
    pub encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct ReconcileArgs {
    #[command(flatten)]
    pub workbook: WorkbookArgs,
    /// YAML job file
    #[arg(short = 'c', long = "config")]
    pub config: PathBuf,
    /// Reconcile job to run (repeatable); all jobs when omitted
    #[arg(long = "job", action = clap::ArgAction::Append)]
    pub jobs: Vec<String>,
}

#[derive(Debug, Args)]
pub struct GenerateArgs {
    #[command(flatten)]
    pub workbook: WorkbookArgs,
    /// YAML job file
    #[arg(short = 'c', long = "config")]
    pub config: PathBuf,
    /// Document job to run (repeatable); all jobs when omitted
    #[arg(long = "document", action = clap::ArgAction::Append)]
    pub documents: Vec<String>,
    /// Render and report without writing documents, markers or counters
    #[arg(long)]
    pub dry_run: bool,
    /// Attempt at most this many groups per job
    #[arg(long)]
    pub limit: Option<usize>,
    /// Write the run summaries as JSON to this path
    #[arg(long = "summary-json")]
    pub summary_json: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct PreviewArgs {
    #[command(flatten)]
    pub workbook: WorkbookArgs,
    /// Sheet to preview
    #[arg(short = 's', long = "sheet")]
    pub sheet: String,
    /// A1 range whose first row is the header, e.g. `A2:F`
    #[arg(long)]
    pub range: Option<String>,
    /// Number of rows to display
    #[arg(long, default_value_t = 10)]
    pub rows: usize,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
