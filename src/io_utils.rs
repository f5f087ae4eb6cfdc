//! File-level helpers for the workbook client: delimiter and encoding
//! resolution, reading a delimited file into a raw grid, and atomic
//! replacement of a file's contents.

use std::{
    fs::{self, File},
    io::{BufReader, Read, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8};
use uuid::Uuid;

use crate::client::Grid;

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn resolve_delimiter(path: &Path, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    })
}

pub fn open_csv_reader<R>(reader: R, delimiter: u8) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(false)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(anyhow!(
            "Failed to decode text with encoding {}",
            encoding.name()
        ))
    } else {
        Ok(text.into_owned())
    }
}

pub fn decode_record(record: &csv::ByteRecord, encoding: &'static Encoding) -> Result<Vec<String>> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}

/// Every record of a delimited file, header row included, rows left ragged.
pub fn read_grid(path: &Path, delimiter: u8, encoding: &'static Encoding) -> Result<Grid> {
    let file = File::open(path).with_context(|| format!("Opening sheet file {path:?}"))?;
    let mut reader = open_csv_reader(BufReader::new(file), delimiter);
    let mut grid = Vec::new();
    for (idx, record) in reader.byte_records().enumerate() {
        let record = record.with_context(|| format!("Reading row {} of {path:?}", idx + 1))?;
        grid.push(
            decode_record(&record, encoding)
                .with_context(|| format!("Decoding row {} of {path:?}", idx + 1))?,
        );
    }
    Ok(grid)
}

pub fn encode_grid(grid: &[Vec<String>], delimiter: u8, encoding: &'static Encoding) -> Result<Vec<u8>> {
    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(delimiter)
        .quote_style(QuoteStyle::Always)
        .double_quote(true)
        .flexible(true);
    let mut writer = builder.from_writer(Vec::new());
    for row in grid {
        writer.write_record(row).context("Serializing row")?;
    }
    let utf8 = writer
        .into_inner()
        .map_err(|err| anyhow!("Flushing rows: {}", err.error()))?;
    if encoding == UTF_8 {
        return Ok(utf8);
    }
    let text = String::from_utf8(utf8).context("Rows are not valid UTF-8")?;
    let (encoded, _, had_errors) = encoding.encode(&text);
    if had_errors {
        return Err(anyhow!("Failed to encode text using {}", encoding.name()));
    }
    Ok(encoded.into_owned())
}

/// Replaces `path` by writing a sibling temporary file and renaming it over
/// the target, so readers see either the old or the new contents.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let temp = temp_sibling(path);
    let result = (|| -> Result<()> {
        let mut file =
            File::create(&temp).with_context(|| format!("Creating temporary file {temp:?}"))?;
        file.write_all(bytes)
            .with_context(|| format!("Writing temporary file {temp:?}"))?;
        file.sync_all()
            .with_context(|| format!("Syncing temporary file {temp:?}"))?;
        fs::rename(&temp, path).with_context(|| format!("Replacing {path:?}"))
    })();
    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }
    result
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "sheet".to_string());
    path.with_file_name(format!(".{name}.{}.tmp", Uuid::new_v4().simple()))
}
