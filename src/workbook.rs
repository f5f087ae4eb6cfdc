//! A workbook kept as a directory of delimited files, one file per sheet.
//!
//! `book/CC.csv` is sheet `CC`, `book/CN-Template.csv` a document template.
//! Every write replaces the whole file atomically.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Result, anyhow};
use encoding_rs::Encoding;
use log::debug;

use crate::{
    client::{CellWrite, Grid, SheetClient, apply_cell_writes, select_range, table_to_grid},
    error::SheetError,
    io_utils,
    table::Table,
};

#[derive(Debug, Clone)]
pub struct CsvWorkbook {
    root: PathBuf,
    extension: String,
    delimiter: u8,
    encoding: &'static Encoding,
}

impl CsvWorkbook {
    pub fn open(
        root: &Path,
        extension: &str,
        delimiter: Option<u8>,
        encoding: &'static Encoding,
    ) -> Result<Self> {
        if !root.is_dir() {
            return Err(anyhow!("Workbook directory {root:?} does not exist"));
        }
        let extension = extension.trim_start_matches('.').to_string();
        let sample = root.join(format!("sheet.{extension}"));
        Ok(Self {
            root: root.to_path_buf(),
            delimiter: io_utils::resolve_delimiter(&sample, delimiter),
            extension,
            encoding,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sheet_path(&self, sheet: &str) -> Result<PathBuf, String> {
        let trimmed = sheet.trim();
        if trimmed.is_empty()
            || trimmed.starts_with('.')
            || trimmed.contains(['/', '\\'])
        {
            return Err(format!("'{sheet}' is not a valid sheet name"));
        }
        Ok(self.root.join(format!("{trimmed}.{}", self.extension)))
    }

    fn load(&self, sheet: &str) -> Result<Option<Grid>, SheetError> {
        let path = self
            .sheet_path(sheet)
            .map_err(|reason| SheetError::SourceUnavailable {
                source_id: sheet.to_string(),
                reason,
            })?;
        if !path.is_file() {
            return Ok(None);
        }
        io_utils::read_grid(&path, self.delimiter, self.encoding)
            .map(Some)
            .map_err(|err| SheetError::SourceUnavailable {
                source_id: sheet.to_string(),
                reason: format!("{err:#}"),
            })
    }

    fn store(&self, sheet: &str, grid: &[Vec<String>]) -> Result<(), SheetError> {
        let rejected = |reason: String| SheetError::WriteRejected {
            document: sheet.to_string(),
            reason,
        };
        let path = self.sheet_path(sheet).map_err(rejected)?;
        let bytes = io_utils::encode_grid(grid, self.delimiter, self.encoding)
            .map_err(|err| rejected(format!("{err:#}")))?;
        io_utils::write_atomic(&path, &bytes)
            .map_err(|err| SheetError::Transient(format!("{err:#}")))?;
        debug!("Wrote {} row(s) to {path:?}", grid.len());
        Ok(())
    }
}

impl SheetClient for CsvWorkbook {
    fn read_grid(&self, source_id: &str, selector: Option<&str>) -> Result<Grid, SheetError> {
        let grid = self
            .load(source_id)?
            .ok_or_else(|| SheetError::SourceUnavailable {
                source_id: source_id.to_string(),
                reason: format!("no {source_id}.{} in {:?}", self.extension, self.root),
            })?;
        select_range(source_id, &grid, selector)
    }

    fn write_table(&self, destination_id: &str, table: &Table) -> Result<(), SheetError> {
        self.store(destination_id, &table_to_grid(table))
    }

    fn copy_template(&self, template_id: &str, new_id: &str) -> Result<(), SheetError> {
        let template = self
            .load(template_id)
            .map_err(|_| SheetError::TemplateNotFound(template_id.to_string()))?
            .ok_or_else(|| SheetError::TemplateNotFound(template_id.to_string()))?;
        self.store(new_id, &template)
    }

    fn write_cells(&self, document_id: &str, writes: &[CellWrite]) -> Result<(), SheetError> {
        let mut grid = self
            .load(document_id)?
            .ok_or_else(|| SheetError::WriteRejected {
                document: document_id.to_string(),
                reason: "document does not exist".to_string(),
            })?;
        apply_cell_writes(&mut grid, writes);
        self.store(document_id, &grid)
    }

    fn list_sheets(&self) -> Result<Vec<String>, SheetError> {
        let entries = fs::read_dir(&self.root).map_err(|err| SheetError::SourceUnavailable {
            source_id: self.root.display().to_string(),
            reason: err.to_string(),
        })?;
        let mut sheets = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .and_then(|ext| ext.to_str())
                        .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.extension))
            })
            .filter_map(|path| {
                path.file_stem()
                    .and_then(|stem| stem.to_str())
                    .filter(|stem| !stem.starts_with('.'))
                    .map(str::to_string)
            })
            .collect::<Vec<_>>();
        sheets.sort();
        Ok(sheets)
    }
}
