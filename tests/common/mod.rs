#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::{TempDir, tempdir};

/// Returns the absolute path to a fixture under `tests/data`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

/// Scratch directory holding a private copy of the fixture workbook.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates an empty workspace with a `book/` directory.
    pub fn new() -> Self {
        let temp_dir = tempdir().expect("temp dir");
        fs::create_dir(temp_dir.path().join("book")).expect("create book dir");
        Self { temp_dir }
    }

    /// Creates a workspace seeded with every sheet of `tests/data/book`.
    pub fn with_fixture_book() -> Self {
        let workspace = Self::new();
        for entry in fs::read_dir(fixture_path("book")).expect("read fixture book") {
            let path = entry.expect("fixture entry").path();
            let name = path.file_name().expect("file name");
            fs::copy(&path, workspace.book().join(name)).expect("copy fixture sheet");
        }
        workspace
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn book(&self) -> PathBuf {
        self.temp_dir.path().join("book")
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        fs::write(&path, contents).expect("write temp file contents");
        path
    }

    /// Copies the fixture job file into the workspace.
    pub fn jobs(&self) -> PathBuf {
        let contents = fs::read_to_string(fixture_path("jobs.yaml")).expect("read jobs.yaml");
        self.write("jobs.yaml", &contents)
    }

    pub fn sheet(&self, name: &str) -> String {
        fs::read_to_string(self.book().join(format!("{name}.csv"))).expect("read sheet")
    }

    pub fn has_sheet(&self, name: &str) -> bool {
        self.book().join(format!("{name}.csv")).is_file()
    }
}
