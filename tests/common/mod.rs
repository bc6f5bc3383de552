#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use csv_map_fields::config::MapFieldsConfig;
use csv_map_fields::params::Params;
use csv_map_fields::storage::MemoryStorage;
use csv_map_fields::workflow::{ExpectedFields, MapFields};
use serde_json::Value;
use tempfile::{TempDir, tempdir};

pub const PEOPLE_CSV: &str = "Full Name,E-Mail Address,Age\nAnn Lee,ann@example.com,34\nBo Chen,bo@example.com,29\nCy Diaz,cy@example.com,41\n";

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }
}

pub fn params(value: Value) -> Params {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other:?}"),
    }
}

pub fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

/// Workflow over in-memory storage expecting `name`, `email`, `age`.
pub fn people_workflow(config: MapFieldsConfig) -> MapFields<MemoryStorage> {
    MapFields::new(
        config,
        ExpectedFields::fixed(["name", "email", "age"]),
        MemoryStorage::new(),
    )
    .expect("workflow")
}
