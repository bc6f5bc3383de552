//! Session-scoped workflow state.
//!
//! Between the upload request and the mapping request the only thing that
//! survives is a [`SessionEntry`] naming the stored object, persisted through
//! a [`SessionStore`]. [`WorkflowState`] is the typed view of that entry.

use std::{
    fs::{self, File},
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Persisted layout: `{"file": "<storage key>"}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowState {
    /// No upload in progress.
    Empty,
    /// The file is stored under `storage_key` and the mapping has not been submitted.
    AwaitingMapping { storage_key: String },
    /// A session entry exists but no upload was recorded in it.
    Incomplete,
}

impl WorkflowState {
    pub fn from_entry(entry: Option<SessionEntry>) -> Self {
        match entry {
            None => WorkflowState::Empty,
            Some(SessionEntry { file: Some(key) }) => {
                WorkflowState::AwaitingMapping { storage_key: key }
            }
            Some(SessionEntry { file: None }) => WorkflowState::Incomplete,
        }
    }

    pub fn to_entry(&self) -> Option<SessionEntry> {
        match self {
            WorkflowState::Empty => None,
            WorkflowState::AwaitingMapping { storage_key } => Some(SessionEntry {
                file: Some(storage_key.clone()),
            }),
            WorkflowState::Incomplete => Some(SessionEntry::default()),
        }
    }

    pub fn storage_key(&self) -> Option<&str> {
        match self {
            WorkflowState::AwaitingMapping { storage_key } => Some(storage_key),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, WorkflowState::Empty)
    }
}

pub trait SessionStore {
    fn load(&self) -> Result<Option<SessionEntry>>;
    fn save(&mut self, entry: Option<&SessionEntry>) -> Result<()>;
}

/// Session persisted as a small JSON document; a missing file is an empty session.
pub struct JsonFileSession {
    path: PathBuf,
}

impl JsonFileSession {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for JsonFileSession {
    fn load(&self) -> Result<Option<SessionEntry>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let file = File::open(&self.path)
            .with_context(|| format!("Opening session file {:?}", self.path))?;
        let entry = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing session file {:?}", self.path))?;
        Ok(Some(entry))
    }

    fn save(&mut self, entry: Option<&SessionEntry>) -> Result<()> {
        match entry {
            Some(entry) => {
                let file = File::create(&self.path)
                    .with_context(|| format!("Creating session file {:?}", self.path))?;
                serde_json::to_writer_pretty(file, entry).context("Writing session JSON")
            }
            None if self.path.exists() => fs::remove_file(&self.path)
                .with_context(|| format!("Removing session file {:?}", self.path)),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemorySession {
    entry: Option<SessionEntry>,
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(entry: SessionEntry) -> Self {
        Self { entry: Some(entry) }
    }
}

impl SessionStore for MemorySession {
    fn load(&self) -> Result<Option<SessionEntry>> {
        Ok(self.entry.clone())
    }

    fn save(&mut self, entry: Option<&SessionEntry>) -> Result<()> {
        self.entry = entry.cloned();
        Ok(())
    }
}
