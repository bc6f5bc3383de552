//! Workflow configuration, optionally loaded from a YAML file.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};

use crate::io_utils;

pub const DEFAULT_FILE_FIELD: &str = "file";
pub const DEFAULT_FIELDS_PARAM: &str = "fields";
pub const DEFAULT_CONTAINER: &str = "uploads";
pub const DEFAULT_PREVIEW_ROWS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapFieldsConfig {
    /// Name of the upload form field.
    pub file_field: String,
    /// Parameter group holding the submitted column => field mapping.
    pub fields_param: String,
    /// Parameter groups to flatten and expose alongside the preview.
    pub params: Vec<String>,
    /// Actions the workflow runs for; empty means every action.
    pub actions: Vec<String>,
    pub container: String,
    pub preview_rows: usize,
    /// Static expected-field list; callers may supply a dynamic one instead.
    pub expected_fields: Vec<String>,
    pub input_encoding: Option<String>,
}

impl Default for MapFieldsConfig {
    fn default() -> Self {
        Self {
            file_field: DEFAULT_FILE_FIELD.to_string(),
            fields_param: DEFAULT_FIELDS_PARAM.to_string(),
            params: Vec::new(),
            actions: Vec::new(),
            container: DEFAULT_CONTAINER.to_string(),
            preview_rows: DEFAULT_PREVIEW_ROWS,
            expected_fields: Vec::new(),
            input_encoding: None,
        }
    }
}

impl MapFieldsConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Opening config file {path:?}"))?;
        Self::from_yaml(&raw).with_context(|| format!("Parsing config file {path:?}"))
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn encoding(&self) -> Result<&'static Encoding> {
        io_utils::resolve_encoding(self.input_encoding.as_deref())
    }

    pub fn handles(&self, action: &str) -> bool {
        self.actions.is_empty() || self.actions.iter().any(|candidate| candidate == action)
    }
}
