//! Error kinds surfaced by the mapping workflow.
//!
//! [`MapFieldsError`] is captured per request during the before-handling step
//! and re-raised by [`crate::workflow::MapFieldsOutcome::fields_mapped`]. It is
//! `Clone` so the same captured error can be raised on every access.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MapFieldsError {
    #[error("No file contents were uploaded")]
    MissingFileContents,

    #[error("Mapping workflow is in an inconsistent state: no stored upload or no mapping parameters")]
    InconsistentState,

    #[error("Malformed CSV{}: {message}", .record.map(|r| format!(" at record {r}")).unwrap_or_default())]
    MalformedCsv {
        record: Option<u64>,
        message: String,
    },

    #[error("Invalid column correspondence: {0}")]
    InvalidCorrespondence(String),

    #[error("Storage failure: {0}")]
    Storage(String),

    #[error("Session failure: {0}")]
    Session(String),
}

impl MapFieldsError {
    pub(crate) fn storage(err: anyhow::Error) -> Self {
        MapFieldsError::Storage(format!("{err:#}"))
    }

    pub(crate) fn session(err: anyhow::Error) -> Self {
        MapFieldsError::Session(format!("{err:#}"))
    }

    pub fn is_malformed_csv(&self) -> bool {
        matches!(self, MapFieldsError::MalformedCsv { .. })
    }
}

impl From<csv::Error> for MapFieldsError {
    fn from(err: csv::Error) -> Self {
        let record = err.position().map(|pos| pos.record() + 1);
        let message = match err.kind() {
            csv::ErrorKind::UnequalLengths {
                expected_len, len, ..
            } => format!("found record with {len} field(s), expected {expected_len}"),
            _ => err.to_string(),
        };
        if let csv::ErrorKind::Io(_) = err.kind() {
            return MapFieldsError::Storage(message);
        }
        MapFieldsError::MalformedCsv { record, message }
    }
}
