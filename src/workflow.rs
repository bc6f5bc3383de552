//! The two-phase upload and mapping workflow.
//!
//! Phase one stores an uploaded CSV and records its key in the session.
//! Phase two reads the submitted column mapping, parses the whole stored file
//! (keeping a short preview) and hands the caller what it needs to iterate mapped rows. Cleanup after a
//! successful phase two deletes the stored file and empties the session.
//!
//! [`MapFields::before`] and [`MapFields::cleanup`] are pure transitions over
//! [`WorkflowState`]; [`MapFields::before_action`] and
//! [`MapFields::after_action`] wrap them with a [`SessionStore`].

use std::{collections::BTreeMap, fmt};

use anyhow::Result;
use chrono::Utc;
use encoding_rs::Encoding;
use log::{debug, info, warn};

use crate::{
    config::MapFieldsConfig,
    error::MapFieldsError,
    mapping::{Correspondence, MappedFields},
    params::{self, ParameterPair, Params},
    session::{SessionStore, WorkflowState},
    storage::{self, Storage, StoredCsv},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub original_filename: String,
    pub content_type: Option<String>,
    pub content: Vec<u8>,
}

impl UploadedFile {
    pub fn new(original_filename: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            original_filename: original_filename.into(),
            content_type: Some("text/csv".to_string()),
            content: content.into(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.content.is_empty()
    }
}

/// The inputs of one request that reach the workflow.
#[derive(Debug, Clone, Default)]
pub struct MapFieldsRequest {
    /// Account the upload belongs to; part of the storage key.
    pub account: String,
    pub params: Params,
    pub files: BTreeMap<String, UploadedFile>,
}

impl MapFieldsRequest {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            ..Self::default()
        }
    }

    pub fn with_file(mut self, field: impl Into<String>, file: UploadedFile) -> Self {
        self.files.insert(field.into(), file);
        self
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// The upload in `field`, ignoring empty uploads.
    pub fn file(&self, field: &str) -> Option<&UploadedFile> {
        self.files.get(field).filter(|file| !file.is_blank())
    }
}

type FieldsFn = dyn Fn(&Params) -> Vec<String> + Send + Sync;

/// Logical fields the caller expects, fixed or derived from request parameters.
pub enum ExpectedFields {
    Static(Vec<String>),
    Dynamic(Box<FieldsFn>),
}

impl ExpectedFields {
    pub fn fixed<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ExpectedFields::Static(fields.into_iter().map(Into::into).collect())
    }

    pub fn dynamic<F>(resolve: F) -> Self
    where
        F: Fn(&Params) -> Vec<String> + Send + Sync + 'static,
    {
        ExpectedFields::Dynamic(Box::new(resolve))
    }

    pub fn resolve(&self, params: &Params) -> Vec<String> {
        match self {
            ExpectedFields::Static(fields) => fields.clone(),
            ExpectedFields::Dynamic(resolve) => resolve(params),
        }
    }
}

impl fmt::Debug for ExpectedFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedFields::Static(fields) => f.debug_tuple("Static").field(fields).finish(),
            ExpectedFields::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// Per-request results. Nothing here is persisted in the session.
#[derive(Debug, Clone, Default)]
pub struct MapFieldsOutcome {
    mapped_fields: Option<Vec<Vec<String>>>,
    rows: Vec<Vec<String>>,
    fields: Vec<(String, usize)>,
    parameters: Vec<ParameterPair>,
    error: Option<MapFieldsError>,
    storage_key: Option<String>,
    correspondence: Option<Correspondence>,
    expected_fields: Vec<String>,
}

impl MapFieldsOutcome {
    /// The mapping preview, or the error captured while producing this outcome.
    ///
    /// `Ok(None)` means this request was an upload, not a mapping submission.
    pub fn fields_mapped(&self) -> Result<Option<&[Vec<String>]>, MapFieldsError> {
        match &self.error {
            Some(err) => Err(err.clone()),
            None => Ok(self.mapped_fields.as_deref()),
        }
    }

    pub fn mapped_fields(&self) -> Option<&[Vec<String>]> {
        self.mapped_fields.as_deref()
    }

    /// Up to `preview_rows` records of the stored file.
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Expected fields paired with their zero-based positions.
    pub fn fields(&self) -> &[(String, usize)] {
        &self.fields
    }

    pub fn parameters(&self) -> &[ParameterPair] {
        &self.parameters
    }

    pub fn error(&self) -> Option<&MapFieldsError> {
        self.error.as_ref()
    }

    pub fn storage_key(&self) -> Option<&str> {
        self.storage_key.as_deref()
    }

    pub fn correspondence(&self) -> Option<&Correspondence> {
        self.correspondence.as_ref()
    }

    pub fn expected_fields(&self) -> &[String] {
        &self.expected_fields
    }

    fn capture(&mut self, err: MapFieldsError) {
        warn!("Map fields error captured: {err}");
        self.error = Some(err);
    }

    fn clear(&mut self) {
        *self = MapFieldsOutcome::default();
    }
}

#[derive(Debug, Clone)]
pub struct Transition {
    pub state: WorkflowState,
    pub outcome: MapFieldsOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cleanup {
    pub state: WorkflowState,
    /// Key of the stored object removed by this cleanup.
    pub deleted: Option<String>,
    pub error: Option<MapFieldsError>,
}

pub struct MapFields<S: Storage> {
    config: MapFieldsConfig,
    expected: ExpectedFields,
    storage: S,
    encoding: &'static Encoding,
}

impl<S: Storage> MapFields<S> {
    pub fn new(config: MapFieldsConfig, expected: ExpectedFields, storage: S) -> Result<Self> {
        let encoding = config.encoding()?;
        Ok(Self {
            config,
            expected,
            storage,
            encoding,
        })
    }

    pub fn config(&self) -> &MapFieldsConfig {
        &self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn handles(&self, action: &str) -> bool {
        self.config.handles(action)
    }

    fn stored(&self, key: &str) -> StoredCsv<'_> {
        StoredCsv::new(&self.storage, &self.config.container, key, self.encoding)
    }

    /// Runs the before-handling step for one request.
    pub fn before(&self, state: &WorkflowState, request: &MapFieldsRequest) -> Transition {
        let upload = request.file(&self.config.file_field);
        debug!("Map fields session state: {state:?}");
        debug!(
            "Upload field '{}' present: {}",
            self.config.file_field,
            upload.is_some()
        );

        let mut outcome = MapFieldsOutcome::default();
        let mut next = state.clone();

        if state.is_empty() || upload.is_some() {
            let Some(file) = upload else {
                outcome.capture(MapFieldsError::MissingFileContents);
                return Transition {
                    state: WorkflowState::Empty,
                    outcome,
                };
            };
            match self.store_upload(request, file) {
                Ok(key) => {
                    if let Some(previous) = state.storage_key() {
                        self.discard_previous(previous);
                    }
                    outcome.storage_key = Some(key.clone());
                    next = WorkflowState::AwaitingMapping { storage_key: key };
                }
                Err(err) => {
                    outcome.capture(err);
                    return Transition {
                        state: WorkflowState::Empty,
                        outcome,
                    };
                }
            }
        } else {
            let submitted = request.params.get(&self.config.fields_param);
            match (state.storage_key(), submitted) {
                (Some(key), Some(submitted)) => {
                    outcome.storage_key = Some(key.to_string());
                    match Correspondence::from_params(submitted) {
                        Ok(correspondence) => {
                            outcome.correspondence = Some(correspondence);
                            match self.stored(key).checked_preview(self.config.preview_rows) {
                                Ok(preview) => outcome.mapped_fields = Some(preview),
                                Err(err) => outcome.capture(err),
                            }
                        }
                        Err(err) => outcome.capture(err),
                    }
                }
                _ => {
                    next = WorkflowState::Empty;
                    outcome.capture(MapFieldsError::InconsistentState);
                }
            }
        }

        if let (true, Some(key)) = (outcome.error.is_none(), next.storage_key()) {
            match self.stored(key).preview(self.config.preview_rows) {
                Ok(rows) => outcome.rows = rows,
                Err(err) => outcome.capture(err),
            }
        }

        if outcome.error.is_none() {
            let expected = self.expected.resolve(&request.params);
            outcome.fields = expected
                .iter()
                .enumerate()
                .map(|(idx, field)| (field.clone(), idx))
                .collect();
            outcome.expected_fields = expected;
            outcome.parameters = params::flatten_groups(&request.params, &self.config.params);
        }

        Transition {
            state: next,
            outcome,
        }
    }

    fn store_upload(
        &self,
        request: &MapFieldsRequest,
        file: &UploadedFile,
    ) -> Result<String, MapFieldsError> {
        let key = storage::upload_key(&request.account, Utc::now(), &file.original_filename);
        let mut content = file.content.as_slice();
        self.storage
            .store(
                &key,
                &self.config.container,
                &mut content,
                file.content_type.as_deref(),
            )
            .map_err(MapFieldsError::storage)?;
        info!(
            "Stored upload '{}' ({} byte(s)) as {key}",
            file.original_filename,
            file.content.len()
        );
        Ok(key)
    }

    /// Removes an upload that a newer upload replaced. Failures are only logged;
    /// the new upload stands either way.
    fn discard_previous(&self, key: &str) {
        match self.storage.delete(key, &self.config.container) {
            Ok(()) => info!("Deleted replaced upload {key}"),
            Err(err) => warn!("Failed to delete replaced upload {key}: {err:#}"),
        }
    }

    /// Runs the after-handling step: once a mapping preview was produced, the
    /// stored file is deleted and the session and per-request results reset.
    pub fn cleanup(&self, state: &WorkflowState, outcome: &mut MapFieldsOutcome) -> Cleanup {
        if outcome.mapped_fields.is_none() {
            return Cleanup {
                state: state.clone(),
                deleted: None,
                error: None,
            };
        }
        let mut deleted = None;
        let mut error = None;
        if let Some(key) = state.storage_key() {
            match self.storage.delete(key, &self.config.container) {
                Ok(()) => {
                    info!("Deleted stored upload {key}");
                    deleted = Some(key.to_string());
                }
                Err(err) => {
                    warn!("Failed to delete stored upload {key}: {err:#}");
                    error = Some(MapFieldsError::storage(err));
                }
            }
        }
        outcome.clear();
        Cleanup {
            state: WorkflowState::Empty,
            deleted,
            error,
        }
    }

    /// Loads the session, runs [`MapFields::before`] and saves the next state.
    pub fn before_action(
        &self,
        session: &mut dyn SessionStore,
        request: &MapFieldsRequest,
    ) -> Result<MapFieldsOutcome, MapFieldsError> {
        let state = WorkflowState::from_entry(session.load().map_err(MapFieldsError::session)?);
        let transition = self.before(&state, request);
        session
            .save(transition.state.to_entry().as_ref())
            .map_err(MapFieldsError::session)?;
        Ok(transition.outcome)
    }

    /// Loads the session, runs [`MapFields::cleanup`] and saves the result.
    pub fn after_action(
        &self,
        session: &mut dyn SessionStore,
        outcome: &mut MapFieldsOutcome,
    ) -> Result<(), MapFieldsError> {
        let state = WorkflowState::from_entry(session.load().map_err(MapFieldsError::session)?);
        let cleanup = self.cleanup(&state, outcome);
        if cleanup.state != state {
            session
                .save(cleanup.state.to_entry().as_ref())
                .map_err(MapFieldsError::session)?;
        }
        match cleanup.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Builds the field mapper for a successful mapping submission.
    ///
    /// Re-raises any error captured in `outcome`. Must be used before cleanup
    /// removes the stored file.
    pub fn mapper(
        &self,
        outcome: &MapFieldsOutcome,
        skip_first_row: bool,
    ) -> Result<MappedFields<'_>, MapFieldsError> {
        outcome.fields_mapped()?;
        let (Some(key), Some(correspondence)) =
            (outcome.storage_key(), outcome.correspondence())
        else {
            return Err(MapFieldsError::InconsistentState);
        };
        Ok(MappedFields::new(
            self.stored(key),
            outcome.expected_fields(),
            correspondence,
            skip_first_row,
        ))
    }
}
