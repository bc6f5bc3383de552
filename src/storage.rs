//! Blob storage for uploaded CSV files between the two workflow phases.
//!
//! The workflow only needs three operations, expressed by the [`Storage`]
//! trait. [`FsStorage`] keeps objects on disk under a root directory and
//! [`MemoryStorage`] keeps them in process, which is what the tests use.

use std::{
    collections::HashMap,
    fs::{self, File},
    io::{self, BufReader, Cursor, Read},
    path::{Component, Path, PathBuf},
    sync::Mutex,
};

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use encoding_rs::Encoding;
use log::debug;
use uuid::Uuid;

use crate::{error::MapFieldsError, io_utils};

const CONTENT_TYPE_SUFFIX: &str = ".content-type";

pub trait Storage {
    fn store(
        &self,
        key: &str,
        container: &str,
        content: &mut dyn Read,
        content_type: Option<&str>,
    ) -> Result<()>;

    fn find(&self, key: &str, container: &str) -> Result<Box<dyn Read + '_>>;

    fn delete(&self, key: &str, container: &str) -> Result<()>;
}

/// Derives a unique storage key for an upload.
///
/// Layout: `csv_<account>/<unix seconds>/<uuid prefix>/<file name>`. Only the
/// last path component of `original_filename` is kept.
pub fn upload_key(account: &str, uploaded_at: DateTime<Utc>, original_filename: &str) -> String {
    let file_name = Path::new(original_filename)
        .file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.replace('\\', "_"))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "upload.csv".to_string());
    let nonce = Uuid::new_v4().simple().to_string();
    format!(
        "csv_{account}/{}/{}/{file_name}",
        uploaded_at.timestamp(),
        &nonce[..8]
    )
}

/// A CSV upload held by a [`Storage`] backend.
///
/// Every [`StoredCsv::open`] starts a fresh read, so callers can make as many
/// independent passes as they need.
#[derive(Clone)]
pub struct StoredCsv<'s> {
    storage: &'s dyn Storage,
    container: String,
    key: String,
    encoding: &'static Encoding,
}

impl<'s> StoredCsv<'s> {
    pub fn new(
        storage: &'s dyn Storage,
        container: impl Into<String>,
        key: impl Into<String>,
        encoding: &'static Encoding,
    ) -> Self {
        Self {
            storage,
            container: container.into(),
            key: key.into(),
            encoding,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    pub fn open(&self) -> Result<Box<dyn Read + 's>, MapFieldsError> {
        self.storage
            .find(&self.key, &self.container)
            .map_err(MapFieldsError::storage)
    }

    /// Parses at most `limit` records from the start of the stored file.
    pub fn preview(&self, limit: usize) -> Result<Vec<Vec<String>>, MapFieldsError> {
        let reader = self.open()?;
        io_utils::read_records(reader, limit, self.encoding)
    }

    /// Parses the whole stored file, so a malformed record anywhere fails,
    /// and keeps only the first `limit` records.
    pub fn checked_preview(&self, limit: usize) -> Result<Vec<Vec<String>>, MapFieldsError> {
        let reader = self.open()?;
        let (rows, total) = io_utils::scan_records(reader, limit, self.encoding)?;
        debug!("Parsed {total} record(s) from {}", self.key);
        Ok(rows)
    }
}

pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str, container: &str) -> Result<PathBuf> {
        let mut path = self.root.join(checked_relative(container)?);
        path.push(checked_relative(key)?);
        Ok(path)
    }
}

/// Rejects keys that would escape the storage root.
fn checked_relative(segment: &str) -> Result<&Path> {
    let path = Path::new(segment);
    if segment.is_empty() {
        bail!("Storage path segment must not be empty");
    }
    if path
        .components()
        .any(|component| !matches!(component, Component::Normal(_)))
    {
        bail!("Storage path '{segment}' must be relative and must not contain '..'");
    }
    Ok(path)
}

impl Storage for FsStorage {
    fn store(
        &self,
        key: &str,
        container: &str,
        content: &mut dyn Read,
        content_type: Option<&str>,
    ) -> Result<()> {
        let path = self.object_path(key, container)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Creating storage directory {parent:?}"))?;
        }
        let mut file =
            File::create(&path).with_context(|| format!("Creating stored object {path:?}"))?;
        io::copy(content, &mut file).with_context(|| format!("Writing stored object {path:?}"))?;
        if let Some(content_type) = content_type {
            let mut sidecar = path.clone().into_os_string();
            sidecar.push(CONTENT_TYPE_SUFFIX);
            fs::write(&sidecar, content_type)
                .with_context(|| format!("Writing content type for {path:?}"))?;
        }
        Ok(())
    }

    fn find(&self, key: &str, container: &str) -> Result<Box<dyn Read + '_>> {
        let path = self.object_path(key, container)?;
        let file = File::open(&path).with_context(|| format!("Opening stored object {path:?}"))?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn delete(&self, key: &str, container: &str) -> Result<()> {
        let path = self.object_path(key, container)?;
        fs::remove_file(&path).with_context(|| format!("Deleting stored object {path:?}"))?;
        let mut sidecar = path.into_os_string();
        sidecar.push(CONTENT_TYPE_SUFFIX);
        match fs::remove_file(&sidecar) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("Deleting content type {sidecar:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub content: Vec<u8>,
    pub content_type: Option<String>,
}

#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<(String, String), StoredObject>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str, container: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .ok()?
            .get(&(container.to_string(), key.to_string()))
            .cloned()
    }

    /// Overwrites an object in place, bypassing the upload path.
    pub fn put(&self, key: &str, container: &str, content: impl Into<Vec<u8>>) {
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert(
                (container.to_string(), key.to_string()),
                StoredObject {
                    content: content.into(),
                    content_type: None,
                },
            );
        }
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|objects| objects.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Storage for MemoryStorage {
    fn store(
        &self,
        key: &str,
        container: &str,
        content: &mut dyn Read,
        content_type: Option<&str>,
    ) -> Result<()> {
        let mut buffer = Vec::new();
        content
            .read_to_end(&mut buffer)
            .with_context(|| format!("Reading upload for {key}"))?;
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| anyhow!("Memory storage lock poisoned"))?;
        objects.insert(
            (container.to_string(), key.to_string()),
            StoredObject {
                content: buffer,
                content_type: content_type.map(str::to_string),
            },
        );
        Ok(())
    }

    fn find(&self, key: &str, container: &str) -> Result<Box<dyn Read + '_>> {
        let object = self
            .get(key, container)
            .ok_or_else(|| anyhow!("No stored object '{key}' in container '{container}'"))?;
        Ok(Box::new(Cursor::new(object.content)))
    }

    fn delete(&self, key: &str, container: &str) -> Result<()> {
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| anyhow!("Memory storage lock poisoned"))?;
        objects
            .remove(&(container.to_string(), key.to_string()))
            .map(|_| ())
            .ok_or_else(|| anyhow!("No stored object '{key}' in container '{container}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn upload_key_keeps_account_timestamp_and_file_name() {
        let at = Utc.with_ymd_and_hms(2024, 5, 6, 12, 0, 0).unwrap();
        let key = upload_key("42", at, "/tmp/uploads/people.csv");
        let parts: Vec<&str> = key.split('/').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "csv_42");
        assert_eq!(parts[1], at.timestamp().to_string());
        assert_eq!(parts[2].len(), 8);
        assert_eq!(parts[3], "people.csv");
    }

    #[test]
    fn upload_key_is_unique_within_the_same_second() {
        let at = Utc.with_ymd_and_hms(2024, 5, 6, 12, 0, 0).unwrap();
        assert_ne!(
            upload_key("1", at, "a.csv"),
            upload_key("1", at, "a.csv")
        );
    }

    #[test]
    fn fs_storage_round_trips_and_deletes() {
        let dir = tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        let mut content = "a,b\n1,2\n".as_bytes();
        storage
            .store("csv_1/10/abc/data.csv", "uploads", &mut content, Some("text/csv"))
            .unwrap();

        let mut text = String::new();
        storage
            .find("csv_1/10/abc/data.csv", "uploads")
            .unwrap()
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, "a,b\n1,2\n");

        storage.delete("csv_1/10/abc/data.csv", "uploads").unwrap();
        assert!(storage.find("csv_1/10/abc/data.csv", "uploads").is_err());
    }

    #[test]
    fn fs_storage_rejects_escaping_keys() {
        let dir = tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        let mut content = "x".as_bytes();
        assert!(
            storage
                .store("../outside.csv", "uploads", &mut content, None)
                .is_err()
        );
    }
}
