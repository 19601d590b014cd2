//! Durable keyed record stores.
//!
//! One JSON document per store, holding a map keyed by record id. Records are
//! pretty-printed so an operator can inspect them directly, and every change
//! is flushed synchronously through a temp-file rename so the on-disk view
//! never lags the in-memory view by more than one update.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info};

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("Store IO error at '{path}': {source}")]
    Io {
        /// Path involved.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Serialization failure.
    #[error("Store serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// A durable, human-inspectable keyed record store.
///
/// Records are kept in a `BTreeMap` so serialization order is deterministic:
/// applying the same update twice yields a byte-for-byte identical file.
/// Records are appended or updated, never deleted.
#[derive(Debug)]
pub struct JsonStore<T> {
    path: PathBuf,
    records: BTreeMap<String, T>,
}

impl<T> JsonStore<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    /// Open a store, loading existing records if the file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or an existing
    /// file cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }

        let records = if path.exists() {
            let contents = fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
            if contents.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&contents)?
            }
        } else {
            BTreeMap::new()
        };

        info!(path = %path.display(), records = records.len(), "Record store opened");
        Ok(Self { path, records })
    }

    /// Insert or update a record and flush synchronously.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails; the in-memory map is still
    /// updated so a retry re-flushes the same state.
    pub fn upsert(&mut self, key: &str, value: T) -> Result<(), StoreError> {
        self.records.insert(key.to_string(), value);
        self.flush()?;
        debug!(path = %self.path.display(), key = key, "Record persisted");
        Ok(())
    }

    /// Get a record by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&T> {
        self.records.get(key)
    }

    /// Clone out all records.
    #[must_use]
    pub fn values(&self) -> Vec<T> {
        self.records.values().cloned().collect()
    }

    /// Iterate records without cloning.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &T)> {
        self.records.iter()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the full map through a temp file and atomic rename, fsyncing
    /// before the swap.
    fn flush(&self) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(&self.records)?;

        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp_path).map_err(|e| io_err(&tmp_path, e))?;
            file.write_all(&json).map_err(|e| io_err(&tmp_path, e))?;
            file.sync_all().map_err(|e| io_err(&tmp_path, e))?;
        }
        fs::rename(&tmp_path, &self.path).map_err(|e| io_err(&self.path, e))?;
        Ok(())
    }
}
