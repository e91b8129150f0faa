//! JSON document storage for sessions
//!
//! The whole store is persisted as one `{ session_id: Session }` document.
//! Writes go to a sibling temporary file that is then renamed over the
//! target, so a crash mid-write leaves the previous document intact.

use crate::error::{ParleyError, Result};
use crate::session::SessionStore;
use anyhow::Context;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

const DOCUMENT_NAME: &str = "sessions.json";

/// File-backed session document
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    /// Create a storage instance in the user's data directory
    ///
    /// `PARLEY_STORAGE_PATH` overrides the location.
    ///
    /// # Errors
    ///
    /// Returns `ParleyError::Storage` if no data directory can be determined
    /// or created
    pub fn new() -> Result<Self> {
        if let Ok(override_path) = std::env::var("PARLEY_STORAGE_PATH") {
            return Self::new_with_path(override_path);
        }

        let proj_dirs = ProjectDirs::from("dev", "parley", "parley")
            .ok_or_else(|| ParleyError::Storage("Could not determine data directory".into()))?;

        Self::new_with_path(proj_dirs.data_dir().join(DOCUMENT_NAME))
    }

    /// Create a storage instance for an explicit document path
    ///
    /// # Examples
    ///
    /// ```
    /// use parley::storage::JsonFileStorage;
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let storage = JsonFileStorage::new_with_path(dir.path().join("s.json")).unwrap();
    /// assert!(storage.path().ends_with("s.json"));
    /// ```
    pub fn new_with_path<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .context("Failed to create parent directory for session document")
                .map_err(|e| ParleyError::Storage(format!("{:#}", e)))?;
        }

        Ok(Self { path })
    }

    /// Storage for `configured`, or the default location when `None`
    pub fn from_config(configured: Option<&str>) -> Result<Self> {
        match configured {
            Some(path) => Self::new_with_path(path),
            None => Self::new(),
        }
    }

    /// Location of the session document
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the store
    ///
    /// A missing document yields an empty store. A document that is not
    /// valid JSON is logged and replaced by an empty store rather than
    /// failing the caller. The returned store is validated.
    ///
    /// # Errors
    ///
    /// Returns `ParleyError::Storage` if the file exists but cannot be read
    pub fn load(&self) -> Result<SessionStore> {
        let mut store = if self.path.exists() {
            let contents = std::fs::read_to_string(&self.path)
                .context("Failed to read session document")
                .map_err(|e| ParleyError::Storage(format!("{:#}", e)))?;
            match serde_json::from_str(&contents) {
                Ok(document) => SessionStore::from_document(document),
                Err(e) => {
                    tracing::warn!(
                        "Session document {} is not valid JSON ({}), starting empty",
                        self.path.display(),
                        e
                    );
                    SessionStore::new()
                }
            }
        } else {
            tracing::debug!("No session document at {}", self.path.display());
            SessionStore::new()
        };

        store.validate();
        tracing::debug!(sessions = store.len(), "Loaded session store");
        Ok(store)
    }

    /// Validate the store and write it as a pretty-printed document
    ///
    /// # Errors
    ///
    /// Returns `ParleyError::Storage` if the document cannot be written
    pub fn save(&self, store: &mut SessionStore) -> Result<()> {
        store.validate();
        let document = store.to_document()?;
        let json = serde_json::to_string_pretty(&document)?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .context("Failed to write session document")
            .map_err(|e| ParleyError::Storage(format!("{:#}", e)))?;
        std::fs::rename(&tmp, &self.path)
            .context("Failed to replace session document")
            .map_err(|e| ParleyError::Storage(format!("{:#}", e)))?;

        tracing::debug!(
            sessions = store.len(),
            "Saved session store to {}",
            self.path.display()
        );
        Ok(())
    }
}
