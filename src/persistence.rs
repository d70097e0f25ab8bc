//! # Persistence
//!
//! JSON snapshots of the person store, plus named root lists, kept in one
//! directory. Saves go through a temporary file that is atomically renamed
//! into place, so a failed save leaves the previous snapshot intact.
//!
//! The `load_*`/`save_*` calls log and swallow errors; the `try_*` variants
//! return them.

use crate::config::{CURRENT_SET_FILE_NAME, ROOT_SET_FILE_PREFIX, SNAPSHOT_FILE_NAME};
use crate::model::PersonId;
use crate::store::PersonStore;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{info, warn};

/// A root person as remembered between sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootEntry {
    pub id: PersonId,
    pub name: String,
}

/// Ordered list of root persons without duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RootList {
    entries: Vec<RootEntry>,
}

impl RootList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a root unless it is already listed. Returns whether it was added.
    pub fn add(&mut self, id: PersonId, name: impl Into<String>) -> bool {
        if self.entries.iter().any(|entry| entry.id == id) {
            return false;
        }
        self.entries.push(RootEntry {
            id,
            name: name.into(),
        });
        true
    }

    pub fn entries(&self) -> &[RootEntry] {
        &self.entries
    }

    pub fn ids(&self) -> Vec<PersonId> {
        self.entries.iter().map(|entry| entry.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Directory holding the snapshot and root lists.
#[derive(Debug, Clone)]
pub struct SnapshotDir {
    root: PathBuf,
}

impl SnapshotDir {
    /// Use `path`, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .with_context(|| format!("creating data directory {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.root.join(SNAPSHOT_FILE_NAME)
    }

    /// Stored snapshot, or `None` when there is none yet.
    pub fn try_load_store(&self) -> Result<Option<PersonStore>> {
        let Some(data) = self.read_optional(&self.snapshot_path())? else {
            return Ok(None);
        };
        let store = PersonStore::from_json_str(&data).context("parsing store snapshot")?;
        Ok(Some(store))
    }

    /// Stored snapshot; an empty store if there is none or it cannot be read.
    pub fn load_store(&self) -> PersonStore {
        match self.try_load_store() {
            Ok(Some(store)) => {
                info!(persons = store.len(), "store loaded");
                store
            }
            Ok(None) => {
                info!("no stored snapshot, starting empty");
                PersonStore::new()
            }
            Err(error) => {
                warn!(error = %format!("{error:#}"), "store load failed, starting empty");
                PersonStore::new()
            }
        }
    }

    pub fn try_save_store(&self, store: &PersonStore) -> Result<()> {
        let data = store.to_json_string()?;
        self.write_atomic(&self.snapshot_path(), &data)
    }

    /// Save the store. Returns whether it was written.
    pub fn save_store(&self, store: &PersonStore) -> bool {
        match self.try_save_store(store) {
            Ok(()) => true,
            Err(error) => {
                warn!(error = %format!("{error:#}"), "store save failed");
                false
            }
        }
    }

    pub fn try_load_roots(&self, set_name: &str) -> Result<Option<RootList>> {
        let Some(data) = self.read_optional(&self.root_set_path(set_name))? else {
            return Ok(None);
        };
        let roots = serde_json::from_str(&data)
            .with_context(|| format!("parsing root set {set_name}"))?;
        Ok(Some(roots))
    }

    /// Root list saved under `set_name`; empty if missing or unreadable.
    pub fn load_roots(&self, set_name: &str) -> RootList {
        match self.try_load_roots(set_name) {
            Ok(roots) => roots.unwrap_or_default(),
            Err(error) => {
                warn!(set = set_name, error = %format!("{error:#}"), "root set load failed");
                RootList::new()
            }
        }
    }

    pub fn try_save_roots(&self, set_name: &str, roots: &RootList) -> Result<()> {
        let data = serde_json::to_string_pretty(roots)?;
        self.write_atomic(&self.root_set_path(set_name), &data)?;
        self.write_atomic(&self.root.join(CURRENT_SET_FILE_NAME), set_name)
    }

    /// Save `roots` under `set_name` and make it the current set.
    pub fn save_roots(&self, set_name: &str, roots: &RootList) -> bool {
        match self.try_save_roots(set_name, roots) {
            Ok(()) => true,
            Err(error) => {
                warn!(set = set_name, error = %format!("{error:#}"), "root set save failed");
                false
            }
        }
    }

    /// Name of the most recently saved root set.
    pub fn current_set(&self) -> Option<String> {
        match self.read_optional(&self.root.join(CURRENT_SET_FILE_NAME)) {
            Ok(name) => name.map(|name| name.trim().to_string()).filter(|name| !name.is_empty()),
            Err(error) => {
                warn!(error = %format!("{error:#}"), "could not read current set");
                None
            }
        }
    }

    fn root_set_path(&self, set_name: &str) -> PathBuf {
        let safe: String = set_name
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.root.join(format!("{ROOT_SET_FILE_PREFIX}{safe}.json"))
    }

    fn read_optional(&self, path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(path) {
            Ok(data) => Ok(Some(data)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error).with_context(|| format!("reading {}", path.display())),
        }
    }

    fn write_atomic(&self, path: &Path, data: &str) -> Result<()> {
        let mut file = NamedTempFile::new_in(&self.root)
            .with_context(|| format!("creating temporary file in {}", self.root.display()))?;
        file.write_all(data.as_bytes())?;
        file.as_file().sync_all()?;
        file.persist(path)
            .with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }
}
