use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use termdeck_terminal::{KeyValueStore, TerminalError};

use crate::config::helpers::expand_tilde;

/// Key-value store kept as one JSON object on disk.
///
/// Every write rewrites the whole file through a temporary sibling, so a
/// crash mid-write leaves the previous contents intact.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl JsonFileStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = expand_tilde(path.as_ref())?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let entries = if path.exists() {
            let json = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read store from {}", path.display()))?;
            if json.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&json)
                    .with_context(|| format!("Failed to parse store {}", path.display()))?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> std::result::Result<(), TerminalError> {
        let json = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| TerminalError::Persistence(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json)
            .and_then(|_| fs::rename(&tmp, &self.path))
            .map_err(|e| {
                TerminalError::Persistence(format!("Failed to write {}: {}", self.path.display(), e))
            })
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> termdeck_terminal::Result<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: String) -> termdeck_terminal::Result<()> {
        self.entries.insert(key.to_string(), value);
        self.flush()
    }

    fn remove(&mut self, key: &str) -> termdeck_terminal::Result<()> {
        if self.entries.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_values_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("store.json");

        let mut store = JsonFileStore::open(&path).unwrap();
        store.set("history", "[\"ls\"]".to_string()).unwrap();
        store.set("other", "x".to_string()).unwrap();
        store.remove("other").unwrap();

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.get("history").unwrap().as_deref(), Some("[\"ls\"]"));
        assert!(reopened.get("other").unwrap().is_none());
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_corrupt_file_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(JsonFileStore::open(&path).is_err());
    }

    #[test]
    fn test_empty_file_is_empty_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "").unwrap();
        let store = JsonFileStore::open(&path).unwrap();
        assert!(store.get("history").unwrap().is_none());
    }
}
