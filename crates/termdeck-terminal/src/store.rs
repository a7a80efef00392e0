//! Key-value persistence port.
//!
//! The core only persists the shared command history. Hosts inject an
//! implementation; [`MemoryStore`] keeps everything in process.

use std::collections::HashMap;

use crate::error::{Result, TerminalError};

/// Key under which the command history is stored
pub const HISTORY_KEY: &str = "history";

pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&mut self, key: &str, value: String) -> Result<()>;
    fn remove(&mut self, key: &str) -> Result<()>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: String) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Read the persisted command history, oldest first
pub fn load_history(store: &dyn KeyValueStore) -> Result<Vec<String>> {
    match store.get(HISTORY_KEY)? {
        Some(raw) => serde_json::from_str(&raw)
            .map_err(|e| TerminalError::Persistence(format!("corrupt history: {}", e))),
        None => Ok(Vec::new()),
    }
}

pub fn save_history<'a, I>(store: &mut dyn KeyValueStore, entries: I) -> Result<()>
where
    I: IntoIterator<Item = &'a String>,
{
    let entries: Vec<&String> = entries.into_iter().collect();
    let raw = serde_json::to_string(&entries)
        .map_err(|e| TerminalError::Persistence(e.to_string()))?;
    store.set(HISTORY_KEY, raw)
}
