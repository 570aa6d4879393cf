//! Persistence layer for session and energy state
//!
//! State that has to survive restarts (last charge state, last slave error,
//! the energy ledger) is kept in a small key-value store. Two stores ship
//! with the crate: an in-memory one and a JSON file backed one.

use crate::error::{HestiaError, Result};
use crate::logging::{StructuredLogger, get_logger};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Key-value store consumed by the session tracker and the energy accountant
pub trait KeyValueStore: Send + Sync {
    /// Stored value for `key`, `None` when it was never written
    fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Write every entry or none of them; on error all previous values are kept
    fn set_all(&self, entries: Vec<(String, Value)>) -> Result<()>;

    /// Write `value` under `key`; on error the previous value is kept
    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.set_all(vec![(key.to_string(), value)])
    }
}

/// Volatile store, used by tests and when no state file is configured
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<Map<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let values = self
            .values
            .lock()
            .map_err(|_| HestiaError::persistence("memory store lock poisoned"))?;
        Ok(values.get(key).cloned())
    }

    fn set_all(&self, entries: Vec<(String, Value)>) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| HestiaError::persistence("memory store lock poisoned"))?;
        values.extend(entries);
        Ok(())
    }
}

/// Store backed by a single JSON object on disk
///
/// Every `set` rewrites the whole file through a temporary sibling that is
/// renamed over the original, so a crash never leaves a half-written state.
pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<Map<String, Value>>,
    logger: StructuredLogger,
}

impl JsonFileStore {
    /// Open the store, loading existing contents if the file is present
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let logger = get_logger("persistence");

        let values = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            if contents.trim().is_empty() {
                Map::new()
            } else {
                match serde_json::from_str::<Value>(&contents)? {
                    Value::Object(map) => {
                        logger.info(&format!(
                            "Loaded {} persisted keys from {}",
                            map.len(),
                            path.display()
                        ));
                        map
                    }
                    _ => {
                        return Err(HestiaError::persistence(format!(
                            "{} does not contain a JSON object",
                            path.display()
                        )));
                    }
                }
            }
        } else {
            logger.info("No persistent state file found, starting empty");
            Map::new()
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
            logger,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_file(&self, values: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(values)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let values = self
            .values
            .lock()
            .map_err(|_| HestiaError::persistence("state lock poisoned"))?;
        Ok(values.get(key).cloned())
    }

    fn set_all(&self, entries: Vec<(String, Value)>) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| HestiaError::persistence("state lock poisoned"))?;

        let keys: Vec<String> = entries.iter().map(|(k, _)| k.clone()).collect();
        let mut next = values.clone();
        next.extend(entries);
        self.write_file(&next).map_err(|e| {
            HestiaError::persistence(format!("writing {}: {}", self.path.display(), e))
        })?;
        *values = next;

        self.logger.debug(&format!("Saved keys {}", keys.join(", ")));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.get("missing").unwrap().is_none());
        store.set("k", json!({"a": 1})).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(json!({"a": 1})));
    }

    #[test]
    fn file_store_writes_batch_together() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = JsonFileStore::open(&path).unwrap();
        store
            .set_all(vec![
                ("wb.session".to_string(), json!({"charge_state": "Charging"})),
                ("wb.energy".to_string(), json!({"session_energy_kwh": 2.5})),
            ])
            .unwrap();

        let reopened = JsonFileStore::open(&path).unwrap();
        assert!(reopened.get("wb.session").unwrap().is_some());
        assert_eq!(
            reopened.get("wb.energy").unwrap(),
            Some(json!({"session_energy_kwh": 2.5}))
        );
    }

    #[test]
    fn file_store_rejects_non_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "[1,2,3]").unwrap();
        assert!(JsonFileStore::open(&path).is_err());
    }
}
