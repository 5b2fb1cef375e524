//! Persistent key-value collaborators backing [`crate::StateStore`].

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

/// Named-collection style storage. Reads of a missing key return `None`.
pub trait DataStore: Send + Sync {
    fn get_string(&self, key: &str) -> Option<String>;
    fn set_string(&self, key: &str, value: &str);
    fn get_long(&self, key: &str) -> Option<i64>;
    fn set_long(&self, key: &str, value: i64);
    fn remove(&self, key: &str);
    fn contains(&self, key: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
enum StoredValue {
    Long(i64),
    Text(String),
}

type Entries = HashMap<String, StoredValue>;

fn read_string(entries: &Entries, key: &str) -> Option<String> {
    match entries.get(key) {
        Some(StoredValue::Text(value)) => Some(value.clone()),
        _ => None,
    }
}

fn read_long(entries: &Entries, key: &str) -> Option<i64> {
    match entries.get(key) {
        Some(StoredValue::Long(value)) => Some(*value),
        _ => None,
    }
}

#[derive(Debug, Default)]
pub struct InMemoryDataStore {
    entries: Mutex<Entries>,
}

impl InMemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut Entries) -> T) -> T {
        let mut guard = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

impl DataStore for InMemoryDataStore {
    fn get_string(&self, key: &str) -> Option<String> {
        self.with_entries(|entries| read_string(entries, key))
    }

    fn set_string(&self, key: &str, value: &str) {
        self.with_entries(|entries| {
            entries.insert(key.to_string(), StoredValue::Text(value.to_string()))
        });
    }

    fn get_long(&self, key: &str) -> Option<i64> {
        self.with_entries(|entries| read_long(entries, key))
    }

    fn set_long(&self, key: &str, value: i64) {
        self.with_entries(|entries| entries.insert(key.to_string(), StoredValue::Long(value)));
    }

    fn remove(&self, key: &str) {
        self.with_entries(|entries| entries.remove(key));
    }

    fn contains(&self, key: &str) -> bool {
        self.with_entries(|entries| entries.contains_key(key))
    }
}

/// Write-through JSON file store. Every mutation rewrites the file.
#[derive(Debug)]
pub struct JsonFileDataStore {
    path: PathBuf,
    entries: Mutex<Entries>,
}

impl JsonFileDataStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let data = fs::read(&path)
                .with_context(|| format!("Failed to read state file: {}", path.display()))?;
            if data.is_empty() {
                Entries::new()
            } else {
                match serde_json::from_slice::<Entries>(&data) {
                    Ok(entries) => entries,
                    Err(err) => {
                        warn!(
                            "Discarding unreadable state file {}: {err}",
                            path.display()
                        );
                        Entries::new()
                    }
                }
            }
        } else {
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir).with_context(|| {
                    format!("Failed to create state directory: {}", dir.display())
                })?;
            }
            Entries::new()
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut Entries) -> T) -> T {
        let mut guard = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    fn mutate(&self, f: impl FnOnce(&mut Entries)) {
        let result = self.with_entries(|entries| {
            f(entries);
            save(&self.path, entries)
        });
        if let Err(err) = result {
            warn!("{err:#}");
        }
    }
}

fn save(path: &Path, entries: &Entries) -> Result<()> {
    let data = serde_json::to_vec_pretty(entries).context("Failed to serialise delivery state")?;
    fs::write(path, data)
        .with_context(|| format!("Failed to write state file: {}", path.display()))
}

impl DataStore for JsonFileDataStore {
    fn get_string(&self, key: &str) -> Option<String> {
        self.with_entries(|entries| read_string(entries, key))
    }

    fn set_string(&self, key: &str, value: &str) {
        self.mutate(|entries| {
            entries.insert(key.to_string(), StoredValue::Text(value.to_string()));
        });
    }

    fn get_long(&self, key: &str) -> Option<i64> {
        self.with_entries(|entries| read_long(entries, key))
    }

    fn set_long(&self, key: &str, value: i64) {
        self.mutate(|entries| {
            entries.insert(key.to_string(), StoredValue::Long(value));
        });
    }

    fn remove(&self, key: &str) {
        self.mutate(|entries| {
            entries.remove(key);
        });
    }

    fn contains(&self, key: &str) -> bool {
        self.with_entries(|entries| entries.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn memory_store_keeps_types_apart() {
        let store = InMemoryDataStore::new();
        store.set_string("TNT_ID", "abc");
        store.set_long("SESSION_TIMESTAMP", 10);
        assert_eq!(store.get_string("TNT_ID"), Some("abc".to_string()));
        assert_eq!(store.get_long("TNT_ID"), None);
        assert_eq!(store.get_long("SESSION_TIMESTAMP"), Some(10));
        store.remove("TNT_ID");
        assert!(!store.contains("TNT_ID"));
    }

    #[test]
    fn file_store_writes_through() {
        let dir = tempdir().expect("tmp");
        let file = dir.path().join("nested").join("state.json");
        let store = JsonFileDataStore::open(&file).expect("store");
        store.set_string("SESSION_ID", "session");
        store.set_long("SESSION_TIMESTAMP", 1_700_000_000_000);

        let reopened = JsonFileDataStore::open(&file).expect("store");
        assert_eq!(reopened.get_string("SESSION_ID"), Some("session".to_string()));
        assert_eq!(reopened.get_long("SESSION_TIMESTAMP"), Some(1_700_000_000_000));

        reopened.remove("SESSION_ID");
        let again = JsonFileDataStore::open(&file).expect("store");
        assert!(!again.contains("SESSION_ID"));
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempdir().expect("tmp");
        let file = dir.path().join("state.json");
        fs::write(&file, b"{not json").expect("write");
        let store = JsonFileDataStore::open(&file).expect("store");
        assert!(!store.contains("TNT_ID"));
    }
}
