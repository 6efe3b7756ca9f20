//! Key-value persistence and the clamped numeric parameter stored in it.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::style::parse_decimal;
use crate::{Error, Result};

/// String-keyed, string-valued persistence, shaped like `localStorage`.
pub trait Storage {
    fn get_item(&self, key: &str) -> Option<String>;
    fn set_item(&mut self, key: &str, value: &str) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStorage {
    items: HashMap<String, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_item(mut self, key: &str, value: &str) -> Self {
        self.items.insert(key.to_string(), value.to_string());
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl Storage for MemoryStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items.get(key).cloned()
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<()> {
        self.items.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// A JSON object on disk, rewritten on every `set_item`.
///
/// An unreadable or malformed file behaves as an empty store.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
    items: BTreeMap<String, String>,
}

impl FileStorage {
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let items = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str::<BTreeMap<String, String>>(&raw).unwrap_or_else(|err| {
                warn!(path = %path.display(), error = %err, "ignoring malformed storage file");
                BTreeMap::new()
            }),
            Err(err) => {
                debug!(path = %path.display(), error = %err, "storage file not readable, starting empty");
                BTreeMap::new()
            }
        };
        Self { path, items }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Storage for FileStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items.get(key).cloned()
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<()> {
        self.items.insert(key.to_string(), value.to_string());
        let raw = serde_json::to_string_pretty(&self.items)
            .map_err(|err| Error::Storage(format!("serialize {}: {err}", self.path.display())))?;
        fs::write(&self.path, raw)
            .map_err(|err| Error::Storage(format!("write {}: {err}", self.path.display())))
    }
}

/// A single numeric value persisted under one key and clamped to `[min, max]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterStore {
    key: String,
    default: f64,
    min: f64,
    max: f64,
}

impl ParameterStore {
    pub fn new(key: impl Into<String>, default: f64, min: f64, max: f64) -> Self {
        Self {
            key: key.into(),
            default,
            min,
            max,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            return self.default.clamp(self.min, self.max);
        }
        value.clamp(self.min, self.max)
    }

    /// The stored value when present and numeric, the default otherwise.
    pub fn load(&self, storage: &dyn Storage) -> f64 {
        let stored = storage.get_item(&self.key);
        let value = match stored.as_deref().and_then(parse_decimal) {
            Some(value) => value,
            None => {
                if let Some(raw) = stored {
                    debug!(key = %self.key, raw = %raw, "stored value is not numeric, using default");
                }
                self.default
            }
        };
        self.clamp(value)
    }

    /// Writes the shortest decimal that reads back as the same `f64`.
    pub fn save(&self, storage: &mut dyn Storage, value: f64) -> Result<()> {
        storage.set_item(&self.key, &value.to_string())
    }
}
