use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::Value;

use crate::error::SettingsError;

/// Flat key-value store. Keys are dotted paths such as `schedules.backup`.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, SettingsError>;

    fn set(&self, key: &str, value: Value) -> Result<(), SettingsError>;

    fn remove(&self, key: &str) -> Result<bool, SettingsError>;

    /// Keys starting with `prefix`, sorted.
    fn keys(&self, prefix: &str) -> Result<Vec<String>, SettingsError>;
}

#[derive(Debug, Default)]
pub struct MemorySettings {
    values: Mutex<BTreeMap<String, Value>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Value>> {
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Result<Option<Value>, SettingsError> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), SettingsError> {
        self.lock().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, SettingsError> {
        Ok(self.lock().remove(key).is_some())
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, SettingsError> {
        Ok(self.lock().keys().filter(|k| k.starts_with(prefix)).cloned().collect())
    }
}

/// Settings persisted as one pretty-printed JSON object. The file is the
/// source of truth: every operation re-reads it, and every write merges its
/// one key into the current contents before replacing the file through a
/// temporary sibling and a rename. Other handles on the same path (the
/// daemon and a one-shot `schedules` command, say) see each other's writes.
#[derive(Debug)]
pub struct JsonFileSettings {
    path: PathBuf,
    values: Mutex<BTreeMap<String, Value>>,
}

impl JsonFileSettings {
    /// Opens `path`, starting empty when the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        let values = read_file(&path)?;
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Value>> {
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Locks the map after refreshing it from disk.
    fn current(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Value>>, SettingsError> {
        let mut g = self.lock();
        *g = read_file(&self.path)?;
        Ok(g)
    }

    fn flush(&self, values: &BTreeMap<String, Value>) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let body = serde_json::to_string_pretty(values)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, body).map_err(|e| io_err(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| io_err(&self.path, e))
    }
}

impl SettingsStore for JsonFileSettings {
    fn get(&self, key: &str) -> Result<Option<Value>, SettingsError> {
        Ok(self.current()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), SettingsError> {
        let mut g = self.current()?;
        g.insert(key.to_string(), value);
        self.flush(&g)
    }

    fn remove(&self, key: &str) -> Result<bool, SettingsError> {
        let mut g = self.current()?;
        if g.remove(key).is_none() {
            return Ok(false);
        }
        self.flush(&g)?;
        Ok(true)
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, SettingsError> {
        Ok(self.current()?.keys().filter(|k| k.starts_with(prefix)).cloned().collect())
    }
}

fn read_file(path: &Path) -> Result<BTreeMap<String, Value>, SettingsError> {
    match std::fs::read_to_string(path) {
        Ok(s) if s.trim().is_empty() => Ok(BTreeMap::new()),
        Ok(s) => Ok(serde_json::from_str(&s)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(e) => Err(io_err(path, e)),
    }
}

fn io_err(path: &Path, source: std::io::Error) -> SettingsError {
    SettingsError::Io {
        path: path.display().to_string(),
        source,
    }
}
