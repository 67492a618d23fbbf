//! Parameter stores: a flat `key = "value"` TOML file and an in-memory map.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::ParameterStore;
use crate::common::utils::write_atomically;
use crate::error::{AppearanceError, Result};

/// Parameters held in process memory.
#[derive(Default)]
pub struct MemoryParameterStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryParameterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ParameterStore for MemoryParameterStore {
    fn get(&self, key: &str, default: &str) -> Result<String> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        Ok(values.get(key).cloned().unwrap_or_else(|| default.to_string()))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Parameters persisted to a TOML file, rewritten on every change.
pub struct FileParameterStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileParameterStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = if path.exists() {
            let contents = std::fs::read_to_string(&path).map_err(|e| {
                AppearanceError::system(format!("failed to read {}: {e}", path.display()))
            })?;
            toml::from_str(&contents).map_err(|e| {
                AppearanceError::system(format!("failed to parse {}: {e}", path.display()))
            })?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn values(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ParameterStore for FileParameterStore {
    fn get(&self, key: &str, default: &str) -> Result<String> {
        Ok(self
            .values()
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string()))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values();
        let previous = values.insert(key.to_string(), value.to_string());

        let written = toml::to_string_pretty(&*values)
            .map_err(|e| AppearanceError::system(format!("failed to encode parameters: {e}")))
            .and_then(|contents| {
                write_atomically(&self.path, &contents).map_err(|e| {
                    AppearanceError::system(format!(
                        "failed to write {}: {e}",
                        self.path.display()
                    ))
                })
            });

        // Keep memory and disk in agreement
        if written.is_err() {
            match previous {
                Some(old) => values.insert(key.to_string(), old),
                None => values.remove(key),
            };
        }
        written
    }
}
