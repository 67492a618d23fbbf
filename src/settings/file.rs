//! TOML-backed settings store with hot reload.
//!
//! Values live in memory and are written through to a TOML file on every
//! change:
//!
//! ```toml
//! [users."100"]
//! "settings.uiappearance.darkmode_mode" = "2"
//! "settings.uiappearance.darkmode_starttime" = "1320"
//! "settings.uiappearance.darkmode_endtime" = "360"
//! ```
//!
//! [`FileSettingsStore::watch`] monitors the file so edits made by other
//! processes reach observers just like in-process writes.

use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use super::memory::{MemorySettingsStore, SettingsTable};
use super::{ObserverCallback, SettingsStore};
use crate::common::constants::{SETTINGS_DEBOUNCE_MS, UserId};
use crate::common::utils::write_atomically;
use crate::error::{AppearanceError, Result};

#[derive(Debug, Default, Serialize, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    users: BTreeMap<String, BTreeMap<String, String>>,
}

impl SettingsFile {
    fn into_table(self) -> SettingsTable {
        let mut table = SettingsTable::new();
        for (user, entries) in self.users {
            match user.trim().parse::<UserId>() {
                Ok(user_id) => {
                    table.insert(user_id, entries);
                }
                Err(_) => log_warning!("Ignoring settings for non-numeric user '{user}'"),
            }
        }
        table
    }

    fn from_table(table: &SettingsTable) -> Self {
        Self {
            users: table
                .iter()
                .map(|(user_id, entries)| (user_id.to_string(), entries.clone()))
                .collect(),
        }
    }
}

/// Settings persisted to a TOML file.
pub struct FileSettingsStore {
    path: PathBuf,
    memory: MemorySettingsStore,
    // Serializes file writes and reloads against each other
    io_lock: Mutex<()>,
}

impl FileSettingsStore {
    /// Open the store at `path`, starting empty if the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let store = Self {
            memory: MemorySettingsStore::new(),
            io_lock: Mutex::new(()),
            path,
        };
        if store.path.exists() {
            store.memory.replace_all(read_table(&store.path)?);
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_lock(&self) -> MutexGuard<'_, ()> {
        self.io_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, table: &SettingsTable) -> Result<()> {
        let contents = toml::to_string_pretty(&SettingsFile::from_table(table))
            .map_err(|e| AppearanceError::system(format!("failed to encode settings: {e}")))?;
        write_atomically(&self.path, &contents).map_err(|e| {
            AppearanceError::system(format!("failed to write {}: {e}", self.path.display()))
        })
    }

    /// Re-read the file and notify observers of every value that changed.
    pub fn reload(&self) -> Result<usize> {
        let changed = {
            let _io = self.io_lock();
            let table = if self.path.exists() {
                read_table(&self.path)?
            } else {
                SettingsTable::new()
            };
            self.memory.replace_all(table)
        };

        for (key, user_id) in &changed {
            log_debug!("Settings file changed '{key}' for user {user_id}");
            self.memory.notify(key, *user_id);
        }
        Ok(changed.len())
    }

    /// Watch the settings file for external edits until the guard is dropped.
    pub fn watch(self: &Arc<Self>) -> anyhow::Result<SettingsWatcher> {
        use anyhow::Context;

        let directory = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .context("Settings path has no parent directory")?;
        std::fs::create_dir_all(&directory).with_context(|| {
            format!("Failed to create settings directory {}", directory.display())
        })?;
        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .context("Settings path has no file name")?;

        let (tx, rx) = std::sync::mpsc::channel::<Event>();
        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| {
                if let Ok(event) = res
                    && matches!(
                        event.kind,
                        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                    )
                {
                    let _ = tx.send(event);
                }
            },
            NotifyConfig::default(),
        )
        .context("Failed to create settings file watcher")?;

        // Watch the directory: editors often replace the file instead of writing it
        watcher
            .watch(&directory, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {}", directory.display()))?;

        let store = Arc::downgrade(self);
        let debounce = Duration::from_millis(SETTINGS_DEBOUNCE_MS);
        thread::Builder::new()
            .name("appearanced-settings-watch".to_string())
            .spawn(move || {
                while let Ok(event) = rx.recv() {
                    if !event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == Some(file_name.as_os_str()))
                    {
                        continue;
                    }

                    // Swallow the burst of events a single save produces
                    loop {
                        match rx.recv_timeout(debounce) {
                            Ok(_) => continue,
                            Err(RecvTimeoutError::Timeout) => break,
                            Err(RecvTimeoutError::Disconnected) => return,
                        }
                    }

                    let Some(store) = store.upgrade() else {
                        return;
                    };
                    match store.reload() {
                        Ok(0) => {}
                        Ok(count) => log_debug!("Reloaded settings file ({count} changes)"),
                        Err(e) => {
                            log_pipe!();
                            log_warning!("Failed to reload settings file: {e}");
                        }
                    }
                }
            })
            .context("Failed to spawn settings watcher thread")?;

        Ok(SettingsWatcher { _watcher: watcher })
    }
}

impl SettingsStore for FileSettingsStore {
    fn get_int32(&self, key: &str, user_id: UserId) -> Result<i32> {
        self.memory.get_int32(key, user_id)
    }

    fn set_string(&self, key: &str, value: &str, user_id: UserId) -> Result<()> {
        {
            let _io = self.io_lock();
            // Memory only takes the value once the file holds it
            let mut table = self.memory.table();
            table
                .entry(user_id)
                .or_default()
                .insert(key.to_string(), value.to_string());
            self.persist(&table)?;
            self.memory.put(key, value, user_id);
        }
        self.memory.notify(key, user_id);
        Ok(())
    }

    fn register_observer(
        &self,
        key: &str,
        callback: ObserverCallback,
        user_id: UserId,
    ) -> Result<()> {
        self.memory.register_observer(key, callback, user_id)
    }

    fn unregister_observer(&self, key: &str, user_id: UserId) -> Result<()> {
        self.memory.unregister_observer(key, user_id)
    }
}

/// Keeps the settings file watcher alive.
pub struct SettingsWatcher {
    _watcher: RecommendedWatcher,
}

fn read_table(path: &Path) -> Result<SettingsTable> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        AppearanceError::system(format!("failed to read {}: {e}", path.display()))
    })?;
    let file: SettingsFile = toml::from_str(&contents).map_err(|e| {
        AppearanceError::system(format!("failed to parse {}: {e}", path.display()))
    })?;
    Ok(file.into_table())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    #[test]
    fn test_values_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.toml");

        let store = FileSettingsStore::open(&path).unwrap();
        store.set_string("mode", "2", 100).unwrap();
        drop(store);

        let reopened = FileSettingsStore::open(&path).unwrap();
        assert_eq!(reopened.get_int32("mode", 100).unwrap(), 2);
    }

    #[test]
    fn test_missing_file_starts_empty() {
        let dir = tempdir().unwrap();
        let store = FileSettingsStore::open(dir.path().join("nested").join("s.toml")).unwrap();
        assert!(store.get_int32("mode", 100).is_err());
        store.set_string("mode", "1", 100).unwrap();
        assert!(store.path().exists());
    }

    #[test]
    fn test_reload_notifies_external_changes_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        let store = FileSettingsStore::open(&path).unwrap();
        store.set_string("mode", "0", 100).unwrap();
        store.set_string("start", "600", 100).unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let observer: ObserverCallback = Arc::new(move |_: &str, _: UserId| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        store.register_observer("mode", observer.clone(), 100).unwrap();
        store.register_observer("start", observer, 100).unwrap();

        // Reloading our own write changes nothing
        assert_eq!(store.reload().unwrap(), 0);

        std::fs::write(
            &path,
            "[users.\"100\"]\nmode = \"1\"\nstart = \"600\"\n",
        )
        .unwrap();
        assert_eq!(store.reload().unwrap(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(store.get_int32("mode", 100).unwrap(), 1);
    }

    #[test]
    fn test_failed_write_keeps_previous_value() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();
        let store = FileSettingsStore::open(blocker.join("settings.toml")).unwrap();
        store.memory.put("mode", "0", 100);

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let observer: ObserverCallback = Arc::new(move |_: &str, _: UserId| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        store.register_observer("mode", observer, 100).unwrap();

        assert!(matches!(
            store.set_string("mode", "1", 100),
            Err(AppearanceError::SystemError(_))
        ));
        assert_eq!(store.get_int32("mode", 100).unwrap(), 0);
        assert!(store.get_int32("start", 100).is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_malformed_file_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "users = 5").unwrap();
        assert!(matches!(
            FileSettingsStore::open(&path),
            Err(AppearanceError::SystemError(_))
        ));
    }
}
