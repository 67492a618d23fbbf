//! In-memory settings store.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use super::{ObserverCallback, SettingsStore};
use crate::common::constants::UserId;
use crate::error::{AppearanceError, Result};

/// Per-user string values: `user → key → value`.
pub(crate) type SettingsTable = BTreeMap<UserId, BTreeMap<String, String>>;

/// Settings held in process memory.
#[derive(Default)]
pub struct MemorySettingsStore {
    values: Mutex<SettingsTable>,
    observers: Mutex<HashMap<(String, UserId), ObserverCallback>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> MutexGuard<'_, SettingsTable> {
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn observers(&self) -> MutexGuard<'_, HashMap<(String, UserId), ObserverCallback>> {
        self.observers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Raw string value, if present.
    pub fn get_string(&self, key: &str, user_id: UserId) -> Option<String> {
        self.values()
            .get(&user_id)
            .and_then(|entries| entries.get(key))
            .cloned()
    }

    /// Store a value without notifying anyone. Returns whether it changed.
    pub(crate) fn put(&self, key: &str, value: &str, user_id: UserId) -> bool {
        let mut values = self.values();
        let entries = values.entry(user_id).or_default();
        let changed = entries.get(key).map(String::as_str) != Some(value);
        entries.insert(key.to_string(), value.to_string());
        changed
    }

    /// Copy of every stored value.
    pub(crate) fn table(&self) -> SettingsTable {
        self.values().clone()
    }

    /// Replace every value, returning the `(key, user)` pairs that changed.
    pub(crate) fn replace_all(&self, table: SettingsTable) -> Vec<(String, UserId)> {
        let mut values = self.values();
        let mut changed = Vec::new();

        for (user_id, entries) in &table {
            let old = values.get(user_id);
            for (key, value) in entries {
                if old.and_then(|o| o.get(key)) != Some(value) {
                    changed.push((key.clone(), *user_id));
                }
            }
        }
        for (user_id, entries) in values.iter() {
            let new = table.get(user_id);
            for key in entries.keys() {
                if new.is_none_or(|n| !n.contains_key(key)) {
                    changed.push((key.clone(), *user_id));
                }
            }
        }

        *values = table;
        changed
    }

    /// Invoke the observer for `(key, user_id)`, if any, with no lock held.
    pub(crate) fn notify(&self, key: &str, user_id: UserId) {
        let observer = self.observers().get(&(key.to_string(), user_id)).cloned();
        if let Some(observer) = observer {
            observer(key, user_id);
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers().len()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get_int32(&self, key: &str, user_id: UserId) -> Result<i32> {
        let value = self.get_string(key, user_id).ok_or_else(|| {
            AppearanceError::system(format!("no value for '{key}' (user {user_id})"))
        })?;
        value.trim().parse::<i32>().map_err(|e| {
            AppearanceError::system(format!(
                "value '{value}' for '{key}' (user {user_id}) is not an integer: {e}"
            ))
        })
    }

    fn set_string(&self, key: &str, value: &str, user_id: UserId) -> Result<()> {
        self.put(key, value, user_id);
        self.notify(key, user_id);
        Ok(())
    }

    fn register_observer(
        &self,
        key: &str,
        callback: ObserverCallback,
        user_id: UserId,
    ) -> Result<()> {
        self.observers().insert((key.to_string(), user_id), callback);
        Ok(())
    }

    fn unregister_observer(&self, key: &str, user_id: UserId) -> Result<()> {
        self.observers().remove(&(key.to_string(), user_id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_get_int32_parses_and_reports_missing() {
        let store = MemorySettingsStore::new();
        assert!(matches!(
            store.get_int32("k", 100),
            Err(AppearanceError::SystemError(_))
        ));

        store.set_string("k", " 42 ", 100).unwrap();
        assert_eq!(store.get_int32("k", 100).unwrap(), 42);

        store.set_string("k", "dark", 100).unwrap();
        assert!(store.get_int32("k", 100).is_err());
    }

    #[test]
    fn test_values_are_per_user() {
        let store = MemorySettingsStore::new();
        store.set_string("k", "1", 100).unwrap();
        assert!(store.get_int32("k", 101).is_err());
    }

    #[test]
    fn test_observer_fires_for_its_key_and_user_only() {
        let store = MemorySettingsStore::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        store
            .register_observer(
                "k",
                Arc::new(move |_: &str, _: UserId| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
                100,
            )
            .unwrap();

        store.set_string("k", "1", 100).unwrap();
        store.set_string("k", "1", 101).unwrap();
        store.set_string("other", "1", 100).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        store.unregister_observer("k", 100).unwrap();
        store.set_string("k", "2", 100).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_observer_may_read_store_reentrantly() {
        let store = Arc::new(MemorySettingsStore::new());
        let seen = Arc::new(Mutex::new(None));
        let weak = Arc::downgrade(&store);
        let sink = seen.clone();
        store
            .register_observer(
                "k",
                Arc::new(move |key: &str, user_id: UserId| {
                    if let Some(store) = weak.upgrade() {
                        *sink.lock().unwrap() = store.get_int32(key, user_id).ok();
                    }
                }),
                100,
            )
            .unwrap();

        store.set_string("k", "7", 100).unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(7));
    }

    #[test]
    fn test_replace_all_reports_added_changed_and_removed() {
        let store = MemorySettingsStore::new();
        store.put("a", "1", 100);
        store.put("b", "1", 100);

        let mut table = SettingsTable::new();
        table.entry(100).or_default().insert("a".into(), "1".into());
        table.entry(101).or_default().insert("a".into(), "5".into());

        let mut changed = store.replace_all(table);
        changed.sort();
        assert_eq!(
            changed,
            vec![("a".to_string(), 101), ("b".to_string(), 100)]
        );
    }
}
