//! Per-user key/value settings store with change observers.
//!
//! The dark mode manager reads its mode and window bounds from a
//! [`SettingsStore`] and subscribes to changes of those keys for the active
//! user. Two stores are provided: [`MemorySettingsStore`] and the TOML-backed
//! [`FileSettingsStore`], which also picks up external edits of its file.
//!
//! Observers are always invoked after the store released its own locks, so an
//! observer may read (or write) the store again.

pub mod file;
pub mod memory;

use std::sync::Arc;

use crate::common::constants::UserId;
use crate::error::Result;

pub use file::{FileSettingsStore, SettingsWatcher};
pub use memory::MemorySettingsStore;

/// Observer invoked with the changed key and the user it belongs to.
pub type ObserverCallback = Arc<dyn Fn(&str, UserId) + Send + Sync>;

/// Persistent per-user settings.
pub trait SettingsStore: Send + Sync {
    /// Whether the store is ready to serve reads and observers.
    fn is_initialized(&self) -> bool {
        true
    }

    /// Bring the store up; called when `is_initialized` reports false.
    fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Read `key` for `user_id` as an integer.
    fn get_int32(&self, key: &str, user_id: UserId) -> Result<i32>;

    /// Store `value` under `key` for `user_id` and notify its observer.
    fn set_string(&self, key: &str, value: &str, user_id: UserId) -> Result<()>;

    /// Observe `key` for `user_id`, replacing any previous observer.
    fn register_observer(&self, key: &str, callback: ObserverCallback, user_id: UserId)
    -> Result<()>;

    /// Stop observing `key` for `user_id`. No-op if not registered.
    fn unregister_observer(&self, key: &str, user_id: UserId) -> Result<()>;
}
