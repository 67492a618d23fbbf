//! Local collaborators used by the daemon.

use nix::unistd::{Uid, getuid};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{ConfigurationItem, PermissionChecker, SystemConfiguration};
use crate::error::{AppearanceError, Result};

/// Grants every permission to the user owning the daemon (and to root).
pub struct OwnerPermissions {
    owner: Uid,
}

impl OwnerPermissions {
    pub fn new() -> Self {
        Self { owner: getuid() }
    }
}

impl Default for OwnerPermissions {
    fn default() -> Self {
        Self::new()
    }
}

impl PermissionChecker for OwnerPermissions {
    fn verify(&self, permission: &str) -> bool {
        let caller = getuid();
        let granted = caller == self.owner || caller.is_root();
        if !granted {
            log_debug!("uid {caller} lacks {permission}");
        }
        granted
    }
}

/// Configuration kept by the daemon itself and reported in the log.
#[derive(Default)]
pub struct LocalConfiguration {
    items: Mutex<HashMap<ConfigurationItem, String>>,
}

impl LocalConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    fn items(&self) -> MutexGuard<'_, HashMap<ConfigurationItem, String>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SystemConfiguration for LocalConfiguration {
    fn update(&self, item: ConfigurationItem, value: &str) -> Result<()> {
        let previous = self.items().insert(item, value.to_string());
        if previous.as_deref() != Some(value) {
            log_decorated!("{item}: {value}");
        }
        Ok(())
    }

    fn get(&self, item: ConfigurationItem) -> Result<String> {
        self.items()
            .get(&item)
            .cloned()
            .ok_or_else(|| AppearanceError::system(format!("{item} has not been set")))
    }
}
