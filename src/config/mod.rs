//! Daemon configuration.
//!
//! The daemon reads `appearanced.toml` from the directory given with
//! `--config`, or from `$XDG_CONFIG_HOME/appearanced/`. A commented default
//! file is written on first start. Every field is optional:
//!
//! ```toml
//! settings_path = "~/.local/state/appearanced/settings.toml"    # Per-user settings store
//! parameters_path = "~/.local/state/appearanced/parameters.toml" # Persisted color mode and font scales
//! user_id = 0                  # User whose settings are observed at startup
//! debug = false                # Verbose scheduling output
//! watch_settings = true        # Pick up edits made to the settings file by other programs
//! monitor_system_events = true # Re-arm timers after resume and wall-clock changes
//! ```
//!
//! The settings store holds the dark mode keys per user:
//!
//! ```toml
//! [users."0"]
//! "settings.uiappearance.darkmode_mode" = "2"       # 0 light, 1 dark, 2 window
//! "settings.uiappearance.darkmode_starttime" = "1320" # minutes after midnight
//! "settings.uiappearance.darkmode_endtime" = "360"
//! ```

pub mod loading;
pub mod validation;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::common::constants::*;

pub use loading::{
    create_default_config, get_config_path, get_custom_config_dir, load, load_from_path,
    set_config_dir,
};

/// Contents of `appearanced.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub settings_path: Option<String>,
    pub parameters_path: Option<String>,
    pub user_id: Option<UserId>,
    pub debug: Option<bool>,
    pub watch_settings: Option<bool>,
    pub monitor_system_events: Option<bool>,
}

impl Config {
    /// Load using automatic path detection, creating a default file if needed.
    pub fn load() -> Result<Self> {
        load()
    }

    pub fn get_config_path() -> Result<PathBuf> {
        get_config_path()
    }

    pub fn user_id(&self) -> UserId {
        self.user_id.unwrap_or(DEFAULT_USER_ID)
    }

    pub fn debug(&self) -> bool {
        self.debug.unwrap_or(false)
    }

    pub fn watch_settings(&self) -> bool {
        self.watch_settings.unwrap_or(DEFAULT_WATCH_SETTINGS)
    }

    pub fn monitor_system_events(&self) -> bool {
        self.monitor_system_events
            .unwrap_or(DEFAULT_MONITOR_SYSTEM_EVENTS)
    }

    /// Resolved location of the per-user settings store.
    pub fn settings_path(&self) -> Result<PathBuf> {
        resolve_state_file(self.settings_path.as_deref(), DEFAULT_SETTINGS_FILE_NAME)
    }

    /// Resolved location of the persisted system parameters.
    pub fn parameters_path(&self) -> Result<PathBuf> {
        resolve_state_file(self.parameters_path.as_deref(), DEFAULT_PARAMETERS_FILE_NAME)
    }

    pub fn log_config(&self, config_path: &Path) {
        log_block_start!("Loaded configuration");
        log_indented!("File: {}", config_path.display());
        match self.settings_path() {
            Ok(path) => log_indented!("Settings: {}", path.display()),
            Err(e) => log_indented!("Settings: unresolved ({e})"),
        }
        log_indented!("Active user: {}", self.user_id());
        log_indented!(
            "Watch settings file: {}",
            if self.watch_settings() { "yes" } else { "no" }
        );
        log_indented!(
            "Follow resume and clock changes: {}",
            if self.monitor_system_events() { "yes" } else { "no" }
        );
    }
}

/// Expand `~/` and fall back to `$XDG_STATE_HOME/appearanced/<file_name>`.
fn resolve_state_file(configured: Option<&str>, file_name: &str) -> Result<PathBuf> {
    if let Some(path) = configured {
        return expand_home(path);
    }

    let state_dir = dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .context("Could not determine a state directory")?;
    Ok(state_dir.join("appearanced").join(file_name))
}

fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => Ok(dirs::home_dir()
            .context("Could not determine home directory")?
            .join(rest)),
        None => Ok(PathBuf::from(path)),
    }
}
