//! Configuration loading functionality.
//!
//! Resolves the configuration path, writes a default file on first start and
//! parses plus validates the TOML.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use super::Config;
use super::validation::validate_config;
use crate::common::constants::*;
use crate::common::utils::write_atomically;

/// Global configuration directory, set once at startup
static CONFIG_DIR: OnceLock<Option<PathBuf>> = OnceLock::new();

/// Set the configuration directory for the current process.
/// This can only be called once, typically at startup.
pub fn set_config_dir(dir: Option<String>) -> Result<()> {
    CONFIG_DIR
        .set(dir.map(PathBuf::from))
        .map_err(|_| anyhow::anyhow!("Configuration directory already set"))
}

/// The custom configuration directory, if one was set.
pub fn get_custom_config_dir() -> Option<PathBuf> {
    CONFIG_DIR.get().and_then(|d| d.clone())
}

/// Path of `appearanced.toml`: the custom directory or the XDG config directory.
pub fn get_config_path() -> Result<PathBuf> {
    if let Some(custom_dir) = get_custom_config_dir() {
        return Ok(custom_dir.join(CONFIG_FILE_NAME));
    }

    let config_dir = dirs::config_dir().context("Could not determine config directory")?;
    Ok(config_dir.join("appearanced").join(CONFIG_FILE_NAME))
}

/// Load configuration using automatic path detection.
///
/// A default configuration file is created if none exists.
pub fn load() -> Result<Config> {
    let config_path = get_config_path()?;

    if !config_path.exists() {
        create_default_config(&config_path)
            .context("Failed to create default config during load")?;
    }

    load_from_path(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))
}

/// Load configuration from a specific path without creating it.
pub fn load_from_path(path: &Path) -> Result<Config> {
    if !path.exists() {
        anyhow::bail!("Configuration file not found at {}", path.display());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config from {}", path.display()))?;

    validate_config(&config)?;
    Ok(config)
}

/// Write a commented default configuration to `path`.
pub fn create_default_config(path: &Path) -> Result<()> {
    let contents = format!(
        "#[Settings]\n\
         # settings_path = \"~/.local/state/appearanced/{DEFAULT_SETTINGS_FILE_NAME}\"\n\
         # parameters_path = \"~/.local/state/appearanced/{DEFAULT_PARAMETERS_FILE_NAME}\"\n\
         user_id = {DEFAULT_USER_ID}                  # User whose settings are observed at startup\n\
         \n\
         #[Behaviour]\n\
         debug = false                # Verbose scheduling output\n\
         watch_settings = {DEFAULT_WATCH_SETTINGS}        # Pick up external edits of the settings file\n\
         monitor_system_events = {DEFAULT_MONITOR_SYSTEM_EVENTS} # Re-arm timers after resume and clock changes\n"
    );

    write_atomically(path, &contents)
        .with_context(|| format!("Failed to write default config to {}", path.display()))?;

    log_block_start!("Created default configuration");
    log_indented!("{}", path.display());
    Ok(())
}
