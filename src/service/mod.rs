//! Permission-checked appearance surface.
//!
//! [`AppearanceService`] is what callers talk to: set or query the color mode,
//! the font scale and the font weight scale. Every public call is checked
//! against [`PERMISSION_UPDATE_CONFIGURATION`] first. Accepted values are
//! pushed to the [`SystemConfiguration`] and persisted in a
//! [`ParameterStore`] so [`AppearanceService::restore`] can re-apply them on
//! the next start.
//!
//! The dark mode manager feeds resolved statuses in through
//! [`AppearanceService::apply_dark_mode`], which skips the permission check.

pub mod parameters;
pub mod system;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::common::constants::{
    BASE_SCALE, DARK, LIGHT, PERMISSION_UPDATE_CONFIGURATION, PERSIST_DARK_MODE_KEY,
    PERSIST_FONT_SCALE_KEY, PERSIST_FONT_WEIGHT_SCALE_KEY, UserId,
};
use crate::dark_mode::DarkModeMode;
use crate::error::{AppearanceError, Result};

pub use parameters::{FileParameterStore, MemoryParameterStore};
pub use system::{LocalConfiguration, OwnerPermissions};

/// Items of the system-wide configuration this service controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigurationItem {
    ColorMode,
    FontSizeScale,
    FontWeightScale,
}

impl fmt::Display for ConfigurationItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ColorMode => "color mode",
            Self::FontSizeScale => "font size scale",
            Self::FontWeightScale => "font weight scale",
        })
    }
}

/// Decides whether the current caller holds a permission.
#[cfg_attr(test, mockall::automock)]
pub trait PermissionChecker: Send + Sync {
    fn verify(&self, permission: &str) -> bool;
}

/// The configuration applications render with.
#[cfg_attr(test, mockall::automock)]
pub trait SystemConfiguration: Send + Sync {
    fn update(&self, item: ConfigurationItem, value: &str) -> Result<()>;
    fn get(&self, item: ConfigurationItem) -> Result<String>;
}

/// Persistent system parameters.
pub trait ParameterStore: Send + Sync {
    /// The stored value, or `default` if the key was never set.
    fn get(&self, key: &str, default: &str) -> Result<String>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

struct Current {
    dark_mode: DarkModeMode,
    font_scale: String,
    font_weight_scale: String,
}

/// Color mode and font scale surface.
pub struct AppearanceService {
    permissions: Arc<dyn PermissionChecker>,
    configuration: Arc<dyn SystemConfiguration>,
    parameters: Arc<dyn ParameterStore>,
    current: Mutex<Current>,
}

impl AppearanceService {
    pub fn new(
        permissions: Arc<dyn PermissionChecker>,
        configuration: Arc<dyn SystemConfiguration>,
        parameters: Arc<dyn ParameterStore>,
    ) -> Self {
        Self {
            permissions,
            configuration,
            parameters,
            current: Mutex::new(Current {
                dark_mode: DarkModeMode::AlwaysLight,
                font_scale: BASE_SCALE.to_string(),
                font_weight_scale: BASE_SCALE.to_string(),
            }),
        }
    }

    fn current(&self) -> MutexGuard<'_, Current> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn verify(&self) -> Result<()> {
        if self.permissions.verify(PERMISSION_UPDATE_CONFIGURATION) {
            Ok(())
        } else {
            log_error!("Permission {PERMISSION_UPDATE_CONFIGURATION} denied");
            Err(AppearanceError::permission_denied(
                PERMISSION_UPDATE_CONFIGURATION,
            ))
        }
    }

    pub fn set_dark_mode(&self, mode: DarkModeMode) -> Result<()> {
        self.verify()?;
        let current = self.current().dark_mode;
        if mode == current {
            log_warning!("Color mode is already {current}, nothing to change");
            return Err(AppearanceError::system(format!("color mode is already {current}")));
        }
        self.on_set_dark_mode(mode)
    }

    pub fn get_dark_mode(&self) -> Result<DarkModeMode> {
        self.verify()?;
        Ok(self.current().dark_mode)
    }

    pub fn set_font_scale(&self, scale: &str) -> Result<()> {
        self.verify()?;
        self.on_set_scale(ConfigurationItem::FontSizeScale, scale)
    }

    pub fn get_font_scale(&self) -> Result<String> {
        self.verify()?;
        Ok(self.current().font_scale.clone())
    }

    pub fn set_font_weight_scale(&self, scale: &str) -> Result<()> {
        self.verify()?;
        self.on_set_scale(ConfigurationItem::FontWeightScale, scale)
    }

    pub fn get_font_weight_scale(&self) -> Result<String> {
        self.verify()?;
        Ok(self.current().font_weight_scale.clone())
    }

    /// Apply a status resolved by the dark mode manager.
    pub fn apply_dark_mode(&self, is_dark: bool, user_id: UserId) {
        let mode = DarkModeMode::fixed(is_dark);
        log_block_start!("Applying {mode} for user {user_id}");
        if let Err(e) = self.on_set_dark_mode(mode) {
            log_error!("Failed to apply {mode}: {e}");
        }
    }

    /// Re-apply the persisted color mode and font scales.
    ///
    /// Every item is attempted; the first failure is returned.
    pub fn restore(&self) -> Result<()> {
        let mut first_error = None;

        let mode = self
            .parameters
            .get(PERSIST_DARK_MODE_KEY, LIGHT)
            .and_then(|value| parse_color_mode(&value));
        if let Err(e) = mode.and_then(|mode| self.on_set_dark_mode(mode)) {
            log_error!("Failed to restore color mode: {e}");
            first_error.get_or_insert(e);
        }

        for (item, key) in [
            (ConfigurationItem::FontSizeScale, PERSIST_FONT_SCALE_KEY),
            (ConfigurationItem::FontWeightScale, PERSIST_FONT_WEIGHT_SCALE_KEY),
        ] {
            let scale = self.parameters.get(key, BASE_SCALE).unwrap_or_else(|e| {
                log_error!("Failed to read persisted {item}: {e}");
                BASE_SCALE.to_string()
            });
            if let Err(e) = self.on_set_scale(item, &scale) {
                log_error!("Failed to restore {item}: {e}");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn on_set_dark_mode(&self, mode: DarkModeMode) -> Result<()> {
        let value = match mode {
            DarkModeMode::AlwaysLight => LIGHT,
            DarkModeMode::AlwaysDark => DARK,
            other => {
                log_error!("Cannot apply color mode {other}");
                return Err(AppearanceError::invalid_argument(format!(
                    "color mode must be light or dark, got {other}"
                )));
            }
        };

        self.update_item(ConfigurationItem::ColorMode, value)?;
        self.current().dark_mode = mode;
        self.parameters.set(PERSIST_DARK_MODE_KEY, value)
    }

    fn on_set_scale(&self, item: ConfigurationItem, scale: &str) -> Result<()> {
        let key = match item {
            ConfigurationItem::FontSizeScale => PERSIST_FONT_SCALE_KEY,
            ConfigurationItem::FontWeightScale => PERSIST_FONT_WEIGHT_SCALE_KEY,
            ConfigurationItem::ColorMode => {
                return Err(AppearanceError::invalid_argument("color mode is not a scale"));
            }
        };
        if scale.is_empty() {
            log_error!("Refusing empty {item}");
            return Err(AppearanceError::system(format!("{item} is empty")));
        }

        self.update_item(item, scale)?;
        {
            let mut current = self.current();
            match item {
                ConfigurationItem::FontSizeScale => current.font_scale = scale.to_string(),
                _ => current.font_weight_scale = scale.to_string(),
            }
        }
        self.parameters.set(key, scale)
    }

    /// Push `value`; a failed update still counts if the configuration
    /// already reports it.
    fn update_item(&self, item: ConfigurationItem, value: &str) -> Result<()> {
        log_info!("Updating {item} to {value}");
        let Err(update_error) = self.configuration.update(item, value) else {
            return Ok(());
        };

        let reported = self.configuration.get(item).map_err(|e| {
            log_error!("Reading {item} after failed update: {e}");
            AppearanceError::system(format!("{item} update failed: {update_error}"))
        })?;
        if reported != value {
            log_error!("Updating {item} failed: {update_error}");
            return Err(update_error);
        }
        log_warning!("Update of {item} reported {update_error}, but it already is {value}");
        Ok(())
    }
}

fn parse_color_mode(value: &str) -> Result<DarkModeMode> {
    match value {
        LIGHT => Ok(DarkModeMode::AlwaysLight),
        DARK => Ok(DarkModeMode::AlwaysDark),
        other => Err(AppearanceError::system(format!(
            "persisted color mode '{other}' is neither {LIGHT} nor {DARK}"
        ))),
    }
}
