//! Per-user dark mode configuration as read from the settings store.

use serde::Serialize;
use std::fmt;

use crate::common::constants::{UNSET_WINDOW_BOUND, UserId};
use crate::schedule::ScheduleRequest;

/// Configured dark mode behaviour. Discriminants match the stored integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DarkModeMode {
    #[default]
    Invalid = -1,
    AlwaysLight = 0,
    AlwaysDark = 1,
    CustomWindow = 2,
}

impl DarkModeMode {
    /// One past the largest stored value.
    pub const SIZE: i32 = 3;

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            -1 => Some(Self::Invalid),
            0 => Some(Self::AlwaysLight),
            1 => Some(Self::AlwaysDark),
            2 => Some(Self::CustomWindow),
            _ => None,
        }
    }

    /// Interpret a persisted value, coercing anything out of range to `Invalid`.
    pub fn from_stored(value: i32, user_id: UserId) -> Self {
        Self::from_i32(value).unwrap_or_else(|| {
            log_error!("Dark mode value {value} out of range for user {user_id}, using invalid");
            Self::Invalid
        })
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// The fixed mode matching a resolved status.
    pub fn fixed(is_dark: bool) -> Self {
        if is_dark {
            Self::AlwaysDark
        } else {
            Self::AlwaysLight
        }
    }

    pub fn is_fixed(self) -> bool {
        matches!(self, Self::AlwaysLight | Self::AlwaysDark)
    }
}

impl fmt::Display for DarkModeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Invalid => "invalid",
            Self::AlwaysLight => "always light",
            Self::AlwaysDark => "always dark",
            Self::CustomWindow => "custom window",
        };
        f.write_str(name)
    }
}

/// Mode and window bounds for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DarkModeState {
    pub mode: DarkModeMode,
    pub start: i32,
    pub end: i32,
}

impl Default for DarkModeState {
    fn default() -> Self {
        Self {
            mode: DarkModeMode::Invalid,
            start: UNSET_WINDOW_BOUND,
            end: UNSET_WINDOW_BOUND,
        }
    }
}

impl DarkModeState {
    /// The schedule this state asks for, if it is in custom window mode.
    pub fn schedule_request(&self, user_id: UserId) -> Option<ScheduleRequest> {
        (self.mode == DarkModeMode::CustomWindow)
            .then(|| ScheduleRequest::new(user_id, self.start, self.end))
    }
}
