//! # appearanced
//!
//! Library behind the `appearanced` daemon, which keeps each user's
//! light/dark appearance in line with their settings.
//!
//! This library exists to enable testing of the scheduling internals and to
//! keep CLI dispatch (main.rs) separate from the daemon logic.
//!
//! ## Architecture
//!
//! - **Scheduling**: `schedule` turns `[start, end)` minute-of-day windows into
//!   self-renewing boundary alarms per user
//! - **State machine**: `dark_mode` tracks every user's mode and window and
//!   resolves the active user's status
//! - **Collaborators**: `settings` (observable per-user key/value store) and
//!   `service` (permission-checked color mode and font scale surface)
//! - **Daemon**: `daemon`, `config`, `args` and `io` (signals, sleep and clock
//!   change monitoring, instance lock)
//! - **Infrastructure**: `common` (logging, constants), `error`, `time_source`

// Import macros from logger module for use in all submodules
#[macro_use]
pub mod common;

pub mod args;
pub mod config;
pub mod daemon;
pub mod dark_mode;
pub mod error;
pub mod io;
pub mod schedule;
pub mod service;
pub mod settings;
pub mod time_source;

#[cfg(any(test, feature = "testing-support"))]
pub mod testing;

pub use daemon::{AppearanceStack, Daemon};
pub use dark_mode::{DarkModeManager, DarkModeMode, DarkModeSnapshot, DarkModeState};
pub use error::{AppearanceError, Result};
pub use schedule::{AlarmTimerManager, ScheduleRequest};
