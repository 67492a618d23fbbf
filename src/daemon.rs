//! Daemon lifecycle: wiring, startup and the signal loop.
//!
//! [`Daemon`] follows a small builder so the same wiring serves a normal
//! start and lock-free runs (tests, a second daemon on a private settings
//! file):
//! - Normal startup: `Daemon::new(debug_enabled).run()`
//! - Without the instance lock: `Daemon::new(debug_enabled).without_lock().run()`
//!
//! The object graph itself lives in [`AppearanceStack`], which `status` also
//! uses to inspect a user's state without starting the loop.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

use crate::config::{self, Config};
use crate::dark_mode::{DarkModeManager, DarkModeSnapshot};
use crate::io::signals::{SignalMessage, setup_signal_handler};
use crate::io::{dbus, lock};
use crate::schedule::{AlarmService, AlarmTimerManager, ThreadAlarmService, TimerKind, TimerManagerRegistry};
use crate::service::parameters::FileParameterStore;
use crate::service::system::{LocalConfiguration, OwnerPermissions};
use crate::service::AppearanceService;
use crate::settings::file::{FileSettingsStore, SettingsWatcher};
use crate::time_source::{Clock, SystemClock};

/// How often the loop re-checks the running flag while idle.
const LOOP_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Every long-lived object of the daemon.
pub struct AppearanceStack {
    pub alarms: Arc<ThreadAlarmService>,
    pub timers: Arc<AlarmTimerManager>,
    pub settings: Arc<FileSettingsStore>,
    pub dark_mode: DarkModeManager,
    pub service: Arc<AppearanceService>,
}

impl AppearanceStack {
    /// Build the graph described by `config`. Nothing is scheduled yet.
    pub fn build(config: &Config) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let alarms = Arc::new(
            ThreadAlarmService::start(Arc::clone(&clock)).context("Failed to start alarm service")?,
        );
        let alarm_service: Arc<dyn AlarmService> = alarms.clone();
        let registry = TimerManagerRegistry::new(alarm_service, clock);
        let timers = registry.manager(TimerKind::DarkColorMode);

        let settings_path = config.settings_path()?;
        let settings = Arc::new(FileSettingsStore::open(&settings_path).with_context(|| {
            format!("Failed to open settings store {}", settings_path.display())
        })?);

        let parameters_path = config.parameters_path()?;
        let parameters = FileParameterStore::open(&parameters_path).with_context(|| {
            format!("Failed to open parameter store {}", parameters_path.display())
        })?;

        let service = Arc::new(AppearanceService::new(
            Arc::new(OwnerPermissions::new()),
            Arc::new(LocalConfiguration::new()),
            Arc::new(parameters),
        ));
        let dark_mode = DarkModeManager::new(settings.clone(), Arc::clone(&timers));

        Ok(Self {
            alarms,
            timers,
            settings,
            dark_mode,
            service,
        })
    }

    /// Route resolved statuses to the appearance service.
    pub fn connect(&self) -> Result<()> {
        let service = Arc::clone(&self.service);
        self.dark_mode
            .initialize(move |is_dark, user_id| service.apply_dark_mode(is_dark, user_id))?;
        Ok(())
    }
}

/// Resolve `user_id`'s stored settings once and describe the result.
///
/// Nothing is applied; the timers armed while resolving are dropped again.
pub fn status_snapshot(config: &Config) -> Result<DarkModeSnapshot> {
    let stack = AppearanceStack::build(config)?;
    stack.dark_mode.initialize(|_, _| {})?;

    let user_id = config.user_id();
    if let Err(e) = stack.dark_mode.load_user_setting_data(user_id, false) {
        log_debug!("User {user_id} does not resolve: {e}");
    }
    let snapshot = stack.dark_mode.dump();
    stack.timers.clear_all_timers()?;
    Ok(snapshot)
}

/// Builder for configuring and running the daemon.
pub struct Daemon {
    debug_enabled: bool,
    create_lock: bool,
    show_headers: bool,
}

impl Daemon {
    /// Create a new runner with defaults matching normal run
    pub fn new(debug_enabled: bool) -> Self {
        Self {
            debug_enabled,
            create_lock: true,
            show_headers: true,
        }
    }

    /// Skip the single-instance lock
    pub fn without_lock(mut self) -> Self {
        self.create_lock = false;
        self
    }

    /// Skip the version header
    pub fn without_headers(mut self) -> Self {
        self.show_headers = false;
        self
    }

    /// Run until a shutdown signal arrives.
    pub fn run(self) -> Result<()> {
        if self.show_headers {
            log_version!();
        }

        let config_path = config::get_config_path()?;
        let config = Config::load()?;
        if config.debug() {
            crate::common::logger::Log::set_debug(true);
        }
        config.log_config(&config_path);

        let stack = AppearanceStack::build(&config)?;

        // Before anything observable happens
        let _lock = if self.create_lock {
            let guard = lock::acquire_lock(stack.settings.path())?;
            log_block_start!("Lock acquired: {}", guard.path().display());
            Some(guard)
        } else {
            None
        };

        if let Err(e) = stack.service.restore() {
            log_warning!("Persisted appearance only partially restored: {e}");
        }
        stack.connect()?;

        let signal_state = setup_signal_handler(self.debug_enabled || config.debug())?;

        let _watcher: Option<SettingsWatcher> = if config.watch_settings() {
            match stack.settings.watch() {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    log_pipe!();
                    log_warning!("Settings file watching unavailable: {e}");
                    log_indented!("External edits are picked up after SIGUSR2 or a restart");
                    None
                }
            }
        } else {
            None
        };

        if config.monitor_system_events()
            && let Err(e) = dbus::start_system_event_monitors(signal_state.signal_sender.clone())
        {
            log_pipe!();
            log_warning!("System event monitoring unavailable: {e}");
            log_indented!("Use SIGUSR2 to re-arm timers after resume or clock changes");
        }

        let user_id = config.user_id();
        stack
            .dark_mode
            .on_switch_user(user_id)
            .with_context(|| format!("Failed to activate user {user_id}"))?;
        log_block_start!("appearanced is running");

        while signal_state.running.load(Ordering::SeqCst) {
            let message = match signal_state.signal_receiver.recv_timeout(LOOP_POLL_INTERVAL) {
                Ok(message) => message,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            match message {
                SignalMessage::Shutdown => break,
                SignalMessage::RestartTimers
                | SignalMessage::TimeChange
                | SignalMessage::Sleep { resuming: true } => {
                    log_debug!("Restarting timers after {message:?}");
                    match stack.dark_mode.restart_timer() {
                        Ok(restarted) => log_debug!("Timers re-armed: {restarted}"),
                        Err(e) => log_warning!("Failed to restart timers: {e}"),
                    }
                }
                SignalMessage::Sleep { resuming: false } => {
                    log_debug!("Going to sleep, timers stay armed");
                }
            }
        }

        log_block_start!("Shutting down");
        if let Err(e) = stack.timers.clear_all_timers() {
            log_warning!("Failed to clear timers: {e}");
        }
        log_end!();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::constants::{
        SETTING_DARK_MODE_END_TIME, SETTING_DARK_MODE_MODE, SETTING_DARK_MODE_START_TIME,
    };
    use crate::dark_mode::DarkModeMode;
    use crate::settings::SettingsStore;
    use tempfile::tempdir;

    fn config_in(dir: &std::path::Path) -> Config {
        Config {
            settings_path: Some(dir.join("settings.toml").display().to_string()),
            parameters_path: Some(dir.join("parameters.toml").display().to_string()),
            user_id: Some(100),
            ..Config::default()
        }
    }

    #[test]
    fn test_status_snapshot_reflects_stored_window() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        {
            let store = FileSettingsStore::open(config.settings_path().unwrap()).unwrap();
            store.set_string(SETTING_DARK_MODE_MODE, "2", 100).unwrap();
            store.set_string(SETTING_DARK_MODE_START_TIME, "1320", 100).unwrap();
            store.set_string(SETTING_DARK_MODE_END_TIME, "360", 100).unwrap();
        }

        let snapshot = status_snapshot(&config).unwrap();
        let state = snapshot.states.get(&100).unwrap();
        assert_eq!(state.mode, DarkModeMode::CustomWindow);
        assert_eq!((state.start, state.end), (1320, 360));
        assert_eq!(snapshot.timers.len(), 1);
    }

    #[test]
    fn test_status_snapshot_of_unconfigured_user() {
        let dir = tempdir().unwrap();
        let snapshot = status_snapshot(&config_in(dir.path())).unwrap();
        assert_eq!(snapshot.states.get(&100).unwrap().mode, DarkModeMode::Invalid);
        assert!(snapshot.timers.is_empty());
    }

    #[test]
    fn test_connected_stack_applies_fixed_mode() {
        let dir = tempdir().unwrap();
        let stack = AppearanceStack::build(&config_in(dir.path())).unwrap();
        stack.connect().unwrap();
        stack.dark_mode.on_switch_user(100).unwrap();

        stack
            .settings
            .set_string(SETTING_DARK_MODE_MODE, "1", 100)
            .unwrap();
        assert_eq!(stack.service.get_dark_mode().unwrap(), DarkModeMode::AlwaysDark);

        stack
            .settings
            .set_string(SETTING_DARK_MODE_MODE, "0", 100)
            .unwrap();
        assert_eq!(stack.service.get_dark_mode().unwrap(), DarkModeMode::AlwaysLight);
    }
}
