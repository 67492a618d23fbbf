//! Dark mode state machine.
//!
//! [`DarkModeManager`] keeps a [`DarkModeState`] per user, observes the
//! settings store for the active user, and decides on every change whether
//! the user's status is fixed (light or dark) or follows a daily window. In
//! window mode it asks the [`AlarmTimerManager`] for boundary alarms and
//! resolves the current status immediately instead of waiting for the first
//! firing.
//!
//! Every firing carries the [`ScheduleRequest`] it was armed for. A firing is
//! honoured only while the live state still asks for exactly that request;
//! anything else is a stale firing from a superseded configuration and is
//! dropped without a notification or re-arm.
//!
//! Lock order is states → timer records → alarm queue. The observer lock is
//! never held together with the states lock, and the update callback always
//! runs with no manager lock held.

pub mod state;

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::common::constants::{
    ALL_USERS, DARK_MODE_SETTING_KEYS, INVALID_USER_ID, SETTING_DARK_MODE_END_TIME,
    SETTING_DARK_MODE_MODE, SETTING_DARK_MODE_START_TIME, UNSET_WINDOW_BOUND, UserId,
};
use crate::error::{AppearanceError, Result};
use crate::schedule::window::format_minutes;
use crate::schedule::{
    AlarmCallback, AlarmTimerManager, Boundary, ScheduleRequest, TimerSnapshot,
    is_valid_schedule_time,
};
use crate::settings::{ObserverCallback, SettingsStore};

pub use state::{DarkModeMode, DarkModeState};

/// Receives `(is_dark, user_id)` whenever a status has to be applied.
pub type UpdateCallback = Arc<dyn Fn(bool, UserId) + Send + Sync>;

/// When a resolved status reaches the update callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NotifyPolicy {
    Never,
    Always,
    /// Only if it differs from the last status sent for the user.
    OnChange,
}

impl NotifyPolicy {
    fn from_flag(should_notify: bool) -> Self {
        if should_notify { Self::Always } else { Self::Never }
    }
}

struct ObserverBook {
    callbacks: Vec<(&'static str, ObserverCallback)>,
    user_id: UserId,
    all_registered: bool,
}

struct Inner {
    settings: Arc<dyn SettingsStore>,
    timers: Arc<AlarmTimerManager>,
    update_callback: Mutex<Option<UpdateCallback>>,
    observers: Mutex<ObserverBook>,
    states: Mutex<BTreeMap<UserId, DarkModeState>>,
    last_status: Mutex<HashMap<UserId, bool>>,
}

/// Outcome of re-evaluating one user's state.
struct Resolution {
    is_dark: Option<bool>,
    outcome: Result<()>,
}

impl Resolution {
    fn into_result(self) -> Result<bool> {
        self.outcome?;
        self.is_dark
            .ok_or_else(|| AppearanceError::operation_invalid("status could not be resolved"))
    }
}

/// Serializable view of the manager for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct DarkModeSnapshot {
    pub active_user: UserId,
    pub observers_registered: bool,
    pub observer_count: usize,
    pub states: BTreeMap<UserId, DarkModeState>,
    pub timers: Vec<TimerSnapshot>,
}

/// Tracks every user's dark mode and drives the active user's schedule.
#[derive(Clone)]
pub struct DarkModeManager {
    inner: Arc<Inner>,
}

impl DarkModeManager {
    pub fn new(settings: Arc<dyn SettingsStore>, timers: Arc<AlarmTimerManager>) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                timers,
                update_callback: Mutex::new(None),
                observers: Mutex::new(ObserverBook {
                    callbacks: Vec::new(),
                    user_id: INVALID_USER_ID,
                    all_registered: false,
                }),
                states: Mutex::new(BTreeMap::new()),
                last_status: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn upgrade(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    fn states(&self) -> MutexGuard<'_, BTreeMap<UserId, DarkModeState>> {
        self.inner.states.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn observers(&self) -> MutexGuard<'_, ObserverBook> {
        self.inner.observers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn last_status(&self) -> MutexGuard<'_, HashMap<UserId, bool>> {
        self.inner.last_status.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Install the update callback and prepare the settings observers.
    ///
    /// Observers are registered per user by [`Self::on_switch_user`].
    pub fn initialize<F>(&self, update_callback: F) -> Result<()>
    where
        F: Fn(bool, UserId) + Send + Sync + 'static,
    {
        let weak = Arc::downgrade(&self.inner);
        let callbacks: Vec<(&'static str, ObserverCallback)> = DARK_MODE_SETTING_KEYS
            .iter()
            .map(|key| {
                let weak = weak.clone();
                let observer: ObserverCallback = Arc::new(move |key: &str, user_id: UserId| {
                    if let Some(manager) = Self::upgrade(&weak) {
                        manager.on_setting_changed(key, user_id);
                    }
                });
                (*key, observer)
            })
            .collect();

        self.observers().callbacks = callbacks;
        *self
            .inner
            .update_callback
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(update_callback));
        log_debug!("Dark mode manager initialized");
        Ok(())
    }

    /// Read a user's stored settings and re-evaluate their state.
    ///
    /// Returns the resolved status. Missing values fall back to an invalid
    /// mode and unset bounds.
    pub fn load_user_setting_data(&self, user_id: UserId, should_notify: bool) -> Result<bool> {
        self.load_with_policy(user_id, NotifyPolicy::from_flag(should_notify))
    }

    fn load_with_policy(&self, user_id: UserId, policy: NotifyPolicy) -> Result<bool> {
        let mode = self.read_mode(user_id);
        let start = self.read_bound(SETTING_DARK_MODE_START_TIME, user_id);
        let end = self.read_bound(SETTING_DARK_MODE_END_TIME, user_id);

        let resolution = {
            let mut states = self.states();
            let state = DarkModeState { mode, start, end };
            states.insert(user_id, state);
            log_info!(
                "Loaded settings for user {user_id}: {mode}, window {} → {}",
                format_minutes(start),
                format_minutes(end)
            );
            self.resolve_locked(user_id, &state)
        };
        self.finish(user_id, resolution, policy)
    }

    /// Re-evaluate a user's current state, arming or clearing timers as needed.
    ///
    /// A scheduling failure is returned as the error, but the status resolved
    /// from the wall clock is still notified.
    pub fn on_state_change(&self, user_id: UserId, should_notify: bool) -> Result<bool> {
        let resolution = {
            let mut states = self.states();
            let state = *states.entry(user_id).or_default();
            self.resolve_locked(user_id, &state)
        };
        self.finish(user_id, resolution, NotifyPolicy::from_flag(should_notify))
    }

    fn finish(&self, user_id: UserId, resolution: Resolution, policy: NotifyPolicy) -> Result<bool> {
        if let Some(is_dark) = resolution.is_dark {
            self.notify_update(is_dark, user_id, policy);
        }
        resolution.into_result()
    }

    /// Decide the user's status. Caller holds the states lock.
    fn resolve_locked(&self, user_id: UserId, state: &DarkModeState) -> Resolution {
        match state.mode {
            DarkModeMode::AlwaysLight | DarkModeMode::AlwaysDark => {
                if let Err(e) = self.inner.timers.clear_timer_by_user_id(user_id) {
                    log_warning!("Failed to clear timers for user {user_id}: {e}");
                }
                Resolution {
                    is_dark: Some(state.mode == DarkModeMode::AlwaysDark),
                    outcome: Ok(()),
                }
            }
            DarkModeMode::CustomWindow => {
                if !is_valid_schedule_time(state.start, state.end) {
                    // Timers armed for an earlier window would only fire stale
                    if let Err(e) = self.inner.timers.clear_timer_by_user_id(user_id) {
                        log_warning!("Failed to clear timers for user {user_id}: {e}");
                    }
                    return Resolution {
                        is_dark: None,
                        outcome: Err(AppearanceError::invalid_argument(format!(
                            "window {}..{} for user {user_id} is out of range",
                            state.start, state.end
                        ))),
                    };
                }

                let request = ScheduleRequest::new(user_id, state.start, state.end);
                let outcome = self.create_or_update_timers(request);
                if let Err(e) = &outcome {
                    log_warning!("Scheduling failed for user {user_id}, resolving from clock: {e}");
                }
                Resolution {
                    is_dark: Some(
                        self.inner
                            .timers
                            .is_within_time_interval(state.start, state.end),
                    ),
                    outcome,
                }
            }
            DarkModeMode::Invalid => {
                log_debug!("No usable dark mode for user {user_id}");
                Resolution {
                    is_dark: None,
                    outcome: Err(AppearanceError::operation_invalid(format!(
                        "no dark mode configured for user {user_id}"
                    ))),
                }
            }
        }
    }

    fn create_or_update_timers(&self, request: ScheduleRequest) -> Result<()> {
        let weak = Arc::downgrade(&self.inner);
        let callback = |boundary: Boundary| -> AlarmCallback {
            let weak = weak.clone();
            Arc::new(move || {
                if let Some(manager) = Self::upgrade(&weak) {
                    manager.on_timer_fired(request, boundary);
                }
            })
        };

        self.inner.timers.set_schedule_time(
            request.start,
            request.end,
            request.user_id,
            callback(Boundary::Start),
            callback(Boundary::End),
        )
    }

    fn on_timer_fired(&self, request: ScheduleRequest, boundary: Boundary) {
        let user_id = request.user_id;
        if user_id != self.active_user() {
            log_debug!("Discarding {boundary:?} firing for background user {user_id}");
            return;
        }
        let is_dark = {
            let states = self.states();
            let live = states
                .get(&user_id)
                .and_then(|state| state.schedule_request(user_id));
            if live != Some(request) {
                log_debug!(
                    "Discarding stale {boundary:?} firing for user {user_id} ({} → {})",
                    format_minutes(request.start),
                    format_minutes(request.end)
                );
                return;
            }

            log_info!(
                "Window {} reached for user {user_id}",
                match boundary {
                    Boundary::Start => format_minutes(request.start),
                    Boundary::End => format_minutes(request.end),
                }
            );
            if let Err(e) = self.create_or_update_timers(request) {
                log_warning!("Failed to re-arm timers for user {user_id}: {e}");
            }
            self.inner
                .timers
                .is_within_time_interval(request.start, request.end)
        };

        self.notify_update(is_dark, user_id, NotifyPolicy::Always);
    }

    fn read_mode(&self, user_id: UserId) -> DarkModeMode {
        match self.inner.settings.get_int32(SETTING_DARK_MODE_MODE, user_id) {
            Ok(value) => DarkModeMode::from_stored(value, user_id),
            Err(e) => {
                log_debug!("No dark mode stored for user {user_id}: {e}");
                DarkModeMode::Invalid
            }
        }
    }

    fn read_bound(&self, key: &str, user_id: UserId) -> i32 {
        self.inner
            .settings
            .get_int32(key, user_id)
            .unwrap_or_else(|e| {
                log_debug!("No value for '{key}' (user {user_id}): {e}");
                UNSET_WINDOW_BOUND
            })
    }

    fn on_setting_changed(&self, key: &str, user_id: UserId) {
        let resolution = {
            // Read before locking: the store may be slow
            let update: Box<dyn FnOnce(&mut DarkModeState)> = match key {
                SETTING_DARK_MODE_MODE => {
                    let mode = self.read_mode(user_id);
                    Box::new(move |state: &mut DarkModeState| {
                        log_info!("Dark mode for user {user_id}: {} → {mode}", state.mode);
                        state.mode = mode;
                    })
                }
                SETTING_DARK_MODE_START_TIME => {
                    let start = self.read_bound(key, user_id);
                    Box::new(move |state: &mut DarkModeState| {
                        log_info!(
                            "Window start for user {user_id}: {} → {}",
                            format_minutes(state.start),
                            format_minutes(start)
                        );
                        state.start = start;
                    })
                }
                SETTING_DARK_MODE_END_TIME => {
                    let end = self.read_bound(key, user_id);
                    Box::new(move |state: &mut DarkModeState| {
                        log_info!(
                            "Window end for user {user_id}: {} → {}",
                            format_minutes(state.end),
                            format_minutes(end)
                        );
                        state.end = end;
                    })
                }
                _ => {
                    log_debug!("Ignoring change of unrelated key '{key}'");
                    return;
                }
            };

            if user_id != self.active_user() {
                log_debug!("Ignoring '{key}' change for background user {user_id}");
                return;
            }
            let mut states = self.states();
            let state = states.entry(user_id).or_default();
            update(state);
            let state = *state;
            self.resolve_locked(user_id, &state)
        };

        if let Err(e) = self.finish(user_id, resolution, NotifyPolicy::Always) {
            log_debug!("Change of '{key}' left user {user_id} unresolved: {e}");
        }
    }

    fn notify_update(&self, is_dark: bool, user_id: UserId, policy: NotifyPolicy) {
        match policy {
            NotifyPolicy::Never => return,
            NotifyPolicy::OnChange if self.last_status().get(&user_id) == Some(&is_dark) => {
                log_debug!("Status for user {user_id} unchanged, not notifying");
                return;
            }
            NotifyPolicy::OnChange | NotifyPolicy::Always => {}
        }

        self.last_status().insert(user_id, is_dark);
        let callback = self
            .inner
            .update_callback
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match callback {
            Some(callback) => {
                log_debug!(
                    "Notifying {} for user {user_id}",
                    if is_dark { "dark" } else { "light" }
                );
                callback(is_dark, user_id);
            }
            None => log_error!("No update callback installed, dropping status for user {user_id}"),
        }
    }

    /// Make the active user the only observed one.
    ///
    /// Timers and observers of the previous user are dropped, the new user's
    /// observers are registered and their stored settings are loaded. The
    /// loaded status is only notified if it differs from the last one sent.
    pub fn on_switch_user(&self, user_id: UserId) -> Result<()> {
        let settings = &self.inner.settings;
        if !settings.is_initialized() {
            if let Err(e) = settings.initialize() {
                log_error!("Settings store failed to initialize: {e}");
                return Err(AppearanceError::not_initialized(format!(
                    "settings store unavailable: {e}"
                )));
            }
            if !settings.is_initialized() {
                log_error!("Settings store is not initialized");
                return Err(AppearanceError::not_initialized("settings store unavailable"));
            }
        }

        let (previous, failures) = {
            let mut book = self.observers();
            if book.callbacks.is_empty() {
                return Err(AppearanceError::not_initialized(
                    "dark mode manager has no observers, call initialize first",
                ));
            }

            let previous = book.user_id;
            if previous != INVALID_USER_ID {
                log_info!("Clearing timers and observers for user {previous}");
                for (key, _) in &book.callbacks {
                    if let Err(e) = settings.unregister_observer(key, previous) {
                        log_warning!("Failed to unregister '{key}' for user {previous}: {e}");
                    }
                }
                book.all_registered = false;
                book.user_id = INVALID_USER_ID;
            }

            let failures = book
                .callbacks
                .iter()
                .filter(|(key, callback)| {
                    settings
                        .register_observer(key, Arc::clone(callback), user_id)
                        .inspect_err(|e| {
                            log_error!("Failed to observe '{key}' for user {user_id}: {e}")
                        })
                        .is_err()
                })
                .count();
            book.user_id = user_id;
            book.all_registered = failures == 0;
            (previous, failures)
        };

        if previous != INVALID_USER_ID {
            self.retire_user(previous);
        }
        if failures != 0 {
            return Err(AppearanceError::not_initialized(format!(
                "{failures} settings observers failed to register for user {user_id}"
            )));
        }
        log_info!("Active user is now {user_id}");

        match self.load_with_policy(user_id, NotifyPolicy::OnChange) {
            Ok(is_dark) => log_debug!(
                "User {user_id} resolves to {}",
                if is_dark { "dark" } else { "light" }
            ),
            Err(AppearanceError::OperationInvalid(_)) => {
                log_debug!("User {user_id} has no dark mode configured")
            }
            Err(e) => log_warning!("Loading settings for user {user_id} incomplete: {e}"),
        }
        Ok(())
    }

    /// Forget a user that is no longer active and cancel their timers.
    ///
    /// Done under the states lock so a firing already in flight either
    /// re-arms before the clear or finds no state afterwards.
    fn retire_user(&self, user_id: UserId) {
        let mut states = self.states();
        states.remove(&user_id);
        if let Err(e) = self.inner.timers.clear_timer_by_user_id(user_id) {
            log_warning!("Failed to clear timers for user {user_id}: {e}");
        }
    }

    /// Bring a fixed stored mode back in line with an observed status.
    ///
    /// Writes the opposite fixed mode only if the stored one contradicts
    /// `is_dark`. Window mode is never overwritten.
    pub fn notify_dark_mode_update(&self, user_id: UserId, is_dark: bool) -> Result<()> {
        let stored = self
            .states()
            .get(&user_id)
            .map(|state| state.mode)
            .unwrap_or_default();

        let corrected = DarkModeMode::fixed(is_dark);
        if !stored.is_fixed() || stored == corrected {
            log_debug!("Stored mode {stored} already consistent for user {user_id}");
            self.last_status().insert(user_id, is_dark);
            return Ok(());
        }

        log_info!("Correcting stored mode for user {user_id} to {corrected}");
        self.inner.settings.set_string(
            SETTING_DARK_MODE_MODE,
            &corrected.as_i32().to_string(),
            user_id,
        )?;
        self.last_status().insert(user_id, is_dark);
        Ok(())
    }

    /// Re-arm every timer from its stored window and re-resolve the active user.
    ///
    /// Used after resume or a wall-clock change, when a boundary may have
    /// passed without its alarm firing.
    pub fn restart_timer(&self) -> Result<bool> {
        let restarted = self.inner.timers.restart_timer_by_user_id(ALL_USERS);
        if let Err(e) = &restarted {
            log_warning!("Restarting timers incomplete: {e}");
        }

        let user_id = self.active_user();
        if user_id != INVALID_USER_ID {
            let is_dark = self
                .states()
                .get(&user_id)
                .and_then(|state| state.schedule_request(user_id))
                .filter(|request| is_valid_schedule_time(request.start, request.end))
                .map(|request| {
                    self.inner
                        .timers
                        .is_within_time_interval(request.start, request.end)
                });
            if let Some(is_dark) = is_dark {
                self.notify_update(is_dark, user_id, NotifyPolicy::OnChange);
            }
        }
        restarted
    }

    /// The user whose settings are currently observed.
    pub fn active_user(&self) -> UserId {
        self.observers().user_id
    }

    pub fn state(&self, user_id: UserId) -> Option<DarkModeState> {
        self.states().get(&user_id).copied()
    }

    pub fn dump(&self) -> DarkModeSnapshot {
        let (active_user, observers_registered, observer_count) = {
            let book = self.observers();
            (book.user_id, book.all_registered, book.callbacks.len())
        };
        let states = self.states().clone();
        let snapshot = DarkModeSnapshot {
            active_user,
            observers_registered,
            observer_count,
            states,
            timers: self.inner.timers.snapshot(),
        };

        log_debug!(
            "Observers: {observer_count}, user {active_user}, all registered: {observers_registered}"
        );
        for (user_id, state) in &snapshot.states {
            log_debug!(
                "User {user_id}: {}, {} → {}",
                state.mode,
                format_minutes(state.start),
                format_minutes(state.end)
            );
        }
        for timer in &snapshot.timers {
            log_debug!(
                "Timers for user {}: start {:?}, end {:?}",
                timer.user_id,
                timer.start_alarm,
                timer.end_alarm
            );
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MemorySettingsStore;
    use crate::testing::{ManualAlarmService, NotificationLog};
    use crate::time_source::{Clock, ManualClock};
    use chrono::Timelike;

    const NIGHT_START: i32 = 22 * 60;
    const NIGHT_END: i32 = 6 * 60;

    struct Harness {
        clock: Arc<ManualClock>,
        alarms: Arc<ManualAlarmService>,
        timers: Arc<AlarmTimerManager>,
        settings: Arc<MemorySettingsStore>,
        manager: DarkModeManager,
        log: NotificationLog,
    }

    impl Harness {
        fn at(hour: u32, minute: u32) -> Self {
            let clock = Arc::new(ManualClock::at(hour, minute));
            let alarms = Arc::new(ManualAlarmService::new(clock.clone()));
            let timers = Arc::new(AlarmTimerManager::new(alarms.clone(), clock.clone()));
            let settings = Arc::new(MemorySettingsStore::new());
            let manager = DarkModeManager::new(settings.clone(), timers.clone());
            let log = NotificationLog::new();
            manager.initialize(log.callback()).unwrap();
            Self {
                clock,
                alarms,
                timers,
                settings,
                manager,
                log,
            }
        }

        fn store(&self, user_id: UserId, mode: DarkModeMode, start: i32, end: i32) {
            self.settings
                .put(SETTING_DARK_MODE_MODE, &mode.as_i32().to_string(), user_id);
            self.settings
                .put(SETTING_DARK_MODE_START_TIME, &start.to_string(), user_id);
            self.settings
                .put(SETTING_DARK_MODE_END_TIME, &end.to_string(), user_id);
        }
    }

    #[test]
    fn test_night_window_resolves_by_time_of_day() {
        for (hour, expected) in [(23, true), (5, true), (12, false)] {
            let h = Harness::at(hour, 0);
            h.store(100, DarkModeMode::CustomWindow, NIGHT_START, NIGHT_END);

            h.manager.on_switch_user(100).unwrap();
            assert_eq!(h.log.events(), vec![(expected, 100)], "at {hour}:00");
            assert_eq!(h.alarms.pending_count(), 2);
        }
    }

    #[test]
    fn test_boundary_firing_notifies_and_rearms_for_tomorrow() {
        let h = Harness::at(21, 59);
        h.store(100, DarkModeMode::CustomWindow, NIGHT_START, NIGHT_END);
        h.manager.on_switch_user(100).unwrap();
        assert_eq!(h.log.last(), Some((false, 100)));

        h.clock.set_time_of_day(22, 0);
        assert_eq!(h.alarms.fire_due(), 1);
        assert_eq!(h.log.last(), Some((true, 100)));

        let triggers = h.alarms.pending_triggers();
        let tomorrow = h.clock.now().date_naive().succ_opt().unwrap();
        assert_eq!(triggers.len(), 2);
        assert!(triggers.iter().all(|t| t.date_naive() == tomorrow));
        assert_eq!(triggers[0].hour(), 22);
        assert_eq!(triggers[1].hour(), 6);
    }

    #[test]
    fn test_fixed_mode_cancels_window_timers() {
        let h = Harness::at(12, 0);
        h.store(0, DarkModeMode::CustomWindow, NIGHT_START, NIGHT_END);
        h.manager.on_switch_user(0).unwrap();
        assert!(h.timers.has_timers(0));

        h.settings
            .set_string(SETTING_DARK_MODE_MODE, "1", 0)
            .unwrap();

        assert!(!h.timers.has_timers(0));
        assert_eq!(h.alarms.pending_count(), 0);
        assert_eq!(h.alarms.cancelled().len(), 2);
        assert_eq!(h.log.last(), Some((true, 0)));
    }

    #[test]
    fn test_stale_firing_is_discarded() {
        let h = Harness::at(12, 0);
        h.store(100, DarkModeMode::CustomWindow, NIGHT_START, NIGHT_END);
        h.manager.on_switch_user(100).unwrap();
        h.log.clear();

        h.settings
            .set_string(SETTING_DARK_MODE_START_TIME, &(23 * 60).to_string(), 100)
            .unwrap();
        assert_eq!(h.log.events(), vec![(false, 100)]);
        h.log.clear();
        let cancelled = h.alarms.cancelled().len();

        // A firing armed for the old window races the change
        h.manager
            .on_timer_fired(ScheduleRequest::new(100, NIGHT_START, NIGHT_END), Boundary::Start);

        assert!(h.log.events().is_empty());
        assert_eq!(h.alarms.cancelled().len(), cancelled);
        assert_eq!(h.timers.initial_setup(100), Some((23 * 60, NIGHT_END)));
    }

    #[test]
    fn test_firing_after_switch_to_fixed_is_stale() {
        let h = Harness::at(12, 0);
        h.store(100, DarkModeMode::CustomWindow, NIGHT_START, NIGHT_END);
        h.manager.on_switch_user(100).unwrap();
        h.settings.set_string(SETTING_DARK_MODE_MODE, "0", 100).unwrap();
        h.log.clear();

        h.manager
            .on_timer_fired(ScheduleRequest::new(100, NIGHT_START, NIGHT_END), Boundary::End);
        assert!(h.log.events().is_empty());
        assert!(!h.timers.has_timers(100));
    }

    #[test]
    fn test_switch_user_drops_previous_user() {
        let h = Harness::at(12, 0);
        h.store(100, DarkModeMode::CustomWindow, NIGHT_START, NIGHT_END);
        h.store(101, DarkModeMode::AlwaysDark, UNSET_WINDOW_BOUND, UNSET_WINDOW_BOUND);
        h.manager.on_switch_user(100).unwrap();
        assert!(h.timers.has_timers(100));

        h.manager.on_switch_user(101).unwrap();
        assert!(!h.timers.has_timers(100));
        assert_eq!(h.alarms.pending_count(), 0);
        assert_eq!(h.manager.active_user(), 101);
        assert_eq!(h.settings.observer_count(), 3);
        assert_eq!(h.log.last(), Some((true, 101)));

        // The previous user's settings are inert now
        h.log.clear();
        h.settings.set_string(SETTING_DARK_MODE_MODE, "1", 100).unwrap();
        assert!(h.log.events().is_empty());
    }

    #[test]
    fn test_in_flight_firing_for_previous_user_is_dropped() {
        let h = Harness::at(12, 0);
        h.store(100, DarkModeMode::CustomWindow, NIGHT_START, NIGHT_END);
        h.manager.on_switch_user(100).unwrap();
        h.manager.on_switch_user(101).unwrap();
        assert_eq!(h.manager.state(100), None);
        h.log.clear();

        // Taken off the alarm queue just before the switch
        h.manager
            .on_timer_fired(ScheduleRequest::new(100, NIGHT_START, NIGHT_END), Boundary::Start);

        assert!(!h.timers.has_timers(100));
        assert_eq!(h.alarms.pending_count(), 0);
        assert!(h.log.events().is_empty());
    }

    #[test]
    fn test_switch_back_does_not_repeat_unchanged_status() {
        let h = Harness::at(12, 0);
        h.store(100, DarkModeMode::AlwaysLight, UNSET_WINDOW_BOUND, UNSET_WINDOW_BOUND);
        h.store(101, DarkModeMode::AlwaysDark, UNSET_WINDOW_BOUND, UNSET_WINDOW_BOUND);

        h.manager.on_switch_user(100).unwrap();
        h.manager.on_switch_user(101).unwrap();
        h.manager.on_switch_user(100).unwrap();
        assert_eq!(h.log.events(), vec![(false, 100), (true, 101)]);
    }

    #[test]
    fn test_out_of_range_mode_is_coerced_to_invalid() {
        let h = Harness::at(12, 0);
        h.settings.put(SETTING_DARK_MODE_MODE, "7", 100);

        let result = h.manager.load_user_setting_data(100, true);
        assert!(matches!(result, Err(AppearanceError::OperationInvalid(_))));
        assert_eq!(h.manager.state(100).unwrap().mode, DarkModeMode::Invalid);
        assert!(h.log.events().is_empty());
    }

    #[test]
    fn test_window_without_bounds_is_rejected() {
        let h = Harness::at(12, 0);
        h.settings.put(SETTING_DARK_MODE_MODE, "2", 100);

        let result = h.manager.load_user_setting_data(100, true);
        assert!(matches!(result, Err(AppearanceError::InvalidArgument(_))));
        assert!(!h.timers.has_timers(100));
        assert!(h.log.events().is_empty());
    }

    #[test]
    fn test_scheduling_failure_still_reports_status() {
        let h = Harness::at(23, 0);
        h.store(100, DarkModeMode::CustomWindow, NIGHT_START, NIGHT_END);
        h.alarms.fail_arm_after(0);

        let result = h.manager.load_user_setting_data(100, true);
        assert!(matches!(result, Err(AppearanceError::SystemError(_))));
        assert_eq!(h.log.events(), vec![(true, 100)]);
    }

    #[test]
    fn test_load_without_notify_stays_quiet() {
        let h = Harness::at(23, 0);
        h.store(100, DarkModeMode::CustomWindow, NIGHT_START, NIGHT_END);
        assert!(h.manager.load_user_setting_data(100, false).unwrap());
        assert!(h.log.events().is_empty());
        assert!(h.manager.on_state_change(100, true).unwrap());
        assert_eq!(h.log.events(), vec![(true, 100)]);
    }

    #[test]
    fn test_observed_status_corrects_fixed_mode() {
        let h = Harness::at(12, 0);
        h.store(100, DarkModeMode::AlwaysLight, UNSET_WINDOW_BOUND, UNSET_WINDOW_BOUND);
        h.manager.on_switch_user(100).unwrap();

        h.manager.notify_dark_mode_update(100, true).unwrap();
        assert_eq!(h.settings.get_string(SETTING_DARK_MODE_MODE, 100).as_deref(), Some("1"));
        assert_eq!(h.manager.state(100).unwrap().mode, DarkModeMode::AlwaysDark);

        // Already consistent: nothing written
        h.settings.put(SETTING_DARK_MODE_MODE, "1", 100);
        h.manager.notify_dark_mode_update(100, true).unwrap();
        assert_eq!(h.settings.get_string(SETTING_DARK_MODE_MODE, 100).as_deref(), Some("1"));
    }


    #[test]
    fn test_observed_status_never_overrides_window() {
        let h = Harness::at(12, 0);
        h.store(100, DarkModeMode::CustomWindow, NIGHT_START, NIGHT_END);
        h.manager.on_switch_user(100).unwrap();

        h.manager.notify_dark_mode_update(100, true).unwrap();
        assert_eq!(h.settings.get_string(SETTING_DARK_MODE_MODE, 100).as_deref(), Some("2"));
    }

    #[test]
    fn test_restart_rearms_and_catches_up_missed_boundary() {
        let h = Harness::at(12, 0);
        h.store(100, DarkModeMode::CustomWindow, NIGHT_START, NIGHT_END);
        h.manager.on_switch_user(100).unwrap();
        assert_eq!(h.log.events(), vec![(false, 100)]);

        // Suspended across 22:00: alarms lost
        h.alarms.drop_all();
        h.clock.set_time_of_day(23, 30);

        assert!(h.manager.restart_timer().unwrap());
        assert_eq!(h.alarms.pending_count(), 2);
        assert!(h.alarms.pending_triggers().iter().all(|t| *t > h.clock.now()));
        assert_eq!(h.log.events(), vec![(false, 100), (true, 100)]);

        // Nothing changed since: no duplicate notification
        assert!(h.manager.restart_timer().unwrap());
        assert_eq!(h.log.events().len(), 2);
    }

    #[test]
    fn test_switch_before_initialize_is_rejected() {
        let clock = Arc::new(ManualClock::at(12, 0));
        let alarms = Arc::new(ManualAlarmService::new(clock.clone()));
        let manager = DarkModeManager::new(
            Arc::new(MemorySettingsStore::new()),
            Arc::new(AlarmTimerManager::new(alarms, clock)),
        );
        assert!(matches!(
            manager.on_switch_user(100),
            Err(AppearanceError::NotInitialized(_))
        ));
    }

    struct UnavailableStore;

    impl SettingsStore for UnavailableStore {
        fn is_initialized(&self) -> bool {
            false
        }

        fn initialize(&self) -> Result<()> {
            Err(AppearanceError::system("backend offline"))
        }

        fn get_int32(&self, _: &str, _: UserId) -> Result<i32> {
            Err(AppearanceError::system("backend offline"))
        }

        fn set_string(&self, _: &str, _: &str, _: UserId) -> Result<()> {
            Err(AppearanceError::system("backend offline"))
        }

        fn register_observer(&self, _: &str, _: ObserverCallback, _: UserId) -> Result<()> {
            Err(AppearanceError::system("backend offline"))
        }

        fn unregister_observer(&self, _: &str, _: UserId) -> Result<()> {
            Ok(())
        }
    }

    /// Serves reads and observers but refuses every write.
    struct ReadOnlyStore(MemorySettingsStore);

    impl SettingsStore for ReadOnlyStore {
        fn get_int32(&self, key: &str, user_id: UserId) -> Result<i32> {
            self.0.get_int32(key, user_id)
        }

        fn set_string(&self, _: &str, _: &str, _: UserId) -> Result<()> {
            Err(AppearanceError::system("read-only"))
        }

        fn register_observer(&self, key: &str, callback: ObserverCallback, user_id: UserId) -> Result<()> {
            self.0.register_observer(key, callback, user_id)
        }

        fn unregister_observer(&self, key: &str, user_id: UserId) -> Result<()> {
            self.0.unregister_observer(key, user_id)
        }
    }

    #[test]
    fn test_failed_write_back_keeps_last_status() {
        let clock = Arc::new(ManualClock::at(12, 0));
        let alarms = Arc::new(ManualAlarmService::new(clock.clone()));
        let settings = MemorySettingsStore::new();
        settings.put(SETTING_DARK_MODE_MODE, "0", 100);
        let manager = DarkModeManager::new(
            Arc::new(ReadOnlyStore(settings)),
            Arc::new(AlarmTimerManager::new(alarms, clock)),
        );
        let log = NotificationLog::new();
        manager.initialize(log.callback()).unwrap();
        manager.on_switch_user(100).unwrap();

        assert!(manager.notify_dark_mode_update(100, true).is_err());
        assert_eq!(manager.last_status().get(&100), Some(&false));
        assert_eq!(log.events(), vec![(false, 100)]);
    }

    #[test]
    fn test_switch_with_unavailable_store_is_not_initialized() {
        let clock = Arc::new(ManualClock::at(12, 0));
        let alarms = Arc::new(ManualAlarmService::new(clock.clone()));
        let manager = DarkModeManager::new(
            Arc::new(UnavailableStore),
            Arc::new(AlarmTimerManager::new(alarms, clock)),
        );
        manager.initialize(|_, _| {}).unwrap();
        assert!(matches!(
            manager.on_switch_user(100),
            Err(AppearanceError::NotInitialized(_))
        ));
        assert_eq!(manager.active_user(), INVALID_USER_ID);
    }

    #[test]
    fn test_dump_reports_states_and_timers() {
        let h = Harness::at(12, 0);
        h.store(100, DarkModeMode::CustomWindow, NIGHT_START, NIGHT_END);
        h.manager.on_switch_user(100).unwrap();

        let snapshot = h.manager.dump();
        assert_eq!(snapshot.active_user, 100);
        assert!(snapshot.observers_registered);
        assert_eq!(snapshot.observer_count, 3);
        assert_eq!(snapshot.states[&100].start, NIGHT_START);
        assert_eq!(snapshot.timers.len(), 1);
        assert!(snapshot.timers[0].end_alarm.is_some());

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["states"]["100"]["mode"], "custom_window");
    }
}
