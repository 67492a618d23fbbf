use std::sync::Arc;

use appearanced::common::constants::{
    PERSIST_DARK_MODE_KEY, SETTING_DARK_MODE_END_TIME, SETTING_DARK_MODE_MODE,
    SETTING_DARK_MODE_START_TIME, UserId,
};
use appearanced::schedule::{AlarmService, AlarmTimerManager};
use appearanced::service::{
    AppearanceService, LocalConfiguration, MemoryParameterStore, OwnerPermissions,
    ParameterStore,
};
use appearanced::settings::{FileSettingsStore, MemorySettingsStore, SettingsStore};
use appearanced::testing::{ManualAlarmService, NotificationLog};
use appearanced::time_source::{Clock, ManualClock};
use appearanced::{DarkModeManager, DarkModeMode};
use chrono::Timelike;

const NIGHT_START: i32 = 22 * 60;
const NIGHT_END: i32 = 6 * 60;

/// Manager over an in-memory store, a pinned clock and hand-fired alarms.
struct Scenario {
    clock: Arc<ManualClock>,
    alarms: Arc<ManualAlarmService>,
    timers: Arc<AlarmTimerManager>,
    settings: Arc<dyn SettingsStore>,
    manager: DarkModeManager,
    log: NotificationLog,
}

impl Scenario {
    fn at(hour: u32, minute: u32) -> Self {
        Self::with_store(hour, minute, Arc::new(MemorySettingsStore::new()))
    }

    fn with_store(hour: u32, minute: u32, settings: Arc<dyn SettingsStore>) -> Self {
        let clock = Arc::new(ManualClock::at(hour, minute));
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let alarms = Arc::new(ManualAlarmService::new(Arc::clone(&dyn_clock)));
        let dyn_alarms: Arc<dyn AlarmService> = alarms.clone();
        let timers = Arc::new(AlarmTimerManager::new(dyn_alarms, dyn_clock));
        let manager = DarkModeManager::new(Arc::clone(&settings), Arc::clone(&timers));
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

    fn store_window(&self, user_id: UserId, start: i32, end: i32) {
        self.settings
            .set_string(SETTING_DARK_MODE_START_TIME, &start.to_string(), user_id)
            .unwrap();
        self.settings
            .set_string(SETTING_DARK_MODE_END_TIME, &end.to_string(), user_id)
            .unwrap();
        self.set_mode(user_id, DarkModeMode::CustomWindow);
    }

    fn set_mode(&self, user_id: UserId, mode: DarkModeMode) {
        self.settings
            .set_string(SETTING_DARK_MODE_MODE, &mode.as_i32().to_string(), user_id)
            .unwrap();
    }
}

#[test]
fn test_night_window_follows_a_full_day() {
    let s = Scenario::at(20, 0);
    s.store_window(100, NIGHT_START, NIGHT_END);
    s.manager.on_switch_user(100).unwrap();
    assert_eq!(s.log.events(), vec![(false, 100)]);

    s.clock.set_time_of_day(22, 0);
    assert_eq!(s.alarms.fire_due(), 1);

    s.clock.advance(chrono::Duration::hours(8));
    assert_eq!(s.alarms.fire_due(), 1);

    assert_eq!(s.log.events(), vec![(false, 100), (true, 100), (false, 100)]);
    assert_eq!(s.alarms.pending_count(), 2);
}

#[test]
fn test_window_edits_reach_the_schedule_immediately() {
    let s = Scenario::at(21, 30);
    s.store_window(100, NIGHT_START, NIGHT_END);
    s.manager.on_switch_user(100).unwrap();
    assert_eq!(s.log.last(), Some((false, 100)));

    // Pull the start forward past "now"
    s.settings
        .set_string(SETTING_DARK_MODE_START_TIME, &(21 * 60).to_string(), 100)
        .unwrap();
    assert_eq!(s.log.last(), Some((true, 100)));
    assert_eq!(s.timers.initial_setup(100), Some((21 * 60, NIGHT_END)));
    assert_eq!(s.alarms.pending_count(), 2);

    // The superseded 22:00 alarm is gone; nothing fires at 22:00
    let before = s.log.events().len();
    s.clock.set_time_of_day(22, 0);
    assert_eq!(s.alarms.fire_due(), 0);
    assert_eq!(s.log.events().len(), before);
}

#[test]
fn test_fixed_dark_cancels_armed_window() {
    let s = Scenario::at(12, 0);
    s.store_window(0, NIGHT_START, NIGHT_END);
    s.manager.on_switch_user(0).unwrap();
    assert_eq!(s.alarms.pending_count(), 2);

    s.set_mode(0, DarkModeMode::AlwaysDark);

    assert_eq!(s.alarms.pending_count(), 0);
    assert!(!s.timers.has_timers(0));
    assert_eq!(s.log.last(), Some((true, 0)));
}

#[test]
fn test_background_user_changes_stay_inert() {
    let s = Scenario::at(12, 0);
    s.store_window(100, NIGHT_START, NIGHT_END);
    s.manager.on_switch_user(100).unwrap();
    s.log.clear();

    s.set_mode(101, DarkModeMode::AlwaysDark);
    assert!(s.log.events().is_empty());

    s.manager.on_switch_user(101).unwrap();
    assert!(!s.timers.has_timers(100));
    assert_eq!(s.log.events(), vec![(true, 101)]);
    assert_eq!(s.manager.active_user(), 101);
}

#[test]
fn test_restart_recomputes_from_stored_bounds() {
    let s = Scenario::at(12, 0);
    s.store_window(100, NIGHT_START, NIGHT_END);
    s.manager.on_switch_user(100).unwrap();

    // Suspended across the start boundary and the OS dropped the alarms
    s.alarms.drop_all();
    s.clock.set_time_of_day(23, 15);

    assert!(s.manager.restart_timer().unwrap());
    assert_eq!(s.log.last(), Some((true, 100)));

    let triggers = s.alarms.pending_triggers();
    assert_eq!(triggers.len(), 2);
    assert!(triggers.iter().all(|t| *t > s.clock.now()));
    assert_eq!(
        triggers.iter().map(|t| t.hour()).collect::<Vec<_>>(),
        vec![22, 6]
    );
}

#[test]
fn test_resolved_status_drives_appearance_service() {
    let s = Scenario::at(23, 0);
    let parameters = Arc::new(MemoryParameterStore::new());
    let service = Arc::new(AppearanceService::new(
        Arc::new(OwnerPermissions::new()),
        Arc::new(LocalConfiguration::new()),
        parameters.clone(),
    ));

    let manager = DarkModeManager::new(Arc::clone(&s.settings), Arc::clone(&s.timers));
    let sink = Arc::clone(&service);
    manager
        .initialize(move |is_dark, user_id| sink.apply_dark_mode(is_dark, user_id))
        .unwrap();

    s.store_window(100, NIGHT_START, NIGHT_END);
    manager.on_switch_user(100).unwrap();
    assert_eq!(service.get_dark_mode().unwrap(), DarkModeMode::AlwaysDark);
    assert_eq!(parameters.get(PERSIST_DARK_MODE_KEY, "").unwrap(), "dark");

    s.clock.set_time_of_day(6, 0);
    s.clock.advance(chrono::Duration::days(1));
    assert_eq!(s.alarms.fire_due(), 1);
    assert_eq!(service.get_dark_mode().unwrap(), DarkModeMode::AlwaysLight);
    assert_eq!(parameters.get(PERSIST_DARK_MODE_KEY, "").unwrap(), "light");
}

#[test]
fn test_file_store_round_trip_through_manager() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.toml");
    {
        let store = FileSettingsStore::open(&path).unwrap();
        store
            .set_string(SETTING_DARK_MODE_MODE, "2", 7)
            .unwrap();
        store
            .set_string(SETTING_DARK_MODE_START_TIME, "480", 7)
            .unwrap();
        store
            .set_string(SETTING_DARK_MODE_END_TIME, "1080", 7)
            .unwrap();
    }

    let s = Scenario::with_store(12, 0, Arc::new(FileSettingsStore::open(&path).unwrap()));
    s.manager.on_switch_user(7).unwrap();
    assert_eq!(s.log.events(), vec![(true, 7)]);

    // A contradicting observation never rewrites window mode
    s.manager.notify_dark_mode_update(7, false).unwrap();
    let reopened = FileSettingsStore::open(&path).unwrap();
    assert_eq!(reopened.get_int32(SETTING_DARK_MODE_MODE, 7).unwrap(), 2);
}
