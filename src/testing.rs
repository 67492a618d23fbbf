//! Deterministic test doubles for the scheduling core.
//!
//! Compiled for unit tests and, through the `testing-support` feature, for the
//! integration tests under `tests/`.

use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::common::constants::UserId;
use crate::error::{AppearanceError, Result};
use crate::schedule::alarm::{AlarmEntity, AlarmId, AlarmService};
use crate::time_source::Clock;

#[derive(Default)]
struct ManualAlarmState {
    pending: BTreeMap<AlarmId, AlarmEntity>,
    cancelled: Vec<AlarmId>,
    next_id: u64,
    arms_before_failure: Option<usize>,
}

/// Alarm primitive that only fires when the test says so.
pub struct ManualAlarmService {
    clock: Arc<dyn Clock>,
    state: Mutex<ManualAlarmState>,
}

impl ManualAlarmService {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(ManualAlarmState::default()),
        }
    }

    /// Let `successes` more arms succeed, then fail every later one.
    pub fn fail_arm_after(&self, successes: usize) {
        self.state.lock().unwrap().arms_before_failure = Some(successes);
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    /// Trigger instants of pending alarms, in arming order.
    pub fn pending_triggers(&self) -> Vec<DateTime<Local>> {
        self.state
            .lock()
            .unwrap()
            .pending
            .values()
            .map(AlarmEntity::trigger_at)
            .collect()
    }

    /// Ids cancelled while still pending.
    pub fn cancelled(&self) -> Vec<AlarmId> {
        self.state.lock().unwrap().cancelled.clone()
    }

    /// Forget every pending alarm without firing it, like a lost OS timer.
    pub fn drop_all(&self) {
        self.state.lock().unwrap().pending.clear();
    }

    /// Fire every alarm due at the clock's current time. Returns how many fired.
    pub fn fire_due(&self) -> usize {
        let now = self.clock.now();
        let due: Vec<AlarmEntity> = {
            let mut state = self.state.lock().unwrap();
            let ids: Vec<AlarmId> = state
                .pending
                .iter()
                .filter(|(_, alarm)| alarm.is_due(&now))
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| state.pending.remove(&id))
                .collect()
        };

        for alarm in &due {
            alarm.on_trigger();
        }
        due.len()
    }
}

impl AlarmService for ManualAlarmService {
    fn arm(&self, alarm: AlarmEntity) -> Result<AlarmId> {
        let mut state = self.state.lock().unwrap();
        if let Some(remaining) = state.arms_before_failure.as_mut() {
            if *remaining == 0 {
                return Err(AppearanceError::system("alarm arm rejected"));
            }
            *remaining -= 1;
        }
        state.next_id += 1;
        let id = AlarmId(state.next_id);
        state.pending.insert(id, alarm);
        Ok(id)
    }

    fn cancel(&self, id: AlarmId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.pending.remove(&id).is_some() {
            state.cancelled.push(id);
        }
        Ok(())
    }
}

/// Records every dark mode notification.
#[derive(Default, Clone)]
pub struct NotificationLog {
    events: Arc<Mutex<Vec<(bool, UserId)>>>,
}

impl NotificationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Callback suitable for `DarkModeManager::initialize`.
    pub fn callback(&self) -> impl Fn(bool, UserId) + Send + Sync + 'static {
        let events = Arc::clone(&self.events);
        move |is_dark, user_id| events.lock().unwrap().push((is_dark, user_id))
    }

    pub fn events(&self) -> Vec<(bool, UserId)> {
        self.events.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<(bool, UserId)> {
        self.events.lock().unwrap().last().copied()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}
