//! Per-user pairs of window-boundary alarms.
//!
//! [`AlarmTimerManager`] turns a `[start, end)` minutes-of-day window into two
//! concrete alarms at the next occurrence of each boundary, and keeps one
//! [`TimerRecord`] per user: the live alarm handles plus the bounds (and
//! callbacks) they were armed from. The manager has no notion of whether a
//! firing is still wanted; callers re-validate and re-schedule.
//!
//! Rescheduling always clears the previous pair before arming a new one, so a
//! user never holds more than two live alarms. The records lock only guards
//! the map; the alarm primitive is called with it released. Callers serialize
//! scheduling and clearing for the same user.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::alarm::{AlarmCallback, AlarmEntity, AlarmId, AlarmService};
use super::window::{self, format_minutes, is_valid_schedule_time};
use crate::common::constants::{ALL_USERS, UserId};
use crate::error::{AppearanceError, Result};
use crate::time_source::Clock;

/// Which boundary of the window an alarm marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Boundary {
    Start,
    End,
}

/// The window a pair of alarms was requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScheduleRequest {
    pub user_id: UserId,
    pub start: i32,
    pub end: i32,
}

impl ScheduleRequest {
    pub fn new(user_id: UserId, start: i32, end: i32) -> Self {
        Self {
            user_id,
            start,
            end,
        }
    }
}

/// Live alarm handles and the setup they came from, for one user.
#[derive(Clone)]
struct TimerRecord {
    trigger_pair: [Option<AlarmId>; 2],
    initial_setup: (i32, i32),
    callbacks: [AlarmCallback; 2],
}

impl TimerRecord {
    fn live_ids(&self) -> impl Iterator<Item = AlarmId> + '_ {
        self.trigger_pair.iter().flatten().copied()
    }
}

/// Serializable view of one user's timers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimerSnapshot {
    pub user_id: UserId,
    pub start: i32,
    pub end: i32,
    pub start_alarm: Option<AlarmId>,
    pub end_alarm: Option<AlarmId>,
}

/// Owns every user's start/end alarm pair.
pub struct AlarmTimerManager {
    alarms: Arc<dyn AlarmService>,
    clock: Arc<dyn Clock>,
    records: Mutex<BTreeMap<UserId, TimerRecord>>,
}

impl AlarmTimerManager {
    pub fn new(alarms: Arc<dyn AlarmService>, clock: Arc<dyn Clock>) -> Self {
        Self {
            alarms,
            clock,
            records: Mutex::new(BTreeMap::new()),
        }
    }

    fn records(&self) -> MutexGuard<'_, BTreeMap<UserId, TimerRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Rejects negative and out-of-range bounds; equal bounds are accepted.
    pub fn is_valid_schedule_time(start: i32, end: i32) -> bool {
        is_valid_schedule_time(start, end)
    }

    /// Whether the current wall-clock time falls inside `[start, end)`.
    pub fn is_within_time_interval(&self, start: i32, end: i32) -> bool {
        window::is_within_time_interval(start, end, &self.clock.now())
    }

    /// Arm the start and end alarms for `user_id`, replacing any previous pair.
    ///
    /// Whichever alarm armed successfully is recorded even if the other failed;
    /// the failure is still reported so the caller can see the gap.
    pub fn set_schedule_time(
        &self,
        start: i32,
        end: i32,
        user_id: UserId,
        start_callback: AlarmCallback,
        end_callback: AlarmCallback,
    ) -> Result<()> {
        if !Self::is_valid_schedule_time(start, end) {
            return Err(AppearanceError::invalid_argument(format!(
                "schedule window {start}..{end} out of range for user {user_id}"
            )));
        }

        let result = self.arm_record(user_id, (start, end), [start_callback, end_callback]);

        match &result {
            Ok(()) => log_debug!(
                "Scheduled window {} → {} for user {user_id}",
                format_minutes(start),
                format_minutes(end)
            ),
            Err(e) => log_warning!("Scheduling for user {user_id} incomplete: {e}"),
        }
        result
    }

    fn triggers(&self, bounds: (i32, i32)) -> Result<[DateTime<Local>; 2]> {
        let now = self.clock.now();
        Ok([
            window::next_occurrence(&now, bounds.0)?,
            window::next_occurrence(&now, bounds.1)?,
        ])
    }

    /// Arm one alarm per trigger, keeping whichever succeeded.
    fn arm_pair(
        &self,
        triggers: &[DateTime<Local>; 2],
        callbacks: &[AlarmCallback; 2],
        first_error: &mut Option<AppearanceError>,
    ) -> [Option<AlarmId>; 2] {
        let mut trigger_pair = [None, None];
        for (slot, (trigger, callback)) in triggers.iter().zip(callbacks.iter()).enumerate() {
            match self.arm_one(*trigger, callback) {
                Ok(id) => trigger_pair[slot] = Some(id),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        trigger_pair
    }

    /// Compute triggers, clear the user's old pair, arm and record the new one.
    fn arm_record(
        &self,
        user_id: UserId,
        bounds: (i32, i32),
        callbacks: [AlarmCallback; 2],
    ) -> Result<()> {
        let triggers = self.triggers(bounds)?;

        let mut first_error = None;
        let old = self.records().remove(&user_id);
        if let Some(old) = old {
            self.cancel_ids(old.live_ids(), &mut first_error);
        }

        let trigger_pair = self.arm_pair(&triggers, &callbacks, &mut first_error);
        let displaced = self.records().insert(
            user_id,
            TimerRecord {
                trigger_pair,
                initial_setup: bounds,
                callbacks,
            },
        );
        if let Some(displaced) = displaced {
            self.cancel_ids(displaced.live_ids(), &mut first_error);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Re-arm `record` and swap it in, unless the user's pair changed meanwhile.
    fn rearm_record(&self, user_id: UserId, record: &TimerRecord) -> Result<()> {
        let triggers = self.triggers(record.initial_setup)?;

        let mut first_error = None;
        let trigger_pair = self.arm_pair(&triggers, &record.callbacks, &mut first_error);
        let replaced = match self.records().get_mut(&user_id) {
            Some(live) if live.trigger_pair == record.trigger_pair => {
                Some(std::mem::replace(&mut live.trigger_pair, trigger_pair))
            }
            _ => None,
        };

        match replaced {
            Some(old) => self.cancel_ids(old.iter().flatten().copied(), &mut first_error),
            None => {
                log_debug!("Timers for user {user_id} changed during restart, dropping new pair");
                self.cancel_ids(trigger_pair.iter().flatten().copied(), &mut first_error);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn arm_one(&self, trigger: DateTime<Local>, callback: &AlarmCallback) -> Result<AlarmId> {
        self.alarms
            .arm(AlarmEntity::new(trigger, Arc::clone(callback)))
    }

    fn cancel_ids(
        &self,
        ids: impl Iterator<Item = AlarmId>,
        first_error: &mut Option<AppearanceError>,
    ) {
        for id in ids {
            if let Err(e) = self.alarms.cancel(id) {
                log_warning!("Failed to cancel alarm {id}: {e}");
                first_error.get_or_insert(e);
            }
        }
    }

    /// Cancel both alarms for `user_id` and forget its record. No-op if absent.
    pub fn clear_timer_by_user_id(&self, user_id: UserId) -> Result<()> {
        let Some(record) = self.records().remove(&user_id) else {
            return Ok(());
        };

        let mut first_error = None;
        self.cancel_ids(record.live_ids(), &mut first_error);
        log_debug!("Cleared timers for user {user_id}");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Cancel every user's alarms.
    pub fn clear_all_timers(&self) -> Result<()> {
        let records = std::mem::take(&mut *self.records());
        let mut first_error = None;
        for record in records.values() {
            self.cancel_ids(record.live_ids(), &mut first_error);
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Re-arm a user's alarms from the stored setup bounds and the current clock.
    ///
    /// [`ALL_USERS`] restarts every record. Returns `Ok(false)` when there was
    /// nothing to restart.
    pub fn restart_timer_by_user_id(&self, user_id: UserId) -> Result<bool> {
        if user_id == ALL_USERS {
            return self.restart_all_timers();
        }

        let record = self.records().get(&user_id).cloned();
        let Some(record) = record else {
            log_debug!("No timers to restart for user {user_id}");
            return Ok(false);
        };

        self.rearm_record(user_id, &record)?;
        log_debug!("Restarted timers for user {user_id}");
        Ok(true)
    }

    /// Re-arm every stored record. `Ok(false)` if none exist.
    pub fn restart_all_timers(&self) -> Result<bool> {
        let snapshot: Vec<(UserId, TimerRecord)> = self
            .records()
            .iter()
            .map(|(user_id, record)| (*user_id, record.clone()))
            .collect();
        if snapshot.is_empty() {
            return Ok(false);
        }

        let mut first_error = None;
        for (user_id, record) in &snapshot {
            if let Err(e) = self.rearm_record(*user_id, record) {
                log_warning!("Failed to restart timers for user {user_id}: {e}");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(true),
        }
    }

    /// Whether `user_id` currently has a timer record.
    pub fn has_timers(&self, user_id: UserId) -> bool {
        self.records().contains_key(&user_id)
    }

    /// The bounds the user's current pair was armed from.
    pub fn initial_setup(&self, user_id: UserId) -> Option<(i32, i32)> {
        self.records().get(&user_id).map(|record| record.initial_setup)
    }

    pub fn snapshot(&self) -> Vec<TimerSnapshot> {
        self.records()
            .iter()
            .map(|(user_id, record)| TimerSnapshot {
                user_id: *user_id,
                start: record.initial_setup.0,
                end: record.initial_setup.1,
                start_alarm: record.trigger_pair[0],
                end_alarm: record.trigger_pair[1],
            })
            .collect()
    }
}
