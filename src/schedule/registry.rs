//! Lazily created timer managers keyed by appearance kind.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::alarm::AlarmService;
use super::timer_manager::AlarmTimerManager;
use crate::time_source::Clock;

/// Appearance features that schedule timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    DarkColorMode,
}

/// Hands out one shared [`AlarmTimerManager`] per [`TimerKind`].
pub struct TimerManagerRegistry {
    alarms: Arc<dyn AlarmService>,
    clock: Arc<dyn Clock>,
    managers: Mutex<HashMap<TimerKind, Arc<AlarmTimerManager>>>,
}

impl TimerManagerRegistry {
    pub fn new(alarms: Arc<dyn AlarmService>, clock: Arc<dyn Clock>) -> Self {
        Self {
            alarms,
            clock,
            managers: Mutex::new(HashMap::new()),
        }
    }

    /// The manager for `kind`, created on first request.
    pub fn manager(&self, kind: TimerKind) -> Arc<AlarmTimerManager> {
        let mut managers = self.managers.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(managers.entry(kind).or_insert_with(|| {
            log_debug!("Creating timer manager for {kind:?}");
            Arc::new(AlarmTimerManager::new(
                Arc::clone(&self.alarms),
                Arc::clone(&self.clock),
            ))
        }))
    }
}
