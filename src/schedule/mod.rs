//! Time-window scheduling engine.
//!
//! - `window`: minutes-of-day validity, inside-window predicate, next occurrence
//! - `alarm`: one-shot alarm entities and the primitive that fires them
//! - `timer_manager`: per-user start/end alarm pairs
//! - `registry`: shared timer managers by appearance kind

pub mod alarm;
pub mod registry;
pub mod timer_manager;
pub mod window;

pub use alarm::{AlarmCallback, AlarmEntity, AlarmId, AlarmService, ThreadAlarmService};
pub use registry::{TimerKind, TimerManagerRegistry};
pub use timer_manager::{AlarmTimerManager, Boundary, ScheduleRequest, TimerSnapshot};
pub use window::{is_valid_schedule_time, is_within_time_interval, is_within_time_interval_at};
