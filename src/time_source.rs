//! Wall-clock abstraction.
//!
//! Every time-of-day decision (inside-window checks, next-occurrence
//! calculation, alarm due checks) reads the clock through [`Clock`], which is
//! handed to each component at construction. Tests swap in a [`ManualClock`]
//! to pin "now" to an exact minute.

use chrono::{DateTime, Local};

/// Source of the current local wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

/// Real system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Manually driven clock for deterministic tests.
#[cfg(any(test, feature = "testing-support"))]
pub struct ManualClock {
    current: std::sync::Mutex<DateTime<Local>>,
}

#[cfg(any(test, feature = "testing-support"))]
impl ManualClock {
    pub fn new(start: DateTime<Local>) -> Self {
        Self {
            current: std::sync::Mutex::new(start),
        }
    }

    /// Clock pinned to today's date at `hour:minute:00` local time.
    pub fn at(hour: u32, minute: u32) -> Self {
        Self::new(local_today_at(hour, minute))
    }

    pub fn set(&self, time: DateTime<Local>) {
        *self.current.lock().unwrap() = time;
    }

    /// Move the clock to `hour:minute:00` on its current date.
    pub fn set_time_of_day(&self, hour: u32, minute: u32) {
        let mut current = self.current.lock().unwrap();
        let naive = current
            .date_naive()
            .and_hms_opt(hour, minute, 0)
            .expect("valid time of day");
        *current = resolve_local(naive);
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut current = self.current.lock().unwrap();
        *current += by;
    }
}

#[cfg(any(test, feature = "testing-support"))]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        *self.current.lock().unwrap()
    }
}

/// Today's date (a fixed mid-month date, far from DST edges) at `hour:minute`.
#[cfg(any(test, feature = "testing-support"))]
pub fn local_today_at(hour: u32, minute: u32) -> DateTime<Local> {
    let naive = chrono::NaiveDate::from_ymd_opt(2025, 1, 15)
        .and_then(|date| date.and_hms_opt(hour, minute, 0))
        .expect("valid fixed test date");
    resolve_local(naive)
}

#[cfg(any(test, feature = "testing-support"))]
fn resolve_local(naive: chrono::NaiveDateTime) -> DateTime<Local> {
    use chrono::TimeZone;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .expect("local time exists")
}
