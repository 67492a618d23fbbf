//! Minutes-of-day window math.
//!
//! A window is a `[start, end)` pair of minutes since local midnight, each in
//! `[0, 1440)`. `start > end` means the window crosses midnight (22:00–06:00),
//! and `start == end` is a zero-width window that is never inside.

use chrono::{DateTime, Duration, Local, NaiveTime, TimeZone, Timelike};
use std::cmp::Ordering;

use crate::common::constants::{MINUTES_PER_DAY, MINUTES_PER_HOUR};
use crate::error::{AppearanceError, Result};

/// Whether `minute` is a representable minute of the day.
pub fn is_valid_minute(minute: i32) -> bool {
    (0..MINUTES_PER_DAY).contains(&minute)
}

/// Rejects only structurally impossible bounds; equal bounds are allowed.
pub fn is_valid_schedule_time(start: i32, end: i32) -> bool {
    is_valid_minute(start) && is_valid_minute(end)
}

/// Minutes since local midnight for `time`.
pub fn minutes_of_day(time: &DateTime<Local>) -> i32 {
    (time.hour() as i32) * MINUTES_PER_HOUR + time.minute() as i32
}

/// Whether `now` (minutes of day) falls inside `[start, end)`.
pub fn is_within_time_interval_at(start: i32, end: i32, now: i32) -> bool {
    match start.cmp(&end) {
        Ordering::Less => start <= now && now < end,
        Ordering::Greater => now >= start || now < end,
        Ordering::Equal => false,
    }
}

/// Whether the wall-clock `now` falls inside `[start, end)`.
pub fn is_within_time_interval(start: i32, end: i32, now: &DateTime<Local>) -> bool {
    is_within_time_interval_at(start, end, minutes_of_day(now))
}

/// The next instant, strictly after `now`, whose local time of day is `minute`.
///
/// Today's occurrence is used while it is still ahead; otherwise tomorrow's.
/// A local time skipped by a DST jump resolves to the first valid instant after it.
pub fn next_occurrence(now: &DateTime<Local>, minute: i32) -> Result<DateTime<Local>> {
    if !is_valid_minute(minute) {
        return Err(AppearanceError::invalid_argument(format!(
            "minute of day {minute} outside [0, {MINUTES_PER_DAY})"
        )));
    }

    let time_of_day = NaiveTime::from_hms_opt(
        (minute / MINUTES_PER_HOUR) as u32,
        (minute % MINUTES_PER_HOUR) as u32,
        0,
    )
    .ok_or_else(|| AppearanceError::invalid_argument(format!("bad minute of day {minute}")))?;

    let today = now.date_naive();
    for days_ahead in 0..=2 {
        let date = today + Duration::days(days_ahead);
        let Some(candidate) = resolve_local(date.and_time(time_of_day)) else {
            continue;
        };
        if candidate > *now {
            return Ok(candidate);
        }
    }

    Err(AppearanceError::system(format!(
        "no local occurrence of {} after {now}",
        format_minutes(minute)
    )))
}

fn resolve_local(naive: chrono::NaiveDateTime) -> Option<DateTime<Local>> {
    Local.from_local_datetime(&naive).earliest().or_else(|| {
        // Inside a spring-forward gap: the wall clock resumes one hour later
        Local
            .from_local_datetime(&(naive + Duration::hours(1)))
            .earliest()
    })
}

/// Render a minute of day as `HH:MM` (invalid values render verbatim).
pub fn format_minutes(minute: i32) -> String {
    if is_valid_minute(minute) {
        format!(
            "{:02}:{:02}",
            minute / MINUTES_PER_HOUR,
            minute % MINUTES_PER_HOUR
        )
    } else {
        format!("<{minute}>")
    }
}

/// Parse `HH:MM` into minutes of day.
pub fn parse_minutes(text: &str) -> Result<i32> {
    let time = NaiveTime::parse_from_str(text.trim(), "%H:%M").map_err(|e| {
        AppearanceError::invalid_argument(format!("'{text}' is not a HH:MM time: {e}"))
    })?;
    Ok((time.hour() as i32) * MINUTES_PER_HOUR + time.minute() as i32)
}
