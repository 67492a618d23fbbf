use appearanced::schedule::window::{
    is_valid_schedule_time, is_within_time_interval_at, minutes_of_day, next_occurrence,
};
use appearanced::time_source::local_today_at;
use chrono::Duration;
use proptest::prelude::*;

/// Any representable minute of the day
fn minute_strategy() -> impl Strategy<Value = i32> {
    0..1440i32
}

/// Values that are never valid window bounds
fn out_of_range_strategy() -> impl Strategy<Value = i32> {
    prop_oneof![i32::MIN..0, 1440..i32::MAX]
}

#[cfg(test)]
mod inside_window_tests {
    use super::*;

    proptest! {
        /// A zero-width window contains nothing
        #[test]
        fn test_zero_width_window_is_never_inside(bound in minute_strategy(), now in minute_strategy()) {
            prop_assert!(!is_within_time_interval_at(bound, bound, now));
        }

        /// Start is inclusive, end is exclusive
        #[test]
        fn test_bounds_are_half_open(start in minute_strategy(), end in minute_strategy()) {
            prop_assume!(start != end);
            prop_assert!(is_within_time_interval_at(start, end, start));
            prop_assert!(!is_within_time_interval_at(start, end, end));
        }

        /// Swapping the bounds of a window yields its complement
        #[test]
        fn test_swapped_window_is_complement(
            start in minute_strategy(),
            end in minute_strategy(),
            now in minute_strategy()
        ) {
            prop_assume!(start != end);
            prop_assert_ne!(
                is_within_time_interval_at(start, end, now),
                is_within_time_interval_at(end, start, now)
            );
        }

        /// The number of inside minutes equals the window length modulo a day
        #[test]
        fn test_window_length_matches_inside_minutes(start in minute_strategy(), end in minute_strategy()) {
            let inside = (0..1440)
                .filter(|now| is_within_time_interval_at(start, end, *now))
                .count() as i32;
            prop_assert_eq!(inside, (end - start).rem_euclid(1440));
        }

        /// Validity only rejects out-of-range bounds
        #[test]
        fn test_out_of_range_bounds_are_invalid(
            valid in minute_strategy(),
            invalid in out_of_range_strategy()
        ) {
            prop_assert!(is_valid_schedule_time(valid, valid));
            prop_assert!(!is_valid_schedule_time(valid, invalid));
            prop_assert!(!is_valid_schedule_time(invalid, valid));
        }
    }
}

#[cfg(test)]
mod next_occurrence_tests {
    use super::*;

    proptest! {
        /// The next occurrence is strictly ahead, within a day, at the requested minute
        #[test]
        fn test_next_occurrence_is_strictly_ahead_within_a_day(
            hour in 0u32..24,
            minute in 0u32..60,
            seconds in 0i64..60,
            target in minute_strategy()
        ) {
            let now = local_today_at(hour, minute) + Duration::seconds(seconds);
            let next = next_occurrence(&now, target).unwrap();

            prop_assert!(next > now);
            prop_assert!(next - now <= Duration::days(1));
            prop_assert_eq!(minutes_of_day(&next), target);
        }

        /// Asking again from the returned instant moves exactly one day ahead
        #[test]
        fn test_next_occurrence_from_itself_is_next_day(
            hour in 0u32..24,
            minute in 0u32..60,
            target in minute_strategy()
        ) {
            let now = local_today_at(hour, minute);
            let first = next_occurrence(&now, target).unwrap();
            let second = next_occurrence(&first, target).unwrap();
            prop_assert_eq!(second - first, Duration::days(1));
        }

        #[test]
        fn test_next_occurrence_rejects_invalid_minutes(
            hour in 0u32..24,
            invalid in out_of_range_strategy()
        ) {
            let now = local_today_at(hour, 0);
            prop_assert!(next_occurrence(&now, invalid).is_err());
        }
    }
}
