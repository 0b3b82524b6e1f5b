//! Wall-clock helpers: second-rounding, filename timestamps, and sleep alignment.

use chrono::{DateTime, Duration, Local, Timelike};

/// Rounds `now` to the nearest second.
///
/// Streamed instruments sample faster than once a second; without rounding, two reads taken a few
/// milliseconds apart can carry the same nominal second while still differing by enough sub-second
/// jitter to look like distinct timestamps downstream. Rounding collapses that jitter.
pub fn round_to_second(now: DateTime<Local>) -> DateTime<Local> {
    let micros = now.timestamp_subsec_micros();
    if micros >= 500_000 {
        (now + Duration::seconds(1))
            .with_nanosecond(0)
            .expect("zero nanoseconds is always valid")
    } else {
        now.with_nanosecond(0).expect("zero nanoseconds is always valid")
    }
}

/// Formats `now` as `YYYY-MM-DD HH:MM:SS` for use as a data-row timestamp.
pub fn timestamp(now: DateTime<Local>) -> String {
    now.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Formats `now` to minute precision, zero-padded, for use in a rotated filename:
/// `YYYYMMDD_HHMM`.
pub fn filename_stamp(now: DateTime<Local>) -> String {
    now.format("%Y%m%d_%H%M").to_string()
}

/// Returns the duration to sleep so the next wakeup lands on the following whole second.
///
/// Acquisition loops wake on second boundaries so new-file and write schedules (which are
/// expressed in wall-clock minutes/hours/seconds) trigger reliably rather than drifting across
/// iterations.
pub fn duration_to_next_second(now: DateTime<Local>) -> std::time::Duration {
    let micros = now.timestamp_subsec_micros() as u64;
    let remaining_micros = 1_000_000u64.saturating_sub(micros);
    std::time::Duration::from_micros(remaining_micros)
}

/// Returns the duration to sleep so the next wakeup lands on a whole multiple of
/// `read_interval_seconds`, counted from the Unix epoch.
///
/// Polled instruments sleep this long between ticks instead of a fixed interval: sleeping
/// `interval - (wall_time mod interval)` keeps ticks landing on clean multiples of the interval
/// regardless of how long the previous tick's work took, so timestamps never drift.
pub fn duration_to_next_tick(now: DateTime<Local>, read_interval_seconds: f64) -> std::time::Duration {
    if read_interval_seconds <= 0.0 {
        return std::time::Duration::from_secs(0);
    }
    let interval_micros = (read_interval_seconds * 1_000_000.0).round() as u64;
    if interval_micros == 0 {
        return std::time::Duration::from_secs(0);
    }
    let now_micros = now.timestamp_micros().rem_euclid(interval_micros as i64) as u64;
    let remaining = interval_micros.saturating_sub(now_micros);
    std::time::Duration::from_micros(if remaining == 0 { interval_micros } else { remaining })
}

/// Applies the streaming timestamp de-duplication rule: when the source's expected log interval
/// is exactly 1 second, a zero or two-second gap against the last emitted timestamp is corrected
/// to exactly one second, absorbing clock slip between the instrument's own cadence and the host
/// clock while preserving the strictly-one-second invariant of a stream loop's output.
pub fn dedup_stream_timestamp(
    now: DateTime<Local>,
    last_log_time: Option<DateTime<Local>>,
    stream_log_interval_seconds: f64,
) -> DateTime<Local> {
    if stream_log_interval_seconds != 1.0 {
        return now;
    }
    let Some(last) = last_log_time else {
        return now;
    };
    let delta = (now - last).num_seconds();
    if delta == 0 || delta == 2 {
        last + Duration::seconds(1)
    } else {
        now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn rounds_down_below_half_second() {
        let t = Local.with_ymd_and_hms(2024, 6, 1, 12, 30, 10).unwrap()
            + Duration::milliseconds(200);
        let rounded = round_to_second(t);
        assert_eq!(rounded.second(), 10);
        assert_eq!(rounded.timestamp_subsec_micros(), 0);
    }

    #[test]
    fn rounds_up_at_half_second() {
        let t = Local.with_ymd_and_hms(2024, 6, 1, 12, 30, 10).unwrap()
            + Duration::milliseconds(500);
        let rounded = round_to_second(t);
        assert_eq!(rounded.second(), 11);
    }

    #[test]
    fn rounds_across_minute_boundary() {
        let t = Local.with_ymd_and_hms(2024, 6, 1, 12, 30, 59).unwrap()
            + Duration::milliseconds(600);
        let rounded = round_to_second(t);
        assert_eq!(rounded.minute(), 31);
        assert_eq!(rounded.second(), 0);
    }

    #[test]
    fn formats_timestamp() {
        let t = Local.with_ymd_and_hms(2024, 1, 5, 3, 4, 5).unwrap();
        assert_eq!(timestamp(t), "2024-01-05 03:04:05");
    }

    #[test]
    fn formats_filename_stamp_zero_padded() {
        let t = Local.with_ymd_and_hms(2024, 1, 5, 3, 4, 5).unwrap();
        assert_eq!(filename_stamp(t), "20240105_0304");
    }

    #[test]
    fn tick_alignment_lands_on_interval_multiple() {
        let t = Local.with_ymd_and_hms(2024, 1, 5, 3, 4, 7).unwrap();
        let remaining = duration_to_next_tick(t, 10.0);
        assert_eq!(remaining, std::time::Duration::from_secs(3));
    }

    #[test]
    fn stream_dedup_corrects_zero_delta() {
        let last = Local.with_ymd_and_hms(2024, 1, 5, 0, 0, 1).unwrap();
        let now = last;
        let corrected = dedup_stream_timestamp(now, Some(last), 1.0);
        assert_eq!(corrected, last + Duration::seconds(1));
    }

    #[test]
    fn stream_dedup_corrects_two_second_gap() {
        let last = Local.with_ymd_and_hms(2024, 1, 5, 0, 0, 1).unwrap();
        let now = last + Duration::seconds(2);
        let corrected = dedup_stream_timestamp(now, Some(last), 1.0);
        assert_eq!(corrected, last + Duration::seconds(1));
    }

    #[test]
    fn stream_dedup_leaves_other_deltas_alone() {
        let last = Local.with_ymd_and_hms(2024, 1, 5, 0, 0, 1).unwrap();
        let now = last + Duration::seconds(1);
        let corrected = dedup_stream_timestamp(now, Some(last), 1.0);
        assert_eq!(corrected, now);
    }

    #[test]
    fn stream_dedup_inactive_unless_interval_is_one_second() {
        let last = Local.with_ymd_and_hms(2024, 1, 5, 0, 0, 1).unwrap();
        let now = last;
        let corrected = dedup_stream_timestamp(now, Some(last), 5.0);
        assert_eq!(corrected, now);
    }
}
