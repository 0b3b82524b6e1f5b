//! New-file and write-interval schedule derivation.
//!
//! Users configure a `New File Interval` in minutes and are free to pick any value; the schedule
//! that actually drives file rotation is built from the nearest factor of the relevant bound (60
//! minutes, 24 hours, or whole days), so rotations land on clean clock boundaries rather than
//! drifting.

use log::warn;

/// The derived rotation schedule for an instrument's output file.
#[derive(Debug, Clone, PartialEq)]
pub enum NewFileSchedule {
    /// Roll over whenever the wall-clock minute is one of these values (0..60).
    Minute(Vec<u32>),
    /// Roll over whenever the wall-clock hour is one of these values (0..24), at minute 0.
    Hour(Vec<u32>),
    /// Roll over once per day at 00:00.
    Daily,
}

/// Derives a [NewFileSchedule] from a configured interval in minutes.
///
/// Intervals <= 60 minutes are rounded to the nearest factor of 60 and produce a minute-of-hour
/// schedule. Intervals > 60 and <= 1080 minutes are converted to hours, rounded to the nearest
/// factor of 24, and produce an hour-of-day schedule. Anything larger rotates once daily.
pub fn new_file_schedule(new_file_interval_minutes: f64) -> NewFileSchedule {
    if new_file_interval_minutes <= 60.0 {
        let interval = closest_factor_of(new_file_interval_minutes, 60);
        NewFileSchedule::Minute((0..60).step_by(interval as usize).collect())
    } else if new_file_interval_minutes <= 1080.0 {
        let hours = new_file_interval_minutes / 60.0;
        let interval = closest_factor_of(hours, 24);
        NewFileSchedule::Hour((0..24).step_by(interval as usize).collect())
    } else {
        NewFileSchedule::Daily
    }
}

/// Derives the set of within-minute second offsets at which buffered rows are flushed to disk.
///
/// Only intervals of 60 seconds or less make sense here; anything larger is clamped to 60 before
/// rounding to the nearest factor of 60.
pub fn write_schedule(write_interval_seconds: f64) -> Vec<u32> {
    let clamped = write_interval_seconds.min(60.0);
    let interval = closest_factor_of(clamped, 60);
    (0..60).step_by(interval as usize).collect()
}

/// Rounds `value` to the nearest whole-number factor of `upper_bound`.
///
/// If `value` is already an exact factor, it is returned unchanged (as an integer). Otherwise the
/// factor of `upper_bound` closest to `value` is returned, with ties broken in favor of the
/// factor encountered first when scanning 1..=upper_bound.
pub fn closest_factor_of(value: f64, upper_bound: u32) -> u32 {
    let factors: Vec<u32> = (1..=upper_bound).filter(|n| upper_bound % n == 0).collect();
    if factors.iter().any(|&f| f as f64 == value) {
        return value as u32;
    }
    warn!(
        "interval {value} is not a factor of {upper_bound}; rounding to the nearest factor"
    );
    factors
        .into_iter()
        .min_by(|a, b| {
            let da = (value - *a as f64).abs();
            let db = (value - *b as f64).abs();
            da.partial_cmp(&db).unwrap()
        })
        .unwrap_or(upper_bound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_factor_is_unchanged() {
        assert_eq!(closest_factor_of(15.0, 60), 15);
        assert_eq!(closest_factor_of(12.0, 24), 12);
    }

    #[test]
    fn rounds_to_nearest_factor() {
        // 60's factors include 1,2,3,4,5,6,10,12,15,20,30,60. 13 is closest to 12 and 15;
        // 12 is nearer (distance 1 vs 2).
        assert_eq!(closest_factor_of(13.0, 60), 12);
        assert_eq!(closest_factor_of(7.0, 24), 6);
    }

    #[test]
    fn minute_schedule_for_small_interval() {
        let sched = new_file_schedule(15.0);
        assert_eq!(sched, NewFileSchedule::Minute(vec![0, 15, 30, 45]));
    }

    #[test]
    fn hour_schedule_for_mid_interval() {
        let sched = new_file_schedule(360.0); // 6 hours
        assert_eq!(sched, NewFileSchedule::Hour(vec![0, 6, 12, 18]));
    }

    #[test]
    fn daily_schedule_for_large_interval() {
        assert_eq!(new_file_schedule(1440.0), NewFileSchedule::Daily);
    }

    #[test]
    fn write_schedule_rounds_and_clamps() {
        assert_eq!(write_schedule(10.0), vec![0, 10, 20, 30, 40, 50]);
        assert_eq!(write_schedule(600.0), write_schedule(60.0));
    }

    #[test]
    fn closest_factor_is_always_an_actual_factor() {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let upper_bound = rng.gen_range(2..=120u32);
            let value = rng.gen_range(1..=upper_bound * 2) as f64;
            let factor = closest_factor_of(value, upper_bound);
            assert_eq!(
                upper_bound % factor,
                0,
                "closest_factor_of({value}, {upper_bound}) = {factor} is not a factor"
            );
        }
    }
}
