use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{DateTime, Days, Local, NaiveTime, TimeZone};

/// When service mode starts a backup run.
///
/// A 24 hour interval runs once a day at `hour` (local time); any other
/// interval simply waits that many hours after the previous run.
/// Longest accepted interval between runs: one leap year.
pub const MAX_INTERVAL_HOURS: u64 = 366 * 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    interval_hours: u64,
    hour: u32,
}

impl Schedule {
    pub fn new(interval_hours: u64, hour: u32) -> Result<Self> {
        if interval_hours == 0 {
            bail!("schedule interval must be at least one hour");
        }
        if interval_hours > MAX_INTERVAL_HOURS {
            bail!("schedule interval must be at most {MAX_INTERVAL_HOURS} hours, got {interval_hours}");
        }
        if hour > 23 {
            bail!("schedule hour must be between 0 and 23, got {hour}");
        }
        Ok(Self { interval_hours, hour })
    }

    pub fn interval_hours(&self) -> u64 {
        self.interval_hours
    }

    pub fn delay_until_next(&self, now: DateTime<Local>) -> Duration {
        if self.interval_hours != 24 {
            return Duration::from_secs(self.interval_hours.saturating_mul(3600));
        }
        let at = NaiveTime::from_hms_opt(self.hour, 0, 0).unwrap_or(NaiveTime::MIN);
        let today = now.date_naive().and_time(at);
        let next = if today > now.naive_local() {
            today
        } else {
            today + Days::new(1)
        };
        // A DST gap can make the wall-clock time nonexistent; fall back to a full day.
        match Local.from_local_datetime(&next).earliest() {
            Some(next) => (next - now).to_std().unwrap_or(Duration::from_secs(1)).max(Duration::from_secs(1)),
            None => Duration::from_secs(24 * 3600),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn rejects_invalid_values() {
        assert!(Schedule::new(0, 2).is_err());
        assert!(Schedule::new(24, 24).is_err());
        assert!(Schedule::new(u64::MAX / 1000, 2).is_err());
        assert!(Schedule::new(MAX_INTERVAL_HOURS + 1, 2).is_err());
    }

    #[test]
    fn longest_interval_is_a_year() {
        let schedule = Schedule::new(MAX_INTERVAL_HOURS, 0).expect("schedule");
        assert_eq!(
            schedule.delay_until_next(Local::now()),
            Duration::from_secs(MAX_INTERVAL_HOURS * 3600)
        );
    }

    #[test]
    fn fixed_interval_ignores_hour() {
        let schedule = Schedule::new(6, 2).expect("schedule");
        assert_eq!(schedule.delay_until_next(Local::now()), Duration::from_secs(6 * 3600));
    }

    #[test]
    fn daily_run_waits_at_most_one_day() {
        let schedule = Schedule::new(24, 2).expect("schedule");
        let delay = schedule.delay_until_next(Local::now());
        assert!(delay >= Duration::from_secs(1));
        assert!(delay <= Duration::from_secs(25 * 3600));
    }

    #[test]
    fn daily_run_lands_on_configured_hour() {
        let schedule = Schedule::new(24, 2).expect("schedule");
        let now = Local::now();
        let delay = schedule.delay_until_next(now);
        let next = now + chrono::Duration::from_std(delay).expect("duration");
        if Local.from_local_datetime(&next.naive_local()).single().is_some() {
            assert_eq!(next.hour(), 2);
            assert_eq!(next.minute(), 0);
        }
    }
}
