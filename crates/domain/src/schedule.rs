//! Deadline math for the periodic backup and log export jobs.

use chrono::{Duration, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// Wall-clock schedule of the two periodic jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Hour of day the configuration backup runs.
    pub config_hour: u32,
    /// Hour of day the log export cycle is anchored to.
    pub logs_hour: u32,
    /// Minute of the anchor hour.
    pub logs_minute: u32,
    /// Hours between two log exports.
    pub logs_period_hours: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            config_hour: 1,
            logs_hour: 1,
            logs_minute: 1,
            logs_period_hours: 2,
        }
    }
}

/// The next scheduler wake-up and what is due then.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextRun {
    pub at: NaiveDateTime,
    pub backup_config: bool,
    pub export_logs: bool,
}

impl ScheduleConfig {
    /// Next log export strictly after `now`.
    #[must_use]
    pub fn next_logs_run(&self, now: NaiveDateTime) -> NaiveDateTime {
        let anchor = time_of_day(self.logs_hour, self.logs_minute);
        let period = Duration::hours(i64::from(self.logs_period_hours.max(1)));
        let mut next = now.date().and_time(anchor);
        while next <= now {
            next += period;
        }
        next
    }

    /// Next configuration backup strictly after `now`.
    #[must_use]
    pub fn next_config_run(&self, now: NaiveDateTime) -> NaiveDateTime {
        let today = now.date().and_time(time_of_day(self.config_hour, 0));
        if today > now {
            today
        } else {
            today + Duration::days(1)
        }
    }

    /// Earliest of the two deadlines; both jobs are due when they coincide.
    #[must_use]
    pub fn next_run(&self, now: NaiveDateTime) -> NextRun {
        let logs = self.next_logs_run(now);
        let config = self.next_config_run(now);
        let at = logs.min(config);
        NextRun {
            at,
            backup_config: config == at,
            export_logs: logs == at,
        }
    }
}

fn time_of_day(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour.min(23), minute.min(59), 0).unwrap_or(NaiveTime::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn should_advance_logs_run_by_period_until_after_now() {
        let schedule = ScheduleConfig::default();
        assert_eq!(schedule.next_logs_run(at(10, 0, 30)), at(10, 1, 1));
        assert_eq!(schedule.next_logs_run(at(10, 1, 1)), at(10, 3, 1));
        assert_eq!(schedule.next_logs_run(at(10, 23, 59)), at(11, 1, 1));
    }

    #[test]
    fn should_roll_config_run_to_tomorrow_when_hour_passed() {
        let schedule = ScheduleConfig::default();
        assert_eq!(schedule.next_config_run(at(10, 0, 10)), at(10, 1, 0));
        assert_eq!(schedule.next_config_run(at(10, 1, 0)), at(11, 1, 0));
    }

    #[test]
    fn should_pick_earliest_deadline() {
        let schedule = ScheduleConfig::default();
        let next = schedule.next_run(at(10, 0, 30));
        assert_eq!(next.at, at(10, 1, 0));
        assert!(next.backup_config);
        assert!(!next.export_logs);
    }

    #[test]
    fn should_fire_both_when_deadlines_coincide() {
        let schedule = ScheduleConfig {
            config_hour: 3,
            logs_hour: 1,
            logs_minute: 0,
            logs_period_hours: 2,
        };
        let next = schedule.next_run(at(10, 2, 0));
        assert_eq!(next.at, at(10, 3, 0));
        assert!(next.backup_config);
        assert!(next.export_logs);
    }

    #[test]
    fn should_treat_zero_period_as_one_hour() {
        let schedule = ScheduleConfig {
            logs_period_hours: 0,
            ..ScheduleConfig::default()
        };
        assert_eq!(schedule.next_logs_run(at(10, 5, 0)), at(10, 5, 1));
    }
}
