use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

use crate::error::{Result, SchedulerError};

/// Parsed 5-field cron expression (`minute hour day-of-month month
/// day-of-week`). Supports `*`, `*/n`, ranges (`a-b`), and lists (`a,b,c`),
/// including combinations like `1,15-20,*/10`.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    minute: BTreeSet<u32>,
    hour: BTreeSet<u32>,
    dom: BTreeSet<u32>,
    month: BTreeSet<u32>,
    dow: BTreeSet<u32>,
    dom_is_wildcard: bool,
    dow_is_wildcard: bool,
}

const MAX_LOOKAHEAD_MINUTES: i64 = 4 * 365 * 24 * 60;

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(SchedulerError::InvalidSchedule(format!(
                "expected 5 fields (minute hour dom month dow), got {}: {expr:?}",
                fields.len()
            )));
        }
        let minute = parse_field(fields[0], 0, 59)?;
        let hour = parse_field(fields[1], 0, 23)?;
        let dom = parse_field(fields[2], 1, 31)?;
        let month = parse_field(fields[3], 1, 12)?;
        let mut dow = parse_field(fields[4], 0, 7)?;
        // Cron convention: both 0 and 7 mean Sunday.
        if dow.remove(&7) {
            dow.insert(0);
        }

        Ok(Self {
            dom_is_wildcard: fields[2] == "*",
            dow_is_wildcard: fields[4] == "*",
            minute,
            hour,
            dom,
            month,
            dow,
        })
    }

    fn day_matches(&self, date: &DateTime<Utc>) -> bool {
        let dom_ok = self.dom.contains(&date.day());
        let dow_ok = self.dow.contains(&(date.weekday().num_days_from_sunday()));
        match (self.dom_is_wildcard, self.dow_is_wildcard) {
            (true, true) => true,
            (false, true) => dom_ok,
            (true, false) => dow_ok,
            // Standard cron quirk: when both fields are restricted, a day
            // matching *either* one is a fire day.
            (false, false) => dom_ok || dow_ok,
        }
    }

    /// Next fire time strictly after `from`, truncated to the minute.
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut candidate = from
            .with_second(0)
            .unwrap()
            .with_nanosecond(0)
            .unwrap()
            + Duration::minutes(1);

        for _ in 0..MAX_LOOKAHEAD_MINUTES {
            if self.month.contains(&candidate.month())
                && self.day_matches(&candidate)
                && self.hour.contains(&candidate.hour())
                && self.minute.contains(&candidate.minute())
            {
                return Some(candidate);
            }
            candidate += Duration::minutes(1);
        }
        None
    }
}

fn parse_field(field: &str, min: u32, max: u32) -> Result<BTreeSet<u32>> {
    let mut set = BTreeSet::new();
    for token in field.split(',') {
        if token == "*" {
            set.extend(min..=max);
        } else if let Some(step_str) = token.strip_prefix("*/") {
            let step: u32 = step_str
                .parse()
                .map_err(|_| SchedulerError::InvalidSchedule(format!("bad step in {token:?}")))?;
            if step == 0 {
                return Err(SchedulerError::InvalidSchedule(format!("zero step in {token:?}")));
            }
            let mut v = min;
            while v <= max {
                set.insert(v);
                v += step;
            }
        } else if let Some((lo, hi)) = token.split_once('-') {
            let lo: u32 = lo.parse().map_err(|_| SchedulerError::InvalidSchedule(format!("bad range {token:?}")))?;
            let hi: u32 = hi.parse().map_err(|_| SchedulerError::InvalidSchedule(format!("bad range {token:?}")))?;
            if lo > hi || lo < min || hi > max {
                return Err(SchedulerError::InvalidSchedule(format!("range {token:?} out of bounds [{min},{max}]")));
            }
            set.extend(lo..=hi);
        } else {
            let v: u32 = token.parse().map_err(|_| SchedulerError::InvalidSchedule(format!("bad value {token:?}")))?;
            if v < min || v > max {
                return Err(SchedulerError::InvalidSchedule(format!("value {v} out of bounds [{min},{max}]")));
            }
            set.insert(v);
        }
    }
    if set.is_empty() {
        return Err(SchedulerError::InvalidSchedule(format!("empty field {field:?}")));
    }
    Ok(set)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn every_minute_fires_next_minute() {
        let sched = CronSchedule::parse("* * * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2026, 7, 26, 10, 30, 15).unwrap();
        let next = sched.next_after(from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 7, 26, 10, 31, 0).unwrap());
    }

    #[test]
    fn step_field_fires_on_multiples() {
        let sched = CronSchedule::parse("*/15 * * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2026, 7, 26, 10, 1, 0).unwrap();
        let next = sched.next_after(from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 7, 26, 10, 15, 0).unwrap());
    }

    #[test]
    fn daily_at_fixed_hour_rolls_to_tomorrow() {
        let sched = CronSchedule::parse("0 9 * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2026, 7, 26, 10, 0, 0).unwrap();
        let next = sched.next_after(from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 7, 27, 9, 0, 0).unwrap());
    }

    #[test]
    fn list_and_range_combine_within_one_field() {
        let sched = CronSchedule::parse("0 8,12,18-20 * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2026, 7, 26, 9, 0, 0).unwrap();
        let next = sched.next_after(from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 7, 26, 12, 0, 0).unwrap());
    }

    #[test]
    fn dom_or_dow_both_restricted_matches_either() {
        // Fires on the 1st of the month OR any Monday.
        let sched = CronSchedule::parse("0 0 1 * 1").unwrap();
        // 2026-07-27 is a Monday; 2026-07-01 already passed from this `from`.
        let from = Utc.with_ymd_and_hms(2026, 7, 26, 0, 0, 0).unwrap();
        let next = sched.next_after(from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 7, 27, 0, 0, 0).unwrap());
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(CronSchedule::parse("* * *").is_err());
    }

    #[test]
    fn rejects_zero_step() {
        assert!(CronSchedule::parse("*/0 * * * *").is_err());
    }

    #[test]
    fn rejects_out_of_range_value() {
        assert!(CronSchedule::parse("60 * * * *").is_err());
    }
}
