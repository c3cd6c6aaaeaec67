//! Cron-like backup schedules.
//!
//! Accepts the keywords `hourly`, `daily`, `weekly` (optionally prefixed with
//! `@`, plus `@midnight`) or a five-field expression `minute hour dom month dow`.
//! Each field takes `*`, a value, a range `a-b`, a step `*/n` or `a-b/n`, or a
//! comma-separated list of those. Day-of-week accepts 0-7 with both 0 and 7
//! meaning Sunday.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};

use crate::config::ConfigError;

/// Upper bound for the forward search in [`Schedule::next_after`]. Eight
/// years always contain a leap day, so `0 0 29 2 *` is found from any date.
const MAX_SCAN_DAYS: u32 = 8 * 366;

const MINUTES_PER_DAY: u32 = 24 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CronField {
    mask: u64,
    wildcard: bool,
}

impl CronField {
    fn contains(&self, value: u32) -> bool {
        self.mask & (1u64 << value) != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    minute: CronField,
    hour: CronField,
    day_of_month: CronField,
    month: CronField,
    day_of_week: CronField,
    raw: String,
}

impl Schedule {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let trimmed = raw.trim();
        let expr = match trimmed.trim_start_matches('@').to_ascii_lowercase().as_str() {
            "hourly" => "0 * * * *",
            "daily" | "midnight" => "0 0 * * *",
            "weekly" => "0 0 * * 0",
            _ => trimmed,
        };

        let parts: Vec<&str> = expr.split_whitespace().collect();
        let [minute, hour, dom, month, dow] = parts.as_slice() else {
            return Err(ConfigError::Invalid(format!(
                "schedule '{trimmed}' must be hourly, daily, weekly or a 5-field cron expression"
            )));
        };

        let mut day_of_week = parse_field(dow, 0, 7)?;
        if day_of_week.contains(7) {
            day_of_week.mask = (day_of_week.mask & !(1 << 7)) | 1;
        }

        let schedule = Self {
            minute: parse_field(minute, 0, 59)?,
            hour: parse_field(hour, 0, 23)?,
            day_of_month: parse_field(dom, 1, 31)?,
            month: parse_field(month, 1, 12)?,
            day_of_week,
            raw: trimmed.to_owned(),
        };

        // Something like "0 0 31 2 *" parses but can never fire.
        let reference = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).single();
        if reference.is_some_and(|at| schedule.next_after(&at).is_none()) {
            return Err(ConfigError::Invalid(format!(
                "schedule '{trimmed}' never fires"
            )));
        }
        Ok(schedule)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Short human label for status output.
    pub fn description(&self) -> String {
        match self.raw.trim_start_matches('@').to_ascii_lowercase().as_str() {
            label @ ("hourly" | "daily" | "weekly") => label.to_owned(),
            "midnight" => "daily".to_owned(),
            _ => format!("cron: {}", self.raw),
        }
    }

    pub fn matches<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> bool {
        self.minute.contains(at.minute())
            && self.hour.contains(at.hour())
            && self.day_matches(&at.date_naive())
    }

    fn day_matches(&self, day: &NaiveDate) -> bool {
        if !self.month.contains(day.month()) {
            return false;
        }
        let dom = self.day_of_month.contains(day.day());
        let dow = self
            .day_of_week
            .contains(day.weekday().num_days_from_sunday());
        // Classic cron: when both day fields are restricted either one may match.
        match (self.day_of_month.wildcard, self.day_of_week.wildcard) {
            (false, false) => dom || dow,
            _ => dom && dow,
        }
    }

    /// First matching minute strictly after `now`, in `now`'s time zone,
    /// searching at most [`MAX_SCAN_DAYS`] ahead. Local times skipped by a
    /// clock change are passed over.
    pub fn next_after<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = now.timezone();
        let start = now.naive_local().with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let mut day = start.date();

        for _ in 0..=MAX_SCAN_DAYS {
            if self.day_matches(&day) {
                let first = if day == start.date() {
                    start.hour() * 60 + start.minute()
                } else {
                    0
                };
                for minute_of_day in first..MINUTES_PER_DAY {
                    let (hour, minute) = (minute_of_day / 60, minute_of_day % 60);
                    if !self.hour.contains(hour) || !self.minute.contains(minute) {
                        continue;
                    }
                    let local = day.and_hms_opt(hour, minute, 0)?;
                    if let Some(candidate) = tz.from_local_datetime(&local).earliest() {
                        if candidate > *now {
                            return Some(candidate);
                        }
                    }
                }
            }
            day = day.succ_opt()?;
        }
        None
    }
}

fn parse_field(raw: &str, min: u32, max: u32) -> Result<CronField, ConfigError> {
    let mut mask = 0u64;
    for part in raw.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => (range, parse_value(step, 1, u32::MAX)?),
            None => (part, 1),
        };
        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((lo, hi)) = range.split_once('-') {
            (parse_value(lo, min, max)?, parse_value(hi, min, max)?)
        } else {
            let value = parse_value(range, min, max)?;
            // "5/15" runs from 5 to the end of the field.
            (value, if step > 1 { max } else { value })
        };
        if lo > hi {
            return Err(ConfigError::Invalid(format!(
                "cron range '{range}' is reversed"
            )));
        }
        for value in (lo..=hi).step_by(step as usize) {
            mask |= 1 << value;
        }
    }
    Ok(CronField {
        mask,
        wildcard: raw.starts_with('*'),
    })
}

fn parse_value(raw: &str, min: u32, max: u32) -> Result<u32, ConfigError> {
    let value: u32 = raw
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("invalid cron field '{raw}'")))?;
    if value < min || value > max {
        return Err(ConfigError::Invalid(format!(
            "cron field '{raw}' out of range ({min}-{max})"
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Utc, Weekday};

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn keywords_expand_to_cron() {
        assert_eq!(Schedule::parse("hourly").unwrap().description(), "hourly");
        assert_eq!(Schedule::parse("@daily").unwrap().description(), "daily");
        assert_eq!(Schedule::parse("@midnight").unwrap().description(), "daily");
        assert_eq!(
            Schedule::parse("*/15 * * * *").unwrap().description(),
            "cron: */15 * * * *"
        );
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        for raw in [
            "",
            "often",
            "* * * *",
            "60 * * * *",
            "* 24 * * *",
            "* * 0 * *",
            "*/0 * * * *",
            "10-5 * * * *",
            "a * * * *",
        ] {
            assert!(Schedule::parse(raw).is_err(), "{raw:?} should be rejected");
        }
    }

    #[test]
    fn next_daily_run_is_today_or_tomorrow() {
        let daily = Schedule::parse("30 2 * * *").unwrap();
        assert_eq!(
            daily.next_after(&at(2026, 10, 17, 1, 0, 0)),
            Some(at(2026, 10, 17, 2, 30, 0))
        );
        assert_eq!(
            daily.next_after(&at(2026, 10, 17, 2, 30, 0)),
            Some(at(2026, 10, 18, 2, 30, 0))
        );
    }

    #[test]
    fn next_run_is_strictly_after_now() {
        let every_minute = Schedule::parse("* * * * *").unwrap();
        assert_eq!(
            every_minute.next_after(&at(2026, 1, 1, 0, 0, 59)),
            Some(at(2026, 1, 1, 0, 1, 0))
        );
    }

    #[test]
    fn steps_lists_and_ranges() {
        let s = Schedule::parse("*/20 9-17/4 * * 1,3,5").unwrap();
        assert!(s.matches(&at(2026, 10, 16, 13, 40, 0))); // Friday
        assert!(!s.matches(&at(2026, 10, 16, 14, 40, 0)));
        assert!(!s.matches(&at(2026, 10, 17, 13, 40, 0))); // Saturday
    }

    #[test]
    fn sunday_is_zero_or_seven() {
        let sunday = Schedule::parse("0 0 * * 7").unwrap();
        let next = sunday.next_after(&at(2026, 10, 14, 12, 0, 0)).unwrap();
        assert_eq!(next.weekday(), Weekday::Sun);
        assert_eq!(next, at(2026, 10, 18, 0, 0, 0));
    }

    #[test]
    fn restricted_day_fields_match_either() {
        let s = Schedule::parse("0 0 1 * 1").unwrap();
        assert!(s.matches(&at(2026, 10, 1, 0, 0, 0))); // 1st, Thursday
        assert!(s.matches(&at(2026, 10, 5, 0, 0, 0))); // Monday
        assert!(!s.matches(&at(2026, 10, 6, 0, 0, 0)));
    }

    #[test]
    fn impossible_date_is_rejected() {
        for raw in ["0 0 31 2 *", "0 0 30 2 *", "15 3 31 4,6,9,11 *"] {
            assert!(Schedule::parse(raw).is_err(), "{raw:?} should be rejected");
        }
    }

    #[test]
    fn leap_day_is_found_years_ahead() {
        let leap = Schedule::parse("0 0 29 2 *").unwrap();
        assert_eq!(
            leap.next_after(&at(2026, 10, 17, 2, 0, 0)),
            Some(at(2028, 2, 29, 0, 0, 0))
        );
        assert_eq!(
            leap.next_after(&at(2028, 2, 29, 0, 0, 0)),
            Some(at(2032, 2, 29, 0, 0, 0))
        );
    }

    #[test]
    fn next_run_follows_the_clock_time_zone() {
        let daily = Schedule::parse("0 2 * * *").unwrap();
        let tz = chrono::FixedOffset::east_opt(2 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2026, 10, 17, 1, 0, 0).unwrap();
        assert_eq!(
            daily.next_after(&now),
            Some(tz.with_ymd_and_hms(2026, 10, 17, 2, 0, 0).unwrap())
        );
    }
}
