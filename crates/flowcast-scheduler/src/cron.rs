//! Cron expression parser.
//! Supports: "MIN HOUR DOM MON DOW" (5-field, no seconds)
//! Per field: *, */N, N, A-B, A-B/N, N/S and comma lists.
//! DOW is 0-6 (Sunday = 0, 7 also accepted as Sunday).
//! Example: "0 8 * * 1-5" = weekdays at 8:00 UTC
//!
//! When both DOM and DOW are restricted, a day matches if either matches.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};

use flowcast_core::error::{FlowcastError, Result};

/// Search horizon for the next fire time.
const HORIZON_DAYS: i64 = 366;

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(FlowcastError::validation(format!(
                "invalid cron expression '{expression}' (need 5 fields: MIN HOUR DOM MON DOW)"
            )));
        }
        let field = |idx: usize, min: u32, max: u32, label: &str| {
            parse_field(parts[idx], min, max).map_err(|e| {
                FlowcastError::validation(format!("invalid cron {label} field '{}': {e}", parts[idx]))
            })
        };

        let minutes = field(0, 0, 59, "minute")?;
        let hours = field(1, 0, 23, "hour")?;
        let days_of_month = field(2, 1, 31, "day-of-month")?;
        let months = field(3, 1, 12, "month")?;
        let mut days_of_week = field(4, 0, 7, "day-of-week")?;
        // 7 is Sunday too
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            expression: expression.trim().to_string(),
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            dom_restricted: !parts[2].starts_with('*'),
            dow_restricted: !parts[4].starts_with('*'),
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Whether `t` (truncated to the minute) is a fire time.
    pub fn matches(&self, t: DateTime<Utc>) -> bool {
        self.month_matches(t)
            && self.day_matches(t)
            && bit(self.hours, t.hour())
            && bit(self.minutes, t.minute())
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let end = after + Duration::days(HORIZON_DAYS);
        let mut t = after.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);

        while t <= end {
            if !self.month_matches(t) {
                let (y, m) = if t.month() == 12 {
                    (t.year() + 1, 1)
                } else {
                    (t.year(), t.month() + 1)
                };
                t = Utc.with_ymd_and_hms(y, m, 1, 0, 0, 0).single()?;
                continue;
            }
            if !self.day_matches(t) {
                t = (t.date_naive() + Duration::days(1)).and_hms_opt(0, 0, 0)?.and_utc();
                continue;
            }
            if !bit(self.hours, t.hour()) {
                t = t.with_minute(0)? + Duration::hours(1);
                continue;
            }
            if !bit(self.minutes, t.minute()) {
                t += Duration::minutes(1);
                continue;
            }
            return Some(t);
        }
        None
    }

    fn month_matches(&self, t: DateTime<Utc>) -> bool {
        bit(self.months, t.month())
    }

    fn day_matches(&self, t: DateTime<Utc>) -> bool {
        let dom = bit(self.days_of_month, t.day());
        let dow = bit(self.days_of_week, t.weekday().num_days_from_sunday());
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }
}

impl std::fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.expression)
    }
}

/// Validate a cron expression without computing anything.
pub fn validate(expression: &str) -> Result<()> {
    CronSchedule::parse(expression).map(|_| ())
}

fn bit(mask: u64, value: u32) -> bool {
    mask & (1u64 << value) != 0
}

/// Parse a cron field into a bitmask of matching values.
fn parse_field(field: &str, min: u32, max: u32) -> std::result::Result<u64, String> {
    let mut mask = 0u64;
    for part in field.split(',') {
        let part = part.trim();
        if part.is_empty() {
            return Err("empty list element".into());
        }

        let (range, step) = match part.split_once('/') {
            Some((r, s)) => {
                let step: u32 = s.parse().map_err(|_| format!("bad step '{s}'"))?;
                if step == 0 {
                    return Err("step must be positive".into());
                }
                (r, step)
            }
            None => (part, 1),
        };

        let (start, end) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (parse_value(a, min, max)?, parse_value(b, min, max)?)
        } else {
            let v = parse_value(range, min, max)?;
            // "N/S" runs from N to the end of the range
            if part.contains('/') { (v, max) } else { (v, v) }
        };

        if start > end {
            return Err(format!("range {start}-{end} is reversed"));
        }
        let mut v = start;
        while v <= end {
            mask |= 1u64 << v;
            v += step;
        }
    }
    Ok(mask)
}

fn parse_value(s: &str, min: u32, max: u32) -> std::result::Result<u32, String> {
    let n: u32 = s.trim().parse().map_err(|_| format!("'{s}' is not a number"))?;
    if n < min || n > max {
        return Err(format!("{n} out of range {min}-{max}"));
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn next_fire(expression: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        CronSchedule::parse(expression).unwrap().next_after(after)
    }

    #[test]
    fn test_every_hour() {
        let next = next_fire("0 * * * *", at(2026, 2, 22, 10, 30)).unwrap();
        assert_eq!((next.hour(), next.minute()), (11, 0));
    }

    #[test]
    fn test_specific_time() {
        let next = next_fire("0 8 * * *", at(2026, 2, 22, 7, 0)).unwrap();
        assert_eq!((next.hour(), next.minute()), (8, 0));
        // Already past 8:00 → tomorrow
        let next = next_fire("0 8 * * *", at(2026, 2, 22, 8, 0)).unwrap();
        assert_eq!(next, at(2026, 2, 23, 8, 0));
    }

    #[test]
    fn test_every_15_minutes() {
        let next = next_fire("*/15 * * * *", at(2026, 2, 22, 10, 2)).unwrap();
        assert_eq!(next.minute(), 15);
    }

    #[test]
    fn test_weekday_range() {
        // 2026-02-21 is a Saturday
        let next = next_fire("30 9 * * 1-5", at(2026, 2, 21, 12, 0)).unwrap();
        assert_eq!(next, at(2026, 2, 23, 9, 30));
    }

    #[test]
    fn test_sunday_as_seven() {
        let s = CronSchedule::parse("0 0 * * 7").unwrap();
        assert!(s.matches(at(2026, 2, 22, 0, 0))); // Sunday
    }

    #[test]
    fn test_month_and_day_of_month() {
        let next = next_fire("0 6 1 */3 *", at(2026, 2, 10, 0, 0)).unwrap();
        assert_eq!(next, at(2026, 4, 1, 6, 0));
    }

    #[test]
    fn test_dom_or_dow_when_both_restricted() {
        let s = CronSchedule::parse("0 12 15 * 1").unwrap();
        assert!(s.matches(at(2026, 2, 15, 12, 0))); // 15th (Sunday)
        assert!(s.matches(at(2026, 2, 16, 12, 0))); // Monday
        assert!(!s.matches(at(2026, 2, 17, 12, 0)));
    }

    #[test]
    fn test_lists_and_stepped_ranges() {
        let s = CronSchedule::parse("0,30 8-18/2 * * *").unwrap();
        assert!(s.matches(at(2026, 3, 3, 10, 30)));
        assert!(!s.matches(at(2026, 3, 3, 11, 0)));
    }

    #[test]
    fn test_impossible_date_has_no_next() {
        assert!(next_fire("0 0 30 2 *", at(2026, 1, 1, 0, 0)).is_none());
    }

    #[test]
    fn test_invalid_expression() {
        assert!(CronSchedule::parse("bad").is_err());
        assert!(validate("61 * * * *").is_err());
        assert!(validate("*/0 * * * *").is_err());
        assert!(validate("5-1 * * * *").is_err());
        assert!(validate("0 8 * * *").is_ok());
    }
}
