//! Cadence expressions: how often a task fires
//!
//! Accepted forms:
//! - `@every <duration>` with durations like `90s`, `30m`, `1h30m`, `1d`
//! - `@hourly`, `@daily`, `@weekly`
//! - five-field cron: `minute hour day-of-month month day-of-week`, with
//!   `*`, lists (`1,15`), ranges (`1-5`), and steps (`*/10`, `2-10/2`)
//!
//! A cadence only answers one question: given an instant, when is the next
//! fire? The scheduler owns the timers.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, TimeZone, Timelike, Utc};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid schedule expression {expression:?}: {reason}")]
pub struct CadenceError {
    pub expression: String,
    pub reason: String,
}

impl CadenceError {
    fn new(expression: &str, reason: impl Into<String>) -> Self {
        Self {
            expression: expression.to_string(),
            reason: reason.into(),
        }
    }
}

/// A parsed schedule expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cadence {
    /// Fixed interval from the previous fire.
    Every(Duration),
    Cron(CronExpr),
}

impl Cadence {
    /// The next fire time strictly after `after`. `None` only when the cron
    /// fields never match a real date (e.g. Feb 30).
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Cadence::Every(interval) => {
                let interval = ChronoDuration::from_std(*interval).ok()?;
                after.checked_add_signed(interval)
            }
            Cadence::Cron(expr) => expr.next_after(after),
        }
    }
}

impl FromStr for Cadence {
    type Err = CadenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(CadenceError::new(s, "empty expression"));
        }

        if let Some(dur) = trimmed.strip_prefix("@every ") {
            let interval = parse_duration(dur.trim())
                .ok_or_else(|| CadenceError::new(s, "unparseable duration"))?;
            if interval.is_zero() {
                return Err(CadenceError::new(s, "zero interval"));
            }
            return Ok(Cadence::Every(interval));
        }

        match trimmed {
            "@hourly" => return "0 * * * *".parse(),
            "@daily" => return "0 0 * * *".parse(),
            "@weekly" => return "0 0 * * 0".parse(),
            _ => {}
        }

        CronExpr::parse(trimmed)
            .map(Cadence::Cron)
            .map_err(|reason| CadenceError::new(s, reason))
    }
}

/// Parse durations of the form `1d2h30m45s` (any subset, in order).
pub fn parse_duration(s: &str) -> Option<Duration> {
    if s.is_empty() {
        return None;
    }

    let mut total = Duration::ZERO;
    let mut value = String::new();
    for ch in s.chars() {
        if ch.is_ascii_digit() {
            value.push(ch);
            continue;
        }
        let n: u64 = value.parse().ok()?;
        value.clear();
        let unit = match ch {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            'd' => 86400,
            _ => return None,
        };
        total += Duration::from_secs(n * unit);
    }
    if !value.is_empty() {
        // Trailing digits without a unit.
        return None;
    }
    Some(total)
}

/// A five-field cron expression as sets of allowed values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    minutes: u64,  // bits 0-59
    hours: u32,    // bits 0-23
    days: u32,     // bits 1-31
    months: u16,   // bits 1-12
    weekdays: u8,  // bits 0-6, Sunday = 0
}

impl CronExpr {
    fn parse(s: &str) -> Result<Self, String> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(format!("expected 5 fields, got {}", fields.len()));
        }

        Ok(Self {
            minutes: parse_field(fields[0], 0, 59)?,
            hours: parse_field(fields[1], 0, 23)? as u32,
            days: parse_field(fields[2], 1, 31)? as u32,
            months: parse_field(fields[3], 1, 12)? as u16,
            weekdays: parse_field(fields[4], 0, 6)? as u8,
        })
    }

    fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        // Scan day by day, then hour/minute within matching days. Bounded at
        // four years, enough to cover any satisfiable expression.
        let start = (after + ChronoDuration::minutes(1))
            .with_second(0)?
            .with_nanosecond(0)?;

        let mut date = start.date_naive();
        for day_offset in 0..(4 * 366) {
            if day_offset > 0 {
                date = date.succ_opt()?;
            }

            let month_ok = self.months & (1 << date.month()) != 0;
            let day_ok = self.days & (1 << date.day()) != 0;
            let weekday_ok =
                self.weekdays & (1 << date.weekday().num_days_from_sunday()) != 0;
            if !(month_ok && day_ok && weekday_ok) {
                continue;
            }

            // On the first day, start from the cursor's time of day.
            let (from_hour, from_minute) = if day_offset == 0 && date == start.date_naive() {
                (start.hour(), start.minute())
            } else {
                (0, 0)
            };

            for hour in from_hour..24 {
                if self.hours & (1 << hour) == 0 {
                    continue;
                }
                let first_minute = if hour == from_hour { from_minute } else { 0 };
                for minute in first_minute..60 {
                    if self.minutes & (1u64 << minute) != 0 {
                        let naive = date.and_hms_opt(hour, minute, 0)?;
                        return Utc.from_utc_datetime(&naive).into();
                    }
                }
            }
        }
        None
    }
}

/// Parse one cron field into a bitmask of allowed values.
fn parse_field(field: &str, min: u8, max: u8) -> Result<u64, String> {
    let mut mask = 0u64;
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u8 = step
                    .parse()
                    .map_err(|_| format!("invalid step in {part:?}"))?;
                if step == 0 {
                    return Err(format!("zero step in {part:?}"));
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((lo, hi)) = range.split_once('-') {
            (
                parse_bound(lo, min, max)?,
                parse_bound(hi, min, max)?,
            )
        } else {
            let v = parse_bound(range, min, max)?;
            // A bare value with a step means "from v to max".
            if step > 1 { (v, max) } else { (v, v) }
        };

        if lo > hi {
            return Err(format!("inverted range in {part:?}"));
        }
        let mut v = lo;
        while v <= hi {
            mask |= 1u64 << v;
            v = v.saturating_add(step);
        }
    }
    if mask == 0 {
        return Err(format!("empty field {field:?}"));
    }
    Ok(mask)
}

fn parse_bound(s: &str, min: u8, max: u8) -> Result<u8, String> {
    let v: u8 = s
        .parse()
        .map_err(|_| format!("invalid value {s:?}"))?;
    if v < min || v > max {
        return Err(format!("value {v} out of range {min}-{max}"));
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[rstest]
    #[case("30s", 30)]
    #[case("30m", 1800)]
    #[case("1h30m", 5400)]
    #[case("1d", 86400)]
    fn durations_parse(#[case] input: &str, #[case] secs: u64) {
        assert_eq!(parse_duration(input), Some(Duration::from_secs(secs)));
    }

    #[rstest]
    #[case("")]
    #[case("30")]
    #[case("30x")]
    #[case("m30")]
    fn bad_durations_rejected(#[case] input: &str) {
        assert_eq!(parse_duration(input), None);
    }

    #[test]
    fn every_cadence_fires_interval_after_previous() {
        let cadence: Cadence = "@every 30m".parse().unwrap();
        let next = cadence.next_after(at("2026-03-01T12:00:00Z")).unwrap();
        assert_eq!(next, at("2026-03-01T12:30:00Z"));
    }

    #[rstest]
    #[case("")]
    #[case("@every")]
    #[case("@every bananas")]
    #[case("@every 0s")]
    #[case("* * * *")]
    #[case("61 * * * *")]
    #[case("* 25 * * *")]
    #[case("*/0 * * * *")]
    #[case("5-1 * * * *")]
    fn invalid_expressions_rejected(#[case] expr: &str) {
        assert!(expr.parse::<Cadence>().is_err());
    }

    #[rstest]
    // every minute: next whole minute
    #[case("* * * * *", "2026-03-01T12:00:30Z", "2026-03-01T12:01:00Z")]
    // hourly on the hour
    #[case("0 * * * *", "2026-03-01T12:00:00Z", "2026-03-01T13:00:00Z")]
    // daily at 03:15
    #[case("15 3 * * *", "2026-03-01T04:00:00Z", "2026-03-02T03:15:00Z")]
    // step minutes
    #[case("*/15 * * * *", "2026-03-01T12:16:00Z", "2026-03-01T12:30:00Z")]
    // specific day of month
    #[case("0 0 1 * *", "2026-03-02T00:00:00Z", "2026-04-01T00:00:00Z")]
    // Sunday only (2026-03-01 is a Sunday)
    #[case("0 9 * * 0", "2026-03-01T10:00:00Z", "2026-03-08T09:00:00Z")]
    // month restriction
    #[case("0 0 * 12 *", "2026-03-01T00:00:00Z", "2026-12-01T00:00:00Z")]
    fn cron_next_fire_times(#[case] expr: &str, #[case] now: &str, #[case] expected: &str) {
        let cadence: Cadence = expr.parse().unwrap();
        assert_eq!(cadence.next_after(at(now)), Some(at(expected)));
    }

    #[test]
    fn hourly_shorthand_matches_cron_form() {
        let shorthand: Cadence = "@hourly".parse().unwrap();
        let explicit: Cadence = "0 * * * *".parse().unwrap();
        assert_eq!(shorthand, explicit);
    }

    #[test]
    fn impossible_date_never_fires() {
        let cadence: Cadence = "0 0 30 2 *".parse().unwrap();
        assert_eq!(cadence.next_after(at("2026-01-01T00:00:00Z")), None);
    }
}
