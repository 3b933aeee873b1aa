//! Five-field cron expressions evaluated in an IANA timezone.
//!
//! Supports `*`, lists, ranges, steps, month and weekday names, `7` as
//! Sunday, and the `@yearly`/`@annually`/`@monthly`/`@weekly`/`@daily`/
//! `@midnight`/`@hourly` macros. When both day-of-month and day-of-week are
//! restricted, a day matches if either does.

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// How far ahead [`CronExpr::next_after`] searches before giving up.
const SEARCH_HORIZON_YEARS: i32 = 5;

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const WEEKDAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CronError {
    #[error("invalid cron expression '{expr}': {reason}")]
    Invalid { expr: String, reason: String },
    #[error("unknown timezone '{0}'")]
    UnknownTimezone(String),
}

/// A parsed cron expression. Each field is a bitset of allowed values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    minutes: u64,
    hours: u32,
    days_of_month: u32,
    months: u16,
    days_of_week: u8,
    dom_restricted: bool,
    dow_restricted: bool,
}

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    /// First value of `names`.
    names_base: u32,
}

const MINUTE: FieldSpec = FieldSpec {
    name: "minute",
    min: 0,
    max: 59,
    names: &[],
    names_base: 0,
};
const HOUR: FieldSpec = FieldSpec {
    name: "hour",
    min: 0,
    max: 23,
    names: &[],
    names_base: 0,
};
const DAY_OF_MONTH: FieldSpec = FieldSpec {
    name: "day-of-month",
    min: 1,
    max: 31,
    names: &[],
    names_base: 0,
};
const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: &MONTH_NAMES,
    names_base: 1,
};
// 7 is accepted and folded onto Sunday after parsing.
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day-of-week",
    min: 0,
    max: 7,
    names: &WEEKDAY_NAMES,
    names_base: 0,
};

impl CronExpr {
    /// Parse a five-field expression or `@` macro.
    ///
    /// # Errors
    ///
    /// Returns [`CronError::Invalid`] describing the first malformed field.
    #[allow(clippy::cast_possible_truncation)]
    pub fn parse(expr: &str) -> Result<Self, CronError> {
        let invalid = |reason: String| CronError::Invalid {
            expr: expr.to_string(),
            reason,
        };

        let trimmed = expr.trim();
        let expanded = match trimmed.to_ascii_lowercase().as_str() {
            "@yearly" | "@annually" => "0 0 1 1 *".to_string(),
            "@monthly" => "0 0 1 * *".to_string(),
            "@weekly" => "0 0 * * 0".to_string(),
            "@daily" | "@midnight" => "0 0 * * *".to_string(),
            "@hourly" => "0 * * * *".to_string(),
            other if other.starts_with('@') => {
                return Err(invalid(format!("unknown macro '{trimmed}'")));
            }
            _ => trimmed.to_string(),
        };

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid(format!("expected 5 fields, found {}", fields.len())));
        }

        let minutes = parse_field(fields[0], &MINUTE).map_err(&invalid)?;
        let hours = parse_field(fields[1], &HOUR).map_err(&invalid)?;
        let days_of_month = parse_field(fields[2], &DAY_OF_MONTH).map_err(&invalid)?;
        let months = parse_field(fields[3], &MONTH).map_err(&invalid)?;
        let mut days_of_week = parse_field(fields[4], &DAY_OF_WEEK).map_err(&invalid)?;
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            minutes,
            hours: hours as u32,
            days_of_month: days_of_month as u32,
            months: months as u16,
            days_of_week: days_of_week as u8,
            dom_restricted: !fields[2].starts_with('*'),
            dow_restricted: !fields[4].starts_with('*'),
        })
    }

    fn matches_minute(&self, minute: u32) -> bool {
        self.minutes & (1 << minute) != 0
    }

    fn matches_hour(&self, hour: u32) -> bool {
        self.hours & (1 << hour) != 0
    }

    fn matches_month(&self, month: u32) -> bool {
        self.months & (1 << month) != 0
    }

    fn matches_day(&self, date: NaiveDate) -> bool {
        let dom = self.days_of_month & (1 << date.day()) != 0;
        let dow = self.days_of_week & (1 << date.weekday().num_days_from_sunday()) != 0;
        if self.dom_restricted && self.dow_restricted {
            dom || dow
        } else {
            dom && dow
        }
    }

    /// First instant strictly after `after` matching this expression in `tz`.
    ///
    /// Local times skipped by a DST transition never fire; ambiguous local
    /// times fire once, at the earlier instant. Returns `None` when nothing
    /// matches within five years.
    #[must_use]
    pub fn next_after(&self, tz: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local_after = after.with_timezone(&tz).naive_local();
        let mut t = truncate_to_minute(local_after)? + Duration::minutes(1);
        let horizon = local_after
            .with_year(local_after.year() + SEARCH_HORIZON_YEARS)
            .unwrap_or(local_after + Duration::days(365 * i64::from(SEARCH_HORIZON_YEARS)));

        while t <= horizon {
            if !self.matches_month(t.month()) {
                t = start_of_next_month(t)?;
                continue;
            }
            if !self.matches_day(t.date()) {
                t = t.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.matches_hour(t.hour()) {
                t = truncate_to_hour(t)? + Duration::hours(1);
                continue;
            }
            if !self.matches_minute(t.minute()) {
                t += Duration::minutes(1);
                continue;
            }

            match tz.from_local_datetime(&t) {
                LocalResult::Single(dt) => {
                    let utc = dt.with_timezone(&Utc);
                    if utc > after {
                        return Some(utc);
                    }
                }
                LocalResult::Ambiguous(a, b) => {
                    let earliest = a.min(b).with_timezone(&Utc);
                    if earliest > after {
                        return Some(earliest);
                    }
                }
                LocalResult::None => {}
            }
            t += Duration::minutes(1);
        }
        None
    }
}

/// Parse an IANA timezone name.
///
/// # Errors
///
/// Returns [`CronError::UnknownTimezone`] if the name is not in the tz database.
pub fn parse_timezone(name: &str) -> Result<Tz, CronError> {
    name.parse::<Tz>()
        .map_err(|_| CronError::UnknownTimezone(name.to_string()))
}

/// Next fire time of `expr` in `timezone` strictly after `after`.
///
/// # Errors
///
/// Returns [`CronError`] if the expression or timezone is invalid.
pub fn next_occurrence(
    expr: &str,
    timezone: &str,
    after: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, CronError> {
    let cron = CronExpr::parse(expr)?;
    let tz = parse_timezone(timezone)?;
    Ok(cron.next_after(tz, after))
}

fn parse_field(field: &str, spec: &FieldSpec) -> Result<u64, String> {
    let mut bits = 0u64;
    for item in field.split(',') {
        if item.is_empty() {
            return Err(format!("empty list item in {} field", spec.name));
        }
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid step '{step}' in {} field", spec.name))?;
                if step == 0 {
                    return Err(format!("step must be positive in {} field", spec.name));
                }
                (range, Some(step))
            }
            None => (item, None),
        };

        let (start, end) = if range == "*" {
            (spec.min, spec.max)
        } else if let Some((lo, hi)) = range.split_once('-') {
            (parse_value(lo, spec)?, parse_value(hi, spec)?)
        } else {
            let value = parse_value(range, spec)?;
            // `a/n` runs from `a` to the end of the field.
            (value, if step.is_some() { spec.max } else { value })
        };
        if start > end {
            return Err(format!(
                "range {start}-{end} is reversed in {} field",
                spec.name
            ));
        }

        let step = step.unwrap_or(1);
        let mut v = start;
        while v <= end {
            bits |= 1 << v;
            v += step;
        }
    }
    Ok(bits)
}

#[allow(clippy::cast_possible_truncation)]
fn parse_value(raw: &str, spec: &FieldSpec) -> Result<u32, String> {
    let lower = raw.to_ascii_lowercase();
    if let Some(idx) = spec.names.iter().position(|n| *n == lower) {
        return Ok(spec.names_base + idx as u32);
    }
    let value: u32 = raw
        .parse()
        .map_err(|_| format!("invalid value '{raw}' in {} field", spec.name))?;
    if value < spec.min || value > spec.max {
        return Err(format!(
            "value {value} out of range {}-{} in {} field",
            spec.min, spec.max, spec.name
        ));
    }
    Ok(value)
}

fn truncate_to_minute(t: NaiveDateTime) -> Option<NaiveDateTime> {
    t.date().and_hms_opt(t.hour(), t.minute(), 0)
}

fn truncate_to_hour(t: NaiveDateTime) -> Option<NaiveDateTime> {
    t.date().and_hms_opt(t.hour(), 0, 0)
}

fn start_of_next_month(t: NaiveDateTime) -> Option<NaiveDateTime> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)
}
