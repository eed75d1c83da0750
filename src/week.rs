// src/week.rs

use chrono::{Datelike, Duration, NaiveDate};

use crate::error::{RegStatError, Result};

/// Input format accepted on the command line: `MM/DD/YY`.
pub const INPUT_FORMAT: &str = "%m/%d/%y";

/// Canonical week-ending format used in the URL and the dataset: `MM/DD/YYYY`.
pub const WEEK_FORMAT: &str = "%m/%d/%Y";

/// Most recent Saturday on or before `date`.
///
/// Counts days back with Saturday as day 0 (Sunday 1, Monday 2, ...),
/// i.e. `(weekday_from_monday + 2) % 7`.
pub fn most_recent_saturday(date: NaiveDate) -> NaiveDate {
    let offset = (date.weekday().num_days_from_monday() + 2) % 7;
    date - Duration::days(i64::from(offset))
}

/// Resolve the week ending for an optional `MM/DD/YY` string, defaulting to `today`.
pub fn resolve_week_ending(input: Option<&str>, today: NaiveDate) -> Result<NaiveDate> {
    let date = match input {
        Some(raw) => parse_input_date(raw)?,
        None => today,
    };
    Ok(most_recent_saturday(date))
}

/// Two-digit years at or above this land in the 1900s (POSIX `strptime` rule).
const CENTURY_PIVOT: i32 = 69;

fn parse_input_date(raw: &str) -> Result<NaiveDate> {
    let invalid = || RegStatError::InvalidDate(raw.to_string());
    let trimmed = raw.trim();
    // chrono's %y also accepts four digits; the input contract is strictly two
    let year_part = trimmed.rsplit('/').next().unwrap_or_default();
    if year_part.len() != 2 {
        return Err(invalid());
    }
    let yy: i32 = year_part.parse().map_err(|_| invalid())?;
    let parsed = NaiveDate::parse_from_str(trimmed, INPUT_FORMAT).map_err(|_| invalid())?;
    // chrono pivots at 70, so 69 has to be moved back a century by hand
    let year = if yy >= CENTURY_PIVOT { 1900 + yy } else { 2000 + yy };
    parsed.with_year(year).ok_or_else(invalid)
}

/// `MM/DD/YYYY` rendering of a week ending.
pub fn format_week(date: NaiveDate) -> String {
    date.format(WEEK_FORMAT).to_string()
}

/// Parse a `Week Ending` cell back into a date.
pub fn parse_week(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim().trim_matches('"');
    NaiveDate::parse_from_str(s, WEEK_FORMAT)
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .ok()
}
