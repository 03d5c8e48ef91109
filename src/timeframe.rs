//! The human timeframe grammar used by frontmatter dates, recency queries
//! and the `timeframe` request parameter.
//!
//! Accepted forms (case-insensitive, surrounding whitespace ignored):
//!
//! - `now`, `today`, `yesterday`
//! - `<n><unit>` with unit one of `s`, `m`, `h`, `d`, `w` (e.g. `7d`, `90m`)
//! - a bare integer, interpreted as days (e.g. `7`)
//! - `<n> <unit> ago` with unit `second|minute|hour|day|week|month|year`,
//!   plural accepted (e.g. `2 days ago`, `1 week ago`). Months count as 30
//!   days and years as 365.
//! - absolute dates: RFC 3339 (`2024-01-15T10:00:00Z`) or `YYYY-MM-DD`
//!   (midnight UTC)
//!
//! `0d` means "now minus zero": a filter built from it includes items created
//! at or after the moment of parsing. Anything else is a
//! [`MnemeError::Validation`].

use crate::error::MnemeError;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static SHORT_WINDOW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)\s*([smhdw])?$").expect("static regex"));
static WORDY_AGO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+)\s+(second|minute|hour|day|week|month|year)s?\s+ago$")
        .expect("static regex")
});

fn unit_duration(count: i64, unit: &str) -> Duration {
    match unit {
        "s" | "second" => Duration::seconds(count),
        "m" | "minute" => Duration::minutes(count),
        "h" | "hour" => Duration::hours(count),
        "w" | "week" => Duration::weeks(count),
        "month" => Duration::days(count * 30),
        "year" => Duration::days(count * 365),
        // "d", "day", and anything the regexes let through default to days
        _ => Duration::days(count),
    }
}

/// Parse a timeframe into the instant it designates, relative to `now`.
pub fn parse_timeframe_at(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, MnemeError> {
    let trimmed = input.trim().to_lowercase();
    if trimmed.is_empty() {
        return Err(MnemeError::Validation("empty timeframe".to_string()));
    }

    match trimmed.as_str() {
        "now" => return Ok(now),
        "today" => {
            return Ok(now
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .expect("midnight exists")
                .and_utc());
        }
        "yesterday" => {
            return Ok((now - Duration::days(1))
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .expect("midnight exists")
                .and_utc());
        }
        _ => {}
    }

    if let Some(caps) = SHORT_WINDOW.captures(&trimmed) {
        let count: i64 = caps[1]
            .parse()
            .map_err(|_| MnemeError::Validation(format!("timeframe overflow: '{input}'")))?;
        let unit = caps.get(2).map(|m| m.as_str()).unwrap_or("d");
        return Ok(now - unit_duration(count, unit));
    }

    if let Some(caps) = WORDY_AGO.captures(&trimmed) {
        let count: i64 = caps[1]
            .parse()
            .map_err(|_| MnemeError::Validation(format!("timeframe overflow: '{input}'")))?;
        return Ok(now - unit_duration(count, &caps[2]));
    }

    if let Some(absolute) = parse_absolute(input.trim()) {
        return Ok(absolute);
    }

    Err(MnemeError::Validation(format!(
        "unparseable timeframe: '{input}'"
    )))
}

/// Parse a timeframe against the current clock.
pub fn parse_timeframe(input: &str) -> Result<DateTime<Utc>, MnemeError> {
    parse_timeframe_at(input, Utc::now())
}

fn parse_absolute(input: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0).expect("midnight exists").and_utc());
    }
    None
}

/// Relaxed variant for frontmatter `created`/`modified` values: accepts the
/// full timeframe grammar, returns None instead of an error so callers can
/// fall back to filesystem timestamps.
pub fn parse_date(input: &str) -> Option<DateTime<Utc>> {
    parse_timeframe(input).ok()
}
