//! `date` and `timestamp` values.
//!
//! Both count from 2000-01-01: dates in days (`i32`), timestamps in microseconds (`i64`).
//! Text uses the ISO style the server emits by default.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use once_cell::sync::Lazy;

static EPOCH: Lazy<NaiveDateTime> = Lazy::new(|| {
    NaiveDate::from_ymd_opt(2000, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
});

pub fn date_from_naive(date: NaiveDate) -> i32 {
    (date - EPOCH.date()).num_days() as i32
}

pub fn date_to_naive(days: i32) -> Option<NaiveDate> {
    EPOCH.date().checked_add_signed(Duration::days(days.into()))
}

/// Parses `YYYY-MM-DD`, optionally surrounded by blanks.
pub fn parse_date(text: &str) -> Option<i32> {
    let date = NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").ok()?;
    Some(date_from_naive(date))
}

pub fn format_date(days: i32) -> Option<String> {
    date_to_naive(days).map(|d| d.format("%Y-%m-%d").to_string())
}

pub fn timestamp_from_naive(ts: NaiveDateTime) -> Option<i64> {
    (ts - *EPOCH).num_microseconds()
}

pub fn timestamp_to_naive(micros: i64) -> Option<NaiveDateTime> {
    EPOCH.checked_add_signed(Duration::microseconds(micros))
}

/// Parses `YYYY-MM-DD[( |T)HH:MM[:SS[.ffffff]]][zone]`.
///
/// A trailing zone offset is accepted and ignored; the value is taken as written.
pub fn parse_timestamp(text: &str) -> Option<i64> {
    let text = strip_zone(text.trim());

    let (date, time) = match text.find([' ', 'T']) {
        Some(split) => (&text[..split], Some(text[split + 1..].trim())),
        None => (text, None),
    };

    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let time = match time {
        Some(time) => NaiveTime::parse_from_str(time, "%H:%M:%S%.f")
            .or_else(|_| NaiveTime::parse_from_str(time, "%H:%M"))
            .ok()?,
        None => NaiveTime::from_hms_opt(0, 0, 0)?,
    };

    timestamp_from_naive(date.and_time(time))
}

pub fn format_timestamp(micros: i64) -> Option<String> {
    let ts = timestamp_to_naive(micros)?;
    let mut out = ts.format("%Y-%m-%d %H:%M:%S").to_string();

    let frac = ts.nanosecond() / 1_000;
    if frac != 0 {
        let digits = format!("{frac:06}");
        out.push('.');
        out.push_str(digits.trim_end_matches('0'));
    }

    Some(out)
}

fn strip_zone(text: &str) -> &str {
    if let Some(rest) = text.strip_suffix('Z') {
        return rest;
    }

    // a zone starts with the last sign that follows the time of day
    let Some(colon) = text.find(':') else {
        return text;
    };

    match text[colon..].rfind(['+', '-']) {
        Some(at) => text[..colon + at].trim_end(),
        None => text,
    }
}
