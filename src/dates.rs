//! Calendar-day helpers.
//!
//! All dates in the ledger are `YYYY-MM-DD` strings. Carry lookups always
//! use exactly one calendar day back; weekends and holidays carry the same
//! as any other day.

use chrono::{Datelike, Days, NaiveDate, Weekday};

use crate::error::{Error, Result};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse a `YYYY-MM-DD` string, rejecting anything malformed.
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .map_err(|_| Error::validation(format!("invalid date (expected YYYY-MM-DD): {s:?}")))
}

/// The calendar day strictly before `s`, as a `YYYY-MM-DD` string.
pub fn previous_day(s: &str) -> Result<String> {
    let date = parse_date(s)?;
    let prev = date
        .checked_sub_days(Days::new(1))
        .ok_or_else(|| Error::validation(format!("date out of range: {s}")))?;
    Ok(prev.format(DATE_FORMAT).to_string())
}

/// Full English weekday name for a date string ("Monday", ...).
pub fn day_of_week(s: &str) -> Result<&'static str> {
    let date = parse_date(s)?;
    Ok(match date.weekday() {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    })
}

// ===========================================================================
// Tests
// ===========================================================================
