//! # Date Handling
//!
//! Dashboard requests carry dates as epoch millis, ISO strings or date math
//! (`now-15m`, `now/d`, `2024-01-01||+1M/M`). The daemon stores timestamps
//! as epoch seconds. Everything here works in UTC.

use crate::error::FilterError;
use chrono::{DateTime, Datelike, Months, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use serde_json::Value;

/// Resolve a date value to epoch milliseconds.
///
/// `format` is the optional `format` attribute of the enclosing clause;
/// `epoch_second` switches bare numbers to seconds.
pub fn parse_date_millis(
    value: &Value,
    format: Option<&str>,
    now: DateTime<Utc>,
) -> Result<i64, FilterError> {
    let seconds = format.map_or(false, |f| f.contains("epoch_second"));
    let scale = |n: f64| if seconds { (n * 1000.0) as i64 } else { n as i64 };
    match value {
        Value::Number(n) => n
            .as_f64()
            .map(scale)
            .ok_or_else(|| FilterError::InvalidDate(n.to_string())),
        Value::String(s) => {
            let text = s.trim();
            if let Ok(n) = text.parse::<f64>() {
                return Ok(scale(n));
            }
            parse_date_math(text, now)
                .map(|dt| dt.timestamp_millis())
                .ok_or_else(|| FilterError::InvalidDate(text.to_string()))
        }
        other => Err(FilterError::InvalidDate(other.to_string())),
    }
}

/// Parse `anchor[||]op*`, where the anchor is `now` or an absolute date and
/// every op is `+N<unit>`, `-N<unit>` or `/<unit>`.
pub fn parse_date_math(raw: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (mut current, ops) = if let Some(rest) = raw.strip_prefix("now") {
        (now, rest)
    } else if let Some((anchor, rest)) = raw.split_once("||") {
        (parse_absolute(anchor)?, rest)
    } else {
        return parse_absolute(raw);
    };

    let mut chars = ops.chars().peekable();
    while let Some(op) = chars.next() {
        match op {
            '+' | '-' => {
                let mut digits = String::new();
                while let Some(c) = chars.peek().filter(|c| c.is_ascii_digit()) {
                    digits.push(*c);
                    chars.next();
                }
                let amount: i64 = if digits.is_empty() { 1 } else { digits.parse().ok()? };
                let amount = if op == '-' { -amount } else { amount };
                current = shift(current, amount, chars.next()?)?;
            }
            '/' => current = round_down(current, chars.next()?)?,
            _ => return None,
        }
    }
    Some(current)
}

fn parse_absolute(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt.and_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

fn shift(dt: DateTime<Utc>, amount: i64, unit: char) -> Option<DateTime<Utc>> {
    let months = |n: i64| {
        let m = Months::new(u32::try_from(n.unsigned_abs()).ok()?);
        if n >= 0 {
            dt.checked_add_months(m)
        } else {
            dt.checked_sub_months(m)
        }
    };
    let delta = match unit {
        'y' => return months(amount.checked_mul(12)?),
        'M' => return months(amount),
        'w' => TimeDelta::try_weeks(amount)?,
        'd' => TimeDelta::try_days(amount)?,
        'h' | 'H' => TimeDelta::try_hours(amount)?,
        'm' => TimeDelta::try_minutes(amount)?,
        's' => TimeDelta::try_seconds(amount)?,
        _ => return None,
    };
    dt.checked_add_signed(delta)
}

fn round_down(dt: DateTime<Utc>, unit: char) -> Option<DateTime<Utc>> {
    let date = dt.date_naive();
    let day = match unit {
        'y' => NaiveDate::from_ymd_opt(date.year(), 1, 1)?,
        'M' => NaiveDate::from_ymd_opt(date.year(), date.month(), 1)?,
        'w' => date - TimeDelta::days(date.weekday().num_days_from_monday() as i64),
        'd' => date,
        'h' | 'H' => {
            let secs = dt.timestamp();
            return DateTime::from_timestamp(secs - secs.rem_euclid(3600), 0);
        }
        'm' => {
            let secs = dt.timestamp();
            return DateTime::from_timestamp(secs - secs.rem_euclid(60), 0);
        }
        's' => return DateTime::from_timestamp(dt.timestamp(), 0),
        _ => return None,
    };
    day.and_hms_opt(0, 0, 0).map(|d| d.and_utc())
}

/// Parse a fixed interval such as `30s`, `5m`, `1d` or `1500ms` into milliseconds.
pub fn parse_fixed_interval(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    let split = raw.find(|c: char| !c.is_ascii_digit())?;
    let (number, unit) = raw.split_at(split);
    let amount: i64 = number.parse().ok()?;
    let multiplier = match unit {
        "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        _ => return None,
    };
    amount.checked_mul(multiplier).filter(|_| amount > 0)
}

/// `2024-01-01T00:00:00.000Z`
pub fn format_millis(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
        .unwrap_or_else(|| ms.to_string())
}

/// Epoch millis of the first day of a `YYYYMM` month.
pub fn year_month_to_millis(year_month: i64) -> Option<i64> {
    let year = i32::try_from(year_month.div_euclid(100)).ok()?;
    let month = u32::try_from(year_month.rem_euclid(100)).ok()?;
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
}

/// `YYYYMM` of the month containing the given instant.
pub fn millis_to_year_month(ms: i64) -> Option<i64> {
    let dt = DateTime::from_timestamp_millis(ms)?;
    Some(dt.year() as i64 * 100 + dt.month() as i64)
}
