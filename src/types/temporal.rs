//! Temporal conversions between chrono values and the engine's epoch encodings.
//!
//! Date is days, Datetime is seconds and Timestamp is microseconds since
//! 1970-01-01 UTC. All three share the upper bound 2105-12-31T23:59:59.
//! Values that would need truncation are rejected.

use crate::error::{DriverError, DriverResult};
use chrono::{DateTime, Days, FixedOffset, NaiveDate, TimeDelta, Timelike, Utc};

/// Last representable Date (2105-12-31) in days.
pub const MAX_DATE_DAYS: u16 = 49_672;

/// Last representable Datetime in seconds.
pub const MAX_DATETIME_SECS: u32 = 4_291_747_199;

/// Last representable Timestamp in microseconds.
pub const MAX_TIMESTAMP_MICROS: u64 = 4_291_747_199_999_999;

const MICROS_PER_SEC: u64 = 1_000_000;

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or(NaiveDate::MIN)
}

pub fn date_to_days(date: NaiveDate) -> DriverResult<u16> {
    let days = date.signed_duration_since(epoch()).num_days();
    if days < 0 || days > i64::from(MAX_DATE_DAYS) {
        return Err(DriverError::conversion(format!(
            "Date {} is outside the supported range",
            date
        )));
    }
    Ok(days as u16)
}

pub fn days_to_date(days: u16) -> DriverResult<NaiveDate> {
    if days > MAX_DATE_DAYS {
        return Err(DriverError::conversion(format!(
            "Date value {} is outside the supported range",
            days
        )));
    }
    epoch()
        .checked_add_days(Days::new(u64::from(days)))
        .ok_or_else(|| DriverError::conversion(format!("Invalid Date value {}", days)))
}

pub fn datetime_to_secs(dt: &DateTime<Utc>) -> DriverResult<u32> {
    if dt.timestamp_subsec_nanos() != 0 {
        return Err(DriverError::conversion(format!(
            "Datetime {} has sub-second precision",
            dt
        )));
    }
    let secs = dt.timestamp();
    if secs < 0 || secs > i64::from(MAX_DATETIME_SECS) {
        return Err(DriverError::conversion(format!(
            "Datetime {} is outside the supported range",
            dt
        )));
    }
    Ok(secs as u32)
}

pub fn secs_to_datetime(secs: u32) -> DriverResult<DateTime<Utc>> {
    if secs > MAX_DATETIME_SECS {
        return Err(DriverError::conversion(format!(
            "Datetime value {} is outside the supported range",
            secs
        )));
    }
    DateTime::from_timestamp(i64::from(secs), 0)
        .ok_or_else(|| DriverError::conversion(format!("Invalid Datetime value {}", secs)))
}

pub fn timestamp_to_micros(ts: &DateTime<Utc>) -> DriverResult<u64> {
    if ts.timestamp_subsec_nanos() % 1_000 != 0 {
        return Err(DriverError::conversion(format!(
            "Timestamp {} has sub-microsecond precision",
            ts
        )));
    }
    let micros = ts.timestamp_micros();
    if micros < 0 || micros as u64 > MAX_TIMESTAMP_MICROS {
        return Err(DriverError::conversion(format!(
            "Timestamp {} is outside the supported range",
            ts
        )));
    }
    Ok(micros as u64)
}

pub fn micros_to_timestamp(micros: u64) -> DriverResult<DateTime<Utc>> {
    if micros > MAX_TIMESTAMP_MICROS {
        return Err(DriverError::conversion(format!(
            "Timestamp value {} is outside the supported range",
            micros
        )));
    }
    let secs = (micros / MICROS_PER_SEC) as i64;
    let nanos = ((micros % MICROS_PER_SEC) * 1_000) as u32;
    DateTime::from_timestamp(secs, nanos)
        .ok_or_else(|| DriverError::conversion(format!("Invalid Timestamp value {}", micros)))
}

pub fn interval_to_micros(delta: TimeDelta) -> DriverResult<i64> {
    if delta.subsec_nanos() % 1_000 != 0 {
        return Err(DriverError::conversion(format!(
            "Interval {} has sub-microsecond precision",
            delta
        )));
    }
    delta
        .num_microseconds()
        .ok_or_else(|| DriverError::conversion(format!("Interval {} overflows", delta)))
}

pub fn micros_to_interval(micros: i64) -> TimeDelta {
    TimeDelta::microseconds(micros)
}

// ==================== Zoned values ====================

/// Precision of a zoned temporal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TzPrecision {
    Day,
    Second,
    Microsecond,
}

/// Render a zoned value as `<local>,<offset>`.
pub fn format_tz(dt: &DateTime<FixedOffset>, precision: TzPrecision) -> DriverResult<String> {
    let local = dt.naive_local();
    let nanos = local.nanosecond();
    match precision {
        TzPrecision::Day => {
            if local.num_seconds_from_midnight() != 0 || nanos != 0 {
                return Err(DriverError::conversion(format!(
                    "TzDate {} has a time component",
                    dt
                )));
            }
            Ok(format!("{},{}", local.format("%Y-%m-%d"), dt.offset()))
        }
        TzPrecision::Second => {
            if nanos != 0 {
                return Err(DriverError::conversion(format!(
                    "TzDatetime {} has sub-second precision",
                    dt
                )));
            }
            Ok(format!("{},{}", local.format("%Y-%m-%dT%H:%M:%S"), dt.offset()))
        }
        TzPrecision::Microsecond => {
            if nanos % 1_000 != 0 {
                return Err(DriverError::conversion(format!(
                    "TzTimestamp {} has sub-microsecond precision",
                    dt
                )));
            }
            Ok(format!(
                "{},{}",
                local.format("%Y-%m-%dT%H:%M:%S%.6f"),
                dt.offset()
            ))
        }
    }
}

/// Parse the `<local>,<offset>` form produced by [`format_tz`].
pub fn parse_tz(text: &str, precision: TzPrecision) -> DriverResult<DateTime<FixedOffset>> {
    let (local, offset) = text
        .split_once(',')
        .ok_or_else(|| DriverError::conversion(format!("Malformed zoned value '{}'", text)))?;
    let rfc3339 = match precision {
        TzPrecision::Day => format!("{}T00:00:00{}", local, offset),
        TzPrecision::Second | TzPrecision::Microsecond => format!("{}{}", local, offset),
    };
    DateTime::parse_from_rfc3339(&rfc3339)
        .map_err(|e| DriverError::conversion(format!("Malformed zoned value '{}': {}", text, e)))
}
