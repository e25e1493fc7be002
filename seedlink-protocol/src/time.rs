//! Byte-order helpers and the comma-form / ISO-8601 timestamp conversions
//! used throughout the wire protocol (`TIME`, state-file, and INFO bodies).

use crate::error::{Result, SeedlinkError};

/// True if the host is little-endian. Resolved at compile time; kept as a
/// function for parity with callers that want to treat it as a value.
pub const fn little_endian_host() -> bool {
    cfg!(target_endian = "little")
}

pub fn swap2(bytes: &mut [u8; 2]) {
    bytes.reverse();
}

pub fn swap4(bytes: &mut [u8; 4]) {
    bytes.reverse();
}

pub fn swap8(bytes: &mut [u8; 8]) {
    bytes.reverse();
}

/// Nanoseconds since the Unix epoch.
pub fn now_ns() -> i64 {
    let dur = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    dur.as_nanos() as i64
}

/// Convert `YYYY,MM,DD,hh,mm,ss[,ffffff]` to `YYYY-MM-DDThh:mm:ss[.ffffff]Z`.
pub fn to_iso_datetime(s: &str) -> Result<String> {
    let fields: Vec<&str> = s.split(',').collect();
    if !(6..=7).contains(&fields.len()) {
        return Err(SeedlinkError::InvalidResponse(format!(
            "comma datetime requires 6 or 7 fields, got {}",
            fields.len()
        )));
    }

    let year: i64 = parse_field(fields[0])?;
    let month: u32 = parse_field(fields[1])?;
    let day: u32 = parse_field(fields[2])?;
    let hour: u32 = parse_field(fields[3])?;
    let minute: u32 = parse_field(fields[4])?;
    let second: u32 = parse_field(fields[5])?;
    validate_components(year, month, day, hour, minute, second)?;

    Ok(match fields.get(6) {
        Some(frac) if !frac.is_empty() => {
            format!("{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{frac}Z")
        }
        _ => format!("{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}Z"),
    })
}

/// Inverse of [`to_iso_datetime`]: `YYYY-MM-DDThh:mm:ss[.ffffff]Z` to the
/// comma form, dropping the trailing `Z`.
pub fn to_comma_datetime(s: &str) -> Result<String> {
    let s = s.strip_suffix('Z').unwrap_or(s);
    let (date, time) = s.split_once('T').ok_or_else(|| {
        SeedlinkError::InvalidResponse(format!("ISO datetime missing 'T' separator: {s:?}"))
    })?;

    let mut date_parts = date.split('-');
    let year: i64 = parse_field(date_parts.next().unwrap_or(""))?;
    let month: u32 = parse_field(date_parts.next().unwrap_or(""))?;
    let day: u32 = parse_field(date_parts.next().unwrap_or(""))?;

    let (time, frac) = match time.split_once('.') {
        Some((t, f)) => (t, Some(f)),
        None => (time, None),
    };
    let mut time_parts = time.split(':');
    let hour: u32 = parse_field(time_parts.next().unwrap_or(""))?;
    let minute: u32 = parse_field(time_parts.next().unwrap_or(""))?;
    let second: u32 = parse_field(time_parts.next().unwrap_or(""))?;
    validate_components(year, month, day, hour, minute, second)?;

    Ok(match frac {
        Some(f) => format!("{year},{month},{day},{hour},{minute},{second},{f}"),
        None => format!("{year},{month},{day},{hour},{minute},{second}"),
    })
}

fn parse_field<T: std::str::FromStr>(s: &str) -> Result<T> {
    s.parse()
        .map_err(|_| SeedlinkError::InvalidResponse(format!("invalid datetime field: {s:?}")))
}

fn validate_components(
    year: i64,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
) -> Result<()> {
    if !(1900..=2100).contains(&year) {
        return Err(SeedlinkError::InvalidResponse(format!(
            "year out of range: {year}"
        )));
    }
    if !(1..=12).contains(&month) || day < 1 || day > days_in_month(year, month)? {
        return Err(SeedlinkError::InvalidResponse(format!(
            "invalid date: {year}-{month}-{day}"
        )));
    }
    if hour > 23 || minute > 59 || second > 59 {
        return Err(SeedlinkError::InvalidResponse(format!(
            "invalid time: {hour}:{minute}:{second}"
        )));
    }
    Ok(())
}

fn is_leap(year: i64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(year: i64, month: u32) -> Result<u32> {
    const DAYS: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    if !(1..=12).contains(&month) {
        return Err(SeedlinkError::InvalidResponse(format!(
            "invalid month: {month}"
        )));
    }
    Ok(if month == 2 && is_leap(year) {
        29
    } else {
        DAYS[(month - 1) as usize]
    })
}

/// Convert `(year, day-of-year)` to `(month, day-of-month)`.
pub fn doy2md(year: i64, jday: u32) -> Result<(u32, u32)> {
    if !(1900..=2100).contains(&year) {
        return Err(SeedlinkError::InvalidResponse(format!(
            "year out of range: {year}"
        )));
    }
    let max_doy = if is_leap(year) { 366 } else { 365 };
    if jday < 1 || jday > max_doy {
        return Err(SeedlinkError::InvalidResponse(format!(
            "day-of-year out of range: {jday}"
        )));
    }

    let mut remaining = jday;
    for month in 1..=12u32 {
        let dim = days_in_month(year, month)?;
        if remaining <= dim {
            return Ok((month, remaining));
        }
        remaining -= dim;
    }
    unreachable!("day-of-year bounds already validated")
}
