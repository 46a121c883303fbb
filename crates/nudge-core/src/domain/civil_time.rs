//! Civil time model.
//!
//! タスクの期限は `date` / `time` / `period` の3フィールドに分割して保存されている。
//! ここではそれを固定タイムゾーン（IST, UTC+05:30）の絶対時刻に変換する。
//!
//! # 設計原則
//! - 純粋関数（clock にも store にも依存しない）
//! - パースできないレコードはエラーではなく `None`（呼び出し側でスキップ）
//! - "now" は `Clock` port 経由でのみ取得する

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Offset, TimeDelta, Utc};
use std::fmt;
use std::str::FromStr;

use super::task::Task;
use crate::ports::Clock;

/// Offset of the fixed civil zone (Asia/Kolkata, no DST).
pub const CIVIL_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;

/// The single civil timezone every date and time is interpreted in.
pub fn civil_zone() -> FixedOffset {
    FixedOffset::east_opt(CIVIL_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// Current instant expressed in the civil zone.
pub fn now_in_civil_zone(clock: &dyn Clock) -> DateTime<FixedOffset> {
    clock.now().with_timezone(&civil_zone())
}

/// AM/PM flag of the 12-hour clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Am,
    Pm,
}

impl Period {
    /// 12-hour → 24-hour conversion.
    ///
    /// | input      | output |
    /// |------------|--------|
    /// | (12, AM)   | 0      |
    /// | (12, PM)   | 12     |
    /// | (h<12, PM) | h + 12 |
    /// | (h<12, AM) | h      |
    pub fn to_24h(self, hour: u32) -> u32 {
        match (self, hour) {
            (Period::Am, 12) => 0,
            (Period::Pm, h) if h < 12 => h + 12,
            (_, h) => h,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Period::Am => "AM",
            Period::Pm => "PM",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid period: {0:?} (expected AM or PM)")]
pub struct InvalidPeriod(pub String);

impl FromStr for Period {
    type Err = InvalidPeriod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('.', "").as_str() {
            "AM" => Ok(Period::Am),
            "PM" => Ok(Period::Pm),
            _ => Err(InvalidPeriod(s.to_string())),
        }
    }
}

/// Parse a loosely formatted civil date.
///
/// Accepts `YYYY-M-D` with optional zero padding, and ignores a trailing
/// time part (`2026-10-17T00:00:00.000Z`, `2026-10-17 09:00`).
pub fn parse_civil_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    let date_part = trimmed
        .split(['T', ' '])
        .next()
        .filter(|s| !s.is_empty())?;

    let mut parts = date_part.split('-');
    let year: i32 = parts.next()?.trim().parse().ok()?;
    let month: u32 = parts.next()?.trim().parse().ok()?;
    let day: u32 = parts.next()?.trim().parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Parse a stored clock time together with its optional period.
///
/// - with a period the hour must be in `1..=12`
/// - without one the hour is taken as 24-hour (`0..=23`)
///
/// A period suffix embedded in the time string (`"9:30 PM"`) is honoured
/// when no separate period is stored.
pub fn parse_clock_time(raw_time: &str, raw_period: Option<&str>) -> Option<NaiveTime> {
    let mut time = raw_time.trim();
    let mut period = match raw_period.map(str::trim).filter(|p| !p.is_empty()) {
        Some(p) => Some(p.parse::<Period>().ok()?),
        None => None,
    };

    if period.is_none() {
        let upper = time.to_ascii_uppercase();
        for candidate in [Period::Am, Period::Pm] {
            if upper.ends_with(candidate.as_str()) {
                time = time[..time.len() - 2].trim_end();
                period = Some(candidate);
                break;
            }
        }
    }

    let mut parts = time.split(':');
    let hour: u32 = parts.next()?.trim().parse().ok()?;
    let minute: u32 = parts.next()?.trim().parse().ok()?;
    // seconds, if present, are ignored

    let hour = match period {
        Some(p) if (1..=12).contains(&hour) => p.to_24h(hour),
        Some(_) => return None,
        None if hour <= 23 => hour,
        None => return None,
    };
    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// Combine stored civil fields into an absolute instant in the civil zone.
pub fn resolve_civil_instant(
    date: &str,
    time: &str,
    period: Option<&str>,
) -> Option<DateTime<FixedOffset>> {
    let date = parse_civil_date(date)?;
    let time = parse_clock_time(time, period)?;
    date.and_time(time).and_local_timezone(civil_zone()).single()
}

/// Absolute due instant of a task, or `None` when `date`/`time` is missing
/// or unparsable.
pub fn resolve_due_instant(task: &Task) -> Option<DateTime<FixedOffset>> {
    resolve_civil_instant(
        task.date.as_deref()?,
        task.time.as_deref()?,
        task.period.as_deref(),
    )
}

/// Whole minutes from `now` until `due`, rounded toward negative infinity.
pub fn remaining_minutes(due: DateTime<FixedOffset>, now: DateTime<FixedOffset>) -> i64 {
    let delta: TimeDelta = due - now;
    delta.num_milliseconds().div_euclid(60_000)
}

/// Human readable due time in the civil zone, e.g. `17 Oct 2026, 3:45 pm`.
pub fn format_civil(instant: DateTime<FixedOffset>) -> String {
    instant
        .with_timezone(&civil_zone())
        .format("%-d %b %Y, %-I:%M %P")
        .to_string()
}
