//! MS-DOS date and time fields.

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};

/// Earliest representable DOS date: 1980-01-01.
const DOS_EPOCH_DATE: u16 = (1 << 5) | 1;

/// Convert a timestamp to `(time, date)` DOS fields.
///
/// Seconds are truncated to even values; years outside 1980..=2107 clamp.
pub fn to_dos(ts: DateTime<Utc>) -> (u16, u16) {
    if ts.year() < 1980 {
        return (0, DOS_EPOCH_DATE);
    }
    let year = ts.year().min(2107) as u16;
    let time = ((ts.hour() as u16) << 11) | ((ts.minute() as u16) << 5) | (ts.second() as u16 / 2);
    let date = ((year - 1980) << 9) | ((ts.month() as u16) << 5) | ts.day() as u16;
    (time, date)
}

/// Convert DOS fields back to a timestamp. Invalid fields yield `None`.
pub fn from_dos(time: u16, date: u16) -> Option<DateTime<Utc>> {
    let day = NaiveDate::from_ymd_opt(
        1980 + i32::from(date >> 9),
        u32::from((date >> 5) & 0x0f),
        u32::from(date & 0x1f),
    )?;
    let naive = day.and_hms_opt(
        u32::from(time >> 11),
        u32::from((time >> 5) & 0x3f),
        u32::from(time & 0x1f) * 2,
    )?;
    Some(naive.and_utc())
}
