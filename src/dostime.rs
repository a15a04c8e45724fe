//! Packing and unpacking MS-DOS's 32-bit date/time format.
//!
//! ZIP inherited this representation wholesale: 2-second precision, years
//! counted from 1980. See `spec::CentralDirectoryEntry` and
//! `spec::LocalFileHeader`, whose `last_modified_time`/`last_modified_date`
//! fields are exactly this.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

/// The minimum representable DOS timestamp, used for dates before 1980
/// since the format has no way to express them.
const DOS_EPOCH: (u16, u16) = (0, 0x0021);

/// Unpacks a DOS (time, date) pair into a `NaiveDateTime`.
pub fn unpack(time: u16, date: u16) -> NaiveDateTime {
    let seconds = (0b0000_0000_0001_1111 & time) as u32 * 2;
    let minutes = (0b0000_0111_1110_0000 & time) as u32 >> 5;
    let hours = (0b1111_1000_0000_0000 & time) as u32 >> 11;

    let days = (0b0000_0000_0001_1111 & date) as u32;
    let months = (0b0000_0001_1110_0000 & date) as u32 >> 5;
    let years = ((0b1111_1110_0000_0000 & date) >> 9) as i32 + 1980;

    NaiveDate::from_ymd_opt(years, months, days)
        .and_then(|d| d.and_hms_opt(hours, minutes, seconds))
        .unwrap_or_else(|| NaiveDate::from_ymd_opt(1980, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap())
}

/// Packs a `NaiveDateTime` into a DOS (time, date) pair.
///
/// Dates before 1980-01-01, or after the format's 2107 ceiling, clamp to
/// the minimum representable DOS timestamp, matching the convention most
/// ZIP writers use rather than failing the write outright.
pub fn pack(dt: NaiveDateTime) -> (u16, u16) {
    let year = dt.year();
    if !(1980..=2107).contains(&year) {
        return DOS_EPOCH;
    }

    let time = ((dt.hour() as u16) << 11)
        | ((dt.minute() as u16) << 5)
        | ((dt.second() as u16) / 2);
    let date = (((year - 1980) as u16) << 9) | ((dt.month() as u16) << 5) | (dt.day() as u16);
    (time, date)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_typical_date() {
        let dt = NaiveDate::from_ymd_opt(2021, 3, 14)
            .unwrap()
            .and_hms_opt(9, 26, 54)
            .unwrap();
        let (time, date) = pack(dt);
        let back = unpack(time, date);
        // Only 2-second precision survives the round trip.
        assert_eq!(back.date(), dt.date());
        assert_eq!(back.time().second() % 2, 0);
        assert!((back.time().second() as i64 - dt.time().second() as i64).abs() <= 1);
    }

    #[test]
    fn pre_1980_clamps_to_dos_epoch() {
        let dt = NaiveDate::from_ymd_opt(1970, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(pack(dt), DOS_EPOCH);
    }
}
