/* Copyright 2025 Bruce Merry
 *
 * This program is free software: you can redistribute it and/or modify it
 * under the terms of the GNU General Public License as published by the Free
 * Software Foundation, either version 3 of the License, or (at your option)
 * any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
 * FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
 * more details.
 *
 * You should have received a copy of the GNU General Public License along
 * with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! Charge/discharge periods and the arithmetic on them.
//!
//! A period is stored the way the controller stores it: start and end as
//! minutes since midnight, plus a charging flag and a set of weekdays. An end
//! that is not after the start means the period runs past midnight.

use chrono::naive::NaiveDate;
use chrono::Datelike;
use serde::Deserialize;
use std::fmt;

use crate::error::ValidationError;

pub const MINUTES_PER_DAY: u16 = 1440;
const MINUTE_LIMIT: u16 = 2 * MINUTES_PER_DAY;

const WEEKDAYS: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

/// Set of weekdays, bit 0 = Sunday through bit 6 = Saturday.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DayMask(u8);

impl DayMask {
    pub const ALL: DayMask = DayMask(0x7f);

    /// Keeps only the seven weekday bits.
    pub fn from_bits(bits: u16) -> Self {
        DayMask((bits & 0x7f) as u8)
    }

    /// The single-day mask for the weekday of `date`.
    pub fn for_date(date: NaiveDate) -> Self {
        DayMask(1 << date.weekday().num_days_from_sunday())
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn intersects(self, other: DayMask) -> bool {
        self.0 & other.0 != 0
    }

    pub fn includes(self, date: NaiveDate) -> bool {
        self.intersects(Self::for_date(date))
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for DayMask {
    type Output = DayMask;

    fn bitor(self, rhs: DayMask) -> DayMask {
        DayMask(self.0 | rhs.0)
    }
}

impl fmt::Display for DayMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "no days");
        }
        let names: Vec<&str> = (0..7)
            .filter(|i| self.0 & (1 << i) != 0)
            .map(|i| WEEKDAYS[i])
            .collect();
        write!(f, "{}", names.join(", "))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HourClass {
    Night, // 22:00 to 06:59
    Day,   // 07:00 to 21:59
}

/// Which price window an hour of the day falls into.
pub fn classify(hour: u32) -> HourClass {
    let hour = hour % 24;
    if hour >= 22 || hour <= 6 {
        HourClass::Night
    } else {
        HourClass::Day
    }
}

/// Half-open range of clock hours `[start, end)` within one day.
///
/// In configuration files a band is written as `[start, end]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "[u32; 2]")]
pub struct HourBand {
    start: u32,
    end: u32,
}

impl HourBand {
    pub const EVENING: HourBand = HourBand { start: 18, end: 22 };
    pub const REFERENCE: HourBand = HourBand { start: 6, end: 22 };

    pub fn new(start: u32, end: u32) -> Result<Self, ValidationError> {
        if start >= 24 {
            return Err(ValidationError::InvalidHour(start));
        }
        if end > 24 || end <= start {
            return Err(ValidationError::InvalidRange {
                start_hour: start as i32,
                end_hour: end as i32,
            });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn contains(&self, hour: u32) -> bool {
        (self.start..self.end).contains(&hour)
    }

    pub fn len(&self) -> u32 {
        self.end - self.start
    }

    pub fn hours(&self) -> std::ops::Range<u32> {
        self.start..self.end
    }
}

impl TryFrom<[u32; 2]> for HourBand {
    type Error = ValidationError;

    fn try_from(value: [u32; 2]) -> Result<Self, Self::Error> {
        HourBand::new(value[0], value[1])
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Period {
    start: u16,
    end: u16,
    charging: bool,
    days: DayMask,
}

impl Period {
    /// Construct a period from whole hours.
    ///
    /// Hours are taken modulo 24. An end hour that is not after the start
    /// hour is taken to be on the following day; a period ending exactly at
    /// midnight is stored with an end of 0, as the controller expects.
    pub fn new(
        start_hour: i32,
        end_hour: i32,
        charging: bool,
        days: DayMask,
    ) -> Result<Self, ValidationError> {
        let start_norm = start_hour.rem_euclid(24);
        let end_norm = end_hour.rem_euclid(24);
        let start = start_norm * 60;
        let mut end = if end_norm > start_norm {
            end_norm * 60
        } else {
            (end_norm + 24) * 60
        };
        let span = end - start;
        if span <= 0 || span > MINUTE_LIMIT as i32 {
            return Err(ValidationError::InvalidRange {
                start_hour,
                end_hour,
            });
        }
        if end == MINUTES_PER_DAY as i32 {
            end = 0;
        }
        Ok(Self {
            start: start as u16,
            end: end as u16,
            charging,
            days,
        })
    }

    /// Construct a period from raw minute values, as stored on the device.
    ///
    /// Only the minute range is checked. Entries the controller holds with a
    /// span longer than a day are kept as they are, so that a schedule read
    /// back from the device is written back unchanged.
    pub fn from_minutes(
        start: u16,
        end: u16,
        charging: bool,
        days: DayMask,
    ) -> Result<Self, ValidationError> {
        for minute in [start, end] {
            if minute >= MINUTE_LIMIT {
                return Err(ValidationError::MinuteOutOfRange(minute));
            }
        }
        Ok(Self {
            start,
            end,
            charging,
            days,
        })
    }

    pub fn start_minute(&self) -> u16 {
        self.start
    }

    pub fn end_minute(&self) -> u16 {
        self.end
    }

    pub fn is_charging(&self) -> bool {
        self.charging
    }

    pub fn days(&self) -> DayMask {
        self.days
    }

    pub fn start_hour(&self) -> u32 {
        (self.start / 60) as u32
    }

    pub fn end_hour(&self) -> u32 {
        (self.end / 60) as u32
    }

    /// Start and end in minutes with the end moved past the start.
    fn normalized(&self) -> (u32, u32) {
        let start = self.start as u32;
        let mut end = self.end as u32;
        if end <= start {
            end += MINUTES_PER_DAY as u32;
        }
        (start, end)
    }

    /// Clock hours (0-23) touched by the period, in chronological order.
    pub fn hours(&self) -> Vec<u32> {
        let (start, end) = self.normalized();
        (start / 60..end.div_ceil(60)).map(|h| h % 24).collect()
    }

    /// Whether two periods are active at the same time on a common weekday.
    pub fn overlaps(&self, other: &Period) -> bool {
        if !self.days.intersects(other.days) {
            return false;
        }
        let a = self.normalized();
        let b = other.normalized();
        overlaps_shifted(a, b) || overlaps_shifted(b, a)
    }
}

/// Half-open intersection test, with `b` moved to the next day if it starts
/// before `a`.
fn overlaps_shifted(a: (u32, u32), b: (u32, u32)) -> bool {
    let (start1, end1) = a;
    let (mut start2, mut end2) = b;
    if start2 < start1 {
        start2 += MINUTES_PER_DAY as u32;
        end2 += MINUTES_PER_DAY as u32;
    }
    !(end1 <= start2 || end2 <= start1)
}

fn write_minute(f: &mut fmt::Formatter<'_>, minute: u16) -> fmt::Result {
    let minute = minute % MINUTES_PER_DAY;
    write!(f, "{:02}:{:02}", minute / 60, minute % 60)
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = if self.charging {
            "Charging"
        } else {
            "Discharging"
        };
        write!(f, "{} on {} at ", mode, self.days)?;
        write_minute(f, self.start)?;
        write!(f, "-")?;
        write_minute(f, self.end)
    }
}

/// Join periods where one ends in the hour the next one starts.
///
/// Only periods with the same charging flag and the same weekdays are joined.
/// The result is sorted by start time.
pub fn combine_consecutive(periods: &[Period]) -> Vec<Period> {
    let mut sorted = periods.to_vec();
    sorted.sort_by_key(|p| p.start);
    let mut combined = Vec::with_capacity(sorted.len());
    let mut iter = sorted.into_iter();
    let Some(mut current) = iter.next() else {
        return combined;
    };
    for next in iter {
        if current.end_hour() % 24 == next.start_hour() % 24
            && current.charging == next.charging
            && current.days == next.days
        {
            current.end = next.end;
        } else {
            combined.push(current);
            current = next;
        }
    }
    combined.push(current);
    combined
}
