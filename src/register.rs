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

//! Encoding of the time-of-use schedule held on the controller.
//!
//! The schedule occupies 43 consecutive holding registers. Word 0 is the
//! number of periods, followed by three words per period: start minute, end
//! minute, and a flags word holding the weekday bits with 256 added for
//! discharging periods.

use log::warn;

use crate::error::ValidationError;
use crate::period::{DayMask, Period, MINUTES_PER_DAY};

pub const IMAGE_WORDS: usize = 43;
pub const MAX_PERIODS: usize = 14;
const WORDS_PER_PERIOD: usize = 3;
const DISCHARGE_FLAG: u16 = 256;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisterImage([u16; IMAGE_WORDS]);

impl RegisterImage {
    pub fn words(&self) -> &[u16; IMAGE_WORDS] {
        &self.0
    }
}

impl Default for RegisterImage {
    fn default() -> Self {
        RegisterImage([0; IMAGE_WORDS])
    }
}

impl TryFrom<&[u16]> for RegisterImage {
    type Error = ValidationError;

    fn try_from(words: &[u16]) -> Result<Self, Self::Error> {
        let words: [u16; IMAGE_WORDS] =
            words
                .try_into()
                .map_err(|_| ValidationError::WrongImageLength {
                    expected: IMAGE_WORDS,
                    got: words.len(),
                })?;
        Ok(RegisterImage(words))
    }
}

/// Schedule as read back from the device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScheduleSnapshot {
    /// Count reported by the device, which may exceed `periods.len()`.
    pub period_count: usize,
    pub periods: Vec<Period>,
    pub raw: RegisterImage,
}

fn decode_flags(flags: u16) -> (bool, DayMask) {
    (flags < DISCHARGE_FLAG, DayMask::from_bits(flags))
}

fn encode_flags(period: &Period) -> u16 {
    let discharge = if period.is_charging() {
        0
    } else {
        DISCHARGE_FLAG
    };
    period.days().bits() as u16 + discharge
}

/// Decode periods from raw words, tolerating truncated or inconsistent data.
pub fn decode_words(words: &[u16]) -> Vec<Period> {
    let Some(&count) = words.first() else {
        return Vec::new();
    };
    let mut periods = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let base = 1 + i * WORDS_PER_PERIOD;
        let Some(entry) = words.get(base..base + WORDS_PER_PERIOD) else {
            warn!("Schedule claims {count} periods but only {i} fit in the register data");
            break;
        };
        let (charging, days) = decode_flags(entry[2]);
        match Period::from_minutes(entry[0], entry[1], charging, days) {
            Ok(period) => periods.push(period),
            Err(err) => warn!("Ignoring schedule entry {}: {err}", i + 1),
        }
    }
    periods
}

pub fn decode(raw: &RegisterImage) -> ScheduleSnapshot {
    ScheduleSnapshot {
        period_count: raw.0[0] as usize,
        periods: decode_words(&raw.0),
        raw: raw.clone(),
    }
}

/// Build a complete image from scratch, sorted by start time.
pub fn encode(periods: &[Period]) -> Result<RegisterImage, ValidationError> {
    if periods.len() > MAX_PERIODS {
        return Err(ValidationError::TooManyPeriods {
            count: periods.len(),
            max: MAX_PERIODS,
        });
    }
    let mut sorted = periods.to_vec();
    sorted.sort_by_key(|p| p.start_minute());
    let mut image = RegisterImage::default();
    image.0[0] = sorted.len() as u16;
    for (i, period) in sorted.iter().enumerate() {
        let base = 1 + i * WORDS_PER_PERIOD;
        image.0[base] = period.start_minute();
        image.0[base + 1] = period.end_minute();
        image.0[base + 2] = encode_flags(period);
    }
    Ok(image)
}

/// Problems that would stop the controller from following the image as
/// intended. Empty if the image is consistent.
pub fn check_image(raw: &RegisterImage) -> Vec<String> {
    let mut problems = Vec::new();
    let count = raw.0[0] as usize;
    if count > MAX_PERIODS {
        problems.push(format!("period count {count} exceeds {MAX_PERIODS}"));
    }
    for i in 0..count.min(MAX_PERIODS) {
        let base = 1 + i * WORDS_PER_PERIOD;
        for minute in &raw.0[base..base + 2] {
            if *minute >= 2 * MINUTES_PER_DAY {
                problems.push(format!("period {} has minute {minute} out of range", i + 1));
            }
        }
        if DayMask::from_bits(raw.0[base + 2]).is_empty() {
            problems.push(format!("period {} has no days", i + 1));
        }
    }
    let periods = decode_words(&raw.0);
    for (i, a) in periods.iter().enumerate() {
        for b in &periods[i + 1..] {
            if a.overlaps(b) {
                problems.push(format!("{a} overlaps {b}"));
            }
        }
    }
    problems
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn image(prefix: &[u16]) -> RegisterImage {
        let mut words = [0u16; IMAGE_WORDS];
        words[..prefix.len()].copy_from_slice(prefix);
        RegisterImage(words)
    }

    #[test]
    fn decode_tuesday_schedule() {
        let snapshot = decode(&image(&[2, 1080, 1140, 260, 600, 660, 4]));
        let tuesday = DayMask::from_bits(4);
        assert_eq!(snapshot.period_count, 2);
        assert_eq!(
            snapshot.periods,
            vec![
                Period::new(18, 19, false, tuesday).unwrap(),
                Period::new(10, 11, true, tuesday).unwrap(),
            ]
        );
    }

    #[test]
    fn decode_empty() {
        let snapshot = decode(&RegisterImage::default());
        assert_eq!(snapshot.period_count, 0);
        assert!(snapshot.periods.is_empty());
    }

    #[test]
    fn decode_count_beyond_image() {
        let mut words = [0u16; IMAGE_WORDS];
        words[0] = 20;
        for i in 0..MAX_PERIODS {
            words[1 + 3 * i] = 60 * i as u16;
            words[2 + 3 * i] = 60 * i as u16 + 30;
            words[3 + 3 * i] = 2;
        }
        let snapshot = decode(&RegisterImage(words));
        assert_eq!(snapshot.period_count, 20);
        assert_eq!(snapshot.periods.len(), MAX_PERIODS);
    }

    #[test]
    fn decode_truncated_words() {
        let periods = decode_words(&[2, 600, 660, 4, 700]);
        assert_eq!(periods.len(), 1);
        assert!(decode_words(&[]).is_empty());
    }

    #[test]
    fn decode_skips_out_of_range_entry() {
        let periods = decode_words(&[2, 3000, 60, 4, 600, 660, 4]);
        assert_eq!(periods.len(), 1);
        assert_eq!(periods[0].start_minute(), 600);
    }

    #[test]
    fn decode_multi_day_mask() {
        let periods = decode_words(&[1, 0, 60, 256 + 0x7f]);
        assert!(!periods[0].is_charging());
        assert_eq!(periods[0].days(), DayMask::ALL);
    }

    #[test]
    fn decode_keeps_long_span() {
        let periods = decode_words(&[1, 0, 2879, 2]);
        assert_eq!(periods[0].end_minute(), 2879);
    }

    #[test]
    fn check_consistent_image() {
        let image = image(&[2, 1080, 1140, 260, 600, 660, 4]);
        assert!(check_image(&image).is_empty());
        assert!(check_image(&RegisterImage::default()).is_empty());
    }

    #[test]
    fn check_reports_problems() {
        let problems = check_image(&image(&[3, 600, 720, 2, 660, 3000, 2, 60, 120, 256]));
        assert_eq!(problems.len(), 2, "{problems:?}");
        assert!(problems[0].contains("3000"));
        assert!(problems[1].contains("no days"));

        let problems = check_image(&image(&[2, 600, 720, 2, 660, 780, 258]));
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("overlaps"));

        let mut words = [0u16; IMAGE_WORDS];
        words[0] = 15;
        let problems = check_image(&RegisterImage(words));
        assert!(problems[0].contains("exceeds"));
    }

    #[test]
    fn encode_sorts_and_pads() {
        let monday = DayMask::from_bits(2);
        let periods = [
            Period::new(18, 20, false, monday).unwrap(),
            Period::new(2, 4, true, monday).unwrap(),
        ];
        let image = encode(&periods).unwrap();
        let words = image.words();
        assert_eq!(&words[..7], &[2, 120, 240, 2, 1080, 1200, 258]);
        assert!(words[7..].iter().all(|&w| w == 0));
    }

    #[test]
    fn encode_too_many() {
        let periods: Vec<Period> = (0..15)
            .map(|h| Period::new(h, h + 1, true, DayMask::from_bits(1)).unwrap())
            .collect();
        assert_eq!(
            encode(&periods),
            Err(ValidationError::TooManyPeriods { count: 15, max: 14 })
        );
        assert!(encode(&periods[..14]).is_ok());
    }

    #[test]
    fn image_length_checked() {
        let words = vec![0u16; 42];
        assert_eq!(
            RegisterImage::try_from(words.as_slice()),
            Err(ValidationError::WrongImageLength {
                expected: 43,
                got: 42
            })
        );
        let words = vec![0u16; 43];
        assert!(RegisterImage::try_from(words.as_slice()).is_ok());
    }

    fn arb_period() -> impl Strategy<Value = Period> {
        (0u16..2880, 0u16..2880, any::<bool>(), 0u16..128).prop_map(
            |(start, end, charging, days)| {
                Period::from_minutes(start, end, charging, DayMask::from_bits(days)).unwrap()
            },
        )
    }

    fn key(p: &Period) -> (u16, u16, bool, u8) {
        (p.start_minute(), p.end_minute(), p.is_charging(), p.days().bits())
    }

    proptest! {
        #[test]
        fn prop_round_trip(periods in proptest::collection::vec(arb_period(), 0..=MAX_PERIODS)) {
            let snapshot = decode(&encode(&periods).unwrap());
            let mut expected: Vec<_> = periods.iter().map(key).collect();
            let mut actual: Vec<_> = snapshot.periods.iter().map(key).collect();
            expected.sort();
            actual.sort();
            prop_assert_eq!(snapshot.period_count, periods.len());
            prop_assert_eq!(expected, actual);
        }
    }
}
