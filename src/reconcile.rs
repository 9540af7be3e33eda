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

//! Combining the schedule already on the device with a newly computed one.

use chrono::naive::NaiveDateTime;
use chrono::Timelike;
use log::debug;

use crate::period::Period;
use crate::prices::{mean, price_at, PriceSample};

/// Periods for today that have not started yet.
pub fn filter_relevant(periods: &[Period], now: NaiveDateTime) -> Vec<Period> {
    let today = now.date();
    let minute = (now.hour() * 60 + now.minute()) as u16;
    periods
        .iter()
        .filter(|p| p.days().includes(today) && p.start_minute() > minute)
        .copied()
        .collect()
}

fn realized_price<'a>(
    periods: impl IntoIterator<Item = &'a Period>,
    prices: &[PriceSample],
) -> Option<f64> {
    mean(
        periods
            .into_iter()
            .filter(|p| !p.is_charging())
            .flat_map(|p| p.hours())
            .filter_map(|hour| price_at(prices, hour)),
    )
}

/// Whether newly planned discharging is enough better to replace the current
/// plan.
///
/// Compares the mean price over the hours of the current discharging periods
/// (priced with today's prices) with that of the new ones (priced with
/// tomorrow's). The new plan wins if it is at least `threshold_factor` times
/// the current one.
pub fn price_improvement_test(
    current: &[Period],
    new: &[Period],
    today: &[PriceSample],
    tomorrow: &[PriceSample],
    threshold_factor: f64,
) -> bool {
    if !current.iter().any(|p| !p.is_charging()) {
        return true;
    }
    let Some(new_avg) = realized_price(new, tomorrow) else {
        return false;
    };
    let Some(current_avg) = realized_price(current, today) else {
        return true;
    };
    debug!("Current discharge price {current_avg:.3}, new discharge price {new_avg:.3}");
    new_avg >= current_avg * threshold_factor
}

/// Merge two period lists, dropping any period that overlaps one accepted
/// earlier.
///
/// Periods are considered in order of start time; on equal start times those
/// from `kept` go first.
pub fn merge(kept: &[Period], generated: &[Period]) -> Vec<Period> {
    let mut all: Vec<Period> = kept.iter().chain(generated.iter()).copied().collect();
    all.sort_by_key(|p| p.start_minute());
    let mut accepted: Vec<Period> = Vec::with_capacity(all.len());
    for period in all {
        match accepted.iter().find(|a| a.overlaps(&period)) {
            Some(existing) => debug!("Dropping {period}: overlaps {existing}"),
            None => accepted.push(period),
        }
    }
    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::DayMask;
    use crate::prices::samples;
    use chrono::naive::NaiveDate;
    use proptest::prelude::*;

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 5, 15).unwrap()
    }

    fn mon() -> DayMask {
        DayMask::for_date(monday())
    }

    fn tue() -> DayMask {
        DayMask::from_bits(4)
    }

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        monday().and_hms_opt(hour, minute, 0).unwrap()
    }

    fn discharge(start: i32, end: i32, days: DayMask) -> Period {
        Period::new(start, end, false, days).unwrap()
    }

    #[test]
    fn relevant_keeps_future_periods_for_today() {
        let periods = [
            discharge(10, 11, mon()),
            discharge(14, 15, mon()),
            discharge(18, 19, mon()),
            discharge(18, 19, tue()),
        ];
        let relevant = filter_relevant(&periods, at(14, 0));
        assert_eq!(relevant, vec![discharge(18, 19, mon())]);
        let relevant = filter_relevant(&periods, at(13, 59));
        assert_eq!(relevant.len(), 2);
    }

    #[test]
    fn improvement_without_current_discharge() {
        let charging = [Period::new(2, 3, true, mon()).unwrap()];
        let new = [discharge(18, 19, tue())];
        assert!(price_improvement_test(&[], &new, &[], &[], 1.5));
        assert!(price_improvement_test(&charging, &new, &[], &[], 1.5));
    }

    #[test]
    fn improvement_without_new_prices() {
        let current = [discharge(18, 19, mon())];
        let new = [discharge(18, 19, tue())];
        let today = samples(&[(18, 1.0)]);
        assert!(!price_improvement_test(&current, &new, &today, &[], 1.5));
        assert!(!price_improvement_test(&current, &[], &today, &today, 1.5));
    }

    #[test]
    fn improvement_threshold_is_inclusive() {
        let current = [discharge(18, 20, mon())];
        let new = [discharge(17, 18, tue())];
        let today = samples(&[(18, 1.0), (19, 3.0)]);
        let tomorrow = samples(&[(17, 3.0)]);
        // current average 2.0, new 3.0
        assert!(price_improvement_test(&current, &new, &today, &tomorrow, 1.5));
        assert!(!price_improvement_test(&current, &new, &today, &tomorrow, 1.51));
        assert!(price_improvement_test(&current, &new, &today, &tomorrow, 1.0));
    }

    #[test]
    fn improvement_with_unpriced_current() {
        let current = [discharge(18, 19, mon())];
        let new = [discharge(18, 19, tue())];
        let tomorrow = samples(&[(18, 1.0)]);
        assert!(price_improvement_test(&current, &new, &[], &tomorrow, 1.5));
    }

    #[test]
    fn merge_first_accepted_wins() {
        let kept = [discharge(18, 20, mon())];
        let generated = [
            discharge(19, 21, mon()),
            discharge(21, 22, mon()),
            discharge(18, 20, tue()),
        ];
        let merged = merge(&kept, &generated);
        assert_eq!(
            merged,
            vec![
                discharge(18, 20, mon()),
                discharge(18, 20, tue()),
                discharge(21, 22, mon()),
            ]
        );
    }

    #[test]
    fn merge_prefers_kept_on_equal_start() {
        let kept = [Period::new(22, 23, true, mon()).unwrap()];
        let generated = [discharge(22, 0, mon())];
        assert_eq!(merge(&kept, &generated), kept.to_vec());
    }

    #[test]
    fn merge_midnight_conflict() {
        let kept = [Period::new(0, 2, true, mon()).unwrap()];
        let generated = [Period::new(23, 1, true, mon()).unwrap()];
        assert_eq!(merge(&kept, &generated), kept.to_vec());
    }

    fn arb_period() -> impl Strategy<Value = Period> {
        (0i32..24, 1i32..6, any::<bool>(), 0u32..7).prop_map(|(start, len, charging, day)| {
            Period::new(start, start + len, charging, DayMask::from_bits(1 << day)).unwrap()
        })
    }

    proptest! {
        #[test]
        fn prop_merge_has_no_overlaps(
            kept in proptest::collection::vec(arb_period(), 0..8),
            generated in proptest::collection::vec(arb_period(), 0..8),
        ) {
            let merged = merge(&kept, &generated);
            for (i, a) in merged.iter().enumerate() {
                for b in &merged[i + 1..] {
                    prop_assert!(!a.overlaps(b), "{} overlaps {}", a, b);
                }
            }
        }
    }
}
