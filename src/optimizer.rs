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

//! Selection of charging and discharging hours from day-ahead prices.

use chrono::naive::NaiveDate;
use log::{debug, info};

use crate::config::ScheduleConfig;
use crate::error::ValidationError;
use crate::period::{combine_consecutive, DayMask, HourBand, Period};
use crate::prices::{day_window, night_window, price_at, sort_by_price, DayPrices, PriceSample};

/// Periods planned for one day.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Plan {
    pub charging: Vec<Period>,
    pub discharging: Vec<Period>,
}

impl Plan {
    pub fn periods(&self) -> Vec<Period> {
        self.charging
            .iter()
            .chain(self.discharging.iter())
            .copied()
            .collect()
    }
}

fn hour_periods(
    hours: impl IntoIterator<Item = (u32, DayMask)>,
    charging: bool,
) -> Result<Vec<Period>, ValidationError> {
    let periods = hours
        .into_iter()
        .map(|(hour, days)| Period::new(hour as i32, hour as i32 + 1, charging, days))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(combine_consecutive(&periods))
}

/// Charge in the `max_count` cheapest night hours leading into `target`.
///
/// Hours from 22:00 belong to the evening before `target`, so they are tagged
/// with that day's weekday.
pub fn select_charging(
    night: &[PriceSample],
    target: NaiveDate,
    max_count: usize,
) -> Result<Vec<Period>, ValidationError> {
    let mut cheapest = night.to_vec();
    sort_by_price(&mut cheapest);
    cheapest.truncate(max_count);
    // Late evening first, then the following morning
    cheapest.sort_by_key(|s| (s.hour() < 22, s.hour()));
    let previous = target.pred_opt().unwrap_or(target);
    hour_periods(
        cheapest.iter().map(|s| {
            let date = if s.hour() >= 22 { previous } else { target };
            (s.hour(), DayMask::for_date(date))
        }),
        true,
    )
}

/// Discharge in the `max_count` most expensive hours of `day`.
pub fn select_discharging(
    day: &[PriceSample],
    days: DayMask,
    max_count: usize,
) -> Result<Vec<Period>, ValidationError> {
    let mut expensive = day.to_vec();
    expensive.sort_by(|a, b| b.price().total_cmp(&a.price()));
    expensive.truncate(max_count);
    expensive.sort_by_key(|s| s.hour());
    hour_periods(expensive.iter().map(|s| (s.hour(), days)), false)
}

/// Plan the night leading into `target` and the daytime of `target`.
pub fn plan_day(
    prices: &DayPrices,
    target: NaiveDate,
    config: &ScheduleConfig,
) -> Result<Plan, ValidationError> {
    let night = night_window(&prices.today, &prices.tomorrow);
    let charging = select_charging(&night, target, config.max_charging_hours)?;
    let day = day_window(&prices.tomorrow);
    let discharging = select_discharging(
        &day,
        DayMask::for_date(target),
        config.max_discharging_hours,
    )?;
    Ok(Plan {
        charging,
        discharging,
    })
}

/// Which hours of the evening band already have discharging planned today.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EveningCoverage {
    band: HourBand,
    covered: Vec<bool>,
}

impl EveningCoverage {
    pub fn band(&self) -> HourBand {
        self.band
    }

    pub fn covered_hours(&self) -> u32 {
        self.covered.iter().filter(|&&c| c).count() as u32
    }

    pub fn is_covered(&self, hour: u32) -> bool {
        self.band.contains(hour) && self.covered[(hour - self.band.start()) as usize]
    }

    pub fn is_full(&self) -> bool {
        self.covered.iter().all(|&c| c)
    }

    pub fn uncovered(&self) -> impl Iterator<Item = u32> + '_ {
        self.band.hours().filter(|&hour| !self.is_covered(hour))
    }
}

pub fn evening_coverage(periods: &[Period], today: NaiveDate, band: HourBand) -> EveningCoverage {
    let mut covered = vec![false; band.len() as usize];
    for period in periods
        .iter()
        .filter(|p| !p.is_charging() && p.days().includes(today))
    {
        for hour in period.hours() {
            if band.contains(hour) {
                covered[(hour - band.start()) as usize] = true;
            }
        }
    }
    let coverage = EveningCoverage { band, covered };
    for hour in band.hours() {
        debug!(
            "Hour {hour:02}:00: {}",
            if coverage.is_covered(hour) {
                "covered"
            } else {
                "not covered"
            }
        );
    }
    coverage
}

/// Number of evening hours that can still be added given the battery charge.
pub fn additional_evening_hours(config: &ScheduleConfig, current_soc: f64, covered: u32) -> u32 {
    let available = current_soc - config.min_soc;
    let possible = (available / config.discharge_rate).floor();
    let remaining = config.evening_band.len() as f64 - covered as f64;
    let hours = possible.min(remaining);
    info!("Available SOC for discharge: {available:.1}%, enough for {possible} hours");
    info!("Evening hours still uncovered: {remaining}");
    if hours > 0.0 {
        hours as u32
    } else {
        0
    }
}

/// Discharge in the most expensive evening hours not yet covered.
///
/// Hours without a price sample are treated as free and are picked last.
pub fn build_evening_top_up(
    hours_to_add: u32,
    coverage: &EveningCoverage,
    evening: &[PriceSample],
    today: NaiveDate,
) -> Result<Vec<Period>, ValidationError> {
    let mut candidates: Vec<(u32, f64)> = coverage
        .uncovered()
        .map(|hour| (hour, price_at(evening, hour).unwrap_or(0.0)))
        .collect();
    candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
    candidates.truncate(hours_to_add as usize);
    candidates.sort_by_key(|c| c.0);
    let days = DayMask::for_date(today);
    hour_periods(candidates.into_iter().map(|(hour, _)| (hour, days)), false)
}
