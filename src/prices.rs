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

use async_trait::async_trait;
use chrono::naive::NaiveDate;

use crate::error::ValidationError;
use crate::period::{classify, HourBand, HourClass};

/// Price for one clock hour of a day.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PriceSample {
    hour: u32,
    price: f64,
}

impl PriceSample {
    pub fn new(hour: u32, price: f64) -> Result<Self, ValidationError> {
        if hour >= 24 {
            return Err(ValidationError::InvalidHour(hour));
        }
        if !price.is_finite() {
            return Err(ValidationError::InvalidPrice(price));
        }
        Ok(Self { hour, price })
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn price(&self) -> f64 {
        self.price
    }
}

/// Day-ahead prices around the current day. Either list may be empty if it
/// could not be fetched, and neither is guaranteed to be sorted.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DayPrices {
    pub today: Vec<PriceSample>,
    pub tomorrow: Vec<PriceSample>,
}

#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Fetch prices for `today` and the day after.
    async fn get_prices(&self, today: NaiveDate) -> DayPrices;
}

pub fn price_at(samples: &[PriceSample], hour: u32) -> Option<f64> {
    samples.iter().find(|s| s.hour == hour).map(|s| s.price)
}

pub fn mean(prices: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, count) = prices
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), p| (sum + p, count + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

pub(crate) fn sort_by_price(samples: &mut [PriceSample]) {
    samples.sort_by(|a, b| a.price.total_cmp(&b.price));
}

/// Tonight's charging candidates: today from 22:00 and tomorrow until 06:59,
/// cheapest first.
pub fn night_window(today: &[PriceSample], tomorrow: &[PriceSample]) -> Vec<PriceSample> {
    let mut night: Vec<PriceSample> = today
        .iter()
        .filter(|s| s.hour >= 22)
        .chain(tomorrow.iter().filter(|s| s.hour <= 6))
        .copied()
        .collect();
    sort_by_price(&mut night);
    night
}

pub fn day_window(prices: &[PriceSample]) -> Vec<PriceSample> {
    prices
        .iter()
        .filter(|s| classify(s.hour) == HourClass::Day)
        .copied()
        .collect()
}

pub fn evening_window(today: &[PriceSample], band: HourBand) -> Vec<PriceSample> {
    band_samples(today, band).collect()
}

/// Average price over the reference band, or 0 if there are no samples.
pub fn next_day_reference_price(tomorrow: &[PriceSample], band: HourBand) -> f64 {
    mean(band_samples(tomorrow, band).map(|s| s.price)).unwrap_or(0.0)
}

fn band_samples(
    samples: &[PriceSample],
    band: HourBand,
) -> impl Iterator<Item = PriceSample> + '_ {
    samples
        .iter()
        .filter(move |s| band.contains(s.hour))
        .copied()
}

#[cfg(test)]
pub(crate) fn samples(prices: &[(u32, f64)]) -> Vec<PriceSample> {
    prices
        .iter()
        .map(|&(hour, price)| PriceSample::new(hour, price).unwrap())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hourly(f: impl Fn(u32) -> f64) -> Vec<PriceSample> {
        (0..24).map(|h| PriceSample::new(h, f(h)).unwrap()).collect()
    }

    #[test]
    fn sample_validation() {
        assert_eq!(
            PriceSample::new(24, 1.0),
            Err(ValidationError::InvalidHour(24))
        );
        assert!(PriceSample::new(3, f64::NAN).is_err());
        assert_eq!(
            PriceSample::new(3, f64::INFINITY),
            Err(ValidationError::InvalidPrice(f64::INFINITY))
        );
        assert!(PriceSample::new(23, -0.1).is_ok());
    }

    #[test]
    fn night_window_spans_midnight() {
        let today = hourly(|_| 0.5);
        let tomorrow = hourly(|h| 1.0 - h as f64 * 0.1);
        let night = night_window(&today, &tomorrow);
        assert_eq!(night.len(), 9);
        // Cheapest is tomorrow 06:00 at 0.4
        assert_eq!(night[0].hour(), 6);
        assert!(night.windows(2).all(|w| w[0].price() <= w[1].price()));
        let hours: Vec<u32> = night.iter().map(|s| s.hour()).collect();
        assert!(hours.contains(&22) && hours.contains(&23));
        assert!(!hours.contains(&7) && !hours.contains(&21));
    }

    #[test]
    fn day_window_hours() {
        let day = day_window(&hourly(|h| h as f64));
        assert_eq!(day.len(), 15);
        assert_eq!(day.first().unwrap().hour(), 7);
        assert_eq!(day.last().unwrap().hour(), 21);
    }

    #[test]
    fn evening_window_band() {
        let band = HourBand::new(18, 22).unwrap();
        let evening = evening_window(&hourly(|h| h as f64), band);
        let hours: Vec<u32> = evening.iter().map(|s| s.hour()).collect();
        assert_eq!(hours, vec![18, 19, 20, 21]);
    }

    #[test]
    fn reference_price() {
        let band = HourBand::new(6, 22).unwrap();
        let tomorrow = hourly(|h| if (6..22).contains(&h) { 2.0 } else { 100.0 });
        assert_eq!(next_day_reference_price(&tomorrow, band), 2.0);
        assert_eq!(next_day_reference_price(&[], band), 0.0);
        let only_night = samples(&[(1, 5.0), (23, 5.0)]);
        assert_eq!(next_day_reference_price(&only_night, band), 0.0);
    }

    #[test]
    fn lookup_and_mean() {
        let s = samples(&[(3, 1.5), (4, 2.5)]);
        assert_eq!(price_at(&s, 4), Some(2.5));
        assert_eq!(price_at(&s, 5), None);
        assert_eq!(mean(s.iter().map(|s| s.price())), Some(2.0));
        assert_eq!(mean(std::iter::empty()), None);
    }
}
