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

//! Day-ahead prices from elprisetjustnu.se.

use async_trait::async_trait;
use chrono::naive::NaiveDate;
use chrono::{DateTime, Datelike, FixedOffset, Timelike};
use chrono_tz::Tz;
use log::{debug, warn};
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::config::PriceConfig;
use crate::prices::{DayPrices, PriceSample, PriceSource};

#[derive(Clone, Debug, Deserialize)]
pub struct Entry {
    #[serde(rename = "SEK_per_kWh")]
    pub sek_per_kwh: f64,
    pub time_start: DateTime<FixedOffset>,
}

/// Collapse entries to one sample per local clock hour.
///
/// Feeds with quarter-hour resolution are averaged over each hour. Only
/// entries that fall on `date` in `tz` are used.
pub fn hourly_samples(entries: &[Entry], date: NaiveDate, tz: Tz) -> Vec<PriceSample> {
    let mut buckets: BTreeMap<u32, (f64, usize)> = BTreeMap::new();
    for entry in entries {
        let local = entry.time_start.with_timezone(&tz);
        if local.date_naive() != date {
            debug!("Ignoring price for {local}, not on {date}");
            continue;
        }
        let bucket = buckets.entry(local.hour()).or_insert((0.0, 0));
        bucket.0 += entry.sek_per_kwh;
        bucket.1 += 1;
    }
    buckets
        .into_iter()
        .filter_map(|(hour, (sum, count))| match PriceSample::new(hour, sum / count as f64) {
            Ok(sample) => Some(sample),
            Err(err) => {
                warn!("Discarding price for hour {hour}: {err}");
                None
            }
        })
        .collect()
}

pub struct API {
    client: Client,
    base_url: String,
    area: String,
    tz: Tz,
}

impl API {
    pub fn new(config: &PriceConfig, tz: Tz) -> reqwest::Result<Self> {
        Ok(Self {
            client: reqwest::ClientBuilder::new()
                .timeout(config.timeout)
                .build()?,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            area: config.area.clone(),
            tz,
        })
    }

    fn url(&self, date: NaiveDate) -> String {
        format!(
            "{}/{}/{:02}-{:02}_{}.json",
            self.base_url,
            date.year(),
            date.month(),
            date.day(),
            self.area
        )
    }

    pub async fn day(&self, date: NaiveDate) -> reqwest::Result<Vec<Entry>> {
        self.client
            .get(self.url(date))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    async fn day_samples(&self, date: NaiveDate) -> Vec<PriceSample> {
        match self.day(date).await {
            Ok(entries) => {
                let samples = hourly_samples(&entries, date, self.tz);
                if samples.len() < 24 {
                    warn!("Only {} hourly prices available for {date}", samples.len());
                }
                samples
            }
            Err(err) => {
                warn!("Failed to fetch prices for {date}: {err}");
                vec![]
            }
        }
    }
}

#[async_trait]
impl PriceSource for API {
    async fn get_prices(&self, today: NaiveDate) -> DayPrices {
        let tomorrow = today.succ_opt().unwrap_or(today);
        DayPrices {
            today: self.day_samples(today).await,
            tomorrow: self.day_samples(tomorrow).await,
        }
    }
}
