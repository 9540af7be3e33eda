/* Copyright 2023, 2025 Bruce Merry
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

use chrono_tz::Tz;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::period::HourBand;
use crate::register::MAX_PERIODS;

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    pub address: String,
    #[serde(default = "id_default")]
    pub id: u8,
    #[serde(default = "schedule_register_default")]
    pub schedule_register: u16,
    #[serde(default = "soc_register_default")]
    pub soc_register: u16,
    #[serde(default = "soc_scale_default")]
    pub soc_scale: f64,
    #[serde(default = "dry_run_default")]
    pub dry_run: bool,
}

fn id_default() -> u8 {
    1
}

fn schedule_register_default() -> u16 {
    47255
}

fn soc_register_default() -> u16 {
    37760
}

fn soc_scale_default() -> f64 {
    0.1
}

fn dry_run_default() -> bool {
    false
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PriceConfig {
    pub area: String,
    pub base_url: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            area: "SE3".to_owned(),
            base_url: "https://www.elprisetjustnu.se/api/v1/prices".to_owned(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScheduleConfig {
    pub max_charging_hours: usize,
    pub max_discharging_hours: usize,
    /// Discharge floor (%)
    pub min_soc: f64,
    /// State of charge consumed by one hour of discharging (%)
    pub discharge_rate: f64,
    /// Tomorrow must beat today's remaining discharge price by this factor
    /// before today's plan is replaced.
    pub price_threshold_factor: f64,
    /// Skip the evening top-up if tomorrow is more expensive than the evening
    /// by more than this factor.
    pub evening_price_threshold: f64,
    pub evening_band: HourBand,
    pub reference_band: HourBand,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            max_charging_hours: 4,
            max_discharging_hours: 4,
            min_soc: 20.0,
            discharge_rate: 15.0,
            price_threshold_factor: 1.5,
            evening_price_threshold: 1.5,
            evening_band: HourBand::EVENING,
            reference_band: HourBand::REFERENCE,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    Fixed,
    Exponential,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RetryPolicy {
    pub attempts: u32,
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Time to wait after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential => {
                let exponent = attempt.saturating_sub(1).min(16);
                self.delay.saturating_mul(1 << exponent)
            }
        }
    }
}

fn main_retry_default() -> RetryPolicy {
    RetryPolicy {
        attempts: 3,
        delay: Duration::from_secs(60),
        backoff: Backoff::Fixed,
    }
}

fn evening_retry_default() -> RetryPolicy {
    RetryPolicy {
        attempts: 3,
        delay: Duration::from_secs(30),
        backoff: Backoff::Exponential,
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "main_retry_default")]
    pub main: RetryPolicy,
    #[serde(default = "evening_retry_default")]
    pub evening: RetryPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            main: main_retry_default(),
            evening: evening_retry_default(),
        }
    }
}

fn timezone_default() -> Tz {
    chrono_tz::Europe::Stockholm
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "timezone_default")]
    pub timezone: Tz,
    pub device: DeviceConfig,
    #[serde(default)]
    pub prices: PriceConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn check(ok: bool, message: impl FnOnce() -> String) -> Result<(), ConfigError> {
    if ok {
        Ok(())
    } else {
        Err(ConfigError::Invalid(message()))
    }
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml(&std::fs::read_to_string(path)?)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.schedule;
        check((0.0..=100.0).contains(&s.min_soc), || {
            format!("min_soc must be between 0 and 100, got {}", s.min_soc)
        })?;
        check(s.discharge_rate.is_finite() && s.discharge_rate > 0.0, || {
            format!("discharge_rate must be positive, got {}", s.discharge_rate)
        })?;
        check(s.price_threshold_factor > 0.0, || {
            "price_threshold_factor must be positive".to_owned()
        })?;
        check(s.evening_price_threshold > 0.0, || {
            "evening_price_threshold must be positive".to_owned()
        })?;
        check(
            s.max_charging_hours + s.max_discharging_hours <= MAX_PERIODS,
            || format!("at most {MAX_PERIODS} charging and discharging hours fit the schedule"),
        )?;
        check(self.device.soc_scale > 0.0, || {
            "soc_scale must be positive".to_owned()
        })?;
        for (name, policy) in [("main", &self.retry.main), ("evening", &self.retry.evening)] {
            check(policy.attempts >= 1, || {
                format!("retry.{name}.attempts must be at least 1")
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [device]
        address = "192.168.1.100:502"
    "#;

    #[test]
    fn minimal_uses_defaults() {
        let config = Config::from_toml(MINIMAL).unwrap();
        assert_eq!(config.timezone, chrono_tz::Europe::Stockholm);
        assert_eq!(config.device.id, 1);
        assert_eq!(config.device.schedule_register, 47255);
        assert_eq!(config.device.soc_register, 37760);
        assert!(!config.device.dry_run);
        assert_eq!(config.prices.area, "SE3");
        assert_eq!(config.schedule.evening_band, HourBand::new(18, 22).unwrap());
        assert_eq!(config.schedule.reference_band, HourBand::new(6, 22).unwrap());
        assert_eq!(config.retry.main, main_retry_default());
        assert_eq!(config.retry.evening.backoff, Backoff::Exponential);
    }

    #[test]
    fn full_config() {
        let config = Config::from_toml(
            r#"
            timezone = "Europe/Oslo"
            [device]
            address = "/dev/ttyUSB0"
            id = 2
            dry_run = true
            [prices]
            area = "SE4"
            timeout = "5s"
            [schedule]
            max_charging_hours = 3
            min_soc = 10
            discharge_rate = 12.5
            evening_band = [17, 23]
            [retry.main]
            attempts = 5
            delay = "2m"
            backoff = "exponential"
            "#,
        )
        .unwrap();
        assert_eq!(config.timezone, chrono_tz::Europe::Oslo);
        assert_eq!(config.device.id, 2);
        assert!(config.device.dry_run);
        assert_eq!(config.prices.timeout, Duration::from_secs(5));
        assert_eq!(config.schedule.max_charging_hours, 3);
        assert_eq!(config.schedule.max_discharging_hours, 4);
        assert_eq!(config.schedule.evening_band.len(), 6);
        assert_eq!(config.retry.main.attempts, 5);
        assert_eq!(config.retry.main.delay, Duration::from_secs(120));
        assert_eq!(config.retry.evening, evening_retry_default());
    }

    #[test]
    fn rejects_bad_band() {
        let text = format!("{MINIMAL}\n[schedule]\nevening_band = [22, 18]\n");
        assert!(matches!(
            Config::from_toml(&text),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn rejects_unknown_field() {
        let text = format!("{MINIMAL}\nfoo = 1\n");
        assert!(Config::from_toml(&text).is_err());
    }

    #[test]
    fn rejects_invalid_values() {
        for extra in [
            "[schedule]\ndischarge_rate = 0",
            "[schedule]\nmin_soc = 120",
            "[schedule]\nmax_charging_hours = 10\nmax_discharging_hours = 10",
            "[retry.main]\nattempts = 0\ndelay = \"1s\"\nbackoff = \"fixed\"",
        ] {
            let text = format!("{MINIMAL}\n{extra}\n");
            assert!(
                matches!(Config::from_toml(&text), Err(ConfigError::Invalid(_))),
                "accepted {extra}"
            );
        }
    }

    #[test]
    fn backoff_delays() {
        let fixed = main_retry_default();
        assert_eq!(fixed.delay_after(1), Duration::from_secs(60));
        assert_eq!(fixed.delay_after(3), Duration::from_secs(60));
        let exp = evening_retry_default();
        assert_eq!(exp.delay_after(1), Duration::from_secs(30));
        assert_eq!(exp.delay_after(2), Duration::from_secs(60));
        assert_eq!(exp.delay_after(3), Duration::from_secs(120));
    }
}
