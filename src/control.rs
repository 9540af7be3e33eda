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

use chrono::naive::{NaiveDate, NaiveDateTime};
use log::{debug, error, info, warn};
use std::fmt;

use crate::config::{Config, RetryPolicy};
use crate::device::Device;
use crate::error::{DeviceError, PassError};
use crate::optimizer::{additional_evening_hours, build_evening_top_up, evening_coverage, plan_day};
use crate::period::Period;
use crate::prices::{evening_window, mean, next_day_reference_price, PriceSource};
use crate::reconcile::{filter_relevant, merge, price_improvement_test};
use crate::register::{check_image, encode, ScheduleSnapshot};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pass {
    Main,
    Evening,
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pass::Main => write!(f, "main"),
            Pass::Evening => write!(f, "evening"),
        }
    }
}

/// Reason for an evening pass to leave the schedule alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Skip {
    LowSoc,
    EveningCovered,
    TomorrowExpensive,
    NoHeadroom,
    NothingAccepted,
}

impl fmt::Display for Skip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Skip::LowSoc => "state of charge is at or below the discharge floor",
            Skip::EveningCovered => "the evening is already covered",
            Skip::TomorrowExpensive => "tomorrow is more expensive than this evening",
            Skip::NoHeadroom => "no charge left for extra discharge hours",
            Skip::NothingAccepted => "all extra periods conflict with the current schedule",
        };
        write!(f, "{reason}")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// A schedule with this many periods was written.
    Written(usize),
    Skipped(Skip),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Written(count) => write!(f, "wrote schedule with {count} periods"),
            Outcome::Skipped(skip) => write!(f, "no update needed: {skip}"),
        }
    }
}

fn log_schedule(title: &str, periods: &[Period]) {
    info!("=== {title} ===");
    if periods.is_empty() {
        info!("No periods");
    }
    for period in periods {
        info!("{period}");
    }
}

/// Log the schedule and state of charge held by the device, without writing.
pub async fn show_schedule(
    device: &mut dyn Device,
) -> Result<(ScheduleSnapshot, f64), DeviceError> {
    let snapshot = device.read_schedule().await?;
    info!("Register image: {:?}", snapshot.raw.words());
    if snapshot.period_count != snapshot.periods.len() {
        warn!(
            "Device reports {} periods but {} could be decoded",
            snapshot.period_count,
            snapshot.periods.len()
        );
    }
    for problem in check_image(&snapshot.raw) {
        warn!("Schedule problem: {problem}");
    }
    log_schedule("Current schedule", &snapshot.periods);
    let soc = device.read_soc().await?;
    info!("Current SOC: {soc:.1}%");
    Ok((snapshot, soc))
}

fn next_day(date: NaiveDate) -> Result<NaiveDate, PassError> {
    date.succ_opt()
        .ok_or_else(|| PassError::DataUnavailable(format!("no day after {date}")))
}

pub struct Scheduler<'a> {
    device: &'a mut dyn Device,
    prices: &'a dyn PriceSource,
    config: &'a Config,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        device: &'a mut dyn Device,
        prices: &'a dyn PriceSource,
        config: &'a Config,
    ) -> Self {
        Self {
            device,
            prices,
            config,
        }
    }

    fn policy(&self, pass: Pass) -> &RetryPolicy {
        match pass {
            Pass::Main => &self.config.retry.main,
            Pass::Evening => &self.config.retry.evening,
        }
    }

    /// Run one pass, retrying failed attempts according to the pass policy.
    ///
    /// Returns the error of the last attempt if every attempt fails, or the
    /// first error that retrying cannot fix.
    pub async fn run(&mut self, pass: Pass, now: NaiveDateTime) -> Result<Outcome, PassError> {
        let policy = self.policy(pass).clone();
        info!("Starting {pass} pass at {now}");
        let mut attempt = 1;
        loop {
            let result = match pass {
                Pass::Main => self.main_attempt(now).await,
                Pass::Evening => self.evening_attempt(now).await,
            };
            match result {
                Ok(outcome) => {
                    info!("Finished {pass} pass: {outcome}");
                    return Ok(outcome);
                }
                Err(err) if !err.is_retryable() || attempt >= policy.attempts => {
                    return Err(err);
                }
                Err(err) => {
                    let delay = policy.delay_after(attempt);
                    warn!(
                        "Attempt {attempt}/{} of {pass} pass failed: {err}; retrying in {delay:?}",
                        policy.attempts
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn run_logged(&mut self, pass: Pass, now: NaiveDateTime) -> bool {
        match self.run(pass, now).await {
            Ok(_) => true,
            Err(err) => {
                error!("The {pass} pass failed: {err}");
                false
            }
        }
    }

    /// Plan tonight and tomorrow. Returns whether the pass succeeded.
    pub async fn run_main_pass(&mut self, now: NaiveDateTime) -> bool {
        self.run_logged(Pass::Main, now).await
    }

    /// Add discharge hours to this evening. Returns whether the pass
    /// succeeded, including when nothing needed to change.
    pub async fn run_evening_pass(&mut self, now: NaiveDateTime) -> bool {
        self.run_logged(Pass::Evening, now).await
    }

    async fn main_attempt(&mut self, now: NaiveDateTime) -> Result<Outcome, PassError> {
        let settings = &self.config.schedule;
        let today = now.date();
        let tomorrow = next_day(today)?;

        let snapshot = self.device.read_schedule().await?;
        debug!("Current register image: {:?}", snapshot.raw.words());
        log_schedule("Current schedule", &snapshot.periods);
        let soc = self.device.read_soc().await?;
        info!("Current SOC: {soc:.1}%");

        let prices = self.prices.get_prices(today).await;
        if prices.today.is_empty() || prices.tomorrow.is_empty() {
            return Err(PassError::DataUnavailable(format!(
                "need prices for {today} and {tomorrow}, got {} and {} hours",
                prices.today.len(),
                prices.tomorrow.len()
            )));
        }

        let plan = plan_day(&prices, tomorrow, settings)?;
        let new_periods = plan.periods();
        log_schedule("New periods for tomorrow", &new_periods);

        let kept = if soc <= settings.min_soc {
            info!("Clearing current schedule due to low SOC");
            vec![]
        } else {
            info!("Checking for future periods to preserve");
            let relevant = filter_relevant(&snapshot.periods, now);
            if price_improvement_test(
                &relevant,
                &plan.discharging,
                &prices.today,
                &prices.tomorrow,
                settings.price_threshold_factor,
            ) {
                if !relevant.is_empty() {
                    info!("Clearing today's remaining periods due to better prices tomorrow");
                }
                vec![]
            } else {
                info!("Preserving {} remaining periods for today", relevant.len());
                relevant
            }
        };

        let final_periods = merge(&kept, &new_periods);
        let image = encode(&final_periods)?;
        log_schedule("Final schedule", &final_periods);
        self.device.write_schedule(&image).await?;
        Ok(Outcome::Written(final_periods.len()))
    }

    async fn evening_attempt(&mut self, now: NaiveDateTime) -> Result<Outcome, PassError> {
        let settings = &self.config.schedule;
        let today = now.date();

        let snapshot = self.device.read_schedule().await?;
        debug!("Current register image: {:?}", snapshot.raw.words());
        log_schedule("Current schedule", &snapshot.periods);
        let soc = self.device.read_soc().await?;
        info!("Current SOC: {soc:.1}%");
        if soc <= settings.min_soc {
            return Ok(Outcome::Skipped(Skip::LowSoc));
        }

        let coverage = evening_coverage(&snapshot.periods, today, settings.evening_band);
        info!(
            "Evening hours already covered: {} of {}",
            coverage.covered_hours(),
            settings.evening_band.len()
        );
        if coverage.is_full() {
            return Ok(Outcome::Skipped(Skip::EveningCovered));
        }

        let prices = self.prices.get_prices(today).await;
        let evening = evening_window(&prices.today, settings.evening_band);
        let Some(evening_price) = mean(evening.iter().map(|s| s.price())) else {
            return Err(PassError::DataUnavailable(format!("no evening prices for {today}")));
        };
        let reference = next_day_reference_price(&prices.tomorrow, settings.reference_band);
        info!("Evening average price {evening_price:.3}, tomorrow's reference {reference:.3}");
        if reference > evening_price * settings.evening_price_threshold {
            return Ok(Outcome::Skipped(Skip::TomorrowExpensive));
        }

        let hours = additional_evening_hours(settings, soc, coverage.covered_hours());
        if hours == 0 {
            return Ok(Outcome::Skipped(Skip::NoHeadroom));
        }
        let top_up = build_evening_top_up(hours, &coverage, &evening, today)?;
        log_schedule("Additional evening periods", &top_up);

        let final_periods = merge(&snapshot.periods, &top_up);
        if !final_periods.iter().any(|p| top_up.contains(p)) {
            return Ok(Outcome::Skipped(Skip::NothingAccepted));
        }
        let image = encode(&final_periods)?;
        log_schedule("Final schedule", &final_periods);
        self.device.write_schedule(&image).await?;
        Ok(Outcome::Written(final_periods.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_messages() {
        assert_eq!(Outcome::Written(3).to_string(), "wrote schedule with 3 periods");
        assert_eq!(
            Outcome::Skipped(Skip::EveningCovered).to_string(),
            "no update needed: the evening is already covered"
        );
        assert_eq!(Pass::Evening.to_string(), "evening");
    }
}
