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

use thiserror::Error;

/// Malformed input detected before any I/O happens. Never retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("invalid time range {start_hour}:00-{end_hour}:00")]
    InvalidRange { start_hour: i32, end_hour: i32 },

    #[error("period minute {0} is outside [0, 2880)")]
    MinuteOutOfRange(u16),

    #[error("at most {max} periods fit in the schedule, got {count}")]
    TooManyPeriods { count: usize, max: usize },

    #[error("register image must be exactly {expected} words, got {got}")]
    WrongImageLength { expected: usize, got: usize },

    #[error("hour {0} is outside [0, 24)")]
    InvalidHour(u32),

    #[error("price {0} is not a finite number")]
    InvalidPrice(f64),
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("modbus transport error: {0}")]
    Transport(#[from] tokio_modbus::Error),

    #[error("modbus exception: {0}")]
    Exception(#[from] tokio_modbus::ExceptionCode),

    #[error("expected {expected} registers from {address}, got {got}")]
    ShortRead {
        address: u16,
        expected: usize,
        got: usize,
    },
}

/// Failure of one attempt of a scheduling pass.
#[derive(Error, Debug)]
pub enum PassError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("price data unavailable: {0}")]
    DataUnavailable(String),
}

impl PassError {
    /// Whether another attempt might succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PassError::Validation(_))
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
