/* Copyright 2023-2025 Bruce Merry
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
use log::info;

use crate::error::DeviceError;
use crate::register::{RegisterImage, ScheduleSnapshot};

pub type Result<T> = std::result::Result<T, DeviceError>;

/// Energy-storage controller holding a time-of-use schedule.
#[async_trait]
pub trait Device: Send {
    async fn read_schedule(&mut self) -> Result<ScheduleSnapshot>;
    async fn write_schedule(&mut self, image: &RegisterImage) -> Result<()>;
    /// State of charge (%)
    async fn read_soc(&mut self) -> Result<f64>;
}

/// Passes reads through to another device but only logs writes.
pub struct DryrunDevice<T: Device> {
    base: T,
}

impl<T: Device> DryrunDevice<T> {
    pub fn new(base: T) -> Self {
        Self { base }
    }
}

#[async_trait]
impl<T: Device> Device for DryrunDevice<T> {
    async fn read_schedule(&mut self) -> Result<ScheduleSnapshot> {
        self.base.read_schedule().await
    }

    async fn write_schedule(&mut self, image: &RegisterImage) -> Result<()> {
        info!("Dry run: not writing schedule {:?}", image.words());
        Ok(())
    }

    async fn read_soc(&mut self) -> Result<f64> {
        self.base.read_soc().await
    }
}
