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

//! Huawei LUNA2000 battery behind a SUN2000 inverter, reached over Modbus.

use async_trait::async_trait;
use log::{debug, info};
use tokio_modbus::client::Context;
use tokio_modbus::prelude::{Reader, Writer};
use tokio_modbus::slave::Slave;

use crate::config::DeviceConfig;
use crate::device::{Device, Result};
use crate::error::DeviceError;
use crate::register::{decode, RegisterImage, ScheduleSnapshot, IMAGE_WORDS};

pub struct LunaBattery {
    ctx: Context,
    schedule_register: u16,
    soc_register: u16,
    soc_scale: f64,
}

impl LunaBattery {
    fn connect(device: &str, modbus_id: u8) -> Context {
        let slave = Slave(modbus_id);
        match device.parse() {
            Ok(socket_addr) => modbus_robust::new_tcp_slave(socket_addr, slave),
            Err(_) => {
                // Not an address. Try it as a device file for serial
                modbus_robust::new_rtu_slave(device, 9600, slave)
            }
        }
    }

    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            ctx: Self::connect(&config.address, config.id),
            schedule_register: config.schedule_register,
            soc_register: config.soc_register,
            soc_scale: config.soc_scale,
        }
    }

    async fn read(&mut self, addr: u16, cnt: u16) -> Result<Vec<u16>> {
        let words = self.ctx.read_holding_registers(addr, cnt).await??;
        if words.len() != cnt as usize {
            return Err(DeviceError::ShortRead {
                address: addr,
                expected: cnt as usize,
                got: words.len(),
            });
        }
        Ok(words)
    }

    async fn write(&mut self, addr: u16, words: &[u16]) -> Result<()> {
        /* Avoid rewriting an unchanged schedule, to avoid wearing out
         * the controller's flash.
         */
        let old = self.read(addr, words.len() as u16).await?;
        if words != old {
            self.ctx.write_multiple_registers(addr, words).await??;
        } else {
            info!("Schedule on device is already up to date");
        }
        Ok(())
    }
}

#[async_trait]
impl Device for LunaBattery {
    async fn read_schedule(&mut self) -> Result<ScheduleSnapshot> {
        let words = self
            .read(self.schedule_register, IMAGE_WORDS as u16)
            .await?;
        debug!("Read schedule registers {words:?}");
        let image =
            RegisterImage::try_from(words.as_slice()).map_err(|_| DeviceError::ShortRead {
                address: self.schedule_register,
                expected: IMAGE_WORDS,
                got: words.len(),
            })?;
        Ok(decode(&image))
    }

    async fn write_schedule(&mut self, image: &RegisterImage) -> Result<()> {
        debug!("Writing schedule registers {:?}", image.words());
        self.write(self.schedule_register, image.words()).await
    }

    async fn read_soc(&mut self) -> Result<f64> {
        let raw = self.read(self.soc_register, 1).await?[0];
        Ok(raw as f64 * self.soc_scale)
    }
}
