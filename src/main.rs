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

use chrono::Utc;
use clap::{Parser, ValueEnum};
use log::{error, info};
use std::path::PathBuf;

use tousched::config::Config;
use tousched::control::{show_schedule, Scheduler};
use tousched::device::{Device, DryrunDevice};
use tousched::elpris::API;
use tousched::luna::LunaBattery;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    /// Plan tonight's charging and tomorrow's discharging
    #[value(alias = "regular")]
    Main,
    /// Add discharge hours to this evening
    Evening,
    /// Print the schedule on the device without changing it
    Show,
}

#[derive(Parser)]
#[clap(author, version)]
struct Args {
    #[clap()]
    config_file: PathBuf,
    #[clap(long, value_enum, default_value_t = Mode::Main)]
    mode: Mode,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = Config::load(&args.config_file)?;

    let battery = LunaBattery::new(&config.device);
    let mut device: Box<dyn Device> = if config.device.dry_run {
        Box::new(DryrunDevice::new(battery))
    } else {
        Box::new(battery)
    };
    let api = API::new(&config.prices, config.timezone)?;

    let now = Utc::now().with_timezone(&config.timezone).naive_local();
    info!("Running in {:?} mode against {}", args.mode, config.device.address);
    let success = match args.mode {
        Mode::Main => {
            let mut scheduler = Scheduler::new(device.as_mut(), &api, &config);
            scheduler.run_main_pass(now).await
        }
        Mode::Evening => {
            let mut scheduler = Scheduler::new(device.as_mut(), &api, &config);
            scheduler.run_evening_pass(now).await
        }
        Mode::Show => match show_schedule(device.as_mut()).await {
            Ok(_) => true,
            Err(err) => {
                error!("Failed to read schedule: {err}");
                false
            }
        },
    };
    if !success {
        std::process::exit(1);
    }
    Ok(())
}
