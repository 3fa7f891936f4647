/*
 * This file is part of tmuctl.
 *
 * Copyright (C) 2025 TMU tools contributors
 *
 * tmuctl is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * tmuctl is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with tmuctl. If not, see <https://www.gnu.org/licenses/>.
 */

//! tmuctl - command-line client for tmud

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};

use tmu_protocol::{Request, ResponseData};
use tmuctl::output::{format_state, format_temperature, format_zones};
use tmuctl::DaemonClient;

const DEFAULT_SOCKET_PATH: &str = "/run/tmud.sock";

#[derive(Parser)]
#[command(name = "tmuctl")]
#[command(version)]
#[command(about = "Query and drive the TMU thermal daemon")]
#[command(long_about = "Query and drive the TMU thermal daemon

EXAMPLES:
    tmuctl zones                    List registered thermal zones
    tmuctl temp cpu                 Aggregated temperature of a zone
    tmuctl channel gpu 2            One physical channel
    tmuctl emul cpu 85000           Force the sensor to report 85 °C
    tmuctl emul-off cpu             Release the override
    tmuctl state cpu                Lifecycle, cooling and interrupt counters")]
pub struct Cli {
    /// Daemon socket
    #[arg(short, long, default_value = DEFAULT_SOCKET_PATH)]
    pub socket: PathBuf,

    /// Log protocol traffic to stderr
    #[arg(short, long)]
    pub verbose: bool,

    /// Print raw JSON replies
    #[arg(long)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check that the daemon answers
    Ping,
    /// Daemon version
    Version,
    /// List registered zones
    Zones,
    /// Aggregated zone temperature
    Temp { zone: String },
    /// Temperature of one physical channel
    Channel { zone: String, channel: u8 },
    /// Override the sensor readout (m°C)
    Emul { zone: String, millicelsius: i32 },
    /// Release the readout override
    EmulOff { zone: String },
    /// Device state
    State { zone: String },
    /// Run the suspend sequence on every device
    Suspend,
    /// Resume every device
    Resume,
}

impl Commands {
    fn to_request(&self) -> Request {
        match self {
            Commands::Ping => Request::Ping,
            Commands::Version => Request::Version,
            Commands::Zones => Request::ListZones,
            Commands::Temp { zone } => Request::ReadTemperature { zone: zone.clone() },
            Commands::Channel { zone, channel } => Request::ReadChannel {
                zone: zone.clone(),
                channel: *channel,
            },
            Commands::Emul { zone, millicelsius } => Request::SetEmulation {
                zone: zone.clone(),
                millicelsius: *millicelsius,
            },
            Commands::EmulOff { zone } => Request::SetEmulation {
                zone: zone.clone(),
                millicelsius: 0,
            },
            Commands::State { zone } => Request::GetState { zone: zone.clone() },
            Commands::Suspend => Request::Suspend,
            Commands::Resume => Request::Resume,
        }
    }
}

fn render(data: &ResponseData) -> String {
    if let Some(zones) = &data.zones {
        return format_zones(zones);
    }
    if let Some(state) = &data.state {
        return format_state(state);
    }
    if let Some(mc) = data.millicelsius {
        return format!("{}\n", format_temperature(mc));
    }
    if let Some(value) = &data.value {
        return format!("{}\n", value);
    }
    "ok\n".to_string()
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let mut client = DaemonClient::connect(&cli.socket)
        .with_context(|| format!("cannot reach tmud at {}", cli.socket.display()))?;
    let data = client.call(cli.command.to_request())?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        print!("{}", render(&data));
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_max_level(tracing::Level::TRACE)
            .init();
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
