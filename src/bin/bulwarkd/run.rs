// Copyright 2026 the bulwark developers.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Implements the `run` command (i.e., running the daemon).

use std::fmt::Write;
use std::process;

use anyhow::{anyhow, Context, Result};
use env_logger::Env;
use log::{error, info};
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use bulwark::rrl::ResponseLimiter;
use bulwark::segment::{Mode, ZoneTableSegment};

use crate::args::RunArgs;
use crate::config::{self, Config, SegmentKind};
use crate::zones::{self, LoadedZones};

/// Runs the daemon.
pub fn run(args: RunArgs) {
    env_logger::init_from_env(Env::new().default_filter_or("warn"));

    if let Err(e) = try_running(args) {
        let mut message = String::from("Failed to run:");
        for (i, cause) in e.chain().enumerate() {
            write!(message, "\n[{}] {}", i + 1, cause).unwrap();
        }
        message.push_str("\nExiting with failure.");
        error!("{}", message);
        process::exit(1);
    }
    info!("Exiting with success.");
}

fn try_running(args: RunArgs) -> Result<()> {
    info!(
        "Bulwark daemon v{}.{}.{} starting.",
        env!("CARGO_PKG_VERSION_MAJOR"),
        env!("CARGO_PKG_VERSION_MINOR"),
        env!("CARGO_PKG_VERSION_PATCH"),
    );

    info!("Loading the configuration from {}.", args.config.display());
    let config = config::load_from_path(&args.config).context("failed to load the configuration")?;

    // Open the segment before loading zones: zone loading may be very
    // expensive, so it's better to fail fast on a bad segment.
    let segment = open_segment(&config)?;

    // Build the response limiter so that a bad [rrl] table also fails
    // at start-up. The daemon itself sends no responses; the limiter
    // exists for the serving side of the suite, which shares this
    // configuration.
    let _limiter = config
        .rrl
        .as_ref()
        .map(|rrl_config| ResponseLimiter::new(rrl_config.to_params()))
        .transpose()
        .context("failed to configure RRL")?;

    if config.zones.len() == 1 {
        info!("Beginning to load 1 zone.");
    } else {
        info!("Beginning to load {} zones.", config.zones.len());
    }
    let mut loaded = zones::load(&segment, &config.zones, &LoadedZones::new());

    let mut signals =
        Signals::new([SIGHUP, SIGINT, SIGTERM]).context("failed to set up signal handling")?;
    info!("Set-up is complete; {} zone(s) installed.", segment.table().len());

    for signal in signals.forever() {
        match signal {
            SIGHUP => {
                info!("Received SIGHUP; reloading zones.");
                loaded = zones::load(&segment, &config.zones, &loaded);
            }
            s @ (SIGINT | SIGTERM) => {
                let name = match s {
                    SIGINT => "SIGINT",
                    _ => "SIGTERM",
                };
                info!("Received {}; shutting down.", name);
                break;
            }
            _ => unreachable!(),
        }
    }
    Ok(())
}

/// Opens the segment described by the configuration.
fn open_segment(config: &Config) -> Result<ZoneTableSegment> {
    match config.segment.kind {
        SegmentKind::Local => Ok(ZoneTableSegment::local(Mode::ReadWrite)),
        SegmentKind::Mapped => {
            let path = config
                .segment
                .mapped_file
                .as_ref()
                .ok_or_else(|| anyhow!("a mapped segment requires the mapped-file key"))?;
            info!("Opening mapped segment {}.", path.display());
            ZoneTableSegment::mapped(path, Mode::ReadWrite)
                .with_context(|| format!("failed to open mapped segment {}", path.display()))
        }
    }
}
