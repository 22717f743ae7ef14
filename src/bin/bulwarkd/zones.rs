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

//! Implements zone loading through the library's writers.

use std::collections::HashMap;
use std::fmt::Write;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::PathBuf;
use std::time::SystemTime;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};

use bulwark::name::Name;
use bulwark::segment::ZoneTableSegment;
use bulwark::zone::{LoaderCreator, Record, RecordSource, SourceError, SourceLoader, ZoneWriter};
use bulwark::zone_file::Parser;

use crate::config::ZoneConfig;

/// What the daemon remembers about each loaded zone, for reload
/// short-circuiting.
pub struct Metadata {
    path: PathBuf,
    mtime: Option<SystemTime>,
}

/// The daemon's record of the zones it manages, keyed by name.
pub type LoadedZones = HashMap<Name, Metadata>;

/// A [`RecordSource`] that opens its master file on first use, so that
/// the file is re-read (and re-stat-ed) by every reload.
struct FileSource {
    path: PathBuf,
    origin: Name,
    parser: Option<Parser<BufReader<File>>>,
}

impl FileSource {
    fn new(path: PathBuf, origin: Name) -> Self {
        Self {
            path,
            origin,
            parser: None,
        }
    }
}

impl RecordSource for FileSource {
    fn next_record(&mut self) -> Result<Option<Record>, SourceError> {
        if self.parser.is_none() {
            let parser = Parser::open(&self.path, self.origin.clone()).map_err(|e| {
                SourceError::new(format!("failed to open {}: {}", self.path.display(), e))
            })?;
            self.parser = Some(parser);
        }
        self.parser.as_mut().unwrap().next_record()
    }
}

/// Loads (or reloads) the configured zones into `segment`. Zones whose
/// files have not changed since the recorded load are skipped. Returns
/// the updated records; failures are logged and the previous state of
/// the affected zone is left untouched.
pub fn load(
    segment: &ZoneTableSegment,
    zones: &[ZoneConfig],
    loaded: &LoadedZones,
) -> LoadedZones {
    let mut updated = LoadedZones::new();
    let mut zones_failed = 0;

    for zone_config in zones {
        let name = &zone_config.name.0;
        let mtime = match check_mtime(zone_config, loaded.get(name)) {
            MtimeCheckResult::Load { mtime } => mtime,
            MtimeCheckResult::Skip { metadata } => {
                updated.insert(name.clone(), metadata);
                continue;
            }
        };

        debug!(
            "Loading {}/{} from {}.",
            name,
            zone_config.class.0,
            zone_config.path.display(),
        );
        match load_zone(segment, zone_config) {
            Ok(()) => {
                updated.insert(
                    name.clone(),
                    Metadata {
                        path: zone_config.path.clone(),
                        mtime,
                    },
                );
            }
            Err(e) => {
                let mut message =
                    format!("Failed to load {}/{}:", name, zone_config.class.0);
                for (i, cause) in e.chain().enumerate() {
                    write!(message, "\n[{}] {}", i + 1, cause).unwrap();
                }
                error!("{}", message);
                zones_failed += 1;
                // Keep the old record so an unchanged file is not
                // retried pointlessly, but drop the mtime so a SIGHUP
                // always retries a failed zone.
                updated.insert(
                    name.clone(),
                    Metadata {
                        path: zone_config.path.clone(),
                        mtime: None,
                    },
                );
            }
        }
    }

    if zones_failed == 1 {
        error!("1 zone failed to load.");
    } else if zones_failed > 1 {
        error!("{} zones failed to load.", zones_failed);
    }
    updated
}

/// Loads a single zone through a fresh [`ZoneWriter`].
fn load_zone(segment: &ZoneTableSegment, zone_config: &ZoneConfig) -> Result<()> {
    let origin = zone_config.name.0.clone();
    let class = zone_config.class.0;
    let path = zone_config.path.clone();

    let creator_origin = origin.clone();
    let creator: LoaderCreator = Box::new(move |mem, _old_data| {
        Box::new(SourceLoader::new(
            mem,
            creator_origin.clone(),
            class,
            FileSource::new(path.clone(), creator_origin.clone()),
        ))
    });

    let mut writer = ZoneWriter::new(segment, creator, origin.clone(), class, zone_config.allow_errors)
        .context("failed to create a zone writer")?;
    let mut error_out = String::new();
    writer
        .load(0, Some(&mut error_out))
        .context("failed to load the zone")?;
    writer.install().context("failed to install the zone")?;
    writer.cleanup();

    if error_out.is_empty() {
        info!("Loaded {}/{}.", origin, class);
    } else {
        warn!(
            "Published an empty zone for {}/{}: {}.",
            origin, class, error_out,
        );
    }
    Ok(())
}

/// The result of [`check_mtime`], indicating whether a zone should be
/// (re)loaded from disk.
enum MtimeCheckResult {
    Load { mtime: Option<SystemTime> },
    Skip { metadata: Metadata },
}

/// Compares the modification time of a zone's file with the time it was
/// last loaded (if any), and decides what to do.
fn check_mtime(zone_config: &ZoneConfig, loaded: Option<&Metadata>) -> MtimeCheckResult {
    match fs::metadata(&zone_config.path).and_then(|m| m.modified()) {
        Ok(mtime) => match loaded {
            Some(metadata)
                if metadata.path == zone_config.path
                    && metadata
                        .mtime
                        .map(|loaded_mtime| mtime <= loaded_mtime)
                        .unwrap_or(false) =>
            {
                debug!(
                    "Skipping load of {}/{}: {} has not changed since it was last loaded.",
                    zone_config.name.0,
                    zone_config.class.0,
                    zone_config.path.display(),
                );
                MtimeCheckResult::Skip {
                    metadata: Metadata {
                        path: metadata.path.clone(),
                        mtime: metadata.mtime,
                    },
                }
            }
            _ => MtimeCheckResult::Load { mtime: Some(mtime) },
        },
        Err(e) => {
            // The load itself will report the failure in context (or
            // publish an empty zone in lenient mode).
            debug!(
                "Failed to get metadata for {}: {}.",
                zone_config.path.display(),
                e,
            );
            MtimeCheckResult::Load { mtime: None }
        }
    }
}
