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

//! Implements the daemon configuration file.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use log::debug;
use serde::{de, Deserialize};

use bulwark::class::Class;
use bulwark::name::Name;
use bulwark::rrl::RrlParams;

/// Loads the daemon configuration from the file given by `path`. All
/// relative paths inside the configuration are interpreted relative to
/// the configuration file's directory.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let dir = path
        .as_ref()
        .parent()
        .ok_or_else(|| anyhow!("the configuration file path has no parent"))?;
    let raw_config =
        fs::read_to_string(path.as_ref()).context("failed to read the configuration file")?;
    let mut config: Config =
        toml::from_str(&raw_config).context("failed to parse the configuration file")?;

    for zone_config in &mut config.zones {
        if zone_config.path.is_relative() {
            zone_config.path = dir.join(&zone_config.path);
        }
    }
    if let Some(ref mut mapped_file) = config.segment.mapped_file {
        if mapped_file.is_relative() {
            *mapped_file = dir.join(&*mapped_file);
        }
    }

    debug!(
        "Configuration loaded: {} segment, {} zone(s), RRL {}.",
        config.segment.kind,
        config.zones.len(),
        if config.rrl.is_some() {
            "enabled"
        } else {
            "disabled"
        },
    );
    Ok(config)
}

/// The daemon configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub segment: SegmentConfig,
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
    pub rrl: Option<RrlConfig>,
}

/// The `[segment]` table: which backing store to open.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SegmentConfig {
    #[serde(default, rename = "type")]
    pub kind: SegmentKind,
    #[serde(rename = "mapped-file")]
    pub mapped_file: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    #[default]
    Local,
    Mapped,
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Mapped => f.write_str("mapped"),
        }
    }
}

/// One `[[zones]]` entry.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ZoneConfig {
    pub name: ConfigName,
    #[serde(default = "default_zone_class")]
    pub class: ConfigClass,
    pub path: PathBuf,
    /// Publish an explicit empty zone instead of failing the reload
    /// when the zone file is malformed.
    #[serde(default, rename = "allow-errors")]
    pub allow_errors: bool,
}

fn default_zone_class() -> ConfigClass {
    ConfigClass(Class::IN)
}

/// The `[rrl]` table.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RrlConfig {
    #[serde(rename = "max-entries", default = "default_rrl_max_entries")]
    pub max_entries: usize,
    #[serde(rename = "responses-per-second")]
    pub responses_per_second: u32,
    #[serde(rename = "nxdomains-per-second")]
    pub nxdomains_per_second: u32,
    #[serde(rename = "errors-per-second")]
    pub errors_per_second: u32,
    #[serde(default = "default_rrl_window")]
    pub window: u32,
    #[serde(default)]
    pub slip: u32,
    #[serde(rename = "log-only", default)]
    pub log_only: bool,
}

fn default_rrl_max_entries() -> usize {
    20_000
}

fn default_rrl_window() -> u32 {
    15
}

impl RrlConfig {
    pub fn to_params(&self) -> RrlParams {
        RrlParams {
            max_entries: self.max_entries,
            responses_per_second: self.responses_per_second,
            nxdomains_per_second: self.nxdomains_per_second,
            errors_per_second: self.errors_per_second,
            window: self.window,
            slip: self.slip,
            log_only: self.log_only,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// DESERIALIZATION OF DNS TYPES                                       //
////////////////////////////////////////////////////////////////////////

/// A [`Name`] as it appears in the configuration file.
#[derive(Clone, Debug)]
pub struct ConfigName(pub Name);

impl<'de> Deserialize<'de> for ConfigName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        text.parse()
            .map(ConfigName)
            .map_err(|e| de::Error::custom(format_args!("invalid zone name: {}", e)))
    }
}

/// A [`Class`] as it appears in the configuration file.
#[derive(Clone, Copy, Debug)]
pub struct ConfigClass(pub Class);

impl<'de> Deserialize<'de> for ConfigClass {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        text.parse()
            .map(ConfigClass)
            .map_err(|e| de::Error::custom(format_args!("invalid class: {}", e)))
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_configuration() {
        let config: Config = toml::from_str(
            r#"
            [segment]
            type = "mapped"
            mapped-file = "zones.segment"

            [[zones]]
            name = "example.org."
            path = "example.org.zone"
            allow-errors = true

            [[zones]]
            name = "example.com."
            class = "IN"
            path = "example.com.zone"

            [rrl]
            responses-per-second = 5
            nxdomains-per-second = 2
            errors-per-second = 2
            slip = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.segment.kind, SegmentKind::Mapped);
        assert_eq!(config.zones.len(), 2);
        assert_eq!(config.zones[0].name.0, "example.org.".parse().unwrap());
        assert!(config.zones[0].allow_errors);
        assert!(!config.zones[1].allow_errors);
        assert_eq!(config.zones[1].class.0, Class::IN);

        let rrl = config.rrl.unwrap();
        assert_eq!(rrl.max_entries, 20_000);
        assert_eq!(rrl.window, 15);
        assert_eq!(rrl.slip, 2);
    }

    #[test]
    fn defaults_to_a_local_segment() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.segment.kind, SegmentKind::Local);
        assert!(config.zones.is_empty());
        assert!(config.rrl.is_none());
    }

    #[test]
    fn rejects_invalid_zone_names() {
        let result: Result<Config, _> = toml::from_str(
            r#"
            [[zones]]
            name = "no trailing dot"
            path = "x.zone"
            "#,
        );
        assert!(result.is_err());
    }
}
