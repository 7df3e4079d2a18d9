// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Application configuration management.
//!
//! Settings are stored in TOML format in the platform configuration directory
//! (or any file given with `--config`). A missing file is created with the
//! defaults below. Nothing is reloaded while running.

use std::path::{Path, PathBuf};
use std::time::Duration;

use aprs_tracker::{
    BridgeConfig, DirectorConfig, PoiConfig, RegistryConfig, TailConfig, Thresholds,
};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Name used for the configuration directory.
pub const APP_NAME: &str = "aprs-navit";

const CONFIG_NAME: &str = "config";

/// Application configuration stored in TOML format
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AppConfig {
    /// Dire Wolf CSV log (`direwolf -L <file>`)
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,

    /// POI file referenced by the Navit map config
    #[serde(default = "default_poi_path")]
    pub poi_path: PathBuf,

    /// Icon for recently heard stations
    #[serde(default = "default_active_icon")]
    pub active_icon: PathBuf,

    /// Icon for stations that have gone quiet
    #[serde(default = "default_fading_icon")]
    pub fading_icon: PathBuf,

    /// Map center latitude, decimal degrees (north positive)
    #[serde(default = "default_center_latitude")]
    pub center_latitude: f64,

    /// Map center longitude, decimal degrees (east positive)
    #[serde(default = "default_center_longitude")]
    pub center_longitude: f64,

    /// Minutes without a report before a station fades
    #[serde(default = "default_fade_after_minutes")]
    pub fade_after_minutes: u64,

    /// Minutes without a report before a station is removed
    #[serde(default = "default_expire_after_minutes")]
    pub expire_after_minutes: u64,

    /// How often to check the log for new packets
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How often to age stations
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// How often to rewrite the POI file when nothing changed
    #[serde(default = "default_render_interval_secs")]
    pub render_interval_secs: u64,

    /// Time between position sentences sent to Navit. Navit's own
    /// `refresh` setting also limits how often the screen redraws.
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,

    /// Append the APRS comment to each station label
    #[serde(default = "default_true")]
    pub show_comment: bool,

    /// Ignore what is already in the log at startup
    #[serde(default)]
    pub start_at_end: bool,

    /// Empty the log after reading it. Leave off when logrotate or a cron
    /// job already keeps the log from growing.
    #[serde(default)]
    pub truncate_after_read: bool,

    /// Skip packets whose own timestamp is older than the expire threshold
    #[serde(default = "default_true")]
    pub drop_backlog: bool,
}

// Default value functions for serde
fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn default_log_path() -> PathBuf {
    home_dir().join("aprs.log")
}

fn default_poi_path() -> PathBuf {
    home_dir().join(".navit").join("aprs_poi.txt")
}

fn default_active_icon() -> PathBuf {
    home_dir().join(".navit").join("icons").join("aprs_active.png")
}

fn default_fading_icon() -> PathBuf {
    home_dir().join(".navit").join("icons").join("aprs_fading.png")
}

// Phoenix Sky Harbor
fn default_center_latitude() -> f64 {
    33.435
}

fn default_center_longitude() -> f64 {
    -112.008_333_34
}

fn default_fade_after_minutes() -> u64 {
    5
}

fn default_expire_after_minutes() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_render_interval_secs() -> u64 {
    5
}

fn default_refresh_interval_ms() -> u64 {
    50
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_path: default_log_path(),
            poi_path: default_poi_path(),
            active_icon: default_active_icon(),
            fading_icon: default_fading_icon(),
            center_latitude: default_center_latitude(),
            center_longitude: default_center_longitude(),
            fade_after_minutes: default_fade_after_minutes(),
            expire_after_minutes: default_expire_after_minutes(),
            poll_interval_ms: default_poll_interval_ms(),
            sweep_interval_secs: default_sweep_interval_secs(),
            render_interval_secs: default_render_interval_secs(),
            refresh_interval_ms: default_refresh_interval_ms(),
            show_comment: true,
            start_at_end: false,
            truncate_after_read: false,
            drop_backlog: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from `path`, or from the default location.
    pub fn load(path: Option<&Path>) -> Result<Self, confy::ConfyError> {
        match path {
            Some(path) => confy::load_path(path),
            None => confy::load(APP_NAME, CONFIG_NAME),
        }
    }

    /// Get the config file path for display to user
    pub fn config_path(path: Option<&Path>) -> Result<PathBuf, confy::ConfyError> {
        match path {
            Some(path) => Ok(path.to_path_buf()),
            None => confy::get_configuration_file_path(APP_NAME, CONFIG_NAME),
        }
    }

    /// Check the settings and turn them into a pipeline configuration.
    pub fn to_bridge_config(&self) -> Result<BridgeConfig, AppError> {
        let thresholds = Thresholds::new(
            minutes(self.fade_after_minutes),
            minutes(self.expire_after_minutes),
        )?;

        let config = BridgeConfig {
            log_path: self.log_path.clone(),
            tail: TailConfig {
                start_at_end: self.start_at_end,
                truncate_after_read: self.truncate_after_read,
                ..TailConfig::default()
            },
            registry: RegistryConfig {
                thresholds,
                ..RegistryConfig::default()
            },
            poi: PoiConfig {
                path: self.poi_path.clone(),
                active_icon: self.active_icon.clone(),
                fading_icon: self.fading_icon.clone(),
                show_comment: self.show_comment,
            },
            director: DirectorConfig {
                center_latitude: self.center_latitude,
                center_longitude: self.center_longitude,
                refresh_interval: Duration::from_millis(self.refresh_interval_ms),
            },
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            render_interval: Duration::from_secs(self.render_interval_secs),
            drop_backlog: self.drop_backlog,
        };

        config.validate()?;
        Ok(config)
    }
}

fn minutes(m: u64) -> Duration {
    Duration::from_secs(m.saturating_mul(60))
}
