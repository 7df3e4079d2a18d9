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

use std::path::PathBuf;

use clap::{ArgAction, Parser};

use crate::config::AppConfig;

/// Plot APRS stations heard by Dire Wolf on a Navit map.
///
/// Run this as Navit's vehicle pipe source. Standard output carries
/// position sentences for Navit; diagnostics go to standard error.
#[derive(Parser, Debug, Default)]
#[command(author, version, about)]
pub struct Args {
    /// Configuration file (created with defaults if missing)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Dire Wolf CSV log to follow, overriding the configuration
    #[arg(long, value_name = "FILE")]
    pub log: Option<PathBuf>,

    /// POI file to write, overriding the configuration
    #[arg(long, value_name = "FILE")]
    pub poi: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Print the configuration file path and exit
    #[arg(long)]
    pub print_config: bool,
}

impl Args {
    /// Apply command line overrides on top of the loaded configuration.
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(log) = &self.log {
            config.log_path.clone_from(log);
        }
        if let Some(poi) = &self.poi {
            config.poi_path.clone_from(poi);
        }
    }
}
