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

//! Navit point-of-interest file output.
//!
//! Each visible station becomes one line of a Navit `textfile` map:
//!
//! ```text
//! mg: -112.005000 33.261000 isotime="2024-01-01T12:00:00Z" type="poi_custom0" icon_src="/path/active.png" label="PHX — comment"
//! ```
//!
//! The `isotime` attribute is ignored by Navit; it is there for whoever has to
//! read the file. The whole file is rewritten on every render and swapped into
//! place with a rename, so Navit never loads a half-written file.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::SecondsFormat;
use log::debug;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::registry::{OutputSnapshot, StationView, Visibility};

/// Navit item type used for every station.
pub const POI_TYPE: &str = "poi_custom0";

/// Errors writing the POI file.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot replace {path}: {source}")]
    Rename {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Configuration for the POI renderer.
#[derive(Debug, Clone)]
pub struct PoiConfig {
    /// File Navit reads the stations from.
    pub path: PathBuf,
    /// Icon for stations heard recently.
    pub active_icon: PathBuf,
    /// Icon for stations that have gone quiet.
    pub fading_icon: PathBuf,
    /// Append the station comment to its label.
    pub show_comment: bool,
}

/// Writes snapshots as Navit POI files.
#[derive(Debug, Clone)]
pub struct PoiRenderer {
    config: PoiConfig,
    temp_path: PathBuf,
}

impl PoiRenderer {
    #[must_use]
    pub fn new(config: PoiConfig) -> Self {
        let temp_path = temp_path_for(&config.path);
        Self { config, temp_path }
    }

    /// Path of the live POI file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Format a snapshot as POI file contents.
    #[must_use]
    pub fn format(&self, snapshot: &OutputSnapshot) -> String {
        let mut out = String::new();
        for station in &snapshot.stations {
            if let Some(icon) = self.icon_for(station.visibility) {
                let _ = writeln!(
                    out,
                    "mg: {:.6} {:.6} isotime=\"{}\" type=\"{}\" icon_src=\"{}\" label=\"{}\"",
                    station.longitude,
                    station.latitude,
                    station
                        .reported_at
                        .unwrap_or(station.last_heard_at)
                        .to_rfc3339_opts(SecondsFormat::Secs, true),
                    POI_TYPE,
                    icon.display(),
                    self.label(station),
                );
            }
        }
        out
    }

    /// Write the snapshot to the POI file, replacing it atomically.
    pub async fn render(&self, snapshot: &OutputSnapshot) -> Result<(), RenderError> {
        let contents = self.format(snapshot);
        let write_err = |source| RenderError::Write {
            path: self.temp_path.clone(),
            source,
        };

        if let Some(parent) = self.temp_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        let mut file = tokio::fs::File::create(&self.temp_path)
            .await
            .map_err(write_err)?;
        file.write_all(contents.as_bytes())
            .await
            .map_err(write_err)?;
        file.sync_all().await.map_err(write_err)?;
        drop(file);

        tokio::fs::rename(&self.temp_path, &self.config.path)
            .await
            .map_err(|source| RenderError::Rename {
                path: self.config.path.clone(),
                source,
            })?;

        debug!(
            "Wrote {} stations to {}",
            snapshot.len(),
            self.config.path.display()
        );
        Ok(())
    }

    fn icon_for(&self, visibility: Visibility) -> Option<&Path> {
        match visibility {
            Visibility::Active => Some(&self.config.active_icon),
            Visibility::Fading => Some(&self.config.fading_icon),
            Visibility::Expired => None,
        }
    }

    fn label(&self, station: &StationView) -> String {
        let label = if self.config.show_comment && !station.comment.trim().is_empty() {
            format!("{} \u{2014} {}", station.id, station.comment.trim())
        } else {
            station.id.clone()
        };
        // Attribute values are double-quoted and have no escape syntax.
        label.replace('"', "'").replace(['\n', '\r'], " ")
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
