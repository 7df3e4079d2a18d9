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

//! APRS station tracking pipeline for Navit.
//!
//! This library tails the CSV packet log written by Dire Wolf, keeps a live
//! set of stations with positions, and republishes it for Navit in two ways:
//!
//! - **Log layer** ([`tail`]): incremental reading that survives rotation and
//!   truncation
//! - **Protocol layer** ([`protocol`]): Dire Wolf CSV line decoding
//! - **Registry layer** ([`registry`]): station state and active/fading/expired
//!   aging
//! - **Output layer** ([`poi`], [`director`]): the Navit POI file and the NMEA
//!   vehicle feed that keeps Navit centered and redrawing
//!
//! # Quick Start
//!
//! Use [`Bridge`] to run every layer with its own timer:
//!
//! ```no_run
//! use aprs_tracker::{Bridge, BridgeConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut config = BridgeConfig::default();
//!     config.log_path = "/home/pi/aprs.log".into();
//!     config.poi.path = "/home/pi/.navit/aprs_poi.txt".into();
//!
//!     let bridge = Bridge::spawn(config, tokio::io::stdout()).expect("log file readable");
//!     if let Err(e) = bridge.wait().await {
//!         eprintln!("{e}");
//!     }
//! }
//! ```
//!
//! # Using Individual Layers
//!
//! ```
//! use aprs_tracker::protocol::decode;
//! use aprs_tracker::registry::{RegistryConfig, StationRegistry, Visibility};
//! use chrono::Utc;
//!
//! let line = "0,1704110400,2024-01-01T12:00:00Z,N0CALL-9,N0CALL-9,50,0,!,,/>,33.4,-112.0,,,,,,,,,,mobile";
//! let mut registry = StationRegistry::new(RegistryConfig::default());
//! let now = Utc::now();
//! registry.apply(decode(line).unwrap(), now);
//!
//! let snapshot = registry.snapshot(now);
//! assert_eq!(snapshot.get("N0CALL-9").unwrap().visibility, Visibility::Active);
//! ```

pub mod director;
pub mod poi;
pub mod protocol;
pub mod registry;
pub mod stats;
pub mod tail;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use thiserror::Error;
use tokio::io::AsyncWrite;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub use director::{Directive, DirectorConfig, DirectorError, ViewportDirector};
pub use poi::{PoiConfig, PoiRenderer, RenderError};
pub use protocol::{DireWolfParser, ParseError, Protocol, StationUpdate};
pub use registry::{
    OutputSnapshot, RegistryConfig, RegistryEvent, SharedRegistry, StationRegistry, Thresholds,
    Visibility,
};
pub use stats::{PipelineStats, StatsSnapshot};
pub use tail::{LogTail, TailConfig, TailError};

/// Errors that stop the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Tail(#[from] TailError),

    #[error(transparent)]
    Director(#[from] DirectorError),

    #[error("{name} must be greater than zero")]
    ZeroInterval { name: &'static str },

    #[error("pipeline task failed: {0}")]
    Task(String),
}

/// Configuration for the full pipeline.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Dire Wolf CSV log to tail.
    pub log_path: PathBuf,
    pub tail: TailConfig,
    pub registry: RegistryConfig,
    pub poi: PoiConfig,
    pub director: DirectorConfig,
    /// How often to check the log for new lines.
    pub poll_interval: Duration,
    /// How often to age stations.
    pub sweep_interval: Duration,
    /// How often to rewrite the POI file when nothing changed.
    pub render_interval: Duration,
    /// Skip log lines whose packet time is already past the expire threshold.
    pub drop_backlog: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("aprs.log"),
            tail: TailConfig::default(),
            registry: RegistryConfig::default(),
            poi: PoiConfig {
                path: PathBuf::from("aprs_poi.txt"),
                active_icon: PathBuf::from("icons/aprs_active.png"),
                fading_icon: PathBuf::from("icons/aprs_fading.png"),
                show_comment: true,
            },
            director: DirectorConfig::default(),
            poll_interval: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(30),
            render_interval: Duration::from_secs(5),
            drop_backlog: true,
        }
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<(), BridgeError> {
        for (name, interval) in [
            ("poll interval", self.poll_interval),
            ("sweep interval", self.sweep_interval),
            ("render interval", self.render_interval),
        ] {
            if interval.is_zero() {
                return Err(BridgeError::ZeroInterval { name });
            }
        }
        self.director.validate()?;
        Ok(())
    }
}

/// Decode log lines and apply the position reports to the registry.
///
/// Lines that do not decode are counted and skipped. Returns the number of
/// updates applied.
pub fn ingest_lines(
    lines: &[String],
    parser: &mut impl Protocol<Message = StationUpdate, Error = ParseError>,
    registry: &SharedRegistry,
    stats: &PipelineStats,
    now: DateTime<Utc>,
    drop_backlog: bool,
) -> usize {
    let expire_after = registry.thresholds().expire_after();
    let mut failures = 0u64;
    let mut backlog = 0u64;
    let mut updates = Vec::with_capacity(lines.len());

    for line in lines {
        match parser.parse(line.as_bytes()) {
            Ok(Some(update)) => {
                let stale = drop_backlog
                    && update
                        .reported_at
                        .is_some_and(|reported| now - reported >= expire_after);
                if stale {
                    backlog += 1;
                } else {
                    updates.push(update);
                }
            }
            Ok(None) => failures += 1,
            Err(ParseError::Header) => {}
            Err(e) => {
                debug!("Skipping log line: {e}");
                failures += 1;
            }
        }
    }

    stats.add_lines_read(lines.len() as u64);
    stats.add_parse_failures(failures);
    stats.add_backlog_skipped(backlog);

    let applied = registry.apply_all(updates, now);
    stats.add_updates_applied(applied as u64);
    applied
}

/// Running pipeline: log polling, aging, POI rendering and viewport control,
/// each on its own timer.
pub struct Bridge {
    registry: SharedRegistry,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
    tasks: JoinSet<Result<(), BridgeError>>,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("registry", &self.registry)
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}

impl Bridge {
    /// Open the log and start the pipeline tasks.
    ///
    /// Must be called from within a Tokio runtime. Fails if the configuration
    /// is invalid or the log file cannot be opened.
    pub fn spawn<W>(config: BridgeConfig, control: W) -> Result<Self, BridgeError>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        config.validate()?;

        let tail = LogTail::open(&config.log_path, config.tail.clone())?;
        let director = ViewportDirector::new(config.director.clone(), control)?;
        let renderer = PoiRenderer::new(config.poi.clone());

        let registry = SharedRegistry::new(config.registry.clone());
        let stats = Arc::new(PipelineStats::new());
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();

        tasks.spawn(poll_loop(
            tail,
            registry.clone(),
            Arc::clone(&stats),
            cancel.clone(),
            config.poll_interval,
            config.drop_backlog,
        ));
        tasks.spawn(sweep_loop(
            registry.clone(),
            Arc::clone(&stats),
            cancel.clone(),
            config.sweep_interval,
        ));
        tasks.spawn(render_loop(
            renderer,
            registry.clone(),
            Arc::clone(&stats),
            cancel.clone(),
            config.render_interval,
        ));

        let director_stats = Arc::clone(&stats);
        let director_cancel = cancel.clone();
        tasks.spawn(async move {
            director
                .run(director_cancel, director_stats)
                .await
                .map_err(BridgeError::from)
        });

        info!(
            "Bridge started: {} -> {}",
            config.log_path.display(),
            config.poi.path.display()
        );

        Ok(Self {
            registry,
            stats,
            cancel,
            tasks,
        })
    }

    /// The live station registry.
    #[must_use]
    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Pipeline counters.
    #[must_use]
    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    /// Token that stops every task when cancelled.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop all tasks. [`wait`](Self::wait) returns once they have exited.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Wait for the pipeline to stop.
    ///
    /// Returns the first task error; any error also stops the other tasks.
    pub async fn wait(mut self) -> Result<(), BridgeError> {
        let mut outcome = Ok(());

        while let Some(joined) = self.tasks.join_next().await {
            let result = joined
                .map_err(|e| BridgeError::Task(e.to_string()))
                .and_then(|r| r);
            if let Err(e) = result {
                if outcome.is_ok() {
                    self.cancel.cancel();
                    outcome = Err(e);
                }
            }
        }

        outcome
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn poll_loop(
    mut tail: LogTail,
    registry: SharedRegistry,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
    period: Duration,
    drop_backlog: bool,
) -> Result<(), BridgeError> {
    let mut parser = DireWolfParser::new();
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            () = cancel.cancelled() => return Ok(()),
        }

        // File reads can stall on slow storage; keep them off the timers.
        let (returned, polled) = tokio::task::spawn_blocking(move || {
            let polled = tail.poll();
            (tail, polled)
        })
        .await
        .map_err(|e| BridgeError::Task(e.to_string()))?;
        tail = returned;
        stats.set_rotations(tail.rotations());

        match polled {
            Ok(lines) if !lines.is_empty() => {
                ingest_lines(
                    &lines,
                    &mut parser,
                    &registry,
                    &stats,
                    Utc::now(),
                    drop_backlog,
                );
            }
            Ok(_) => {}
            Err(e) => warn!("{e}"),
        }
    }
}

async fn sweep_loop(
    registry: SharedRegistry,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
    period: Duration,
) -> Result<(), BridgeError> {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                registry.sweep(Utc::now());
                info!("{} stations tracked; {}", registry.len(), stats.snapshot());
            }
            () = cancel.cancelled() => return Ok(()),
        }
    }
}

async fn render_loop(
    renderer: PoiRenderer,
    registry: SharedRegistry,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
    period: Duration,
) -> Result<(), BridgeError> {
    let mut events = registry.subscribe();
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            event = events.recv() => {
                match event {
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => return Ok(()),
                }
                // One render covers the whole burst.
                while events.try_recv().is_ok() {}
            }
            () = cancel.cancelled() => return Ok(()),
        }

        let snapshot = registry.snapshot(Utc::now());
        match renderer.render(&snapshot).await {
            Ok(()) => stats.record_render(true),
            Err(e) => {
                warn!("{e}; will retry next cycle");
                stats.record_render(false);
            }
        }
    }
}
