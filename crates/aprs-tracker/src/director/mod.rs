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

//! Viewport control over Navit's vehicle pipe.
//!
//! Navit can read a vehicle position from the standard output of a child
//! process (`<vehicle source="pipe:..." follow="1">`). Feeding it a fixed
//! position at a steady rate keeps the map centered where we want it and makes
//! Navit redraw, which is when it picks up a rewritten POI file.
//!
//! The director starts in [`DirectorState::Init`], sends one centering
//! directive, and stays in [`DirectorState::Steady`] from then on. A failed
//! write means Navit has gone away; there is nothing useful left to do, so the
//! error is returned instead of retried.

pub mod nmea;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::stats::PipelineStats;

/// Fastest allowed directive cadence.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(10);
/// Slowest allowed directive cadence.
pub const MAX_REFRESH_INTERVAL: Duration = Duration::from_secs(10);
/// Default directive cadence.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_millis(50);

/// Errors from the viewport director.
#[derive(Debug, Error)]
pub enum DirectorError {
    #[error("control pipe closed: {0}")]
    PipeClosed(#[source] std::io::Error),

    #[error("map center ({latitude}, {longitude}) is not a valid position")]
    InvalidCenter { latitude: f64, longitude: f64 },

    #[error("refresh interval {0:?} must be between 10ms and 10s")]
    InvalidInterval(Duration),
}

/// Configuration for the viewport director.
#[derive(Debug, Clone)]
pub struct DirectorConfig {
    /// Map center latitude in signed decimal degrees.
    pub center_latitude: f64,
    /// Map center longitude in signed decimal degrees.
    pub center_longitude: f64,
    /// Time between refresh directives.
    pub refresh_interval: Duration,
}

impl Default for DirectorConfig {
    /// Phoenix Sky Harbor.
    fn default() -> Self {
        Self {
            center_latitude: 33.435,
            center_longitude: -112.008_333_34,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }
}

impl DirectorConfig {
    pub fn validate(&self) -> Result<(), DirectorError> {
        let (latitude, longitude) = (self.center_latitude, self.center_longitude);
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(DirectorError::InvalidCenter {
                latitude,
                longitude,
            });
        }
        if !(MIN_REFRESH_INTERVAL..=MAX_REFRESH_INTERVAL).contains(&self.refresh_interval) {
            return Err(DirectorError::InvalidInterval(self.refresh_interval));
        }
        Ok(())
    }
}

/// One instruction to the renderer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Directive {
    /// Move the viewport to this position.
    Center { latitude: f64, longitude: f64 },
    /// Report the same position again so the renderer redraws.
    Refresh { latitude: f64, longitude: f64 },
}

impl Directive {
    /// Encode as a control pipe line (without terminator).
    ///
    /// Both kinds are GPS fixes as far as Navit is concerned; with `follow`
    /// set, any fix recenters the map.
    #[must_use]
    pub fn to_sentence(&self, at: DateTime<Utc>) -> String {
        match *self {
            Self::Center {
                latitude,
                longitude,
            }
            | Self::Refresh {
                latitude,
                longitude,
            } => nmea::gga_sentence(at, latitude, longitude),
        }
    }
}

/// Director lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectorState {
    /// Nothing written yet.
    Init,
    /// Centered; sending periodic refreshes.
    Steady,
}

/// Writes directives to the control pipe on a fixed cadence.
pub struct ViewportDirector<W> {
    writer: W,
    config: DirectorConfig,
    state: DirectorState,
}

impl<W> std::fmt::Debug for ViewportDirector<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewportDirector")
            .field("config", &self.config)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<W: AsyncWrite + Unpin> ViewportDirector<W> {
    pub fn new(config: DirectorConfig, writer: W) -> Result<Self, DirectorError> {
        config.validate()?;
        Ok(Self {
            writer,
            config,
            state: DirectorState::Init,
        })
    }

    #[must_use]
    pub fn state(&self) -> DirectorState {
        self.state
    }

    /// The directive the next [`emit`](Self::emit) will send.
    #[must_use]
    pub fn next_directive(&self) -> Directive {
        let (latitude, longitude) = (self.config.center_latitude, self.config.center_longitude);
        match self.state {
            DirectorState::Init => Directive::Center {
                latitude,
                longitude,
            },
            DirectorState::Steady => Directive::Refresh {
                latitude,
                longitude,
            },
        }
    }

    /// Write and flush the next directive, stamped with `at`.
    pub async fn emit(&mut self, at: DateTime<Utc>) -> Result<Directive, DirectorError> {
        let directive = self.next_directive();
        let mut line = directive.to_sentence(at);
        line.push_str("\r\n");

        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(DirectorError::PipeClosed)?;
        self.writer.flush().await.map_err(DirectorError::PipeClosed)?;

        if self.state == DirectorState::Init {
            info!(
                "Centered viewport at {}, {}",
                self.config.center_latitude, self.config.center_longitude
            );
            self.state = DirectorState::Steady;
        }
        Ok(directive)
    }

    /// Emit directives until cancelled or the pipe fails.
    pub async fn run(
        mut self,
        cancel: CancellationToken,
        stats: Arc<PipelineStats>,
    ) -> Result<(), DirectorError> {
        let mut interval = tokio::time::interval(self.config.refresh_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                () = cancel.cancelled() => {
                    debug!("Viewport director stopped");
                    return Ok(());
                }
            }

            // A reader that stops draining the pipe must not block shutdown.
            tokio::select! {
                result = self.emit(Utc::now()) => {
                    result?;
                    stats.add_directive();
                }
                () = cancel.cancelled() => {
                    debug!("Viewport director stopped with a write pending");
                    return Ok(());
                }
            }
        }
    }

    /// Give the writer back (tests inspect what was written).
    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Writer whose reader has gone away.
    struct BrokenPipe;

    impl AsyncWrite for BrokenPipe {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    /// Writer whose reader is alive but never drains the pipe.
    struct StalledPipe;

    impl AsyncWrite for StalledPipe {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Pending
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Pending
        }

        fn poll_shutdown(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Pending
        }
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_init_then_steady() {
        let mut director = ViewportDirector::new(DirectorConfig::default(), Vec::new()).unwrap();
        assert_eq!(director.state(), DirectorState::Init);

        let first = director.emit(at()).await.unwrap();
        assert!(matches!(first, Directive::Center { .. }));
        assert_eq!(director.state(), DirectorState::Steady);

        for _ in 0..3 {
            let next = director.emit(at()).await.unwrap();
            assert!(matches!(next, Directive::Refresh { .. }));
            assert_eq!(director.state(), DirectorState::Steady);
        }

        let written = String::from_utf8(director.into_inner()).unwrap();
        let lines: Vec<_> = written.split_terminator("\r\n").collect();
        assert_eq!(lines.len(), 4);
        assert!(lines
            .iter()
            .all(|l| l.starts_with("$GPGGA,120000,3326.100000,N,11200.500000,W,")));
    }

    #[tokio::test]
    async fn test_broken_pipe_is_fatal() {
        let mut director = ViewportDirector::new(DirectorConfig::default(), BrokenPipe).unwrap();
        assert!(matches!(
            director.emit(at()).await,
            Err(DirectorError::PipeClosed(_))
        ));
        assert_eq!(director.state(), DirectorState::Init);
    }

    #[tokio::test]
    async fn test_run_returns_pipe_error() {
        let director = ViewportDirector::new(DirectorConfig::default(), BrokenPipe).unwrap();
        let result = director
            .run(CancellationToken::new(), Arc::new(PipelineStats::new()))
            .await;
        assert!(matches!(result, Err(DirectorError::PipeClosed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_keeps_cadence_until_cancelled() {
        let config = DirectorConfig {
            refresh_interval: Duration::from_millis(100),
            ..Default::default()
        };
        let director = ViewportDirector::new(config, Vec::new()).unwrap();
        let cancel = CancellationToken::new();
        let stats = Arc::new(PipelineStats::new());

        let task = tokio::spawn(director.run(cancel.clone(), Arc::clone(&stats)));
        tokio::time::sleep(Duration::from_millis(450)).await;
        cancel.cancel();
        task.await.unwrap().unwrap();

        // Ticks at 0, 100, 200, 300 and 400 ms.
        assert_eq!(stats.snapshot().directives_written, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_write_is_stalled() {
        let director = ViewportDirector::new(DirectorConfig::default(), StalledPipe).unwrap();
        let cancel = CancellationToken::new();
        let stats = Arc::new(PipelineStats::new());

        let task = tokio::spawn(director.run(cancel.clone(), Arc::clone(&stats)));
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), task).await;
        assert!(result.is_ok(), "director kept waiting on a stalled pipe");
        result.unwrap().unwrap().unwrap();
        assert_eq!(stats.snapshot().directives_written, 0);
    }

    #[test]
    fn test_config_validation() {
        let bad_center = DirectorConfig {
            center_latitude: 95.0,
            ..Default::default()
        };
        assert!(matches!(
            bad_center.validate(),
            Err(DirectorError::InvalidCenter { .. })
        ));

        let too_fast = DirectorConfig {
            refresh_interval: Duration::from_millis(1),
            ..Default::default()
        };
        assert!(matches!(
            too_fast.validate(),
            Err(DirectorError::InvalidInterval(_))
        ));

        assert!(DirectorConfig::default().validate().is_ok());
    }
}
