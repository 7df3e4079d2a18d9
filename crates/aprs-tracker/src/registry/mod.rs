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

//! Station tracking and visibility aging.
//!
//! The registry is the single source of truth for which stations are shown.
//! Updates replace a station's position and comment in place; a periodic sweep
//! moves quiet stations from [`Visibility::Active`] to [`Visibility::Fading`]
//! and finally removes them once they expire.
//!
//! All methods take the current time explicitly so the aging rules can be
//! driven by any clock.

mod shared;

pub use shared::SharedRegistry;

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, info};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::protocol::StationUpdate;

/// Invalid fade/expire threshold pair.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ThresholdError {
    #[error("fade threshold must be greater than zero")]
    ZeroFade,

    #[error("fade threshold ({fade:?}) must be shorter than expire threshold ({expire:?})")]
    FadeNotBeforeExpire { fade: Duration, expire: Duration },

    #[error("threshold {0:?} is out of range")]
    OutOfRange(Duration),
}

/// Age limits that drive station visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    fade_after: TimeDelta,
    expire_after: TimeDelta,
}

impl Thresholds {
    /// Build a threshold pair. Requires `0 < fade < expire`.
    pub fn new(fade: Duration, expire: Duration) -> Result<Self, ThresholdError> {
        if fade.is_zero() {
            return Err(ThresholdError::ZeroFade);
        }
        if fade >= expire {
            return Err(ThresholdError::FadeNotBeforeExpire { fade, expire });
        }
        let fade_after = TimeDelta::from_std(fade).map_err(|_| ThresholdError::OutOfRange(fade))?;
        let expire_after =
            TimeDelta::from_std(expire).map_err(|_| ThresholdError::OutOfRange(expire))?;

        Ok(Self {
            fade_after,
            expire_after,
        })
    }

    /// Age at which a station starts fading.
    #[must_use]
    pub fn fade_after(&self) -> TimeDelta {
        self.fade_after
    }

    /// Age at which a station is removed.
    #[must_use]
    pub fn expire_after(&self) -> TimeDelta {
        self.expire_after
    }
}

impl Default for Thresholds {
    /// Five minutes to fade, one hour to expire.
    fn default() -> Self {
        Self {
            fade_after: TimeDelta::minutes(5),
            expire_after: TimeDelta::minutes(60),
        }
    }
}

/// Display state of a station, derived from how long ago it was heard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    /// Heard recently.
    Active,
    /// Quiet for at least the fade threshold.
    Fading,
    /// Quiet for at least the expire threshold. Never shown.
    Expired,
}

impl Visibility {
    /// Classify a station by the age of its last report.
    ///
    /// Negative ages (clock stepped backwards) count as fresh.
    #[must_use]
    pub fn classify(age: TimeDelta, thresholds: &Thresholds) -> Self {
        if age < thresholds.fade_after {
            Self::Active
        } else if age < thresholds.expire_after {
            Self::Fading
        } else {
            Self::Expired
        }
    }
}

/// A tracked station.
#[derive(Debug, Clone, PartialEq)]
pub struct StationRecord {
    /// Station identifier.
    pub id: String,
    /// Latitude in signed decimal degrees.
    pub latitude: f64,
    /// Longitude in signed decimal degrees.
    pub longitude: f64,
    /// Latest comment (may be empty).
    pub comment: String,
    /// Packet timestamp from the decoder log, when present.
    pub reported_at: Option<DateTime<Utc>>,
    /// When the latest update was applied.
    pub last_heard_at: DateTime<Utc>,
    /// Visibility as of the last apply or sweep.
    pub visibility: Visibility,
}

impl StationRecord {
    fn new(update: StationUpdate, now: DateTime<Utc>) -> Self {
        Self {
            id: update.id,
            latitude: update.latitude,
            longitude: update.longitude,
            comment: update.comment,
            reported_at: update.reported_at,
            last_heard_at: now,
            visibility: Visibility::Active,
        }
    }

    fn replace(&mut self, update: StationUpdate, now: DateTime<Utc>) {
        self.latitude = update.latitude;
        self.longitude = update.longitude;
        self.comment = update.comment;
        self.reported_at = update.reported_at;
        self.last_heard_at = now;
        self.visibility = Visibility::Active;
    }

    /// Time since this station was last heard.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.last_heard_at
    }
}

/// Read-only projection of one visible station.
#[derive(Debug, Clone, PartialEq)]
pub struct StationView {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub comment: String,
    pub reported_at: Option<DateTime<Utc>>,
    pub last_heard_at: DateTime<Utc>,
    /// Either [`Visibility::Active`] or [`Visibility::Fading`].
    pub visibility: Visibility,
}

/// Point-in-time copy of every visible station.
///
/// Stations are ordered most recently heard first, ties broken by id.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSnapshot {
    /// Clock reading the visibilities were computed against.
    pub taken_at: DateTime<Utc>,
    pub stations: Vec<StationView>,
}

impl OutputSnapshot {
    /// Look up a station by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&StationView> {
        self.stations.iter().find(|s| s.id == id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }
}

/// Visibility changes made by one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Stations that crossed the fade threshold during this sweep.
    pub faded: Vec<String>,
    /// Stations removed during this sweep.
    pub expired: Vec<String>,
}

impl SweepReport {
    /// True if the sweep changed anything visible.
    #[must_use]
    pub fn changed(&self) -> bool {
        !self.faded.is_empty() || !self.expired.is_empty()
    }
}

/// Events emitted by the registry when station state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A station was heard for the first time (or again after expiring).
    StationAdded(String),
    /// A known station sent a new position.
    StationUpdated(String),
    /// A station went quiet long enough to fade.
    StationFading(String),
    /// A station was removed after expiring.
    StationExpired(String),
}

/// Configuration for the station registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub thresholds: Thresholds,
    /// Broadcast channel capacity for events.
    pub event_channel_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            event_channel_capacity: 256,
        }
    }
}

/// Station registry that maintains state and emits events.
pub struct StationRegistry {
    stations: HashMap<String, StationRecord>,
    thresholds: Thresholds,
    event_tx: broadcast::Sender<RegistryEvent>,
}

impl std::fmt::Debug for StationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StationRegistry")
            .field("station_count", &self.stations.len())
            .field("thresholds", &self.thresholds)
            .finish_non_exhaustive()
    }
}

impl StationRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(config: RegistryConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity.max(1));

        Self {
            stations: HashMap::new(),
            thresholds: config.thresholds,
            event_tx,
        }
    }

    /// Upsert a station from a decoded update heard at `now`.
    ///
    /// Returns `true` if the station was not being tracked before.
    pub fn apply(&mut self, update: StationUpdate, now: DateTime<Utc>) -> bool {
        let id = update.id.clone();

        let is_new = if let Some(record) = self.stations.get_mut(&id) {
            record.replace(update, now);
            false
        } else {
            self.stations
                .insert(id.clone(), StationRecord::new(update, now));
            true
        };

        let event = if is_new {
            debug!("New station {id}");
            RegistryEvent::StationAdded(id)
        } else {
            RegistryEvent::StationUpdated(id)
        };
        let _ = self.event_tx.send(event);

        is_new
    }

    /// Recompute visibility for every station and drop expired ones.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        for record in self.stations.values_mut() {
            let visibility = Visibility::classify(record.age(now), &self.thresholds);
            match visibility {
                Visibility::Fading if record.visibility == Visibility::Active => {
                    report.faded.push(record.id.clone());
                }
                Visibility::Expired => report.expired.push(record.id.clone()),
                _ => {}
            }
            record.visibility = visibility;
        }

        for id in &report.expired {
            self.stations.remove(id);
        }

        report.faded.sort();
        report.expired.sort();

        for id in &report.faded {
            let _ = self.event_tx.send(RegistryEvent::StationFading(id.clone()));
        }
        for id in &report.expired {
            let _ = self.event_tx.send(RegistryEvent::StationExpired(id.clone()));
        }

        if report.changed() {
            info!(
                "Sweep: {} faded, {} expired, {} tracked",
                report.faded.len(),
                report.expired.len(),
                self.stations.len()
            );
        }

        report
    }

    /// Copy every non-expired station with its visibility at `now`.
    #[must_use]
    pub fn snapshot(&self, now: DateTime<Utc>) -> OutputSnapshot {
        let mut stations: Vec<StationView> = self
            .stations
            .values()
            .filter_map(|record| {
                let visibility = Visibility::classify(record.age(now), &self.thresholds);
                (visibility != Visibility::Expired).then(|| StationView {
                    id: record.id.clone(),
                    latitude: record.latitude,
                    longitude: record.longitude,
                    comment: record.comment.clone(),
                    reported_at: record.reported_at,
                    last_heard_at: record.last_heard_at,
                    visibility,
                })
            })
            .collect();

        stations.sort_by(|a, b| {
            b.last_heard_at
                .cmp(&a.last_heard_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        OutputSnapshot {
            taken_at: now,
            stations,
        }
    }

    /// Get a specific station by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&StationRecord> {
        self.stations.get(id)
    }

    /// Number of tracked stations (including fading ones).
    #[must_use]
    pub fn len(&self) -> usize {
        self.stations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    #[must_use]
    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Subscribe to registry events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn minutes(m: i64) -> DateTime<Utc> {
        t0() + TimeDelta::minutes(m)
    }

    fn update(id: &str, lat: f64, lon: f64, comment: &str) -> StationUpdate {
        StationUpdate {
            id: id.to_string(),
            latitude: lat,
            longitude: lon,
            comment: comment.to_string(),
            reported_at: None,
        }
    }

    fn registry(fade_min: u64, expire_min: u64) -> StationRegistry {
        StationRegistry::new(RegistryConfig {
            thresholds: Thresholds::new(
                Duration::from_secs(fade_min * 60),
                Duration::from_secs(expire_min * 60),
            )
            .unwrap(),
            ..Default::default()
        })
    }

    #[test]
    fn test_thresholds_validation() {
        assert_eq!(
            Thresholds::new(Duration::ZERO, Duration::from_secs(1)),
            Err(ThresholdError::ZeroFade)
        );
        assert!(matches!(
            Thresholds::new(Duration::from_secs(60), Duration::from_secs(60)),
            Err(ThresholdError::FadeNotBeforeExpire { .. })
        ));
        assert!(Thresholds::new(Duration::from_secs(60), Duration::from_secs(61)).is_ok());
    }

    #[test]
    fn test_classify_boundaries() {
        let th = Thresholds::new(Duration::from_secs(600), Duration::from_secs(1800)).unwrap();
        assert_eq!(Visibility::classify(TimeDelta::seconds(-5), &th), Visibility::Active);
        assert_eq!(Visibility::classify(TimeDelta::seconds(599), &th), Visibility::Active);
        assert_eq!(Visibility::classify(TimeDelta::seconds(600), &th), Visibility::Fading);
        assert_eq!(Visibility::classify(TimeDelta::seconds(1799), &th), Visibility::Fading);
        assert_eq!(Visibility::classify(TimeDelta::seconds(1800), &th), Visibility::Expired);
    }

    #[test]
    fn test_decode_then_apply_matches_line() {
        let mut registry = registry(10, 30);
        let line = "0,1704110400,2024-01-01T11:59:58Z,STA1,STA1,50,0,!,,/>,33.40,-112.00,,,,,,,,,,test";
        let now = t0();

        assert!(registry.apply(decode(line).unwrap(), now));

        let record = registry.get("STA1").unwrap();
        assert_eq!(record.id, "STA1");
        assert!((record.latitude - 33.40).abs() < 1e-9);
        assert!((record.longitude - (-112.00)).abs() < 1e-9);
        assert_eq!(record.comment, "test");
        assert_eq!(record.last_heard_at, now);
        assert_eq!(record.visibility, Visibility::Active);
    }

    #[test]
    fn test_fade_and_expire_scenario() {
        let mut registry = registry(10, 30);
        registry.apply(update("STA1", 33.40, -112.00, "test"), minutes(0));

        let snap = registry.snapshot(minutes(0));
        let sta1 = snap.get("STA1").unwrap();
        assert_eq!(sta1.visibility, Visibility::Active);
        assert!((sta1.latitude - 33.40).abs() < 1e-9);
        assert!((sta1.longitude - (-112.00)).abs() < 1e-9);

        registry.sweep(minutes(12));
        let snap = registry.snapshot(minutes(12));
        assert_eq!(snap.get("STA1").unwrap().visibility, Visibility::Fading);

        registry.sweep(minutes(31));
        let snap = registry.snapshot(minutes(31));
        assert!(snap.get("STA1").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_hides_expired_before_sweep() {
        let mut registry = registry(10, 30);
        registry.apply(update("STA1", 33.40, -112.00, ""), minutes(0));

        assert!(registry.snapshot(minutes(31)).is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_sweep_transitions_exactly_once() {
        let mut registry = registry(10, 30);
        registry.apply(update("STA1", 1.0, 1.0, ""), minutes(0));

        assert_eq!(registry.sweep(minutes(5)), SweepReport::default());
        assert_eq!(registry.sweep(minutes(10)).faded, vec!["STA1".to_string()]);
        assert!(registry.sweep(minutes(11)).faded.is_empty());
        assert!(registry.sweep(minutes(29)).faded.is_empty());

        let report = registry.sweep(minutes(30));
        assert_eq!(report.expired, vec!["STA1".to_string()]);
        assert!(report.faded.is_empty());
        assert_eq!(registry.sweep(minutes(31)), SweepReport::default());
    }

    #[test]
    fn test_update_revives_fading_station() {
        let mut registry = registry(10, 30);
        registry.apply(update("STA1", 1.0, 1.0, ""), minutes(0));
        registry.sweep(minutes(15));
        assert_eq!(registry.get("STA1").unwrap().visibility, Visibility::Fading);

        assert!(!registry.apply(update("STA1", 2.0, 2.0, ""), minutes(16)));
        assert_eq!(registry.get("STA1").unwrap().visibility, Visibility::Active);
        assert!(registry.sweep(minutes(20)).faded.is_empty());
        assert_eq!(registry.sweep(minutes(26)).faded, vec!["STA1".to_string()]);
    }

    #[test]
    fn test_latest_position_wins() {
        let mut registry = registry(10, 30);
        registry.apply(update("STA1", 33.40, -112.00, "first"), minutes(0));
        registry.apply(update("STA1", 34.50, -111.00, "second"), minutes(1));

        assert_eq!(registry.len(), 1);
        let record = registry.get("STA1").unwrap();
        assert!((record.latitude - 34.50).abs() < 1e-9);
        assert!((record.longitude - (-111.00)).abs() < 1e-9);
        assert_eq!(record.comment, "second");
        assert_eq!(record.last_heard_at, minutes(1));
    }

    #[test]
    fn test_expired_station_returns_as_new() {
        let mut registry = registry(10, 30);
        let mut events = registry.subscribe();

        assert!(registry.apply(update("STA1", 1.0, 1.0, ""), minutes(0)));
        registry.sweep(minutes(40));
        assert!(registry.apply(update("STA1", 1.0, 1.0, ""), minutes(41)));

        let received: Vec<_> = std::iter::from_fn(|| events.try_recv().ok()).collect();
        assert_eq!(
            received,
            vec![
                RegistryEvent::StationAdded("STA1".to_string()),
                RegistryEvent::StationExpired("STA1".to_string()),
                RegistryEvent::StationAdded("STA1".to_string()),
            ]
        );
    }

    #[test]
    fn test_snapshot_ordering() {
        let mut registry = registry(10, 30);
        registry.apply(update("B", 1.0, 1.0, ""), minutes(0));
        registry.apply(update("A", 1.0, 1.0, ""), minutes(0));
        registry.apply(update("C", 1.0, 1.0, ""), minutes(2));

        let snap = registry.snapshot(minutes(3));
        let ids: Vec<_> = snap.stations.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["C", "A", "B"]);
        assert_eq!(snap.taken_at, minutes(3));
    }
}
