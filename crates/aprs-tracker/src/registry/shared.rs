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

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use log::warn;
use tokio::sync::broadcast;

use super::{
    OutputSnapshot, RegistryConfig, RegistryEvent, StationRegistry, SweepReport, Thresholds,
};
use crate::protocol::StationUpdate;

/// Cloneable handle to a registry shared between the pipeline tasks.
///
/// Every call takes the lock for its whole duration, so a snapshot never sees
/// a station halfway through an update.
#[derive(Debug, Clone)]
pub struct SharedRegistry {
    inner: Arc<RwLock<StationRegistry>>,
}

impl SharedRegistry {
    #[must_use]
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StationRegistry::new(config))),
        }
    }

    /// Apply a batch of updates under one write lock, in order.
    ///
    /// Returns how many updates were applied.
    pub fn apply_all<I>(&self, updates: I, now: DateTime<Utc>) -> usize
    where
        I: IntoIterator<Item = StationUpdate>,
    {
        let mut registry = self.write();
        let mut applied = 0;
        for update in updates {
            registry.apply(update, now);
            applied += 1;
        }
        applied
    }

    /// See [`StationRegistry::apply`].
    pub fn apply(&self, update: StationUpdate, now: DateTime<Utc>) -> bool {
        self.write().apply(update, now)
    }

    /// See [`StationRegistry::sweep`].
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        self.write().sweep(now)
    }

    /// See [`StationRegistry::snapshot`].
    #[must_use]
    pub fn snapshot(&self, now: DateTime<Utc>) -> OutputSnapshot {
        self.read().snapshot(now)
    }

    /// Number of tracked stations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    #[must_use]
    pub fn thresholds(&self) -> Thresholds {
        *self.read().thresholds()
    }

    /// Subscribe to registry events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.read().subscribe()
    }

    // Records are replaced field by field with no panicking calls in between,
    // so a poisoned lock still guards consistent data.
    fn read(&self) -> RwLockReadGuard<'_, StationRegistry> {
        self.inner.read().unwrap_or_else(|poisoned| {
            warn!("Station registry lock poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, StationRegistry> {
        self.inner.write().unwrap_or_else(|poisoned| {
            warn!("Station registry lock poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }
}
