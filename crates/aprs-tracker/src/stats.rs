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

//! Running counters for the pipeline tasks.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the pipeline tasks. Relaxed ordering: these are
/// diagnostics only.
#[derive(Debug, Default)]
pub struct PipelineStats {
    lines_read: AtomicU64,
    parse_failures: AtomicU64,
    updates_applied: AtomicU64,
    backlog_skipped: AtomicU64,
    rotations: AtomicU64,
    renders: AtomicU64,
    render_failures: AtomicU64,
    directives_written: AtomicU64,
}

/// Plain copy of [`PipelineStats`] at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub lines_read: u64,
    pub parse_failures: u64,
    pub updates_applied: u64,
    pub backlog_skipped: u64,
    pub rotations: u64,
    pub renders: u64,
    pub render_failures: u64,
    pub directives_written: u64,
}

impl PipelineStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_lines_read(&self, n: u64) {
        self.lines_read.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_parse_failures(&self, n: u64) {
        self.parse_failures.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_updates_applied(&self, n: u64) {
        self.updates_applied.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_backlog_skipped(&self, n: u64) {
        self.backlog_skipped.fetch_add(n, Ordering::Relaxed);
    }

    /// Rotation count is owned by the reader; store its running total.
    pub fn set_rotations(&self, total: u64) {
        self.rotations.store(total, Ordering::Relaxed);
    }

    pub fn record_render(&self, ok: bool) {
        if ok {
            self.renders.fetch_add(1, Ordering::Relaxed);
        } else {
            self.render_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn add_directive(&self) {
        self.directives_written.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            lines_read: self.lines_read.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            updates_applied: self.updates_applied.load(Ordering::Relaxed),
            backlog_skipped: self.backlog_skipped.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
            renders: self.renders.load(Ordering::Relaxed),
            render_failures: self.render_failures.load(Ordering::Relaxed),
            directives_written: self.directives_written.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "lines={} bad={} applied={} backlog={} rotations={} renders={} render_errors={} directives={}",
            self.lines_read,
            self.parse_failures,
            self.updates_applied,
            self.backlog_skipped,
            self.rotations,
            self.renders,
            self.render_failures,
            self.directives_written
        )
    }
}
