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

//! Protocol layer for APRS packet log parsing.
//!
//! This module provides a trait-based abstraction over packet log formats.
//! Currently implements the Dire Wolf CSV log (`direwolf -L`), which already
//! carries decoded positions in signed decimal degrees.

mod direwolf;

pub use direwolf::{decode, DireWolfParser, DIRE_WOLF_FIELD_NAMES, MAX_COMMENT_CHARS};

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Reasons a log line could not be turned into a station update.
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("invalid line format: {0}")]
    InvalidFormat(String),

    #[error("column header row")]
    Header,

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid value for field '{field}': {value}")]
    InvalidValue { field: &'static str, value: String },

    /// The packet decoded fine but carries no position (status, message,
    /// telemetry and similar report types).
    #[error("not a position report from {0}")]
    NotPositionReport(String),
}

/// A decoded position report for one station.
#[derive(Debug, Clone, PartialEq)]
pub struct StationUpdate {
    /// Station identifier (the packet's source callsign, e.g. "N0CALL-9").
    pub id: String,
    /// Latitude in signed decimal degrees (north positive).
    pub latitude: f64,
    /// Longitude in signed decimal degrees (east positive).
    pub longitude: f64,
    /// Free-text comment, trimmed and bounded to [`MAX_COMMENT_CHARS`].
    pub comment: String,
    /// Time the decoder logged the packet, if the line carried one.
    pub reported_at: Option<DateTime<Utc>>,
}

/// Trait for packet log parsers.
///
/// Implement this trait to add support for other decoder log formats.
pub trait Protocol {
    /// The message type produced by this parser.
    type Message;
    /// The error type for parsing failures.
    type Error;

    /// Parse input bytes into a message.
    ///
    /// Returns `Ok(Some(message))` if parsing succeeded,
    /// `Ok(None)` if the input is valid but doesn't produce a message,
    /// or `Err(error)` if parsing failed.
    fn parse(&mut self, input: &[u8]) -> Result<Option<Self::Message>, Self::Error>;
}
