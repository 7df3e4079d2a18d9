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

//! Minimal NMEA 0183 sentence encoding for a fixed-position GPS feed.

use chrono::{DateTime, Utc};

const MICRO_MINUTES_PER_DEGREE: u64 = 60 * 1_000_000;

/// XOR of every byte between `$` and `*`.
#[must_use]
pub fn checksum(body: &str) -> u8 {
    body.bytes().fold(0, |acc, b| acc ^ b)
}

/// Latitude as `ddmm.mmmmmm,N` (or `S`).
#[must_use]
pub fn format_latitude(degrees: f64) -> String {
    let hemisphere = if degrees < 0.0 { 'S' } else { 'N' };
    let (whole, minutes) = split_degrees(degrees);
    format!("{whole:02}{minutes},{hemisphere}")
}

/// Longitude as `dddmm.mmmmmm,E` (or `W`).
#[must_use]
pub fn format_longitude(degrees: f64) -> String {
    let hemisphere = if degrees < 0.0 { 'W' } else { 'E' };
    let (whole, minutes) = split_degrees(degrees);
    format!("{whole:03}{minutes},{hemisphere}")
}

/// Split into whole degrees and `mm.mmmmmm` minutes, rounding in integer
/// micro-minutes so 59.9999999' carries into the next degree.
fn split_degrees(degrees: f64) -> (u64, String) {
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "value is a non-negative coordinate well inside u64 range"
    )]
    let total = (degrees.abs() * 60.0 * 1_000_000.0).round() as u64;
    let whole = total / MICRO_MINUTES_PER_DEGREE;
    let micro = total % MICRO_MINUTES_PER_DEGREE;
    (whole, format!("{:02}.{:06}", micro / 1_000_000, micro % 1_000_000))
}

/// A `$GPGGA` fix sentence (without line terminator) for a fixed position.
///
/// Reports a valid GPS fix with 12 satellites, HDOP 1.0 and zero altitude.
#[must_use]
pub fn gga_sentence(at: DateTime<Utc>, latitude: f64, longitude: f64) -> String {
    let body = format!(
        "GPGGA,{},{},{},1,12,1.0,0.0,M,0.0,M,,",
        at.format("%H%M%S"),
        format_latitude(latitude),
        format_longitude(longitude)
    );
    format!("${body}*{:02X}", checksum(&body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_checksum() {
        // Reference sentence from the NMEA 0183 documentation.
        let body = "GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,";
        assert_eq!(checksum(body), 0x47);
    }

    #[test]
    fn test_coordinates() {
        assert_eq!(format_latitude(33.435), "3326.100000,N");
        assert_eq!(format_longitude(-112.008_333_34), "11200.500000,W");
        assert_eq!(format_latitude(-5.5), "0530.000000,S");
        assert_eq!(format_longitude(7.25), "00715.000000,E");
        assert_eq!(format_latitude(0.0), "0000.000000,N");
    }

    #[test]
    fn test_minutes_carry() {
        assert_eq!(format_latitude(33.999_999_999_9), "3400.000000,N");
    }

    #[test]
    fn test_gga_sentence() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 9, 5, 7).unwrap();
        let sentence = gga_sentence(at, 33.435, -112.008_333_34);
        let body = "GPGGA,090507,3326.100000,N,11200.500000,W,1,12,1.0,0.0,M,0.0,M,,";
        assert_eq!(sentence, format!("${body}*{:02X}", checksum(body)));
        assert!(sentence.starts_with("$GPGGA,090507,"));
    }
}
