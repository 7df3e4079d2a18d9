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

//! Dire Wolf CSV log parser.
//!
//! Parses the per-packet CSV log written by Dire Wolf when started with `-L`
//! (or `-l` for daily files). Fields may be quoted and may contain commas.
//!
//! Line format:
//! ```text
//! chan,utime,isotime,source,heard,level,error,dti,name,symbol,latitude,longitude,<...>,comment
//! ```

use chrono::{DateTime, Utc};

use super::{ParseError, Protocol, StationUpdate};

/// Column names of the Dire Wolf CSV log, in order.
pub const DIRE_WOLF_FIELD_NAMES: [&str; 22] = [
    "chan",
    "utime",
    "isotime",
    "source",
    "heard",
    "level",
    "error",
    "dti",
    "name",
    "symbol",
    "latitude",
    "longitude",
    "speed",
    "course",
    "altitude",
    "frequency",
    "offset",
    "tone",
    "system",
    "status",
    "telemetry",
    "comment",
];

/// Comments longer than this are cut (counted in characters, not bytes).
pub const MAX_COMMENT_CHARS: usize = 80;

const ISOTIME: usize = 2;
const SOURCE: usize = 3;
const LATITUDE: usize = 10;
const LONGITUDE: usize = 11;
const COMMENT: usize = 21;

/// Parser for Dire Wolf CSV log lines.
#[derive(Debug, Default)]
pub struct DireWolfParser;

impl DireWolfParser {
    /// Create a new Dire Wolf parser.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Protocol for DireWolfParser {
    type Message = StationUpdate;
    type Error = ParseError;

    /// Non-position reports are valid input that simply yields no update.
    fn parse(&mut self, input: &[u8]) -> Result<Option<StationUpdate>, ParseError> {
        let line = std::str::from_utf8(input)
            .map_err(|e| ParseError::InvalidFormat(format!("invalid UTF-8: {e}")))?;

        match decode(line) {
            Ok(update) => Ok(Some(update)),
            Err(ParseError::NotPositionReport(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Decode a single log line into a station update.
///
/// Pure: the same line always gives the same result.
pub fn decode(line: &str) -> Result<StationUpdate, ParseError> {
    let fields = split_fields(line)?;

    if fields.len() <= LONGITUDE {
        return Err(ParseError::InvalidFormat(format!(
            "expected at least {} columns, got {}",
            LONGITUDE + 1,
            fields.len()
        )));
    }

    let id = fields[SOURCE].trim();
    if id.is_empty() {
        return Err(ParseError::MissingField("source"));
    }
    if id == "source" {
        return Err(ParseError::Header);
    }

    let lat_field = fields[LATITUDE].trim();
    let lon_field = fields[LONGITUDE].trim();
    if lat_field.is_empty() || lon_field.is_empty() {
        return Err(ParseError::NotPositionReport(id.to_string()));
    }

    let latitude = parse_coordinate("latitude", lat_field, 90.0, ('N', 'S'))?;
    let longitude = parse_coordinate("longitude", lon_field, 180.0, ('E', 'W'))?;
    let reported_at = parse_isotime(fields[ISOTIME].trim())?;

    let comment = fields
        .get(COMMENT)
        .map(|c| c.trim().chars().take(MAX_COMMENT_CHARS).collect())
        .unwrap_or_default();

    Ok(StationUpdate {
        id: id.to_string(),
        latitude,
        longitude,
        comment,
        reported_at,
    })
}

fn split_fields(line: &str) -> Result<Vec<String>, ParseError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());

    let mut record = csv::StringRecord::new();
    match reader.read_record(&mut record) {
        Ok(true) => Ok(record.iter().map(str::to_string).collect()),
        Ok(false) => Err(ParseError::InvalidFormat("empty line".to_string())),
        Err(e) => Err(ParseError::InvalidFormat(e.to_string())),
    }
}

/// Parse a decimal degree value, strictly inside `±limit`.
///
/// Dire Wolf writes signed values, but a trailing hemisphere letter is also
/// accepted so hand-edited or replayed logs work too.
fn parse_coordinate(
    field: &'static str,
    value: &str,
    limit: f64,
    (positive, negative): (char, char),
) -> Result<f64, ParseError> {
    let invalid = || ParseError::InvalidValue {
        field,
        value: value.to_string(),
    };

    let (number, sign) = match value.chars().last().map(|c| c.to_ascii_uppercase()) {
        Some(c) if c == positive => (&value[..value.len() - 1], 1.0),
        Some(c) if c == negative => (&value[..value.len() - 1], -1.0),
        _ => (value, 1.0),
    };

    let degrees = number.trim().parse::<f64>().map_err(|_| invalid())?;
    if !degrees.is_finite() {
        return Err(invalid());
    }
    if sign < 0.0 && degrees < 0.0 {
        // "-33.4S" is ambiguous
        return Err(invalid());
    }

    let degrees = degrees * sign;
    if degrees <= -limit || degrees >= limit {
        return Err(invalid());
    }
    Ok(degrees)
}

fn parse_isotime(value: &str) -> Result<Option<DateTime<Utc>>, ParseError> {
    if value.is_empty() {
        return Ok(None);
    }
    DateTime::parse_from_rfc3339(value)
        .map(|t| Some(t.with_timezone(&Utc)))
        .map_err(|e| ParseError::InvalidValue {
            field: "isotime",
            value: format!("{value} ({e})"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const POSITION: &str = "0,1704110400,2024-01-01T12:00:00Z,STA1,STA1,50(12/9),0,!,,/>,33.400000,-112.000000,0,0,,,,,,,,test";

    #[test]
    fn test_decode_position() {
        let update = decode(POSITION).unwrap();
        assert_eq!(update.id, "STA1");
        assert!((update.latitude - 33.4).abs() < 1e-9);
        assert!((update.longitude - (-112.0)).abs() < 1e-9);
        assert_eq!(update.comment, "test");
        assert_eq!(
            update.reported_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_decode_is_deterministic() {
        assert_eq!(decode(POSITION), decode(POSITION));
    }

    #[test]
    fn test_decode_quoted_comment_with_commas() {
        let line = "1,1704110400,2024-01-01T12:00:00Z,W7ABC-9,W7ABC-9,30,0,`,,/>,33.5,-111.9,12,90,350,,,,,,,\"Mobile, QRV 146.52\"";
        let update = decode(line).unwrap();
        assert_eq!(update.id, "W7ABC-9");
        assert_eq!(update.comment, "Mobile, QRV 146.52");
    }

    #[test]
    fn test_decode_header_row() {
        let header = DIRE_WOLF_FIELD_NAMES.join(",");
        assert_eq!(decode(&header), Err(ParseError::Header));
    }

    #[test]
    fn test_decode_status_report_has_no_position() {
        let line = "0,1704110400,2024-01-01T12:00:00Z,STA2,STA2,50,0,>,,,,,,,,,,,,,,On the air";
        assert_eq!(
            decode(line),
            Err(ParseError::NotPositionReport("STA2".to_string()))
        );

        let mut parser = DireWolfParser::new();
        assert_eq!(parser.parse(line.as_bytes()).unwrap(), None);
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            decode("this is not a packet"),
            Err(ParseError::InvalidFormat(_))
        ));
        assert!(matches!(decode(""), Err(ParseError::InvalidFormat(_))));
    }

    #[test]
    fn test_decode_out_of_range() {
        let line = "0,0,2024-01-01T12:00:00Z,STA3,STA3,0,0,!,,/>,91.0,-112.0";
        assert!(matches!(
            decode(line),
            Err(ParseError::InvalidValue { field: "latitude", .. })
        ));

        let line = "0,0,2024-01-01T12:00:00Z,STA3,STA3,0,0,!,,/>,33.0,180.0";
        assert!(matches!(
            decode(line),
            Err(ParseError::InvalidValue { field: "longitude", .. })
        ));

        let line = "0,0,2024-01-01T12:00:00Z,STA3,STA3,0,0,!,,/>,NaN,10.0";
        assert!(decode(line).is_err());
    }

    #[test]
    fn test_decode_hemisphere_suffix() {
        let line = "0,0,,STA4,STA4,0,0,!,,/>,33.25S,112.5W";
        let update = decode(line).unwrap();
        assert!((update.latitude - (-33.25)).abs() < 1e-9);
        assert!((update.longitude - (-112.5)).abs() < 1e-9);
        assert_eq!(update.reported_at, None);
        assert_eq!(update.comment, "");
    }

    #[test]
    fn test_decode_bad_isotime() {
        let line = "0,0,yesterday,STA5,STA5,0,0,!,,/>,33.0,-112.0";
        assert!(matches!(
            decode(line),
            Err(ParseError::InvalidValue { field: "isotime", .. })
        ));
    }

    #[test]
    fn test_decode_missing_source() {
        let line = "0,0,2024-01-01T12:00:00Z,  ,,0,0,!,,/>,33.0,-112.0";
        assert_eq!(decode(line), Err(ParseError::MissingField("source")));
    }

    #[test]
    fn test_comment_is_bounded() {
        let long = "x".repeat(MAX_COMMENT_CHARS * 2);
        let line = format!("0,0,,STA6,STA6,0,0,!,,/>,33.0,-112.0,,,,,,,,,,  {long}  ");
        let update = decode(&line).unwrap();
        assert_eq!(update.comment.chars().count(), MAX_COMMENT_CHARS);
    }

    #[test]
    fn test_parse_invalid_utf8() {
        let mut parser = DireWolfParser::new();
        assert!(matches!(
            parser.parse(&[0xff, 0xfe, b',']),
            Err(ParseError::InvalidFormat(_))
        ));
    }
}
