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

//! Incremental reader for a growing log file.
//!
//! [`LogTail`] remembers how far it has read and which file it was reading.
//! Each [`LogTail::poll`] returns the complete lines appended since the last
//! call. When the file shrinks below the remembered offset or is replaced by a
//! different file (logrotate, `truncate -s 0`, a new daily log), the reader
//! starts over at the beginning of whatever is at the path now. Lines written
//! to the old file after the last poll are lost.

use std::fs::{File, Metadata, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use thiserror::Error;

/// Errors from the log reader.
#[derive(Debug, Error)]
pub enum TailError {
    #[error("cannot open log file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("error reading log file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Configuration for the log reader.
#[derive(Debug, Clone)]
pub struct TailConfig {
    /// Upper bound on bytes read by a single poll.
    pub max_read_bytes: usize,
    /// Skip whatever is already in the file at open time.
    pub start_at_end: bool,
    /// Empty the file once everything in it has been read.
    pub truncate_after_read: bool,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            max_read_bytes: 1024 * 1024,
            start_at_end: false,
            truncate_after_read: false,
        }
    }
}

/// Identity of the file behind a path, used to notice replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    #[cfg(unix)]
    dev: u64,
    #[cfg(unix)]
    ino: u64,
    #[cfg(not(unix))]
    created: Option<std::time::SystemTime>,
}

impl FileIdentity {
    #[cfg(unix)]
    fn of(meta: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
        }
    }

    #[cfg(not(unix))]
    fn of(meta: &Metadata) -> Self {
        Self {
            created: meta.created().ok(),
        }
    }
}

/// Read position within the current file.
#[derive(Debug)]
struct Cursor {
    file: File,
    identity: FileIdentity,
    offset: u64,
    /// Inside a line longer than the read limit; drop input up to its newline.
    skipping: bool,
}

/// Result of checking the path against the open cursor.
enum Resync {
    Unchanged,
    Rotated,
    Truncated,
    Missing,
}

/// Tails a log file line by line.
#[derive(Debug)]
pub struct LogTail {
    path: PathBuf,
    config: TailConfig,
    cursor: Option<Cursor>,
    rotations: u64,
}

impl LogTail {
    /// Open the log file. Fails if it does not exist or cannot be read.
    pub fn open(path: impl Into<PathBuf>, config: TailConfig) -> Result<Self, TailError> {
        let path = path.into();
        let mut cursor = open_cursor(&path, config.truncate_after_read)?;

        if config.start_at_end {
            cursor.offset = cursor
                .file
                .metadata()
                .map_err(|source| TailError::Open {
                    path: path.clone(),
                    source,
                })?
                .len();
        }

        info!(
            "Tailing {} from offset {}",
            path.display(),
            cursor.offset
        );

        Ok(Self {
            path,
            config,
            cursor: Some(cursor),
            rotations: 0,
        })
    }

    /// Path being tailed.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset just past the last line returned, if a file is open.
    #[must_use]
    pub fn offset(&self) -> Option<u64> {
        self.cursor.as_ref().map(|c| c.offset)
    }

    /// Number of rotations or truncations seen so far.
    #[must_use]
    pub fn rotations(&self) -> u64 {
        self.rotations
    }

    /// Return complete lines appended since the last poll.
    ///
    /// Never blocks waiting for data. A trailing line without a terminator is
    /// left in the file until a later poll sees its newline.
    pub fn poll(&mut self) -> Result<Vec<String>, TailError> {
        match self.resync() {
            Resync::Unchanged => {}
            Resync::Missing => return Ok(Vec::new()),
            Resync::Rotated => {
                info!("{} was replaced, reading new file from the start", self.path.display());
                self.rotations += 1;
            }
            Resync::Truncated => {
                info!("{} was truncated, reading from the start", self.path.display());
                self.rotations += 1;
            }
        }

        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(Vec::new());
        };

        let (lines, consumed, at_eof) =
            read_lines(cursor, self.config.max_read_bytes.max(1)).map_err(|source| TailError::Read {
                path: self.path.clone(),
                source,
            })?;
        cursor.offset += consumed;

        if !lines.is_empty() {
            debug!(
                "Read {} lines from {} (offset {})",
                lines.len(),
                self.path.display(),
                cursor.offset
            );
        }

        if self.config.truncate_after_read && at_eof && cursor.offset > 0 {
            match cursor.file.set_len(0) {
                Ok(()) => cursor.offset = 0,
                Err(e) => warn!("Cannot truncate {}: {}", self.path.display(), e),
            }
        }

        Ok(lines)
    }

    /// Compare the path with the open file and reopen if needed.
    fn resync(&mut self) -> Resync {
        let meta = match std::fs::metadata(&self.path) {
            Ok(meta) => meta,
            Err(e) => {
                if self.cursor.take().is_some() {
                    warn!("Log file {} is gone: {}", self.path.display(), e);
                }
                return Resync::Missing;
            }
        };

        let identity = FileIdentity::of(&meta);
        let status = match &self.cursor {
            None => Resync::Rotated,
            Some(cursor) if cursor.identity != identity => Resync::Rotated,
            Some(cursor) if meta.len() < cursor.offset => Resync::Truncated,
            Some(_) => return Resync::Unchanged,
        };

        match open_cursor(&self.path, self.config.truncate_after_read) {
            Ok(cursor) => {
                self.cursor = Some(cursor);
                status
            }
            Err(e) => {
                warn!("{e}");
                self.cursor = None;
                Resync::Missing
            }
        }
    }
}

fn open_cursor(path: &Path, writable: bool) -> Result<Cursor, TailError> {
    let open_err = |source| TailError::Open {
        path: path.to_path_buf(),
        source,
    };

    let file = OpenOptions::new()
        .read(true)
        .write(writable)
        .open(path)
        .map_err(open_err)?;
    let identity = FileIdentity::of(&file.metadata().map_err(open_err)?);

    Ok(Cursor {
        file,
        identity,
        offset: 0,
        skipping: false,
    })
}

/// Read up to `limit` bytes from the cursor and split off complete lines.
///
/// Returns the lines, the number of bytes they covered (terminators included),
/// and whether everything up to end of file was consumed.
fn read_lines(cursor: &mut Cursor, limit: usize) -> io::Result<(Vec<String>, u64, bool)> {
    cursor.file.seek(SeekFrom::Start(cursor.offset))?;

    let mut buf = Vec::new();
    let read = (&mut cursor.file).take(limit as u64).read_to_end(&mut buf)?;

    let Some(last_newline) = buf.iter().rposition(|&b| b == b'\n') else {
        if read == limit {
            // A single line longer than the read limit can never complete.
            if !cursor.skipping {
                warn!("Discarding a line longer than {limit} bytes");
                cursor.skipping = true;
            }
            return Ok((Vec::new(), read as u64, false));
        }
        return Ok((Vec::new(), 0, read == 0));
    };

    let mut segments = buf[..last_newline].split(|&b| b == b'\n');
    if cursor.skipping {
        // Tail end of the oversized line.
        segments.next();
        cursor.skipping = false;
    }

    let lines = segments
        .map(|raw| {
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            String::from_utf8_lossy(raw).into_owned()
        })
        .collect();

    let consumed = last_newline + 1;
    let at_eof = consumed == read && read < limit;
    Ok((lines, consumed as u64, at_eof))
}
