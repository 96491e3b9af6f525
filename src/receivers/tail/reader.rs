// SPDX-License-Identifier: Apache-2.0

//! Turns change descriptors into line events.
//!
//! A cycle is split in three steps so the async read can run without
//! borrowing the reader: [`TailReader::plan`] decides whether and what to
//! read, [`read_range`] performs the bounded read, and
//! [`TailReader::complete`] tokenizes the bytes and moves the offset.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, warn};

use crate::receivers::tail::config::{StartAt, TailReceiverConfig};
use crate::receivers::tail::error::{ReadError, Result};
use crate::receivers::tail::event::{ChangeDescriptor, CycleAck, LineEvent};
use crate::receivers::tail::lines::LineDecoder;
use crate::receivers::tail::reporter::RateLimitedReporter;
use crate::receivers::tail::state::ReadOffset;

/// A bounded read to perform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub path: PathBuf,
    /// First byte to read
    pub position: u64,
    /// Number of bytes to read
    pub len: u64,
    /// The read starts mid-line and the leading fragment must be dropped
    pub skip_leading_fragment: bool,
    /// More unread content remains after this read
    pub backlog: bool,
}

/// What to do with a change descriptor
#[derive(Debug, PartialEq, Eq)]
pub enum ReadPlan {
    /// Nothing to read this cycle
    Skip(CycleAck),
    Read(ReadRequest),
}

/// Output of a completed read
#[derive(Debug, Default)]
pub struct ReadOutcome {
    pub events: Vec<LineEvent>,
    /// Bytes given up by the oversized-delta policy
    pub skipped_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ReadFailure {
    Open,
    Read,
    Oversize,
}

/// Open the file read-only, read `len` bytes at `position`, and close it.
pub async fn read_range(request: &ReadRequest) -> std::result::Result<Vec<u8>, ReadError> {
    let mut options = OpenOptions::new();
    options.read(true);
    // Ask for synchronized I/O so data flushed by a concurrent writer is visible
    #[cfg(unix)]
    options.custom_flags(libc::O_SYNC);

    let mut file = options.open(&request.path).await.map_err(ReadError::Open)?;
    file.seek(SeekFrom::Start(request.position))
        .await
        .map_err(ReadError::Read)?;

    let mut buf = Vec::with_capacity(request.len as usize);
    file.take(request.len)
        .read_to_end(&mut buf)
        .await
        .map_err(ReadError::Read)?;

    Ok(buf)
}

pub struct TailReader {
    offsets: HashMap<PathBuf, ReadOffset>,
    start_at: StartAt,
    min_file_size: u64,
    min_read_size: u64,
    max_read_size: u64,
    include_file_name: bool,
    decoder: LineDecoder,
    reporter: RateLimitedReporter<(ReadFailure, PathBuf)>,
}

impl TailReader {
    pub fn new(config: &TailReceiverConfig) -> Result<Self> {
        Ok(Self {
            offsets: HashMap::new(),
            start_at: config.start_at,
            min_file_size: config.min_file_size,
            min_read_size: config.min_read_size,
            max_read_size: config.max_read_size,
            include_file_name: config.include_file_name,
            decoder: LineDecoder::from_config(config)?,
            reporter: RateLimitedReporter::new(config.report_threshold, config.report_cooldown),
        })
    }

    /// Current read offset of a path, if it has been seen
    pub fn offset(&self, path: &Path) -> Option<u64> {
        self.offsets.get(path).map(|o| o.position)
    }

    /// Decide what to read for a change.
    pub fn plan(&mut self, change: &ChangeDescriptor) -> ReadPlan {
        let start_at = self.start_at;
        let offset = self
            .offsets
            .entry(change.path.clone())
            .or_insert_with(|| {
                // End of file as of the detector's baseline
                ReadOffset::new(match start_at {
                    StartAt::Beginning => 0,
                    StartAt::End => change.previous_size,
                })
            });

        if change.is_rotation {
            // The reported size may still describe the old file, read once
            // the next cycle has settled
            debug!(path = ?change.path, "File rotated, resetting offset and deferring read");
            offset.position = 0;
            return ReadPlan::Skip(CycleAck::Recheck);
        }

        if offset.position > change.current_size {
            debug!(
                path = ?change.path,
                offset = offset.position,
                current_size = change.current_size,
                "File shrank without rotation, resetting offset"
            );
            offset.position = 0;
        }

        if change.current_size < self.min_file_size {
            return ReadPlan::Skip(CycleAck::Done);
        }

        let position = offset.position;
        let delta = change.current_size - position;
        if delta == 0 || delta < self.min_read_size {
            return ReadPlan::Skip(CycleAck::Done);
        }

        let max = self.max_read_size;
        let oversize = (ReadFailure::Oversize, change.path.clone());
        let request = if delta > max.saturating_mul(2) {
            // Keep multi-byte code units aligned with the start of the file
            let step = self.decoder.step() as u64;
            let start = (change.current_size - max).div_ceil(step) * step;
            if self.reporter.should_report(oversize.clone()) {
                warn!(
                    path = ?change.path,
                    unread = delta,
                    skipped = start - position,
                    occurrences = self.reporter.failures(&oversize),
                    "File is growing faster than it can be read, skipping input"
                );
            }
            ReadRequest {
                path: change.path.clone(),
                position: start,
                len: change.current_size - start,
                skip_leading_fragment: true,
                backlog: false,
            }
        } else if delta > max {
            ReadRequest {
                path: change.path.clone(),
                position,
                len: max,
                skip_leading_fragment: false,
                backlog: true,
            }
        } else {
            self.reporter.reset(&oversize);
            ReadRequest {
                path: change.path.clone(),
                position,
                len: delta,
                skip_leading_fragment: false,
                backlog: false,
            }
        };

        ReadPlan::Read(request)
    }

    /// Apply the result of a read: tokenize, emit, and move the offset.
    pub fn complete(
        &mut self,
        request: &ReadRequest,
        result: std::result::Result<Vec<u8>, ReadError>,
    ) -> (ReadOutcome, CycleAck) {
        let bytes = match result {
            Ok(bytes) => bytes,
            Err(e) => {
                let kind = match e {
                    ReadError::Open(_) => ReadFailure::Open,
                    ReadError::Read(_) => ReadFailure::Read,
                };
                let category = (kind, request.path.clone());
                if self.reporter.should_report(category.clone()) {
                    warn!(
                        path = ?request.path,
                        position = request.position,
                        len = request.len,
                        failures = self.reporter.failures(&category),
                        "Failed to read file: {}",
                        e
                    );
                }
                // Offset untouched, the same range is retried next cycle
                return (ReadOutcome::default(), CycleAck::Recheck);
            }
        };
        for kind in [ReadFailure::Open, ReadFailure::Read] {
            self.reporter.reset(&(kind, request.path.clone()));
        }

        let Some(offset) = self.offsets.get_mut(&request.path) else {
            return (ReadOutcome::default(), CycleAck::Done);
        };

        let mut outcome = ReadOutcome::default();
        if request.skip_leading_fragment {
            outcome.skipped_bytes = request.position.saturating_sub(offset.position);
        }

        let read_len = bytes.len() as u64;
        let short_read = read_len < request.len;
        offset.position = request.position + read_len;

        let body = if request.position == 0 {
            &bytes[self.decoder.bom_len(&bytes)..]
        } else {
            &bytes[..]
        };

        let split = self.decoder.split(body, request.skip_leading_fragment);
        let mut lines = split.lines;
        let mut remainder = split.remainder as u64;

        if remainder > 0 && remainder == body.len() as u64 && read_len >= self.max_read_size {
            // A single line longer than a full read, emit what we have so the
            // offset keeps moving
            let (text, _) = self.decoder.decode(body);
            debug!(path = ?request.path, len = read_len, "Line exceeds max read size, emitting as is");
            lines.push(text);
            remainder = 0;
        }
        offset.position -= remainder;

        if split.malformed > 0 {
            debug!(
                path = ?request.path,
                lines = split.malformed,
                encoding = self.decoder.encoding().name(),
                "Replaced malformed byte sequences while decoding"
            );
        }
        if split.dropped > 0 {
            outcome.skipped_bytes += split.dropped as u64;
        }

        let observed_time_unix_nano = now_unix_nano();
        let file_name = self
            .include_file_name
            .then(|| request.path.file_name().and_then(|n| n.to_str()).map(|s| s.to_string()))
            .flatten();

        outcome.events = lines
            .into_iter()
            .map(|line| LineEvent {
                path: request.path.clone(),
                file_name: file_name.clone(),
                line,
                observed_time_unix_nano,
            })
            .collect();

        debug!(
            path = ?request.path,
            start = request.position,
            bytes = read_len,
            lines = outcome.events.len(),
            offset = offset.position,
            "Read new content"
        );

        // A short read means the file changed under us, look again next cycle
        let ack = if request.backlog || short_read {
            CycleAck::Recheck
        } else {
            CycleAck::Done
        };
        (outcome, ack)
    }
}

fn now_unix_nano() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos() as u64
}
