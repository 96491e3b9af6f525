// SPDX-License-Identifier: Apache-2.0

//! Change detection for watched files.
//!
//! Every poll cycle reserves each idle path, probes its metadata and head
//! checksum, and compares the result against the recorded fingerprint. Size
//! and modification time say whether something changed; the head checksum
//! says whether the change was a rotation. The head is read on every probe
//! because metadata can lag or coincide even when the content was replaced.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::receivers::tail::event::{ChangeDescriptor, CycleAck};
use crate::receivers::tail::reporter::RateLimitedReporter;
use crate::receivers::tail::state::{
    Fingerprint, HEAD_BYTES, HeadChecksum, PerFileState, Reservation,
};

/// Outcome of probing one path on disk
#[derive(Debug)]
pub enum Probe {
    /// The path does not exist right now
    Missing,
    Observed {
        modified: Option<SystemTime>,
        size: u64,
        head: HeadChecksum,
    },
    MetadataFailed(io::Error),
    HeadFailed(io::Error),
}

/// Stat the path and read its head checksum.
pub async fn probe_path(path: &Path) -> Probe {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Probe::Missing,
        Err(e) => return Probe::MetadataFailed(e),
    };

    let head = match read_head(path).await {
        Ok(head) => head,
        Err(e) => return Probe::HeadFailed(e),
    };

    Probe::Observed {
        modified: metadata.modified().ok(),
        size: metadata.len(),
        head,
    }
}

async fn read_head(path: &Path) -> io::Result<HeadChecksum> {
    let mut file = File::open(path).await?;
    let mut buf = [0u8; HEAD_BYTES];
    let mut filled = 0;
    while filled < HEAD_BYTES {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(HeadChecksum::from_bytes(&buf[..filled]))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum DetectFailure {
    Metadata,
    Head,
}

#[derive(Debug)]
struct WatchedFile {
    state: PerFileState,
    reservation: Reservation,
}

/// Decides, per poll cycle, which watched files changed and how.
pub struct ChangeDetector {
    /// Watch order
    paths: Vec<PathBuf>,
    files: HashMap<PathBuf, WatchedFile>,
    chunk_size: Option<u64>,
    reporter: RateLimitedReporter<(DetectFailure, PathBuf)>,
}

impl ChangeDetector {
    pub fn new(
        paths: Vec<PathBuf>,
        chunk_size: Option<u64>,
        report_threshold: u64,
        report_cooldown: Duration,
    ) -> Self {
        let mut unique = Vec::with_capacity(paths.len());
        let mut files = HashMap::with_capacity(paths.len());
        for path in paths {
            if files.contains_key(&path) {
                continue;
            }
            files.insert(
                path.clone(),
                WatchedFile {
                    state: PerFileState::default(),
                    reservation: Reservation::Idle,
                },
            );
            unique.push(path);
        }

        Self {
            paths: unique,
            files,
            chunk_size,
            reporter: RateLimitedReporter::new(report_threshold, report_cooldown),
        }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Reserve every idle path for a new cycle and return them in watch
    /// order. Paths with a cycle still in flight are skipped, not queued.
    pub fn begin_cycle(&mut self) -> Vec<PathBuf> {
        let now = Instant::now();
        let mut reserved = Vec::new();

        for path in &self.paths {
            let Some(watched) = self.files.get_mut(path) else {
                continue;
            };
            match watched.reservation {
                Reservation::Idle => {
                    watched.reservation = Reservation::Reserved { since: now };
                    reserved.push(path.clone());
                }
                Reservation::Reserved { since } => {
                    debug!(
                        path = ?path,
                        in_flight_for = ?now.duration_since(since),
                        "Cycle still in flight, skipping path"
                    );
                }
            }
        }

        reserved
    }

    /// Compare a probe against the recorded fingerprint.
    ///
    /// Returns a change descriptor when the reader should look at the file.
    /// The reservation stays held either way; release it with [`complete`].
    ///
    /// [`complete`]: ChangeDetector::complete
    pub fn observe(&mut self, path: &Path, probe: Probe) -> Option<ChangeDescriptor> {
        let watched = self.files.get_mut(path)?;

        let (modified, true_size, head) = match probe {
            Probe::Missing => {
                debug!(path = ?path, "Watched file does not exist");
                return None;
            }
            Probe::MetadataFailed(e) => {
                let category = (DetectFailure::Metadata, path.to_path_buf());
                if self.reporter.should_report(category.clone()) {
                    warn!(
                        path = ?path,
                        failures = self.reporter.failures(&category),
                        "Failed to read file metadata: {}",
                        e
                    );
                }
                return None;
            }
            Probe::HeadFailed(e) => {
                let category = (DetectFailure::Head, path.to_path_buf());
                if self.reporter.should_report(category.clone()) {
                    warn!(
                        path = ?path,
                        failures = self.reporter.failures(&category),
                        "Failed to read file head: {}",
                        e
                    );
                }
                return None;
            }
            Probe::Observed {
                modified,
                size,
                head,
            } => (modified, size, head),
        };

        for kind in [DetectFailure::Metadata, DetectFailure::Head] {
            self.reporter.reset(&(kind, path.to_path_buf()));
        }

        let state = &mut watched.state;
        let Some(last) = state.last else {
            state.last = Some(Fingerprint {
                modified,
                size: true_size,
                head,
            });
            if self.chunk_size.is_some() {
                state.chunk_offset = Some(true_size);
            }
            debug!(path = ?path, size = true_size, "Captured baseline fingerprint");
            return None;
        };

        let is_rotation = !head.continues(&last.head);
        let current_size = match self.chunk_size {
            Some(chunk) => state.step_chunk(true_size, chunk, is_rotation),
            None => true_size,
        };
        let forced = std::mem::take(&mut state.recheck);

        if modified == last.modified && current_size == last.size && !is_rotation && !forced {
            return None;
        }

        state.last = Some(Fingerprint {
            modified,
            size: current_size,
            head,
        });

        if is_rotation {
            debug!(
                path = ?path,
                previous_size = last.size,
                current_size,
                "Head checksum changed, file was rotated"
            );
        }

        Some(ChangeDescriptor {
            path: path.to_path_buf(),
            is_rotation,
            current_size,
            previous_size: last.size,
        })
    }

    /// Release the path's reservation at the end of its cycle.
    pub fn complete(&mut self, path: &Path, ack: CycleAck) {
        if let Some(watched) = self.files.get_mut(path) {
            watched.reservation = Reservation::Idle;
            if ack == CycleAck::Recheck {
                watched.state.recheck = true;
            }
        }
    }

    pub fn is_reserved(&self, path: &Path) -> bool {
        self.files
            .get(path)
            .is_some_and(|w| !w.reservation.is_idle())
    }

    pub fn state(&self, path: &Path) -> Option<&PerFileState> {
        self.files.get(path).map(|w| &w.state)
    }
}
