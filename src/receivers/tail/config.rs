// SPDX-License-Identifier: Apache-2.0

//! Configuration for the tail receiver.

use std::path::PathBuf;
use std::time::Duration;

use encoding_rs::Encoding;

/// Where to start reading when a path is first seen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartAt {
    /// Read the file from byte 0 on the first change
    Beginning,
    /// Only read content appended after the baseline observation
    #[default]
    End,
}

/// Configuration for the tail receiver
#[derive(Debug, Clone)]
pub struct TailReceiverConfig {
    /// Files to watch, polled in this order
    pub paths: Vec<PathBuf>,
    /// How often every idle path is polled for metadata changes
    pub poll_interval: Duration,
    /// Files smaller than this are never read
    pub min_file_size: u64,
    /// Unread deltas smaller than this are left to accumulate
    pub min_read_size: u64,
    /// Upper bound on the bytes requested by a single read
    pub max_read_size: u64,
    /// Report file size to the reader in `max_read_size` steps
    pub read_in_chunks: bool,
    /// Where to start reading a newly seen path
    pub start_at: StartAt,
    /// WHATWG label of the text encoding of the watched files
    pub encoding: String,
    /// Line delimiter, matched byte-exact after encoding
    pub delimiter: String,
    /// Failures tolerated per path and category before any of them is logged
    pub report_threshold: u64,
    /// Minimum time between two logged failures of the same path and category
    pub report_cooldown: Duration,
    /// Include the file name in emitted events
    pub include_file_name: bool,
}

impl Default for TailReceiverConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            poll_interval: Duration::from_millis(1000),
            min_file_size: 1,
            min_read_size: 1,
            max_read_size: 1024 * 1024,
            read_in_chunks: false,
            start_at: StartAt::End,
            encoding: "utf-8".to_string(),
            delimiter: "\n".to_string(),
            report_threshold: 25,
            report_cooldown: Duration::from_secs(5 * 60),
            include_file_name: true,
        }
    }
}

impl TailReceiverConfig {
    /// Resolve the configured encoding label
    pub fn resolve_encoding(&self) -> Option<&'static Encoding> {
        Encoding::for_label(self.encoding.trim().as_bytes())
    }

    /// Chunk size used for incremental size reporting, if enabled
    pub fn chunk_size(&self) -> Option<u64> {
        self.read_in_chunks.then_some(self.max_read_size)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.paths.is_empty() {
            return Err("At least one path must be specified".to_string());
        }

        if self.poll_interval.is_zero() {
            return Err("poll_interval must be positive".to_string());
        }

        if self.max_read_size == 0 {
            return Err("max_read_size must be positive".to_string());
        }

        if self.min_read_size > self.max_read_size {
            return Err(format!(
                "min_read_size ({}) cannot exceed max_read_size ({})",
                self.min_read_size, self.max_read_size
            ));
        }

        if self.delimiter.is_empty() {
            return Err("delimiter cannot be empty".to_string());
        }

        if self.resolve_encoding().is_none() {
            return Err(format!("Unknown encoding '{}'", self.encoding));
        }

        Ok(())
    }
}
