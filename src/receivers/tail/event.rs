// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use serde::Serialize;

/// One complete line read from a watched file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineEvent {
    /// Path of the watched file
    pub path: PathBuf,
    /// File name, when enabled in the config
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Decoded line text without the delimiter
    pub line: String,
    /// When the line was read
    pub observed_time_unix_nano: u64,
}

/// Change notification from the detector to the reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeDescriptor {
    pub path: PathBuf,
    /// The head checksum no longer matches the recorded one
    pub is_rotation: bool,
    /// Size the reader may consume up to
    pub current_size: u64,
    /// Size recorded by the previous fingerprint
    pub previous_size: u64,
}

/// How a detect-then-read cycle ended, reported back to the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleAck {
    /// Nothing further to do until the file changes again
    Done,
    /// Notify again on the next cycle even if the file is unchanged
    Recheck,
}
