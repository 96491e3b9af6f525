// SPDX-License-Identifier: Apache-2.0

//! Per-path bookkeeping for the change detector and the tail reader.

use std::time::SystemTime;

use tokio::time::Instant;

/// Number of leading bytes that make up the head checksum
pub const HEAD_BYTES: usize = 8;

/// A 64-bit checksum of the first bytes of a file.
///
/// The leading bytes are packed big-endian so that a shorter head is a
/// prefix of the value of a longer one. This lets a file that is still
/// growing into its first eight bytes be told apart from a replaced file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeadChecksum {
    value: u64,
    len: u8,
}

impl HeadChecksum {
    /// Build a checksum from at most the first `HEAD_BYTES` of `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let len = bytes.len().min(HEAD_BYTES);
        let mut buf = [0u8; HEAD_BYTES];
        buf[..len].copy_from_slice(&bytes[..len]);
        Self {
            value: u64::from_be_bytes(buf),
            len: len as u8,
        }
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether this head can belong to the same file as `earlier` after
    /// content was appended. Anything else is a rotation.
    pub fn continues(&self, earlier: &HeadChecksum) -> bool {
        if self.len < earlier.len {
            return false;
        }
        if earlier.len == 0 {
            return true;
        }
        let mask = u64::MAX << (8 * (HEAD_BYTES - earlier.len()));
        self.value & mask == earlier.value & mask
    }
}

/// Metadata fingerprint of a watched file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    /// Last modification time, if the platform reports one
    pub modified: Option<SystemTime>,
    /// Size as reported to the reader (stepped when chunking is enabled)
    pub size: u64,
    /// Checksum of the first bytes
    pub head: HeadChecksum,
}

/// Detector-side state of one watched path
#[derive(Debug, Clone, Default)]
pub struct PerFileState {
    /// Last recorded fingerprint, `None` until the baseline is captured
    pub last: Option<Fingerprint>,
    /// Size handed out so far when chunked size reporting is enabled
    pub chunk_offset: Option<u64>,
    /// Emit a change on the next cycle even if nothing changed
    pub recheck: bool,
}

impl PerFileState {
    pub fn is_new(&self) -> bool {
        self.last.is_none()
    }

    /// Advance the chunk offset by `chunk` and return the size to report.
    pub fn step_chunk(&mut self, true_size: u64, chunk: u64, is_rotation: bool) -> u64 {
        let offset = self.chunk_offset.unwrap_or(0);
        let offset = if is_rotation || true_size < offset {
            0
        } else {
            offset
        };
        let next = offset.saturating_add(chunk).min(true_size);
        self.chunk_offset = Some(next);
        next
    }
}

/// Reservation token for a path's detect-then-read cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// No cycle in flight, eligible for the next poll
    Idle,
    /// A cycle is in flight since the given instant
    Reserved { since: Instant },
}

impl Reservation {
    pub fn is_idle(&self) -> bool {
        matches!(self, Reservation::Idle)
    }
}

/// Reader-side position in a watched file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOffset {
    /// Next unread byte
    pub position: u64,
}

impl ReadOffset {
    pub fn new(position: u64) -> Self {
        Self { position }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_head_checksum_packs_prefix() {
        let head = HeadChecksum::from_bytes(b"abcdefghijkl");
        assert_eq!(head.len(), 8);
        assert_eq!(head.value, u64::from_be_bytes(*b"abcdefgh"));

        let short = HeadChecksum::from_bytes(b"ab");
        assert_eq!(short.len(), 2);
        assert_eq!(short.value, u64::from_be_bytes(*b"ab\0\0\0\0\0\0"));

        assert!(HeadChecksum::from_bytes(b"").is_empty());
    }

    #[test]
    fn test_head_checksum_growth_is_not_rotation() {
        let empty = HeadChecksum::from_bytes(b"");
        let partial = HeadChecksum::from_bytes(b"a\nb");
        let full = HeadChecksum::from_bytes(b"a\nb\nc\nd\n");

        assert!(partial.continues(&empty));
        assert!(full.continues(&partial));
        assert!(full.continues(&full));
    }

    #[test]
    fn test_head_checksum_detects_replacement() {
        let old = HeadChecksum::from_bytes(b"2024-01-01 first");
        let new = HeadChecksum::from_bytes(b"2025-02-02 other");
        assert!(!new.continues(&old));

        // Truncation below the recorded head length
        let truncated = HeadChecksum::from_bytes(b"2024");
        assert!(!truncated.continues(&old));

        // Same length, different early byte
        let partial = HeadChecksum::from_bytes(b"ab");
        assert!(!HeadChecksum::from_bytes(b"xbcd").continues(&partial));
    }

    #[test]
    fn test_step_chunk_advances_and_resets() {
        let mut state = PerFileState::default();
        assert_eq!(state.step_chunk(250, 100, false), 100);
        assert_eq!(state.step_chunk(250, 100, false), 200);
        assert_eq!(state.step_chunk(250, 100, false), 250);
        assert_eq!(state.step_chunk(250, 100, false), 250);

        // File shrank below the handed-out size
        assert_eq!(state.step_chunk(120, 100, false), 100);

        // Rotation restarts from zero
        assert_eq!(state.step_chunk(500, 100, true), 100);
        assert_eq!(state.chunk_offset, Some(100));
    }

    #[test]
    fn test_per_file_state_is_new_until_baseline() {
        let mut state = PerFileState::default();
        assert!(state.is_new());
        state.last = Some(Fingerprint {
            modified: None,
            size: 0,
            head: HeadChecksum::default(),
        });
        assert!(!state.is_new());
    }
}
