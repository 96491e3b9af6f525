// SPDX-License-Identifier: Apache-2.0

//! Polling file tail receiver
//!
//! Watches a fixed set of file paths, detects appends and rotations by
//! comparing size, modification time and a checksum of the first bytes, and
//! emits every complete new line as a [`LineEvent`]. All file I/O runs as
//! non-blocking futures on the tokio runtime.

pub mod config;
pub mod detector;
pub mod error;
pub mod event;
pub mod lines;
pub mod reader;
pub mod receiver;
pub mod reporter;
pub mod state;

pub use config::{StartAt, TailReceiverConfig};
pub use error::{Error, ReadError, Result};
pub use event::LineEvent;
pub use receiver::{FileAccess, TailReceiver, TokioFileAccess};
