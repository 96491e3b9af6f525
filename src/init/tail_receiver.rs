// SPDX-License-Identifier: Apache-2.0

use crate::receivers::tail::config::{StartAt, TailReceiverConfig};
use clap::{ArgAction, Args, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Copy, Clone, PartialEq, Eq, Debug, ValueEnum)]
pub enum StartAtArg {
    Beginning,
    End,
}

impl From<StartAtArg> for StartAt {
    fn from(value: StartAtArg) -> Self {
        match value {
            StartAtArg::Beginning => StartAt::Beginning,
            StartAtArg::End => StartAt::End,
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct TailReceiverArgs {
    /// Comma-separated list of files to watch
    #[arg(long, env = "HOSTLOG_TAIL_PATHS", value_delimiter = ',', required = true)]
    pub tail_paths: Vec<PathBuf>,

    /// How often watched files are polled, in milliseconds
    #[arg(long, env = "HOSTLOG_TAIL_POLL_INTERVAL_MS", default_value = "1000")]
    pub tail_poll_interval_ms: u64,

    /// Files smaller than this many bytes are not read
    #[arg(long, env = "HOSTLOG_TAIL_MIN_FILE_SIZE", default_value = "1")]
    pub tail_min_file_size: u64,

    /// Wait until at least this many new bytes are available before reading
    #[arg(long, env = "HOSTLOG_TAIL_MIN_READ_SIZE", default_value = "1")]
    pub tail_min_read_size: u64,

    /// Maximum number of bytes read from a file in one cycle
    #[arg(long, env = "HOSTLOG_TAIL_MAX_READ_SIZE", default_value = "1048576")]
    pub tail_max_read_size: u64,

    /// Report file growth in steps of the max read size
    #[arg(long, env = "HOSTLOG_TAIL_READ_IN_CHUNKS", default_value = "false")]
    pub tail_read_in_chunks: bool,

    /// Where to start reading a file seen for the first time
    #[arg(value_enum, long, env = "HOSTLOG_TAIL_START_AT", default_value = "end")]
    pub tail_start_at: StartAtArg,

    /// Text encoding of the watched files (WHATWG label)
    #[arg(long, env = "HOSTLOG_TAIL_ENCODING", default_value = "utf-8")]
    pub tail_encoding: String,

    /// Line delimiter, accepts the escapes \n, \r\n, \t and \0
    #[arg(long, env = "HOSTLOG_TAIL_DELIMITER", default_value = "\\n")]
    pub tail_delimiter: String,

    /// Consecutive failures of one kind tolerated before they are logged
    #[arg(long, env = "HOSTLOG_TAIL_REPORT_THRESHOLD", default_value = "25")]
    pub tail_report_threshold: u64,

    /// Minimum seconds between two logged failures of one kind
    #[arg(long, env = "HOSTLOG_TAIL_REPORT_COOLDOWN_SECS", default_value = "300")]
    pub tail_report_cooldown_secs: u64,

    /// Attach the file name to every emitted line
    #[arg(
        long,
        env = "HOSTLOG_TAIL_INCLUDE_FILE_NAME",
        default_value = "true",
        action = ArgAction::Set
    )]
    pub tail_include_file_name: bool,
}

impl TailReceiverArgs {
    pub fn build_config(&self) -> TailReceiverConfig {
        TailReceiverConfig {
            paths: self.tail_paths.clone(),
            poll_interval: Duration::from_millis(self.tail_poll_interval_ms),
            min_file_size: self.tail_min_file_size,
            min_read_size: self.tail_min_read_size,
            max_read_size: self.tail_max_read_size,
            read_in_chunks: self.tail_read_in_chunks,
            start_at: self.tail_start_at.into(),
            encoding: self.tail_encoding.clone(),
            delimiter: parse_delimiter(&self.tail_delimiter),
            report_threshold: self.tail_report_threshold,
            report_cooldown: Duration::from_secs(self.tail_report_cooldown_secs),
            include_file_name: self.tail_include_file_name,
        }
    }
}

/// Expand the escape sequences accepted on the command line. Anything else
/// is kept as typed.
pub fn parse_delimiter(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            _ => {
                out.push('\\');
                continue;
            }
        }
        chars.next();
    }
    out
}
