// SPDX-License-Identifier: Apache-2.0

//! Charset decoding and exact-delimiter line splitting.

use encoding_rs::{Encoding, UTF_16BE, UTF_16LE};

use crate::receivers::tail::config::TailReceiverConfig;
use crate::receivers::tail::error::{Error, Result};

/// Result of splitting one read buffer
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Split {
    /// Complete, non-empty lines in file order
    pub lines: Vec<String>,
    /// Length of the trailing bytes that were not terminated by a delimiter
    pub remainder: usize,
    /// Leading bytes dropped because they continued a line read earlier
    pub dropped: usize,
    /// Lines that contained byte sequences invalid in the encoding
    pub malformed: usize,
}

#[derive(Debug, Clone)]
pub struct LineDecoder {
    encoding: &'static Encoding,
    delimiter: Vec<u8>,
    step: usize,
}

impl LineDecoder {
    pub fn new(encoding: &'static Encoding, delimiter: &str) -> Self {
        // encoding_rs has no UTF-16 encoder, so those delimiters are built by hand
        let (delimiter, step) = if encoding == UTF_16LE {
            let bytes = delimiter.encode_utf16().flat_map(u16::to_le_bytes).collect();
            (bytes, 2)
        } else if encoding == UTF_16BE {
            let bytes = delimiter.encode_utf16().flat_map(u16::to_be_bytes).collect();
            (bytes, 2)
        } else {
            let (bytes, _, _) = encoding.encode(delimiter);
            (bytes.into_owned(), 1)
        };

        Self {
            encoding,
            delimiter,
            step,
        }
    }

    pub fn from_config(config: &TailReceiverConfig) -> Result<Self> {
        let encoding = config
            .resolve_encoding()
            .ok_or_else(|| Error::UnknownEncoding(config.encoding.clone()))?;
        Ok(Self::new(encoding, &config.delimiter))
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    pub fn delimiter(&self) -> &[u8] {
        &self.delimiter
    }

    /// Width of one code unit; reads must start on a multiple of it
    pub fn step(&self) -> usize {
        self.step
    }

    /// Length of a byte order mark for this encoding at the start of `bytes`
    pub fn bom_len(&self, bytes: &[u8]) -> usize {
        match Encoding::for_bom(bytes) {
            Some((encoding, len)) if encoding == self.encoding => len,
            _ => 0,
        }
    }

    /// Decode bytes, replacing malformed sequences. The flag is true when
    /// a replacement happened.
    pub fn decode(&self, bytes: &[u8]) -> (String, bool) {
        let (text, had_errors) = self.encoding.decode_without_bom_handling(bytes);
        (text.into_owned(), had_errors)
    }

    /// Split a buffer into complete lines.
    ///
    /// With `skip_leading_fragment` the bytes up to and including the first
    /// delimiter are dropped, since the buffer starts in the middle of a line.
    pub fn split(&self, bytes: &[u8], skip_leading_fragment: bool) -> Split {
        let mut split = Split::default();
        let mut start = 0;

        if skip_leading_fragment {
            match self.find(bytes, 0) {
                Some(end) => {
                    start = end + self.delimiter.len();
                    split.dropped = start;
                }
                None => {
                    split.dropped = bytes.len();
                    return split;
                }
            }
        }

        while let Some(end) = self.find(bytes, start) {
            let line = &bytes[start..end];
            if !line.is_empty() {
                let (text, had_errors) = self.decode(line);
                if had_errors {
                    split.malformed += 1;
                }
                split.lines.push(text);
            }
            start = end + self.delimiter.len();
        }

        split.remainder = bytes.len() - start;
        split
    }

    fn find(&self, haystack: &[u8], from: usize) -> Option<usize> {
        let needle = self.delimiter.as_slice();
        let mut i = from;
        while i + needle.len() <= haystack.len() {
            if haystack[i..].starts_with(needle) {
                return Some(i);
            }
            i += self.step;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::{UTF_8, WINDOWS_1252};

    #[test]
    fn test_split_complete_lines() {
        let decoder = LineDecoder::new(UTF_8, "\n");
        let split = decoder.split(b"a\nb\nc\n", false);
        assert_eq!(split.lines, vec!["a", "b", "c"]);
        assert_eq!(split.remainder, 0);
    }

    #[test]
    fn test_split_keeps_trailing_fragment_out() {
        let decoder = LineDecoder::new(UTF_8, "\n");
        let split = decoder.split(b"first\nsecond\nthi", false);
        assert_eq!(split.lines, vec!["first", "second"]);
        assert_eq!(split.remainder, 3);

        let split = decoder.split(b"no delimiter yet", false);
        assert!(split.lines.is_empty());
        assert_eq!(split.remainder, 16);
    }

    #[test]
    fn test_split_skips_empty_lines() {
        let decoder = LineDecoder::new(UTF_8, "\n");
        let split = decoder.split(b"\n\na\n\nb\n", false);
        assert_eq!(split.lines, vec!["a", "b"]);
        assert_eq!(split.remainder, 0);
    }

    #[test]
    fn test_multi_byte_delimiter_is_exact() {
        let decoder = LineDecoder::new(UTF_8, "\r\n");
        let split = decoder.split(b"one\r\ntwo\nstill two\r\nthree\r", false);
        assert_eq!(split.lines, vec!["one", "two\nstill two"]);
        assert_eq!(split.remainder, 6);
    }

    #[test]
    fn test_skip_leading_fragment() {
        let decoder = LineDecoder::new(UTF_8, "\n");
        let split = decoder.split(b"ail of old\nfresh\n", true);
        assert_eq!(split.lines, vec!["fresh"]);
        assert_eq!(split.dropped, 11);

        let split = decoder.split(b"all one line", true);
        assert!(split.lines.is_empty());
        assert_eq!(split.dropped, 12);
        assert_eq!(split.remainder, 0);
    }

    #[test]
    fn test_decodes_configured_charset() {
        let decoder = LineDecoder::new(WINDOWS_1252, "\n");
        let split = decoder.split(b"caf\xe9\n", false);
        assert_eq!(split.lines, vec!["café"]);
        assert_eq!(split.malformed, 0);
    }

    #[test]
    fn test_malformed_utf8_is_replaced() {
        let decoder = LineDecoder::new(UTF_8, "\n");
        let split = decoder.split(b"ok\nbad \xff byte\n", false);
        assert_eq!(split.lines, vec!["ok", "bad \u{fffd} byte"]);
        assert_eq!(split.malformed, 1);
    }

    #[test]
    fn test_utf16le_delimiter() {
        let decoder = LineDecoder::new(UTF_16LE, "\n");
        assert_eq!(decoder.delimiter(), &[0x0a, 0x00]);

        let bytes: Vec<u8> = "hi\nyo\n"
            .encode_utf16()
            .flat_map(u16::to_le_bytes)
            .collect();
        let split = decoder.split(&bytes, false);
        assert_eq!(split.lines, vec!["hi", "yo"]);
        assert_eq!(split.remainder, 0);
    }

    #[test]
    fn test_bom_is_recognized_for_configured_encoding() {
        let utf16 = LineDecoder::new(UTF_16LE, "\n");
        assert_eq!(utf16.step(), 2);
        assert_eq!(utf16.bom_len(&[0xff, 0xfe, b'h', 0x00]), 2);
        assert_eq!(utf16.bom_len(&[b'h', 0x00]), 0);

        let utf8 = LineDecoder::new(UTF_8, "\n");
        assert_eq!(utf8.step(), 1);
        assert_eq!(utf8.bom_len(b"\xef\xbb\xbfline\n"), 3);
        // A UTF-16 mark is not stripped from a UTF-8 stream
        assert_eq!(utf8.bom_len(&[0xff, 0xfe, b'h']), 0);
    }

    #[test]
    fn test_from_config_rejects_unknown_encoding() {
        let config = TailReceiverConfig {
            encoding: "not-a-charset".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            LineDecoder::from_config(&config),
            Err(Error::UnknownEncoding(_))
        ));
    }
}
