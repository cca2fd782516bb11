//! Parses the `Range` request header used by the file sender.
//!
//! Real-world clients are sloppy about the separator between `bytes` and the
//! offsets (`=`, `:`, or a bare space all show up in the wild), so the
//! grammar here is deliberately looser than RFC 7233. Anything that doesn't
//! match is treated as "no range" rather than a parse error, so playback
//! still proceeds.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref RANGE_RE: Regex = Regex::new(r"(?i)^bytes[= :](\d*)-(\d*)$").unwrap();
}

/// A byte range as requested by a client, before being resolved against a
/// known file length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeSpec {
    pub start: Option<u64>,
    pub end: Option<u64>,
}

impl RangeSpec {
    /// Parses the raw value of a `Range` header. Returns `None` for a
    /// missing, empty, or malformed header - never an error.
    pub fn parse(raw: &str) -> Option<Self> {
        let caps = RANGE_RE.captures(raw.trim())?;
        let start = digits(&caps[1]);
        let end = digits(&caps[2]);
        Some(RangeSpec { start, end })
    }

    /// Resolves this range against a file of length `len`, filling in
    /// unspecified bounds. Returns `None` if the range is unsatisfiable
    /// (should become a 416), `Some((start, end))` otherwise with both ends
    /// inclusive.
    pub fn resolve(self, len: u64) -> Option<(u64, u64)> {
        if len == 0 {
            return None;
        }
        let start = self.start.unwrap_or(0);
        let end = self.end.unwrap_or(len - 1);
        if start > end || end >= len {
            None
        } else {
            Some((start, end))
        }
    }
}

fn digits(s: &str) -> Option<u64> {
    if s.is_empty() {
        None
    } else {
        s.parse().ok()
    }
}
