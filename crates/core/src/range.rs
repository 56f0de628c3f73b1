//! HTTP `Range` header parsing (RFC 7233, single-range subset).
//!
//! Video players seek by issuing `bytes=<start>-<end>` requests. Only a
//! single byte range per request is supported; multipart ranges are rejected
//! as invalid, which callers surface as HTTP 416.

use crate::error::{Error, Result};

/// A byte range as requested on the wire. Either bound may be absent.
///
/// `end` is inclusive, matching the header format. A `ByteRange` is derived
/// per-request and never persisted; call [`ByteRange::resolve`] against the
/// object size to obtain a concrete slice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte offset. Absent for suffix ranges (`bytes=-N`).
    pub start: Option<u64>,
    /// Last byte offset (inclusive). Absent for open-ended ranges.
    pub end: Option<u64>,
}

impl ByteRange {
    /// Whether the request left the upper bound open (`bytes=<start>-`).
    ///
    /// Open-ended ranges are the ones a delivery policy may clamp to a
    /// bounded window; explicit ranges are served exactly as asked.
    pub fn is_open_ended(&self) -> bool {
        self.start.is_some() && self.end.is_none()
    }

    /// Resolve against the object size into a concrete slice.
    ///
    /// Fails with [`Error::RangeNotSatisfiable`] when the start offset lies
    /// at or beyond the end of the object. An explicit `end` past the object
    /// is clamped to the last byte, per RFC 7233.
    pub fn resolve(&self, size: u64) -> Result<ResolvedRange> {
        if size == 0 {
            return Err(Error::RangeNotSatisfiable {
                start: self.start.unwrap_or(0),
                size,
            });
        }

        let (start, end) = match (self.start, self.end) {
            (Some(start), Some(end)) => (start, end.min(size - 1)),
            (Some(start), None) => (start, size - 1),
            // Suffix range: last N bytes of the object.
            (None, Some(suffix)) => (size.saturating_sub(suffix), size - 1),
            (None, None) => {
                return Err(Error::InvalidRange("range has no bounds".to_string()));
            }
        };

        if start >= size {
            return Err(Error::RangeNotSatisfiable { start, size });
        }

        Ok(ResolvedRange { start, end })
    }
}

/// A range resolved against a concrete object size. Both bounds inclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedRange {
    pub start: u64,
    pub end: u64,
}

impl ResolvedRange {
    /// Number of bytes in the slice.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Exclusive end offset, for seek-and-read style backends.
    pub fn end_exclusive(&self) -> u64 {
        self.end + 1
    }

    /// Clamp the slice to at most `window` bytes from its start.
    pub fn clamp_to_window(self, window: u64) -> Self {
        if window == 0 || self.len() <= window {
            return self;
        }
        Self {
            start: self.start,
            end: self.start + window - 1,
        }
    }

    /// Format the `Content-Range` header value for this slice.
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, size)
    }
}

/// Parse a raw `Range` header value.
///
/// Accepts `bytes=<start>-<end>`, `bytes=<start>-` and `bytes=-<suffix>`.
/// Anything else (wrong unit, non-numeric bounds, inverted bounds, multiple
/// ranges) is an [`Error::InvalidRange`].
pub fn parse_range(header: &str) -> Result<ByteRange> {
    let spec = header
        .strip_prefix("bytes=")
        .ok_or_else(|| Error::InvalidRange(format!("unsupported range unit: {header}")))?;

    if spec.contains(',') {
        return Err(Error::InvalidRange(
            "multiple ranges are not supported".to_string(),
        ));
    }

    let (start_str, end_str) = spec
        .split_once('-')
        .ok_or_else(|| Error::InvalidRange(format!("missing range separator: {header}")))?;

    let start = parse_bound(start_str)?;
    let end = parse_bound(end_str)?;

    match (start, end) {
        (None, None) => Err(Error::InvalidRange("range has no bounds".to_string())),
        (Some(s), Some(e)) if s > e => Err(Error::InvalidRange(format!(
            "start {s} exceeds end {e}"
        ))),
        (None, Some(0)) => Err(Error::InvalidRange(
            "zero-length suffix range".to_string(),
        )),
        _ => Ok(ByteRange { start, end }),
    }
}

fn parse_bound(s: &str) -> Result<Option<u64>> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(None);
    }
    s.parse::<u64>()
        .map(Some)
        .map_err(|_| Error::InvalidRange(format!("non-numeric range bound: {s}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_explicit_range() {
        let range = parse_range("bytes=0-499").unwrap();
        assert_eq!(range.start, Some(0));
        assert_eq!(range.end, Some(499));
        assert!(!range.is_open_ended());
    }

    #[test]
    fn parse_open_ended_range() {
        let range = parse_range("bytes=100-").unwrap();
        assert_eq!(range.start, Some(100));
        assert_eq!(range.end, None);
        assert!(range.is_open_ended());
    }

    #[test]
    fn parse_suffix_range() {
        let range = parse_range("bytes=-500").unwrap();
        assert_eq!(range.start, None);
        assert_eq!(range.end, Some(500));
    }

    #[test]
    fn parse_rejects_malformed() {
        for header in [
            "items=0-499",
            "bytes=abc-def",
            "bytes=0-499,600-999",
            "bytes=-",
            "bytes=",
            "bytes=500-100",
            "bytes=-0",
            "0-499",
        ] {
            assert!(
                matches!(parse_range(header), Err(Error::InvalidRange(_))),
                "expected InvalidRange for {header:?}"
            );
        }
    }

    #[test]
    fn resolve_clamps_explicit_end_to_object() {
        let range = parse_range("bytes=0-999999").unwrap();
        let resolved = range.resolve(500).unwrap();
        assert_eq!(resolved, ResolvedRange { start: 0, end: 499 });
        assert_eq!(resolved.len(), 500);
    }

    #[test]
    fn resolve_open_range_runs_to_end() {
        let range = parse_range("bytes=400-").unwrap();
        let resolved = range.resolve(1000).unwrap();
        assert_eq!(resolved, ResolvedRange { start: 400, end: 999 });
        assert_eq!(resolved.len(), 600);
    }

    #[test]
    fn resolve_suffix_range() {
        let range = parse_range("bytes=-100").unwrap();
        let resolved = range.resolve(1000).unwrap();
        assert_eq!(resolved, ResolvedRange { start: 900, end: 999 });

        // Suffix larger than the object covers the whole object.
        let resolved = range.resolve(50).unwrap();
        assert_eq!(resolved, ResolvedRange { start: 0, end: 49 });
    }

    #[test]
    fn resolve_rejects_start_past_object() {
        let range = parse_range("bytes=1000-").unwrap();
        let err = range.resolve(1000).unwrap_err();
        assert!(matches!(
            err,
            Error::RangeNotSatisfiable { start: 1000, size: 1000 }
        ));
    }

    #[test]
    fn resolve_rejects_empty_object() {
        let range = parse_range("bytes=0-").unwrap();
        assert!(matches!(
            range.resolve(0),
            Err(Error::RangeNotSatisfiable { .. })
        ));
    }

    #[test]
    fn clamp_to_window_bounds_open_ranges() {
        let resolved = ResolvedRange { start: 100, end: 999_999 };
        let clamped = resolved.clamp_to_window(1024);
        assert_eq!(clamped, ResolvedRange { start: 100, end: 1123 });
        assert_eq!(clamped.len(), 1024);

        // Already within the window: untouched.
        let small = ResolvedRange { start: 0, end: 9 };
        assert_eq!(small.clamp_to_window(1024), small);

        // Zero window disables clamping.
        assert_eq!(resolved.clamp_to_window(0), resolved);
    }

    #[test]
    fn content_range_format() {
        let resolved = ResolvedRange {
            start: 5_000_000,
            end: 5_999_999,
        };
        assert_eq!(
            resolved.content_range(10_000_000),
            "bytes 5000000-5999999/10000000"
        );
    }
}
