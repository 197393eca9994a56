//! Single byte range requests.

use std::ops::RangeInclusive;

/// A satisfiable byte range of a body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte, inclusive.
    pub start: usize,
    /// Last byte, inclusive.
    pub end: usize,
}

impl ByteRange {
    /// Parses a `Range` header value against a body of `size` bytes.
    ///
    /// Only the `bytes=start-end` form is supported. A missing or unparsable end, or an end past the
    /// body, selects everything up to the last byte. Returns `None` for suffix ranges, multiple
    /// ranges and ranges that start past the body, in which case the full body is served.
    pub fn parse(header: &str, size: usize) -> Option<Self> {
        let spec = header.trim().strip_prefix("bytes=")?;
        if spec.contains(',') {
            return None;
        }

        let (start, end) = spec.split_once('-')?;
        let start: usize = start.trim().parse().ok()?;
        let last = size.checked_sub(1)?;
        let end = end
            .trim()
            .parse::<usize>()
            .map_or(last, |end| end.min(last));

        (start <= end).then_some(Self { start, end })
    }

    /// Number of bytes in the range.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    /// The range as an index range into the body.
    pub fn as_range(&self) -> RangeInclusive<usize> {
        self.start..=self.end
    }

    /// Formats the `Content-Range` header value.
    pub fn content_range(&self, size: usize) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, size)
    }
}
