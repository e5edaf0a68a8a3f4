/// Single byte-range parsing for the streaming server
use dlna_caster_core::{CastError, Result};

/// Span of a resource selected by a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeRequest {
    pub start: u64,
    /// Inclusive
    pub end: u64,
    pub total: u64,
    /// A Range header selected this span (206 rather than 200)
    pub partial: bool,
}

impl RangeRequest {
    /// The whole resource, as served when no Range header is present
    pub fn full(total: u64) -> Self {
        Self {
            start: 0,
            end: total.saturating_sub(1),
            total,
            partial: false,
        }
    }

    /// Parse an optional `Range` header against a resource size
    ///
    /// Supports `bytes=start-end`, `bytes=start-` and `bytes=-suffix`.
    /// Multiple ranges, unknown units and garbled syntax are all
    /// unsatisfiable.
    pub fn parse(header: Option<&str>, total: u64) -> Result<Self> {
        match header {
            None => Ok(Self::full(total)),
            Some(value) => parse_single_range(value, total)
                .map(|(start, end)| Self {
                    start,
                    end,
                    total,
                    partial: true,
                })
                .ok_or(CastError::RangeUnsatisfiable { size: total }),
        }
    }

    /// Number of bytes in the span
    pub fn len(&self) -> u64 {
        if self.total == 0 {
            0
        } else {
            self.end - self.start + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `Content-Range` value for a 206
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, self.total)
    }
}

/// `Content-Range` value for a 416
pub fn unsatisfied_content_range(total: u64) -> String {
    format!("bytes */{}", total)
}

fn parse_single_range(header: &str, len: u64) -> Option<(u64, u64)> {
    let header = header.trim();
    let lower = header.to_ascii_lowercase();
    let rest = lower.strip_prefix("bytes=")?.trim();
    if rest.contains(',') {
        return None;
    }
    let (a, b) = rest.split_once('-')?;
    let (a, b) = (a.trim(), b.trim());
    if len == 0 {
        return None;
    }

    let last = len - 1;

    if a.is_empty() {
        // suffix range: "-N"
        let suffix: u64 = parse_digits(b)?;
        if suffix == 0 {
            return None;
        }
        let start = len.saturating_sub(suffix);
        return Some((start, last));
    }

    let start: u64 = parse_digits(a)?;
    if start >= len {
        return None;
    }

    if b.is_empty() {
        return Some((start, last));
    }

    let end = parse_digits(b)?.min(last);
    if end < start {
        return None;
    }
    Some((start, end))
}

/// `u64::from_str` accepts a leading `+`, which is not valid here
fn parse_digits(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}
