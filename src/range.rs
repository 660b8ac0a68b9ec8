use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A half-open byte interval `[start, end)`.
///
/// Stored in the metadata store as the literal text `"[start,end)"` so that
/// the on-disk representation matches what the schema documents, rather than
/// two bare integer columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end, "range start must not be after its end");
        ByteRange { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.start && offset < self.end
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{})", self.start, self.end)
    }
}

impl FromStr for ByteRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let inner = s
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(')'))
            .ok_or_else(|| Error::Invariant(format!("malformed range literal: {s:?}")))?;

        let (start, end) = inner
            .split_once(',')
            .ok_or_else(|| Error::Invariant(format!("malformed range literal: {s:?}")))?;

        let start = start
            .trim()
            .parse()
            .map_err(|_| Error::Invariant(format!("malformed range literal: {s:?}")))?;
        let end = end
            .trim()
            .parse()
            .map_err(|_| Error::Invariant(format!("malformed range literal: {s:?}")))?;

        Ok(ByteRange::new(start, end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_round_trips_through_its_textual_form() {
        let range = ByteRange::new(1024, 3000);
        let text = range.to_string();
        assert_eq!(text, "[1024,3000)");
        assert_eq!(text.parse::<ByteRange>().unwrap(), range);
    }

    #[test]
    fn rejects_malformed_literals() {
        assert!("1024,3000".parse::<ByteRange>().is_err());
        assert!("[1024;3000)".parse::<ByteRange>().is_err());
    }

    #[test]
    fn contains_is_half_open() {
        let range = ByteRange::new(10, 20);
        assert!(range.contains(10));
        assert!(range.contains(19));
        assert!(!range.contains(20));
    }
}
