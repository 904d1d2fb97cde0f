use crate::{IoriError, IoriResult};

/// A contiguous byte range of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: Option<u64>,
}

impl ByteRange {
    pub fn new(offset: u64, length: Option<u64>) -> Self {
        Self { offset, length }
    }

    /// Range covering `first..=last`.
    pub fn inclusive(first: u64, last: u64) -> Self {
        Self {
            offset: first,
            length: Some(last.saturating_sub(first) + 1),
        }
    }

    /// Offset of the first byte after this range, if the range is bounded.
    pub fn end(&self) -> Option<u64> {
        self.length.map(|length| self.offset + length)
    }

    /// Parse a single byte-range-spec as defined in IETF RFC 7233:2014, subclause 2.1,
    /// e.g. `"0-499"` or `"500-"`.
    pub fn parse(s: &str) -> IoriResult<Self> {
        let (start, end) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| IoriError::ManifestParse(format!("Invalid byte range: {s}")))?;

        let first_byte_pos = start
            .parse::<u64>()
            .map_err(|_| IoriError::ManifestParse(format!("Invalid byte range: {s}")))?;
        let last_byte_pos = end.parse::<u64>().ok();

        match last_byte_pos {
            Some(last) if last < first_byte_pos => Err(IoriError::ManifestParse(format!(
                "Invalid byte range: {s}"
            ))),
            // 0-500 means 501 bytes
            Some(last) => Ok(Self::inclusive(first_byte_pos, last)),
            None => Ok(Self::new(first_byte_pos, None)),
        }
    }

    pub fn to_http_range(&self) -> String {
        if let Some(length) = self.length {
            format!("bytes={}-{}", self.offset, self.offset + length - 1)
        } else {
            format!("bytes={}-", self.offset)
        }
    }
}
