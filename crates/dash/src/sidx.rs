//! Segment index box (`sidx`), ISO/IEC 14496-12 8.16.3.
//!
//! ```text
//! aligned(8) class SegmentIndexBox extends FullBox('sidx', version, 0) {
//!     unsigned int(32) reference_ID;
//!     unsigned int(32) timescale;
//!     if (version==0) {
//!         unsigned int(32) earliest_presentation_time;
//!         unsigned int(32) first_offset;
//!     } else {
//!         unsigned int(64) earliest_presentation_time;
//!         unsigned int(64) first_offset;
//!     }
//!     unsigned int(16) reserved = 0;
//!     unsigned int(16) reference_count;
//!     for(i=1; i <= reference_count; i++) {
//!         bit (1)           reference_type;
//!         unsigned int(31)  referenced_size;
//!         unsigned int(32)  subsegment_duration;
//!         bit(1)            starts_with_SAP;
//!         unsigned int(3)   SAP_type;
//!         unsigned int(28)  SAP_delta_time;
//!     }
//! }
//! ```
use bytes::Buf;

use crate::{util::range::ByteRange, IoriError, IoriResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SidxReference {
    /// Set when the reference points at another `sidx` instead of media.
    pub reference_type: bool,
    pub referenced_size: u32,
    pub subsegment_duration: u32,
    pub starts_with_sap: bool,
    pub sap_type: u8,
    pub sap_delta_time: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentIndex {
    pub reference_id: u32,
    pub timescale: u32,
    pub earliest_presentation_time: u64,
    pub first_offset: u64,
    pub references: Vec<SidxReference>,
    /// Offset of the first byte after the box, relative to the parsed buffer.
    box_end: u64,
}

fn invalid(message: &str) -> IoriError {
    IoriError::InvalidIndexBox(message.to_string())
}

fn ensure(buf: &impl Buf, needed: usize) -> IoriResult<()> {
    if buf.remaining() < needed {
        return Err(invalid("truncated box"));
    }
    Ok(())
}

impl SegmentIndex {
    /// Find and parse the first `sidx` box in `data`, skipping any box in front of it.
    pub fn parse(data: &[u8]) -> IoriResult<Self> {
        let mut buf = data;
        let mut offset = 0u64;

        loop {
            ensure(&buf, 8)?;
            let size = buf.get_u32() as u64;
            let box_type = buf.copy_to_bytes(4);
            let (size, header) = match size {
                1 => {
                    ensure(&buf, 8)?;
                    (buf.get_u64(), 16)
                }
                0 => (data.len() as u64 - offset, 8),
                size => (size, 8),
            };
            if size < header {
                return Err(invalid("box smaller than its header"));
            }

            let body = (size - header) as usize;
            ensure(&buf, body)?;
            if &box_type[..] == b"sidx" {
                return Self::parse_body(&buf[..body], offset + size);
            }

            tracing::trace!(box_type = ?box_type, size, "skipping box before sidx");
            buf.advance(body);
            offset += size;
        }
    }

    fn parse_body(mut buf: &[u8], box_end: u64) -> IoriResult<Self> {
        ensure(&buf, 12)?;
        let version = buf.get_u8();
        buf.advance(3); // flags
        let reference_id = buf.get_u32();
        let timescale = buf.get_u32();

        let (earliest_presentation_time, first_offset) = if version == 0 {
            ensure(&buf, 8)?;
            (buf.get_u32() as u64, buf.get_u32() as u64)
        } else {
            ensure(&buf, 16)?;
            (buf.get_u64(), buf.get_u64())
        };

        ensure(&buf, 4)?;
        buf.advance(2); // reserved
        let reference_count = buf.get_u16() as usize;
        ensure(&buf, reference_count * 12)?;

        let references = (0..reference_count)
            .map(|_| {
                let size = buf.get_u32();
                let subsegment_duration = buf.get_u32();
                let sap = buf.get_u32();
                SidxReference {
                    reference_type: size >> 31 == 1,
                    referenced_size: size & 0x7fff_ffff,
                    subsegment_duration,
                    starts_with_sap: sap >> 31 == 1,
                    sap_type: ((sap >> 28) & 0x7) as u8,
                    sap_delta_time: sap & 0x0fff_ffff,
                }
            })
            .collect();

        if timescale == 0 {
            return Err(invalid("zero timescale"));
        }

        Ok(Self {
            reference_id,
            timescale,
            earliest_presentation_time,
            first_offset,
            references,
            box_end,
        })
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    /// Byte offset of the first subsegment, given the offset the index data was fetched from.
    pub fn first_subsegment_offset(&self, index_offset: u64) -> u64 {
        index_offset + self.box_end + self.first_offset
    }

    /// Byte range of subsegment `index` when the index was fetched from `index_offset`.
    pub fn byte_range(&self, index: usize, index_offset: u64) -> Option<ByteRange> {
        let reference = self.references.get(index)?;
        let offset = self.first_subsegment_offset(index_offset)
            + self.references[..index]
                .iter()
                .map(|r| r.referenced_size as u64)
                .sum::<u64>();
        Some(ByteRange::new(offset, Some(reference.referenced_size as u64)))
    }

    /// Duration of subsegment `index` in seconds.
    pub fn duration(&self, index: usize) -> Option<f64> {
        self.references
            .get(index)
            .map(|r| r.subsegment_duration as f64 / self.timescale as f64)
    }
}
