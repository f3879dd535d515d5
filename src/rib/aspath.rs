use std::fmt;
use std::hash::{Hash, Hasher};
use std::io::Cursor;

use bgp_rs::{ASPath, Segment};
use byteorder::{ByteOrder, NetworkEndian, ReadBytesExt};
use itertools::Itertools;

use crate::error::ValidationError;

pub const AS_SET: u8 = 1;
pub const AS_SEQUENCE: u8 = 2;

/// Raw AS_PATH encoding with 4-byte ASNs
///
/// Segments are `type (1) | count (1) | count * ASN (4)`.
#[derive(Clone, Debug)]
pub struct AsPath {
    data: Vec<u8>,
    hops: u32,
}

impl AsPath {
    /// Validate the encoding and cache the hop count
    pub fn new(data: Vec<u8>) -> Result<Self, ValidationError> {
        let hops = validate(&data)?;
        Ok(Self { data, hops })
    }

    pub fn empty() -> Self {
        Self {
            data: vec![],
            hops: 0,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Path length used by the decision process, an AS_SET counts as one hop
    pub fn hops(&self) -> u32 {
        self.hops
    }

    fn segments(&self) -> SegmentIter<'_> {
        SegmentIter {
            data: &self.data,
            pos: 0,
        }
    }

    /// Left-most AS of a leading AS_SEQUENCE
    ///
    /// An empty path or one starting with an AS_SET has no neighbor, the
    /// route is treated as coming from the local AS.
    pub fn neighbor(&self) -> Option<u32> {
        match self.segments().next() {
            Some((AS_SEQUENCE, asns)) => asns.first().copied(),
            _ => None,
        }
    }

    /// Right-most AS of the path
    pub fn origin_as(&self) -> Option<u32> {
        match self.segments().last() {
            Some((AS_SEQUENCE, asns)) => asns.last().copied(),
            _ => None,
        }
    }

    pub fn contains(&self, asn: u32) -> bool {
        self.segments().any(|(_, asns)| asns.contains(&asn))
    }

    /// Decoded segment view
    pub fn to_segments(&self) -> ASPath {
        ASPath {
            segments: self
                .segments()
                .map(|(seg_type, asns)| match seg_type {
                    AS_SET => Segment::AS_SET(asns),
                    _ => Segment::AS_SEQUENCE(asns),
                })
                .collect(),
        }
    }

    /// Encode decoded segments back to the raw form
    pub fn encode(path: &ASPath) -> Vec<u8> {
        let mut data = Vec::with_capacity(path.segments.len() * 10);
        for segment in &path.segments {
            let (seg_type, asns) = match segment {
                Segment::AS_SET(asns) => (AS_SET, asns),
                Segment::AS_SEQUENCE(asns) => (AS_SEQUENCE, asns),
            };
            // Encoding can only hold 255 ASNs per segment, split longer ones
            for chunk in asns.chunks(u8::MAX as usize) {
                data.push(seg_type);
                data.push(chunk.len() as u8);
                let mut buf = [0u8; 4];
                for asn in chunk {
                    NetworkEndian::write_u32(&mut buf, *asn);
                    data.extend_from_slice(&buf);
                }
            }
        }
        data
    }
}

impl PartialEq for AsPath {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl Eq for AsPath {}

impl Hash for AsPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.data.hash(state);
    }
}

impl fmt::Display for AsPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let words = self
            .segments()
            .map(|(seg_type, asns)| {
                let joined = asns.iter().join(" ");
                match seg_type {
                    AS_SET => format!("{{{}}}", joined),
                    _ => joined,
                }
            })
            .join(" ");
        write!(f, "{}", words)
    }
}

/// Walk the encoding once, returns the hop count
fn validate(data: &[u8]) -> Result<u32, ValidationError> {
    let mut cursor = Cursor::new(data);
    let mut hops = 0u32;
    while (cursor.position() as usize) < data.len() {
        let seg_type = cursor
            .read_u8()
            .map_err(|_| ValidationError::SegmentOverrun(1, 0))?;
        let remaining = data.len() - cursor.position() as usize;
        let count = cursor
            .read_u8()
            .map_err(|_| ValidationError::SegmentOverrun(1, remaining))?;
        if seg_type != AS_SET && seg_type != AS_SEQUENCE {
            return Err(ValidationError::BadSegmentType(seg_type));
        }
        if count == 0 {
            return Err(ValidationError::EmptySegment);
        }
        let remaining = data.len() - cursor.position() as usize;
        let declared = count as usize * 4;
        if declared > remaining {
            return Err(ValidationError::SegmentOverrun(declared, remaining));
        }
        cursor.set_position(cursor.position() + declared as u64);
        hops += match seg_type {
            AS_SET => 1,
            _ => u32::from(count),
        };
    }
    Ok(hops)
}

/// Iterates (segment type, ASNs) over an already validated encoding
struct SegmentIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for SegmentIter<'a> {
    type Item = (u8, Vec<u32>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos + 2 > self.data.len() {
            return None;
        }
        let seg_type = self.data[self.pos];
        let count = self.data[self.pos + 1] as usize;
        let start = self.pos + 2;
        let end = start + count * 4;
        if end > self.data.len() {
            return None;
        }
        let mut cursor = Cursor::new(&self.data[start..end]);
        let asns = (0..count)
            .filter_map(|_| cursor.read_u32::<NetworkEndian>().ok())
            .collect();
        self.pos = end;
        Some((seg_type, asns))
    }
}
