use std::error;
use std::fmt;
use std::io;

use crate::rib::{Family, PeerId};

pub type Result<T> = std::result::Result<T, RdeError>;

/// Input rejected at the engine boundary, nothing was stored
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// AS_PATH segment type is neither AS_SET nor AS_SEQUENCE. [type]
    BadSegmentType(u8),
    /// AS_PATH segment with zero ASNs
    EmptySegment,
    /// AS_PATH segment length runs past the buffer. [declared bytes, remaining bytes]
    SegmentOverrun(usize, usize),
    /// Prefix length not valid for the family. [family, length]
    PrefixLength(Family, u8),
    /// Address does not belong to the family. [family]
    FamilyMismatch(Family),
    /// Route distinguisher present on a plain family or missing on a VPN one
    RouteDistinguisher(Family),
    /// Optional attribute type appears twice. [type]
    DuplicateAttribute(u8),
    /// Attribute type is carried natively, not in the optional list. [type]
    ReservedAttribute(u8),
    /// Attribute payload has the wrong size. [type, length]
    AttributeLength(u8, usize),
    /// ORIGIN code outside IGP/EGP/INCOMPLETE. [code]
    BadOrigin(u8),
    /// Peer id already registered
    DuplicatePeer(PeerId),
    /// Peer address already registered. [address]
    DuplicatePeerAddress(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ValidationError::*;
        match self {
            BadSegmentType(t) => write!(f, "Unsupported AS_PATH segment type {}", t),
            EmptySegment => write!(f, "Empty AS_PATH segment"),
            SegmentOverrun(declared, remaining) => write!(
                f,
                "AS_PATH segment overrun (declared={}, remaining={})",
                declared, remaining
            ),
            PrefixLength(family, len) => write!(f, "Invalid prefix length {} for {}", len, family),
            FamilyMismatch(family) => write!(f, "Address is not {}", family),
            RouteDistinguisher(family) => write!(f, "Unexpected route distinguisher for {}", family),
            DuplicateAttribute(t) => write!(f, "Duplicate attribute type {}", t),
            ReservedAttribute(t) => write!(f, "Attribute type {} not allowed here", t),
            AttributeLength(t, len) => write!(f, "Bad length {} for attribute type {}", len, t),
            BadOrigin(code) => write!(f, "Unknown ORIGIN code {}", code),
            DuplicatePeer(id) => write!(f, "Peer {} already exists", id),
            DuplicatePeerAddress(addr) => write!(f, "Peer address {} already in use", addr),
        }
    }
}

#[derive(Debug)]
pub enum RdeError {
    /// Malformed input, treated as a withdrawal by the caller
    Validation(ValidationError),
    /// No peer configured with this id
    UnknownPeer(PeerId),
    /// Peer exists but its session is not up
    PeerDown(PeerId),
    /// Bad configuration. [reason]
    Config(String),
    /// Unparseable text input. [reason]
    Parse(String),
    /// Something happened reading input. [reason]
    Io(String),
}

impl RdeError {
    pub fn is_validation(&self) -> bool {
        matches!(self, RdeError::Validation(_))
    }
}

impl fmt::Display for RdeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("RDE Error: ")?;
        use RdeError::*;
        match self {
            Validation(err) => write!(f, "Validation failed [{}]", err)?,
            UnknownPeer(id) => write!(f, "Unknown peer {}", id)?,
            PeerDown(id) => write!(f, "Peer {} is not up", id)?,
            Config(r) => write!(f, "Config error [{}]", r)?,
            Parse(r) => write!(f, "Parse error [{}]", r)?,
            Io(r) => write!(f, "IO error [{}]", r)?,
        }
        Ok(())
    }
}

impl From<ValidationError> for RdeError {
    fn from(error: ValidationError) -> Self {
        RdeError::Validation(error)
    }
}

impl From<io::Error> for RdeError {
    fn from(error: io::Error) -> Self {
        RdeError::Io(error.to_string())
    }
}

impl error::Error for RdeError {}
