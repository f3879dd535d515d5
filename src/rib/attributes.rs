use std::convert::TryFrom;
use std::fmt;
use std::net::IpAddr;

use bgp_rs::Identifier;
use byteorder::{ByteOrder, NetworkEndian};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use super::aspath::AsPath;
use super::community::{CommunityRef, CommunitySet};
use super::intern::{InternTable, Interned};
use crate::error::ValidationError;

pub const ATTR_ORIGIN: u8 = Identifier::ORIGIN as u8;
pub const ATTR_AS_PATH: u8 = Identifier::AS_PATH as u8;
pub const ATTR_NEXT_HOP: u8 = Identifier::NEXT_HOP as u8;
pub const ATTR_MED: u8 = Identifier::MULTI_EXIT_DISC as u8;
pub const ATTR_LOCAL_PREF: u8 = Identifier::LOCAL_PREF as u8;
pub const ATTR_COMMUNITIES: u8 = Identifier::COMMUNITY as u8;
pub const ATTR_ORIGINATOR_ID: u8 = Identifier::ORIGINATOR_ID as u8;
pub const ATTR_CLUSTER_LIST: u8 = Identifier::CLUSTER_LIST as u8;
pub const ATTR_EXT_COMMUNITIES: u8 = Identifier::EXTENDED_COMMUNITIES as u8;
pub const ATTR_LARGE_COMMUNITIES: u8 = Identifier::LARGE_COMMUNITY as u8;

pub const ATTR_OPTIONAL: u8 = 0x80;
pub const ATTR_TRANSITIVE: u8 = 0x40;
pub const ATTR_PARTIAL: u8 = 0x20;

pub const DEFAULT_LOCAL_PREF: u32 = 100;

/// Attribute types that live in dedicated PathAttributes fields
const NATIVE_ATTRIBUTES: [u8; 8] = [
    ATTR_ORIGIN,
    ATTR_AS_PATH,
    ATTR_NEXT_HOP,
    ATTR_MED,
    ATTR_LOCAL_PREF,
    ATTR_COMMUNITIES,
    ATTR_EXT_COMMUNITIES,
    ATTR_LARGE_COMMUNITIES,
];

/// One optional path attribute as received: (flags, type, data)
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RawAttribute {
    pub flags: u8,
    pub code: u8,
    pub data: Vec<u8>,
}

impl RawAttribute {
    pub fn new(flags: u8, code: u8, data: Vec<u8>) -> Self {
        Self { flags, code, data }
    }
}

impl fmt::Display for RawAttribute {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<Attr type={} flags={:#04x} len={}>",
            self.code,
            self.flags,
            self.data.len()
        )
    }
}

pub type Attr = Interned<RawAttribute>;
pub type AsPathRef = Interned<AsPath>;

/// Canonical storage for optional attributes and AS_PATH encodings
#[derive(Debug, Default)]
pub struct AttributeStore {
    attrs: InternTable<RawAttribute>,
    aspaths: InternTable<AsPath>,
}

impl AttributeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern_attribute(&self, flags: u8, code: u8, data: Vec<u8>) -> Attr {
        self.attrs.intern(RawAttribute::new(flags, code, data))
    }

    /// Hand back a handle, the entry is freed with its last handle
    pub fn release_attribute(&self, attr: Attr) {
        drop(attr);
    }

    pub fn intern_aspath(&self, data: Vec<u8>) -> Result<AsPathRef, ValidationError> {
        let aspath = AsPath::new(data)?;
        Ok(self.aspaths.intern(aspath))
    }

    pub fn release_aspath(&self, aspath: AsPathRef) {
        drop(aspath);
    }

    pub fn attribute_count(&self) -> usize {
        self.attrs.len()
    }

    pub fn aspath_count(&self) -> usize {
        self.aspaths.len()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Origin {
    Igp,
    Egp,
    Incomplete,
}

impl Default for Origin {
    fn default() -> Self {
        Origin::Incomplete
    }
}

impl TryFrom<u8> for Origin {
    type Error = ValidationError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Origin::Igp),
            1 => Ok(Origin::Egp),
            2 => Ok(Origin::Incomplete),
            _ => Err(ValidationError::BadOrigin(v)),
        }
    }
}

impl TryFrom<&str> for Origin {
    type Error = String;

    fn try_from(v: &str) -> Result<Self, Self::Error> {
        match v.to_lowercase().as_str() {
            "igp" | "i" => Ok(Origin::Igp),
            "egp" | "e" => Ok(Origin::Egp),
            "incomplete" | "?" => Ok(Origin::Incomplete),
            _ => Err(format!("Unknown origin '{}'", v)),
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let word = match self {
            Origin::Igp => "i",
            Origin::Egp => "e",
            Origin::Incomplete => "?",
        };
        write!(f, "{}", word)
    }
}

/// Route label and pf table ids assigned by the filter stage
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Labels {
    pub rtlabel: u16,
    pub pftable: u16,
}

/// Eligibility flags carried by a bundle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PathFlags {
    /// AS_PATH contains our own AS
    pub looped: bool,
    /// Attribute error handled as treat-as-withdraw
    pub parse_error: bool,
}

impl PathFlags {
    pub fn ineligible(self) -> bool {
        self.looped || self.parse_error
    }
}

/// Already parsed attribute record handed over by the session layer
#[derive(Clone, Debug)]
pub struct RouteAttributes {
    pub origin: Origin,
    /// Raw AS_PATH with 4-byte ASNs
    pub as_path: Vec<u8>,
    pub med: u32,
    pub local_pref: u32,
    pub weight: u32,
    /// `None` for locally originated routes
    pub nexthop: Option<IpAddr>,
    pub communities: CommunitySet,
    pub others: Vec<RawAttribute>,
    pub labels: Labels,
    /// Path identifier the NLRI was received with
    pub path_id: u32,
    pub parse_error: bool,
}

impl Default for RouteAttributes {
    fn default() -> Self {
        Self {
            origin: Origin::Igp,
            as_path: vec![],
            med: 0,
            local_pref: DEFAULT_LOCAL_PREF,
            weight: 0,
            nexthop: None,
            communities: CommunitySet::new(),
            others: vec![],
            labels: Labels::default(),
            path_id: 0,
            parse_error: false,
        }
    }
}

/// One interned attribute combination shared by many prefixes of a peer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathAttributes {
    pub origin: Origin,
    pub as_path: AsPathRef,
    pub med: u32,
    pub local_pref: u32,
    pub weight: u32,
    pub nexthop: Option<IpAddr>,
    pub communities: CommunityRef,
    /// Sorted by attribute type
    pub others: Vec<Attr>,
    pub labels: Labels,
    pub flags: PathFlags,
}

impl PathAttributes {
    pub fn get(&self, code: u8) -> Option<&Attr> {
        self.others.iter().find(|a| a.code == code)
    }

    pub fn originator_id(&self) -> Option<u32> {
        self.get(ATTR_ORIGINATOR_ID)
            .filter(|a| a.data.len() == 4)
            .map(|a| NetworkEndian::read_u32(&a.data))
    }

    /// Number of cluster ids in CLUSTER_LIST
    pub fn cluster_list_len(&self) -> usize {
        self.get(ATTR_CLUSTER_LIST)
            .map(|a| a.data.len() / 4)
            .unwrap_or(0)
    }
}

impl fmt::Display for PathAttributes {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<PathAttributes nexthop={} origin={} as_path=[{}] lpref={} med={} weight={}",
            self.nexthop
                .map(|n| n.to_string())
                .unwrap_or_else(|| String::from("self")),
            self.origin,
            self.as_path,
            self.local_pref,
            self.med,
            self.weight,
        )?;
        if !self.communities.is_empty() {
            write!(f, " communities=[{}]", self.communities)?;
        }
        if !self.others.is_empty() {
            write!(f, " others=[{}]", self.others.iter().map(|a| a.code).join(","))?;
        }
        write!(f, ">")
    }
}

/// Check the optional attribute list and return it sorted by type
pub(crate) fn validate_others(
    others: &[RawAttribute],
) -> Result<Vec<&RawAttribute>, ValidationError> {
    let sorted: Vec<&RawAttribute> = others.iter().sorted_by_key(|a| a.code).collect();
    for (a, b) in sorted.iter().tuple_windows() {
        if a.code == b.code {
            return Err(ValidationError::DuplicateAttribute(a.code));
        }
    }
    for attr in &sorted {
        if NATIVE_ATTRIBUTES.contains(&attr.code) {
            return Err(ValidationError::ReservedAttribute(attr.code));
        }
        let len = attr.data.len();
        match attr.code {
            ATTR_ORIGINATOR_ID if len != 4 => {
                return Err(ValidationError::AttributeLength(attr.code, len))
            }
            ATTR_CLUSTER_LIST if len % 4 != 0 => {
                return Err(ValidationError::AttributeLength(attr.code, len))
            }
            _ => (),
        }
    }
    Ok(sorted)
}
