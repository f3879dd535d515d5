use std::convert::TryFrom;
use std::fmt;
use std::net::Ipv4Addr;
use std::slice::Iter;
use std::str::FromStr;

use itertools::Itertools;
use serde::Serialize;

use super::intern::{InternTable, Interned};
use crate::error::RdeError;

pub const NO_EXPORT: u32 = 0xffff_ff01;
pub const NO_ADVERTISE: u32 = 0xffff_ff02;
pub const NO_EXPORT_SUBCONFED: u32 = 0xffff_ff03;
pub const NO_PEER: u32 = 0xffff_ff04;
pub const GRACEFUL_SHUTDOWN: u32 = 0xffff_0000;
pub const BLACKHOLE: u32 = 0xffff_029a;

const WELL_KNOWN: [(&str, u32); 6] = [
    ("NO_EXPORT", NO_EXPORT),
    ("NO_ADVERTISE", NO_ADVERTISE),
    ("NO_EXPORT_SUBCONFED", NO_EXPORT_SUBCONFED),
    ("NO_PEER", NO_PEER),
    ("GRACEFUL_SHUTDOWN", GRACEFUL_SHUTDOWN),
    ("BLACKHOLE", BLACKHOLE),
];

// Extended community type (high octet, without the transitive bit)
const EXT_TYPE_AS2: u8 = 0x00;
const EXT_TYPE_IPV4: u8 = 0x01;
const EXT_TYPE_AS4: u8 = 0x02;
// Sub-types
const EXT_SUB_RT: u8 = 0x02;
const EXT_SUB_SOO: u8 = 0x03;

/// Split an extended community into (type+subtype, global admin, local admin)
fn ext_split(raw: u64) -> (u16, u32, u32) {
    let kind = (raw >> 48) as u16;
    match (kind >> 8) as u8 & 0x3f {
        EXT_TYPE_IPV4 | EXT_TYPE_AS4 => (kind, (raw >> 16) as u32, (raw & 0xffff) as u32),
        _ => (kind, ((raw >> 32) & 0xffff) as u32, raw as u32),
    }
}

fn ext_join(kind: u16, global: u32, local: u32) -> Option<u64> {
    let head = u64::from(kind) << 48;
    match (kind >> 8) as u8 & 0x3f {
        EXT_TYPE_IPV4 | EXT_TYPE_AS4 => {
            if local > 0xffff {
                return None;
            }
            Some(head | u64::from(global) << 16 | u64::from(local))
        }
        _ => {
            if global > 0xffff {
                return None;
            }
            Some(head | u64::from(global) << 32 | u64::from(local))
        }
    }
}

/// Basic (RFC 1997), extended (RFC 4360) or large (RFC 8092) community
#[derive(Serialize, Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Community {
    Standard(u32),
    Extended(u64),
    Large(u32, u32, u32),
}

impl Community {
    pub fn standard(asn: u16, value: u16) -> Self {
        Community::Standard(u32::from(asn) << 16 | u32::from(value))
    }

    /// (kind, extended type, numeric fields) used for matching
    fn fields(&self) -> (u8, u16, [u32; 3]) {
        match *self {
            Community::Standard(v) => (0, 0, [v >> 16, v & 0xffff, 0]),
            Community::Extended(raw) => {
                let (kind, global, local) = ext_split(raw);
                (1, kind, [global, local, 0])
            }
            Community::Large(a, b, c) => (2, 0, [a, b, c]),
        }
    }
}

impl fmt::Display for Community {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Community::Standard(value) => {
                if let Some((name, _)) = WELL_KNOWN.iter().find(|(_, v)| *v == value) {
                    write!(f, "{}", name)
                } else {
                    write!(f, "{}:{}", value >> 16, value & 0xffff)
                }
            }
            Community::Extended(raw) => {
                let (kind, global, local) = ext_split(raw);
                let ext_type = (kind >> 8) as u8 & 0x3f;
                let label = match kind as u8 {
                    EXT_SUB_RT => "rt",
                    EXT_SUB_SOO => "soo",
                    _ => return write!(f, "ext {:#06x}:{}:{}", kind, global, local),
                };
                match ext_type {
                    EXT_TYPE_IPV4 => write!(f, "{} {}:{}", label, Ipv4Addr::from(global), local),
                    EXT_TYPE_AS2 | EXT_TYPE_AS4 => write!(f, "{} {}:{}", label, global, local),
                    _ => write!(f, "ext {:#06x}:{}:{}", kind, global, local),
                }
            }
            Community::Large(a, b, c) => write!(f, "{}:{}:{}", a, b, c),
        }
    }
}

fn parse_u32(word: &str, value: &str) -> Result<u32, RdeError> {
    word.parse::<u32>()
        .map_err(|_| RdeError::Parse(format!("Invalid community '{}'", value)))
}

fn parse_ext(label: &str, body: &str, value: &str) -> Result<Community, RdeError> {
    let subtype = match label {
        "rt" => EXT_SUB_RT,
        _ => EXT_SUB_SOO,
    };
    let (global, local) = body
        .split_once(':')
        .ok_or_else(|| RdeError::Parse(format!("Invalid community '{}'", value)))?;
    let local = parse_u32(local, value)?;
    let (ext_type, global) = match global.parse::<Ipv4Addr>() {
        Ok(addr) => (EXT_TYPE_IPV4, u32::from(addr)),
        Err(_) => {
            let asn = parse_u32(global, value)?;
            if asn > 0xffff {
                (EXT_TYPE_AS4, asn)
            } else {
                (EXT_TYPE_AS2, asn)
            }
        }
    };
    let kind = u16::from(ext_type) << 8 | u16::from(subtype);
    ext_join(kind, global, local)
        .map(Community::Extended)
        .ok_or_else(|| RdeError::Parse(format!("Community value out of range '{}'", value)))
}

impl TryFrom<&str> for Community {
    type Error = RdeError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let value = value.trim();
        if let Some((_, v)) = WELL_KNOWN
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(value))
        {
            return Ok(Community::Standard(*v));
        }
        if let Some((label, body)) = value.split_once(' ') {
            return match label.to_lowercase().as_str() {
                l @ "rt" | l @ "soo" => parse_ext(l, body.trim(), value),
                _ => Err(RdeError::Parse(format!("Unknown community type '{}'", label))),
            };
        }
        if let Some(hex) = value.strip_prefix("0x") {
            return u64::from_str_radix(hex, 16)
                .map(Community::Extended)
                .map_err(|_| RdeError::Parse(format!("Invalid community '{}'", value)));
        }
        // Parse to list of u32, a single int is a full 32-bit community
        let chunks: Vec<_> = value.split(':').collect();
        match chunks.len() {
            1 => Ok(Community::Standard(parse_u32(chunks[0], value)?)),
            2 => {
                let (a, b) = (parse_u32(chunks[0], value)?, parse_u32(chunks[1], value)?);
                if a > 0xffff || b > 0xffff {
                    return Err(RdeError::Parse(format!(
                        "Community value out of range '{}'",
                        value
                    )));
                }
                Ok(Community::Standard(a << 16 | b))
            }
            3 => Ok(Community::Large(
                parse_u32(chunks[0], value)?,
                parse_u32(chunks[1], value)?,
                parse_u32(chunks[2], value)?,
            )),
            _ => Err(RdeError::Parse(format!("Invalid community '{}'", value))),
        }
    }
}

/// AS numbers wildcards are expanded against
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AsContext {
    pub remote_as: u32,
    pub local_as: u32,
}

/// One field of a community pattern
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Field {
    Value(u32),
    Any,
    NeighborAs,
    LocalAs,
}

impl Field {
    fn resolve(self, ctx: &AsContext) -> Option<u32> {
        match self {
            Field::Value(v) => Some(v),
            Field::Any => None,
            Field::NeighborAs => Some(ctx.remote_as),
            Field::LocalAs => Some(ctx.local_as),
        }
    }
}

impl FromStr for Field {
    type Err = RdeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "*" => Ok(Field::Any),
            "neighbor-as" => Ok(Field::NeighborAs),
            "local-as" => Ok(Field::LocalAs),
            _ => s
                .parse()
                .map(Field::Value)
                .map_err(|_| RdeError::Parse(format!("Invalid community field '{}'", s))),
        }
    }
}

/// Community match/delete pattern, fields may be wildcards
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommunityPattern {
    Standard(Field, Field),
    /// Extended type+subtype is always concrete
    Extended(u16, Field, Field),
    Large(Field, Field, Field),
}

/// Pattern with wildcards expanded, `None` fields match anything
struct Resolved {
    kind: u8,
    ext_kind: u16,
    fields: [Option<u32>; 3],
}

impl Resolved {
    fn concrete(&self) -> Option<Community> {
        match self.kind {
            0 => match self.fields {
                [Some(a), Some(b), _] => Some(Community::Standard(a << 16 | b)),
                _ => None,
            },
            1 => match self.fields {
                [Some(g), Some(l), _] => ext_join(self.ext_kind, g, l).map(Community::Extended),
                _ => None,
            },
            _ => match self.fields {
                [Some(a), Some(b), Some(c)] => Some(Community::Large(a, b, c)),
                _ => None,
            },
        }
    }

    fn matches(&self, community: &Community) -> bool {
        let (kind, ext_kind, fields) = community.fields();
        kind == self.kind
            && ext_kind == self.ext_kind
            && self
                .fields
                .iter()
                .zip(fields.iter())
                .all(|(want, have)| want.map_or(true, |w| w == *have))
    }
}

impl CommunityPattern {
    /// Expand wildcards, `None` if an expanded AS can't fit the field
    fn resolve(&self, ctx: &AsContext) -> Option<Resolved> {
        let resolved = match *self {
            CommunityPattern::Standard(a, b) => {
                let fields = [a.resolve(ctx), b.resolve(ctx), Some(0)];
                if fields.iter().flatten().any(|v| *v > 0xffff) {
                    return None;
                }
                Resolved {
                    kind: 0,
                    ext_kind: 0,
                    fields,
                }
            }
            CommunityPattern::Extended(kind, g, l) => Resolved {
                kind: 1,
                ext_kind: kind,
                fields: [g.resolve(ctx), l.resolve(ctx), Some(0)],
            },
            CommunityPattern::Large(a, b, c) => Resolved {
                kind: 2,
                ext_kind: 0,
                fields: [a.resolve(ctx), b.resolve(ctx), c.resolve(ctx)],
            },
        };
        Some(resolved)
    }
}

impl From<Community> for CommunityPattern {
    fn from(community: Community) -> Self {
        let (_, ext_kind, [a, b, c]) = community.fields();
        match community {
            Community::Standard(_) => CommunityPattern::Standard(Field::Value(a), Field::Value(b)),
            Community::Extended(_) => {
                CommunityPattern::Extended(ext_kind, Field::Value(a), Field::Value(b))
            }
            Community::Large(..) => {
                CommunityPattern::Large(Field::Value(a), Field::Value(b), Field::Value(c))
            }
        }
    }
}

impl FromStr for CommunityPattern {
    type Err = RdeError;

    /// E.g. "65000:*", "neighbor-as:100", "*:*:*", "rt 65000:*"
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(community) = Community::try_from(s) {
            return Ok(community.into());
        }
        if let Some((label, body)) = s.split_once(' ') {
            let subtype = match label.to_lowercase().as_str() {
                "rt" => EXT_SUB_RT,
                "soo" => EXT_SUB_SOO,
                _ => return Err(RdeError::Parse(format!("Unknown community type '{}'", label))),
            };
            let (global, local) = body
                .split_once(':')
                .ok_or_else(|| RdeError::Parse(format!("Invalid pattern '{}'", s)))?;
            let global: Field = global.parse()?;
            let ext_type = match global {
                Field::Value(v) if v > 0xffff => EXT_TYPE_AS4,
                _ => EXT_TYPE_AS2,
            };
            let kind = u16::from(ext_type) << 8 | u16::from(subtype);
            return Ok(CommunityPattern::Extended(kind, global, local.parse()?));
        }
        let chunks: Vec<&str> = s.split(':').collect();
        match chunks.len() {
            2 => Ok(CommunityPattern::Standard(
                chunks[0].parse()?,
                chunks[1].parse()?,
            )),
            3 => Ok(CommunityPattern::Large(
                chunks[0].parse()?,
                chunks[1].parse()?,
                chunks[2].parse()?,
            )),
            _ => Err(RdeError::Parse(format!("Invalid pattern '{}'", s))),
        }
    }
}

/// Sorted, de-duplicated communities of one route
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CommunitySet {
    list: Vec<Community>,
    /// Attribute crossed an AS that didn't understand it
    partial: bool,
}

impl CommunitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(mut list: Vec<Community>) -> Self {
        list.sort();
        list.dedup();
        Self {
            list,
            partial: false,
        }
    }

    /// Sorted insert, returns false if already present
    pub fn insert(&mut self, community: Community) -> bool {
        match self.list.binary_search(&community) {
            Ok(_) => false,
            Err(pos) => {
                self.list.insert(pos, community);
                true
            }
        }
    }

    pub fn contains(&self, community: &Community) -> bool {
        self.list.binary_search(community).is_ok()
    }

    pub fn matches(&self, pattern: &CommunityPattern, ctx: &AsContext) -> bool {
        let resolved = match pattern.resolve(ctx) {
            Some(r) => r,
            None => return false,
        };
        match resolved.concrete() {
            Some(community) => self.contains(&community),
            None => self.list.iter().any(|c| resolved.matches(c)),
        }
    }

    /// Remove every community matching `pattern`, returns how many went
    pub fn delete(&mut self, pattern: &CommunityPattern, ctx: &AsContext) -> usize {
        let resolved = match pattern.resolve(ctx) {
            Some(r) => r,
            None => return 0,
        };
        match resolved.concrete() {
            Some(community) => match self.list.binary_search(&community) {
                Ok(pos) => {
                    self.list.remove(pos);
                    1
                }
                Err(_) => 0,
            },
            None => {
                let before = self.list.len();
                self.list.retain(|c| !resolved.matches(c));
                before - self.list.len()
            }
        }
    }

    pub fn is_partial(&self) -> bool {
        self.partial
    }

    pub fn set_partial(&mut self, partial: bool) {
        self.partial = partial;
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn iter(&self) -> Iter<Community> {
        self.list.iter()
    }

    pub fn standard(&self) -> Vec<u32> {
        self.list
            .iter()
            .filter_map(|c| {
                if let Community::Standard(comm) = c {
                    Some(*comm)
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn extended(&self) -> Vec<u64> {
        self.list
            .iter()
            .filter_map(|c| {
                if let Community::Extended(comm) = c {
                    Some(*comm)
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn large(&self) -> Vec<(u32, u32, u32)> {
        self.list
            .iter()
            .filter_map(|c| {
                if let Community::Large(a, b, c) = c {
                    Some((*a, *b, *c))
                } else {
                    None
                }
            })
            .collect()
    }
}

impl fmt::Display for CommunitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.list.iter().join(" "))
    }
}

pub type CommunityRef = Interned<CommunitySet>;

/// Global cache of community sets shared across prefixes
#[derive(Debug, Default)]
pub struct CommunityStore {
    table: InternTable<CommunitySet>,
}

impl CommunityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&self, set: CommunitySet) -> CommunityRef {
        self.table.intern(set)
    }

    pub fn unintern(&self, set: CommunityRef) {
        drop(set);
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
