use std::convert::{From, TryFrom};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use bgp_rs::AFI;
use ipnetwork::IpNetwork;
use serde::{self, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{RdeError, ValidationError};

const SAFI_UNICAST: u8 = 1;
const SAFI_MPLS_VPN: u8 = 128;

/// Address families kept in the RIB
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum Family {
    Ipv4Unicast,
    Ipv6Unicast,
    Ipv4Vpn,
    Ipv6Vpn,
}

impl Family {
    pub const ALL: [Family; 4] = [
        Family::Ipv4Unicast,
        Family::Ipv6Unicast,
        Family::Ipv4Vpn,
        Family::Ipv6Vpn,
    ];

    pub fn afi(self) -> AFI {
        match self {
            Family::Ipv4Unicast | Family::Ipv4Vpn => AFI::IPV4,
            Family::Ipv6Unicast | Family::Ipv6Vpn => AFI::IPV6,
        }
    }

    pub fn safi(self) -> u8 {
        if self.is_vpn() {
            SAFI_MPLS_VPN
        } else {
            SAFI_UNICAST
        }
    }

    pub fn is_vpn(self) -> bool {
        matches!(self, Family::Ipv4Vpn | Family::Ipv6Vpn)
    }

    pub fn is_ipv4(self) -> bool {
        matches!(self, Family::Ipv4Unicast | Family::Ipv4Vpn)
    }

    /// Host route length
    pub fn max_len(self) -> u8 {
        if self.is_ipv4() {
            32
        } else {
            128
        }
    }

    /// Plain (non-VPN) family for an address
    pub fn for_addr(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Family::Ipv4Unicast,
            IpAddr::V6(_) => Family::Ipv6Unicast,
        }
    }

    pub fn vpn_for_addr(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Family::Ipv4Vpn,
            IpAddr::V6(_) => Family::Ipv6Vpn,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Family::Ipv4Unicast => "IPv4 Unicast",
            Family::Ipv6Unicast => "IPv6 Unicast",
            Family::Ipv4Vpn => "IPv4 VPN",
            Family::Ipv6Vpn => "IPv6 VPN",
        };
        write!(f, "{}", name)
    }
}

impl From<Family> for (AFI, u8) {
    fn from(family: Family) -> (AFI, u8) {
        (family.afi(), family.safi())
    }
}

impl TryFrom<(u16, u8)> for Family {
    type Error = std::io::Error;

    fn try_from(v: (u16, u8)) -> Result<Self, Self::Error> {
        let afi = AFI::try_from(v.0)?;
        match (afi, v.1) {
            (AFI::IPV4, SAFI_UNICAST) => Ok(Family::Ipv4Unicast),
            (AFI::IPV6, SAFI_UNICAST) => Ok(Family::Ipv6Unicast),
            (AFI::IPV4, SAFI_MPLS_VPN) => Ok(Family::Ipv4Vpn),
            (AFI::IPV6, SAFI_MPLS_VPN) => Ok(Family::Ipv6Vpn),
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Unsupported AFI/SAFI {}/{}", v.0, v.1),
            )),
        }
    }
}

impl Serialize for Family {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Family {
    fn deserialize<D>(deserializer: D) -> Result<Family, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let parts: Vec<String> = s.split_whitespace().map(|p| p.to_lowercase()).collect();
        if parts.len() != 2 {
            return Err(serde::de::Error::custom(format!(
                "Incorrect family format: '{}'",
                s
            )));
        }
        match (parts[0].as_str(), parts[1].as_str()) {
            ("ipv4", "unicast") => Ok(Family::Ipv4Unicast),
            ("ipv6", "unicast") => Ok(Family::Ipv6Unicast),
            ("ipv4", "vpn") => Ok(Family::Ipv4Vpn),
            ("ipv6", "vpn") => Ok(Family::Ipv6Vpn),
            _ => Err(serde::de::Error::custom(format!(
                "Unsupported family: '{}'",
                s
            ))),
        }
    }
}

/// Render a route distinguisher as "asn:value" or "ip:value"
pub fn rd_to_string(rd: u64) -> String {
    let value = rd & 0xffff_ffff_ffff;
    match rd >> 48 {
        0 => format!("{}:{}", value >> 32, value & 0xffff_ffff),
        1 => format!("{}:{}", Ipv4Addr::from((value >> 16) as u32), value & 0xffff),
        2 => format!("{}:{}", value >> 16, value & 0xffff),
        kind => format!("{}:{:#x}", kind, value),
    }
}

/// Parse "asn:value" or "ip:value" into a type 0, 1 or 2 route distinguisher
pub fn rd_from_str(s: &str) -> Result<u64, RdeError> {
    let invalid = || RdeError::Parse(format!("Invalid route distinguisher '{}'", s));
    let (admin, assigned) = s.split_once(':').ok_or_else(invalid)?;
    let assigned: u64 = assigned.parse().map_err(|_| invalid())?;
    if let Ok(ip) = admin.parse::<Ipv4Addr>() {
        if assigned > 0xffff {
            return Err(invalid());
        }
        return Ok(1 << 48 | u64::from(u32::from(ip)) << 16 | assigned);
    }
    let asn: u32 = admin.parse().map_err(|_| invalid())?;
    if asn > 0xffff {
        if assigned > 0xffff {
            return Err(invalid());
        }
        Ok(2 << 48 | u64::from(asn) << 16 | assigned)
    } else {
        if assigned > 0xffff_ffff {
            return Err(invalid());
        }
        Ok(u64::from(asn) << 32 | assigned)
    }
}

/// Unique routable network: (family, route distinguisher, address, length)
///
/// Host bits are always zero, so two keys for the same network compare equal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NetworkKey {
    pub family: Family,
    pub rd: Option<u64>,
    pub addr: IpAddr,
    pub len: u8,
}

impl NetworkKey {
    pub fn new(network: IpNetwork) -> Self {
        Self {
            family: Family::for_addr(&network.ip()),
            rd: None,
            addr: network.network(),
            len: network.prefix(),
        }
    }

    pub fn vpn(rd: u64, network: IpNetwork) -> Self {
        Self {
            family: Family::vpn_for_addr(&network.ip()),
            rd: Some(rd),
            addr: network.network(),
            len: network.prefix(),
        }
    }

    /// Build a key from loose parts, masking host bits
    pub fn from_parts(
        family: Family,
        rd: Option<u64>,
        addr: IpAddr,
        len: u8,
    ) -> Result<Self, ValidationError> {
        if family.is_ipv4() != addr.is_ipv4() {
            return Err(ValidationError::FamilyMismatch(family));
        }
        if family.is_vpn() != rd.is_some() {
            return Err(ValidationError::RouteDistinguisher(family));
        }
        if len > family.max_len() {
            return Err(ValidationError::PrefixLength(family, len));
        }
        let network =
            IpNetwork::new(addr, len).map_err(|_| ValidationError::PrefixLength(family, len))?;
        Ok(Self {
            family,
            rd,
            addr: network.network(),
            len,
        })
    }

    pub fn network(&self) -> IpNetwork {
        // Length was checked on construction
        IpNetwork::new(self.addr, self.len).unwrap_or_else(|_| IpNetwork::from(self.addr))
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        self.network().contains(addr)
    }
}

impl fmt::Display for NetworkKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(rd) = self.rd {
            write!(f, "rd {} ", rd_to_string(rd))?;
        }
        write!(f, "{}/{}", self.addr, self.len)
    }
}

impl FromStr for NetworkKey {
    type Err = RdeError;

    /// "10.0.0.0/24" or "rd 65000:1 10.0.0.0/24"
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let words: Vec<&str> = s.split_whitespace().collect();
        let (rd, prefix) = match words.as_slice() {
            [prefix] => (None, *prefix),
            ["rd", rd, prefix] => (Some(rd_from_str(rd)?), *prefix),
            _ => return Err(RdeError::Parse(format!("Not a valid prefix: '{}'", s))),
        };
        if !prefix.contains('/') {
            return Err(RdeError::Parse(format!("Not a valid prefix: '{}'", s)));
        }
        let network: IpNetwork = prefix
            .parse()
            .map_err(|err| RdeError::Parse(format!("{} '{}'", err, s)))?;
        let family = match rd {
            Some(_) => Family::vpn_for_addr(&network.ip()),
            None => Family::for_addr(&network.ip()),
        };
        Ok(Self::from_parts(family, rd, network.ip(), network.prefix())?)
    }
}
