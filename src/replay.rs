//! JSON event scripts standing in for the session and kernel sync stages
//!
//! A script is a JSON array of events, applied to the RIB in order:
//!
//! ```json
//! [
//!   {"event": "peer_up", "peer": 1},
//!   {"event": "update", "peer": 1, "prefix": "10.0.0.0/24",
//!    "attributes": {"as_path": "65001", "nexthop": "192.0.2.1", "med": 10}},
//!   {"event": "nexthop", "address": "192.0.2.1", "reachable": true},
//!   {"event": "withdraw", "peer": 1, "prefix": "10.0.0.0/24"},
//!   {"event": "peer_down", "peer": 1}
//! ]
//! ```
use std::convert::TryFrom;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::net::{IpAddr, Ipv4Addr};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::{RdeError, Result};
use crate::rib::aspath::AsPath;
use crate::rib::attributes::{ATTR_CLUSTER_LIST, ATTR_OPTIONAL, ATTR_ORIGINATOR_ID};
use crate::rib::{
    Community, CommunitySet, NetworkKey, NexthopMeta, Origin, PeerId, RawAttribute,
    RouteAttributes, RIB,
};
use crate::utils::as_path_from_str;

/// Attribute input for an update, missing values take protocol defaults
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RouteSpec {
    pub origin: Option<String>,
    /// E.g. "65001 65002 {100 200}"
    pub as_path: String,
    pub local_pref: Option<u32>,
    pub med: u32,
    pub weight: u32,
    /// Absent for locally originated routes
    pub nexthop: Option<IpAddr>,
    pub communities: Vec<String>,
    pub originator_id: Option<Ipv4Addr>,
    pub cluster_list: Vec<Ipv4Addr>,
    pub path_id: u32,
    /// Attribute error handled as treat-as-withdraw
    pub parse_error: bool,
}

impl TryFrom<&RouteSpec> for RouteAttributes {
    type Error = RdeError;

    fn try_from(spec: &RouteSpec) -> Result<Self> {
        let mut attributes = RouteAttributes::default();
        if let Some(origin) = &spec.origin {
            attributes.origin = Origin::try_from(origin.as_str()).map_err(RdeError::Parse)?;
        }
        attributes.as_path = AsPath::encode(&as_path_from_str(&spec.as_path)?);
        if let Some(local_pref) = spec.local_pref {
            attributes.local_pref = local_pref;
        }
        attributes.med = spec.med;
        attributes.weight = spec.weight;
        attributes.nexthop = spec.nexthop;
        attributes.communities = CommunitySet::from_vec(
            spec.communities
                .iter()
                .map(|c| Community::try_from(c.as_str()))
                .collect::<Result<Vec<_>>>()?,
        );
        if let Some(originator) = spec.originator_id {
            attributes.others.push(RawAttribute::new(
                ATTR_OPTIONAL,
                ATTR_ORIGINATOR_ID,
                originator.octets().to_vec(),
            ));
        }
        if !spec.cluster_list.is_empty() {
            let data = spec.cluster_list.iter().flat_map(|c| c.octets()).collect();
            attributes
                .others
                .push(RawAttribute::new(ATTR_OPTIONAL, ATTR_CLUSTER_LIST, data));
        }
        attributes.path_id = spec.path_id;
        attributes.parse_error = spec.parse_error;
        Ok(attributes)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    PeerUp {
        peer: u32,
    },
    PeerDown {
        peer: u32,
    },
    Update {
        peer: u32,
        /// "10.0.0.0/24" or "rd 65000:1 10.0.0.0/24"
        prefix: String,
        #[serde(default)]
        attributes: RouteSpec,
    },
    Withdraw {
        peer: u32,
        prefix: String,
    },
    Nexthop {
        address: IpAddr,
        reachable: bool,
        #[serde(default)]
        connected: bool,
        #[serde(default)]
        gateway: Option<IpAddr>,
        #[serde(default)]
        netlen: u8,
    },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Event::*;
        match self {
            PeerUp { peer } => write!(f, "peer {} up", peer),
            PeerDown { peer } => write!(f, "peer {} down", peer),
            Update {
                peer,
                prefix,
                attributes,
            } => write!(
                f,
                "update {} from peer {} [{}]",
                prefix,
                peer,
                attributes.as_path
            ),
            Withdraw { peer, prefix } => write!(f, "withdraw {} from peer {}", prefix, peer),
            Nexthop {
                address,
                reachable,
                ..
            } => write!(
                f,
                "nexthop {} {}",
                address,
                if *reachable { "reachable" } else { "unreachable" }
            ),
        }
    }
}

impl Event {
    /// Feed this event to the RIB
    pub fn apply(&self, rib: &mut RIB) -> Result<()> {
        match self {
            Event::PeerUp { peer } => rib.peer_up(PeerId(*peer)),
            Event::PeerDown { peer } => rib.peer_down(PeerId(*peer)),
            Event::Update {
                peer,
                prefix,
                attributes,
            } => {
                let key: NetworkKey = prefix.parse()?;
                let attributes = RouteAttributes::try_from(attributes)?;
                rib.path_update(PeerId(*peer), &attributes, key)
            }
            Event::Withdraw { peer, prefix } => {
                let key: NetworkKey = prefix.parse()?;
                rib.path_remove(PeerId(*peer), key)
            }
            Event::Nexthop {
                address,
                reachable,
                connected,
                gateway,
                netlen,
            } => {
                let meta = NexthopMeta {
                    gateway: *gateway,
                    netlen: *netlen,
                };
                rib.nexthop_update(*address, *reachable, *connected, meta);
                Ok(())
            }
        }
    }
}

pub fn parse_events(contents: &str) -> Result<Vec<Event>> {
    serde_json::from_str(contents).map_err(|err| RdeError::Parse(err.to_string()))
}

pub fn events_from_file(path: &str) -> Result<Vec<Event>> {
    let mut file = File::open(path)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    parse_events(&contents)
}

/// Apply every event, returns the errors of the rejected ones
pub fn apply_all(rib: &mut RIB, events: &[Event]) -> Vec<(usize, RdeError)> {
    events
        .iter()
        .enumerate()
        .filter_map(|(i, event)| event.apply(rib).err().map(|err| (i, err)))
        .collect()
}

/// One line per rejected event, for logging
pub fn summarize_errors(errors: &[(usize, RdeError)]) -> String {
    errors
        .iter()
        .map(|(i, err)| format!("#{}: {}", i, err))
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rib::DecisionFlags;

    #[test]
    fn test_parse_events() {
        let events = parse_events(
            r#"[
                {"event": "peer_up", "peer": 1},
                {"event": "update", "peer": 1, "prefix": "10.0.0.0/24",
                 "attributes": {"as_path": "65001 {1 2}", "med": 5,
                                "communities": ["65001:1", "NO_EXPORT"]}},
                {"event": "withdraw", "peer": 1, "prefix": "10.0.0.0/24"},
                {"event": "nexthop", "address": "192.0.2.1", "reachable": true}
            ]"#,
        )
        .unwrap();
        assert_eq!(events.len(), 4);
        assert_eq!(events[1].to_string(), "update 10.0.0.0/24 from peer 1 [65001 {1 2}]");
        match &events[1] {
            Event::Update { attributes, .. } => {
                let attrs = RouteAttributes::try_from(attributes).unwrap();
                assert_eq!(attrs.med, 5);
                assert_eq!(attrs.local_pref, 100);
                assert_eq!(attrs.communities.len(), 2);
                assert_eq!(AsPath::new(attrs.as_path).unwrap().hops(), 2);
            }
            _ => panic!("Expected update"),
        }
        assert!(parse_events(r#"[{"event": "reboot"}]"#).is_err());
    }

    #[test]
    fn test_route_spec_others() {
        let spec = RouteSpec {
            originator_id: Some(Ipv4Addr::new(10, 0, 0, 9)),
            cluster_list: vec![Ipv4Addr::new(1, 1, 1, 1), Ipv4Addr::new(2, 2, 2, 2)],
            origin: Some("egp".to_string()),
            ..RouteSpec::default()
        };
        let attrs = RouteAttributes::try_from(&spec).unwrap();
        assert_eq!(attrs.origin, Origin::Egp);
        assert_eq!(attrs.others.len(), 2);
        assert_eq!(attrs.others[1].data.len(), 8);

        let bad = RouteSpec {
            communities: vec!["nope".to_string()],
            ..RouteSpec::default()
        };
        assert!(RouteAttributes::try_from(&bad).is_err());
    }

    #[test]
    fn test_apply_reports_errors() {
        let mut rib = RIB::new(DecisionFlags::default(), true);
        let events = parse_events(
            r#"[
                {"event": "peer_up", "peer": 9},
                {"event": "withdraw", "peer": 1, "prefix": "10.0.0.0/24"}
            ]"#,
        )
        .unwrap();
        let errors = apply_all(&mut rib, &events);
        // Withdrawals from unknown peers are ignored
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, 0);
        assert!(summarize_errors(&errors).contains("Unknown peer 9"));
    }
}
