use std::fmt;
use std::net::IpAddr;
use std::rc::Rc;

use chrono::{DateTime, Utc};

use super::attributes::PathAttributes;
use super::families::NetworkKey;
use super::peer::PeerId;
use super::prefix::PrefixId;
use crate::utils::format_time_as_elapsed;

/// External representation of RIB info
/// Used outside of RIB (notifications, show output)
#[derive(Debug, Clone)]
pub struct RibRoute {
    pub prefix: PrefixId,
    pub key: NetworkKey,
    pub peer: PeerId,
    pub peer_addr: IpAddr,
    pub path_id: u32,
    pub attributes: Rc<PathAttributes>,
    pub lastchange: DateTime<Utc>,
    pub eligible: bool,
}

impl PartialEq for RibRoute {
    fn eq(&self, other: &Self) -> bool {
        self.prefix == other.prefix && Rc::ptr_eq(&self.attributes, &other.attributes)
    }
}

impl fmt::Display for RibRoute {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<RibRoute {} from={} path_id={} eligible={} age={}>",
            self.key,
            self.peer_addr,
            self.path_id,
            self.eligible,
            format_time_as_elapsed(self.lastchange),
        )
    }
}

/// Notifications for the update generation and kernel sync stages
#[derive(Debug, Clone, PartialEq)]
pub enum RibEvent {
    /// Active route of a network changed or was re-evaluated
    BestPathChanged {
        key: NetworkKey,
        old: Option<RibRoute>,
        new: Option<RibRoute>,
    },
    /// Forwarding address for a network, `None` removes it
    ForwardingChanged {
        key: NetworkKey,
        nexthop: Option<IpAddr>,
    },
    /// Start tracking reachability of this address
    NexthopAdded(IpAddr),
    /// Stop tracking this address
    NexthopRemoved(IpAddr),
}

impl fmt::Display for RibEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use RibEvent::*;
        match self {
            BestPathChanged { key, old, new } => {
                let show = |r: &Option<RibRoute>| {
                    r.as_ref()
                        .map(|r| r.peer_addr.to_string())
                        .unwrap_or_else(|| String::from("-"))
                };
                write!(f, "best {} {} -> {}", key, show(old), show(new))
            }
            ForwardingChanged { key, nexthop } => match nexthop {
                Some(nexthop) => write!(f, "fib {} via {}", key, nexthop),
                None => write!(f, "fib {} removed", key),
            },
            NexthopAdded(addr) => write!(f, "nexthop {} added", addr),
            NexthopRemoved(addr) => write!(f, "nexthop {} removed", addr),
        }
    }
}
