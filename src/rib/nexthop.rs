use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use super::path::PathId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NexthopState {
    /// Waiting for the first kernel answer
    Lookup,
    Unreachable,
    Reachable,
}

impl fmt::Display for NexthopState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use NexthopState::*;
        let word = match self {
            Lookup => "Lookup",
            Unreachable => "Unreachable",
            Reachable => "Reachable",
        };
        write!(f, "{}", word)
    }
}

/// Extra kernel feedback about how a nexthop resolves
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NexthopMeta {
    pub gateway: Option<IpAddr>,
    /// Length of the covering kernel route
    pub netlen: u8,
}

#[derive(Debug, Clone)]
pub struct Nexthop {
    pub addr: IpAddr,
    pub state: NexthopState,
    /// Directly connected, forward to `addr` itself
    pub connected: bool,
    pub gateway: Option<IpAddr>,
    pub netlen: u8,
    /// Bundles resolving through this nexthop
    pub paths: BTreeSet<PathId>,
}

impl Nexthop {
    fn new(addr: IpAddr) -> Self {
        Self {
            addr,
            state: NexthopState::Lookup,
            connected: false,
            gateway: None,
            netlen: 0,
            paths: BTreeSet::new(),
        }
    }

    pub fn refcnt(&self) -> usize {
        self.paths.len()
    }

    pub fn is_reachable(&self) -> bool {
        self.state == NexthopState::Reachable
    }

    /// Address handed to the forwarding plane
    pub fn exit_nexthop(&self) -> IpAddr {
        if self.connected {
            self.addr
        } else {
            self.gateway.unwrap_or(self.addr)
        }
    }
}

impl fmt::Display for Nexthop {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<Nexthop {} state={} connected={} paths={}>",
            self.addr,
            self.state,
            self.connected,
            self.refcnt()
        )
    }
}

/// Nexthops referenced by at least one bundle
#[derive(Debug, Default)]
pub struct NexthopTable {
    nexthops: HashMap<IpAddr, Nexthop>,
}

impl NexthopTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a bundle, returns true when the nexthop was newly created
    pub fn link(&mut self, addr: IpAddr, path: PathId) -> bool {
        let mut created = false;
        let nexthop = self.nexthops.entry(addr).or_insert_with(|| {
            created = true;
            Nexthop::new(addr)
        });
        nexthop.paths.insert(path);
        created
    }

    /// Detach a bundle, returns true when the nexthop went away with it
    pub fn unlink(&mut self, addr: IpAddr, path: PathId) -> bool {
        match self.nexthops.get_mut(&addr) {
            Some(nexthop) => {
                nexthop.paths.remove(&path);
                if nexthop.refcnt() == 0 {
                    self.nexthops.remove(&addr);
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }

    pub fn get(&self, addr: &IpAddr) -> Option<&Nexthop> {
        self.nexthops.get(addr)
    }

    pub fn get_mut(&mut self, addr: &IpAddr) -> Option<&mut Nexthop> {
        self.nexthops.get_mut(addr)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Nexthop> {
        self.nexthops.values()
    }

    pub fn len(&self) -> usize {
        self.nexthops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nexthops.is_empty()
    }
}
