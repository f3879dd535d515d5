use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use super::community::AsContext;
use crate::config::PeerConfig;
use crate::error::ValidationError;
use crate::utils::u32_to_dotted;

/// Session identifier assigned by the session layer
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub u32);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerState {
    Down,
    Up,
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let word = match self {
            PeerState::Down => "Down",
            PeerState::Up => "Up",
        };
        write!(f, "{}", word)
    }
}

/// What the decision process needs to know about a neighbor
#[derive(Clone, Debug)]
pub struct RdePeer {
    pub id: PeerId,
    pub remote_addr: IpAddr,
    pub remote_as: u32,
    pub local_as: u32,
    /// BGP identifier from the OPEN message
    pub remote_bgpid: u32,
    pub state: PeerState,
    /// Number of prefixes currently held for this peer
    pub prefix_cnt: usize,
}

impl RdePeer {
    pub fn new(
        id: PeerId,
        remote_addr: IpAddr,
        remote_as: u32,
        local_as: u32,
        remote_bgpid: u32,
    ) -> Self {
        Self {
            id,
            remote_addr,
            remote_as,
            local_as,
            remote_bgpid,
            state: PeerState::Down,
            prefix_cnt: 0,
        }
    }

    pub fn is_ebgp(&self) -> bool {
        self.remote_as != self.local_as
    }

    pub fn is_up(&self) -> bool {
        self.state == PeerState::Up
    }

    pub fn as_context(&self) -> AsContext {
        AsContext {
            remote_as: self.remote_as,
            local_as: self.local_as,
        }
    }
}

impl From<&PeerConfig> for RdePeer {
    fn from(config: &PeerConfig) -> Self {
        Self::new(
            PeerId(config.id),
            config.remote_ip,
            config.remote_as,
            config.local_as,
            u32::from(config.router_id),
        )
    }
}

impl fmt::Display for RdePeer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<Peer {} {} AS{} state={} prefixes={}>",
            self.id,
            self.remote_addr,
            u32_to_dotted(self.remote_as, '.'),
            self.state,
            self.prefix_cnt,
        )
    }
}

#[derive(Debug, Default)]
pub struct PeerTable {
    peers: BTreeMap<PeerId, RdePeer>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer, id and address must both be unused
    pub fn add(&mut self, peer: RdePeer) -> Result<(), ValidationError> {
        if self.peers.contains_key(&peer.id) {
            return Err(ValidationError::DuplicatePeer(peer.id));
        }
        if self
            .peers
            .values()
            .any(|p| p.remote_addr == peer.remote_addr)
        {
            return Err(ValidationError::DuplicatePeerAddress(
                peer.remote_addr.to_string(),
            ));
        }
        self.peers.insert(peer.id, peer);
        Ok(())
    }

    pub fn get(&self, id: PeerId) -> Option<&RdePeer> {
        self.peers.get(&id)
    }

    pub fn get_mut(&mut self, id: PeerId) -> Option<&mut RdePeer> {
        self.peers.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RdePeer> {
        self.peers.values()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
