pub mod aspath;
pub mod attributes;
pub mod community;
pub mod decide;
pub mod export;
pub mod families;
pub mod intern;
pub mod nexthop;
pub mod path;
pub mod peer;
pub mod prefix;
pub mod tree;

pub use aspath::AsPath;
pub use attributes::{
    AttributeStore, Labels, Origin, PathAttributes, PathFlags, RawAttribute, RouteAttributes,
};
pub use community::{
    AsContext, Community, CommunityPattern, CommunityRef, CommunitySet, CommunityStore,
};
pub use decide::{Decision, DecisionFlags, MedOutcome, Preference};
pub use export::{RibEvent, RibRoute};
pub use families::{Family, NetworkKey};
pub use nexthop::{Nexthop, NexthopMeta, NexthopState};
pub use path::PathId;
pub use peer::{PeerId, PeerState, RdePeer};
pub use prefix::{Prefix, PrefixId};
pub use tree::PrefixNode;

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use log::{debug, info, trace, warn};

use attributes::validate_others;
use nexthop::NexthopTable;
use path::{aspath_hash, PathTable};
use peer::PeerTable;
use prefix::PrefixTable;
use tree::PrefixTree;

use crate::config::ServerConfig;
use crate::error::{RdeError, Result, ValidationError};

type Clock = Box<dyn Fn() -> DateTime<Utc>>;

/// Active route of a node captured before a change
struct Evaluation {
    best: Option<PrefixId>,
    route: Option<RibRoute>,
    forward: Option<IpAddr>,
}

/// Route decision engine
///
/// Owns every table of the RIB. All operations run to completion; the
/// resulting notifications are queued and drained with [`RIB::take_events`].
pub struct RIB {
    flags: DecisionFlags,
    fib_update: bool,
    attributes: AttributeStore,
    communities: CommunityStore,
    tree: PrefixTree,
    prefixes: PrefixTable,
    paths: PathTable,
    peers: PeerTable,
    nexthops: NexthopTable,
    events: Vec<RibEvent>,
    clock: Clock,
}

impl RIB {
    pub fn new(flags: DecisionFlags, fib_update: bool) -> Self {
        Self {
            flags,
            fib_update,
            attributes: AttributeStore::new(),
            communities: CommunityStore::new(),
            tree: PrefixTree::new(),
            prefixes: PrefixTable::new(),
            paths: PathTable::new(),
            peers: PeerTable::new(),
            nexthops: NexthopTable::new(),
            events: Vec::with_capacity(64),
            clock: Box::new(Utc::now),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        let mut rib = Self::new(config.decision, config.fib_update);
        for peer in &config.peers {
            rib.add_peer(RdePeer::from(peer))?;
        }
        Ok(rib)
    }

    /// Replace the timestamp source for route age
    pub fn set_clock<F>(&mut self, clock: F)
    where
        F: Fn() -> DateTime<Utc> + 'static,
    {
        self.clock = Box::new(clock);
    }

    pub fn take_events(&mut self) -> Vec<RibEvent> {
        std::mem::take(&mut self.events)
    }

    // Peers

    pub fn add_peer(&mut self, peer: RdePeer) -> Result<()> {
        debug!("Adding {}", peer);
        self.peers.add(peer)?;
        Ok(())
    }

    pub fn peer_up(&mut self, id: PeerId) -> Result<()> {
        let peer = self.peers.get(id).ok_or(RdeError::UnknownPeer(id))?;
        if peer.is_up() {
            warn!("Peer {} is already up, flushing its routes", id);
            self.flush_peer(id);
        }
        if let Some(peer) = self.peers.get_mut(id) {
            peer.state = PeerState::Up;
            info!("Peer {} ({}) is up", id, peer.remote_addr);
        }
        Ok(())
    }

    pub fn peer_down(&mut self, id: PeerId) -> Result<()> {
        if self.peers.get(id).is_none() {
            return Err(RdeError::UnknownPeer(id));
        }
        let count = self.flush_peer(id);
        if let Some(peer) = self.peers.get_mut(id) {
            peer.state = PeerState::Down;
            info!(
                "Peer {} ({}) is down, removed {} prefixes",
                id, peer.remote_addr, count
            );
        }
        Ok(())
    }

    fn flush_peer(&mut self, id: PeerId) -> usize {
        let prefixes = self.prefixes.by_peer(id);
        let count = prefixes.len();
        for prefix in prefixes {
            self.prefix_destroy(prefix);
        }
        count
    }

    // Updates

    /// Announce `network` from `peer`
    ///
    /// A rejected update withdraws what the peer previously announced for
    /// the network before the error is returned.
    pub fn path_update(
        &mut self,
        peer: PeerId,
        input: &RouteAttributes,
        network: NetworkKey,
    ) -> Result<()> {
        let rde_peer = self.peers.get(peer).ok_or(RdeError::UnknownPeer(peer))?;
        if !rde_peer.is_up() {
            return Err(RdeError::PeerDown(peer));
        }
        let local_as = rde_peer.local_as;

        let key = match NetworkKey::from_parts(network.family, network.rd, network.addr, network.len)
        {
            Ok(key) => key,
            Err(err) => {
                // Nothing can be stored under a malformed key
                warn!("Rejected update for {} from peer {}: {}", network, peer, err);
                return Err(err.into());
            }
        };
        let attrs = match self.build_attributes(input, local_as) {
            Ok(attrs) => attrs,
            Err(err) => {
                warn!("Rejected update for {} from peer {}: {}", key, peer, err);
                if let Some(existing) = self.prefixes.lookup(peer, &key) {
                    self.prefix_destroy(existing);
                }
                return Err(err.into());
            }
        };
        if attrs.flags.looped {
            debug!("AS path loop for {} from peer {}", key, peer);
        }

        let now = (self.clock)();
        let hash = aspath_hash(&input.as_path);
        match self.prefixes.lookup(peer, &key) {
            Some(id) => {
                let (unchanged, old_path) = {
                    let prefix = self
                        .prefixes
                        .get(id)
                        .unwrap_or_else(|| panic!("Indexed {} is missing", id));
                    let path = self
                        .paths
                        .get(prefix.path)
                        .unwrap_or_else(|| panic!("{} lost its bundle", id));
                    (
                        prefix.path_id == input.path_id && path.attrs.as_ref() == &attrs,
                        prefix.path,
                    )
                };
                if unchanged {
                    trace!("Refreshing {} from peer {}", key, peer);
                    if let Some(prefix) = self.prefixes.get_mut(id) {
                        prefix.lastchange = now;
                    }
                    return Ok(());
                }
                let path = self.path_get_or_create(peer, hash, attrs);
                self.prefix_move(id, old_path, path, input.path_id, now);
            }
            None => {
                let path = self.path_get_or_create(peer, hash, attrs);
                self.prefix_add(peer, key, path, input.path_id, now);
            }
        }
        Ok(())
    }

    /// Withdraw `network` from `peer`, unknown peers and networks are ignored
    pub fn path_remove(&mut self, peer: PeerId, network: NetworkKey) -> Result<()> {
        if self.peers.get(peer).is_none() {
            debug!("Withdraw of {} from unknown peer {}", network, peer);
            return Ok(());
        }
        match self.prefixes.lookup(peer, &network) {
            Some(id) => {
                self.prefix_destroy(id);
            }
            None => debug!("Withdraw of unknown {} from peer {}", network, peer),
        }
        Ok(())
    }

    /// Kernel feedback about a nexthop
    ///
    /// A state flip re-sorts every network using the nexthop as one change
    /// and notifies at most once per network.
    pub fn nexthop_update(
        &mut self,
        addr: IpAddr,
        reachable: bool,
        connected: bool,
        meta: NexthopMeta,
    ) {
        let state = if reachable {
            NexthopState::Reachable
        } else {
            NexthopState::Unreachable
        };
        let (old_state, paths) = match self.nexthops.get(&addr) {
            Some(nexthop) => (
                nexthop.state,
                nexthop.paths.iter().copied().collect::<Vec<_>>(),
            ),
            None => {
                warn!("Feedback for unknown nexthop {}", addr);
                return;
            }
        };
        debug!("Nexthop {} {} -> {}", addr, old_state, state);

        let mut affected: BTreeMap<NetworkKey, Vec<PrefixId>> = BTreeMap::new();
        for path in paths {
            if let Some(path) = self.paths.get(path) {
                for id in path.prefixes.iter() {
                    if let Some(prefix) = self.prefixes.get(*id) {
                        affected.entry(prefix.key).or_default().push(*id);
                    }
                }
            }
        }

        if old_state == state {
            self.nexthop_set(addr, state, connected, meta);
            if state != NexthopState::Reachable || !self.fib_update {
                return;
            }
            // Gateway may have moved
            for (key, ids) in affected {
                if let Some(id) = ids.into_iter().find(|id| self.is_active(*id)) {
                    let nexthop = self.forward(id);
                    self.events.push(RibEvent::ForwardingChanged { key, nexthop });
                }
            }
            return;
        }

        // Candidates leave their lists while still sorted by the old state
        let mut pending = Vec::with_capacity(affected.len());
        for (key, ids) in affected {
            let eval = self.begin_evaluate(&key);
            for id in ids.iter() {
                self.list_remove(&key, *id);
            }
            pending.push((key, ids, eval));
        }
        self.nexthop_set(addr, state, connected, meta);
        for (key, ids, eval) in pending {
            for id in ids.iter() {
                self.list_insert(&key, *id);
            }
            let old = eval.best.filter(|best| ids.contains(best));
            self.finish_evaluate(&key, eval, old);
        }
    }

    fn nexthop_set(
        &mut self,
        addr: IpAddr,
        state: NexthopState,
        connected: bool,
        meta: NexthopMeta,
    ) {
        if let Some(nexthop) = self.nexthops.get_mut(&addr) {
            nexthop.state = state;
            nexthop.connected = connected;
            nexthop.gateway = meta.gateway;
            nexthop.netlen = meta.netlen;
        }
    }

    fn build_attributes(
        &self,
        input: &RouteAttributes,
        local_as: u32,
    ) -> std::result::Result<PathAttributes, ValidationError> {
        let others = validate_others(&input.others)?;
        let as_path = self.attributes.intern_aspath(input.as_path.clone())?;
        let others = others
            .into_iter()
            .map(|a| self.attributes.intern_attribute(a.flags, a.code, a.data.clone()))
            .collect();
        let flags = PathFlags {
            looped: as_path.contains(local_as),
            parse_error: input.parse_error,
        };
        Ok(PathAttributes {
            origin: input.origin,
            as_path,
            med: input.med,
            local_pref: input.local_pref,
            weight: input.weight,
            nexthop: input.nexthop,
            communities: self.communities.intern(input.communities.clone()),
            others,
            labels: input.labels,
            flags,
        })
    }

    // Bundles

    fn path_get_or_create(&mut self, peer: PeerId, hash: u64, attrs: PathAttributes) -> PathId {
        if let Some(id) = self.paths.find(peer, hash, &attrs) {
            return id;
        }
        let nexthop = attrs.nexthop;
        let id = self.paths.insert(peer, hash, attrs);
        debug!("New {} for peer {}", id, peer);
        if let Some(addr) = nexthop {
            if self.nexthops.link(addr, id) {
                debug!("Tracking nexthop {}", addr);
                self.events.push(RibEvent::NexthopAdded(addr));
            }
        }
        id
    }

    /// Free a bundle once its last prefix is gone
    fn path_release(&mut self, id: PathId) {
        match self.paths.get(id) {
            Some(path) if path.refcnt() == 0 => (),
            _ => return,
        }
        if let Some(path) = self.paths.remove(id) {
            debug!("Freeing {} of peer {}", id, path.peer);
            if let Some(addr) = path.attrs.nexthop {
                if self.nexthops.unlink(addr, id) {
                    debug!("Dropping nexthop {}", addr);
                    self.events.push(RibEvent::NexthopRemoved(addr));
                }
            }
        }
    }

    // Prefixes

    fn prefix_add(
        &mut self,
        peer: PeerId,
        key: NetworkKey,
        path: PathId,
        path_id: u32,
        now: DateTime<Utc>,
    ) {
        let id = self.prefixes.insert(Prefix {
            peer,
            key,
            path,
            path_id,
            lastchange: now,
        });
        self.paths.link_prefix(path, id);
        if let Some(peer) = self.peers.get_mut(peer) {
            peer.prefix_cnt += 1;
        }
        trace!("Adding {} for {} from peer {}", id, key, peer);

        self.tree.add(key);
        let eval = self.begin_evaluate(&key);
        self.list_insert(&key, id);
        self.finish_evaluate(&key, eval, None);
    }

    /// Relink an existing prefix to another bundle and re-run the decision once
    fn prefix_move(
        &mut self,
        id: PrefixId,
        old_path: PathId,
        new_path: PathId,
        path_id: u32,
        now: DateTime<Utc>,
    ) {
        let key = match self.prefixes.get(id) {
            Some(prefix) => prefix.key,
            None => return,
        };
        trace!("Moving {} for {} from {} to {}", id, key, old_path, new_path);
        let eval = self.begin_evaluate(&key);
        // Must leave the list with the attributes it was sorted by
        self.list_remove(&key, id);
        if old_path != new_path {
            self.paths.unlink_prefix(old_path, id);
            self.paths.link_prefix(new_path, id);
        }
        if let Some(prefix) = self.prefixes.get_mut(id) {
            prefix.path = new_path;
            prefix.path_id = path_id;
            prefix.lastchange = now;
        }
        self.list_insert(&key, id);
        self.finish_evaluate(&key, eval, Some(id));
        if old_path != new_path {
            self.path_release(old_path);
        }
    }

    fn prefix_destroy(&mut self, id: PrefixId) {
        let (key, peer, path) = match self.prefixes.get(id) {
            Some(prefix) => (prefix.key, prefix.peer, prefix.path),
            None => return,
        };
        trace!("Removing {} for {} from peer {}", id, key, peer);
        let eval = self.begin_evaluate(&key);
        self.list_remove(&key, id);
        self.finish_evaluate(&key, eval, Some(id));

        self.prefixes.remove(id);
        if self.paths.unlink_prefix(path, id) {
            self.path_release(path);
        }
        if let Some(peer) = self.peers.get_mut(peer) {
            peer.prefix_cnt = peer.prefix_cnt.saturating_sub(1);
        }
        if self.tree.get(&key).map_or(false, |node| node.refcnt() == 0) {
            self.tree.remove(&key);
        }
    }

    // Decision process glue

    fn begin_evaluate(&self, key: &NetworkKey) -> Evaluation {
        let best = self.tree.get(key).and_then(|node| node.active);
        Evaluation {
            best,
            route: best.and_then(|id| self.route(id)),
            forward: best.and_then(|id| self.forward(id)),
        }
    }

    fn list_insert(&mut self, key: &NetworkKey, id: PrefixId) {
        let decision = Decision::new(
            &self.prefixes,
            &self.paths,
            &self.peers,
            &self.nexthops,
            self.flags,
        );
        let node = self.tree.add(*key);
        decision.prefix_insert(&mut node.entries, id, None);
    }

    fn list_remove(&mut self, key: &NetworkKey, id: PrefixId) {
        let decision = Decision::new(
            &self.prefixes,
            &self.paths,
            &self.peers,
            &self.nexthops,
            self.flags,
        );
        match self.tree.get_mut(key) {
            Some(node) => decision.prefix_remove(&mut node.entries, id),
            None => panic!("{} has no node for {}", id, key),
        }
    }

    /// Refresh the cached active entry and notify when it changed
    fn finish_evaluate(&mut self, key: &NetworkKey, before: Evaluation, old: Option<PrefixId>) {
        let decision = Decision::new(
            &self.prefixes,
            &self.paths,
            &self.peers,
            &self.nexthops,
            self.flags,
        );
        let newbest = match self.tree.get_mut(key) {
            Some(node) => {
                node.active = decision.best(&node.entries);
                node.active
            }
            None => None,
        };
        if newbest == before.best && (old.is_none() || newbest != old) {
            return;
        }
        debug!(
            "Best path for {} changed: {:?} -> {:?}",
            key, before.best, newbest
        );
        let new = newbest.and_then(|id| self.route(id));
        let forward = newbest.and_then(|id| self.forward(id));
        self.events.push(RibEvent::BestPathChanged {
            key: *key,
            old: before.route,
            new,
        });
        if self.fib_update && (forward.is_some() || before.forward.is_some()) {
            self.events.push(RibEvent::ForwardingChanged {
                key: *key,
                nexthop: forward,
            });
        }
    }

    /// Address the kernel should forward to, `None` for local routes
    fn forward(&self, id: PrefixId) -> Option<IpAddr> {
        let prefix = self.prefixes.get(id)?;
        let addr = self.paths.get(prefix.path)?.attrs.nexthop?;
        self.nexthops.get(&addr).map(Nexthop::exit_nexthop)
    }

    fn is_active(&self, id: PrefixId) -> bool {
        self.prefixes
            .get(id)
            .and_then(|prefix| self.tree.get(&prefix.key))
            .map_or(false, |node| node.active == Some(id))
    }

    // Show

    /// Snapshot of one RIB row
    pub fn route(&self, id: PrefixId) -> Option<RibRoute> {
        let prefix = self.prefixes.get(id)?;
        let path = self.paths.get(prefix.path)?;
        let peer = self.peers.get(prefix.peer)?;
        let decision = Decision::new(
            &self.prefixes,
            &self.paths,
            &self.peers,
            &self.nexthops,
            self.flags,
        );
        Some(RibRoute {
            prefix: id,
            key: prefix.key,
            peer: prefix.peer,
            peer_addr: peer.remote_addr,
            path_id: prefix.path_id,
            attributes: path.attrs.clone(),
            lastchange: prefix.lastchange,
            eligible: decision.eligible(id),
        })
    }

    pub fn get(&self, key: &NetworkKey) -> Option<&PrefixNode> {
        self.tree.get(key)
    }

    /// Candidates for a network, most preferred first
    pub fn routes(&self, key: &NetworkKey) -> Vec<RibRoute> {
        self.tree
            .get(key)
            .map(|node| self.node_routes(node))
            .unwrap_or_default()
    }

    fn node_routes(&self, node: &PrefixNode) -> Vec<RibRoute> {
        node.entries
            .iter()
            .filter_map(|id| self.route(*id))
            .collect()
    }

    pub fn active(&self, key: &NetworkKey) -> Option<RibRoute> {
        self.tree
            .get(key)
            .and_then(|node| node.active)
            .and_then(|id| self.route(id))
    }

    /// Most specific network covering `addr`
    pub fn longest_match(
        &self,
        family: Family,
        rd: Option<u64>,
        addr: IpAddr,
    ) -> Option<&PrefixNode> {
        self.tree.longest_match(family, rd, addr)
    }

    /// Visit every node of a family with its ordered candidates
    pub fn dump<F>(&self, family: Family, mut f: F)
    where
        F: FnMut(&PrefixNode, &[RibRoute]),
    {
        self.tree.walk(family, |node| {
            let routes = self.node_routes(node);
            f(node, &routes);
        });
    }

    pub fn peer(&self, id: PeerId) -> Option<&RdePeer> {
        self.peers.get(id)
    }

    pub fn peers(&self) -> impl Iterator<Item = &RdePeer> {
        self.peers.iter()
    }

    pub fn nexthop(&self, addr: &IpAddr) -> Option<&Nexthop> {
        self.nexthops.get(addr)
    }

    pub fn node_count(&self) -> usize {
        self.tree.len()
    }

    pub fn prefix_count(&self) -> usize {
        self.prefixes.len()
    }

    pub fn path_count(&self) -> usize {
        self.paths.len()
    }

    pub fn nexthop_count(&self) -> usize {
        self.nexthops.len()
    }

    pub fn attribute_store(&self) -> &AttributeStore {
        &self.attributes
    }

    pub fn community_store(&self) -> &CommunityStore {
        &self.communities
    }
}

impl fmt::Debug for RIB {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<RIB nodes={} prefixes={} paths={} nexthops={} peers={}>",
            self.tree.len(),
            self.prefixes.len(),
            self.paths.len(),
            self.nexthops.len(),
            self.peers.len(),
        )
    }
}
