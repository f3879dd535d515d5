use std::cmp::Ordering;

use log::trace;
use serde::{Deserialize, Serialize};

use super::attributes::PathAttributes;
use super::nexthop::{Nexthop, NexthopTable};
use super::path::PathTable;
use super::peer::{PeerTable, RdePeer};
use super::prefix::{Prefix, PrefixId, PrefixTable};

/// Optional decision steps
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionFlags {
    /// Compare MED between paths from different neighbor ASes
    #[serde(default)]
    pub always_compare_med: bool,
    /// Prefer the older of two otherwise equal routes
    #[serde(default)]
    pub route_age: bool,
}

/// How far a comparison got relative to the MED step
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MedOutcome {
    /// Decided before MED, the result holds regardless of other paths
    NotReached,
    /// MED skipped since the neighbor ASes differ
    Skipped,
    /// MED was compared, the result may not be transitive
    Compared,
}

/// Result of comparing two candidates
///
/// `order` is `Greater` when the first candidate is preferred.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Preference {
    pub order: Ordering,
    pub med: MedOutcome,
}

struct Candidate<'a> {
    prefix: &'a Prefix,
    attrs: &'a PathAttributes,
    peer: &'a RdePeer,
}

/// Best path selection over one node's candidate list
///
/// Borrows the RIB tables read-only; lists are passed in separately so the
/// tree can be mutated while the tables are borrowed.
pub struct Decision<'a> {
    prefixes: &'a PrefixTable,
    paths: &'a PathTable,
    peers: &'a PeerTable,
    nexthops: &'a NexthopTable,
    flags: DecisionFlags,
}

impl<'a> Decision<'a> {
    pub fn new(
        prefixes: &'a PrefixTable,
        paths: &'a PathTable,
        peers: &'a PeerTable,
        nexthops: &'a NexthopTable,
        flags: DecisionFlags,
    ) -> Self {
        Self {
            prefixes,
            paths,
            peers,
            nexthops,
            flags,
        }
    }

    fn candidate(&self, id: PrefixId) -> Candidate<'a> {
        let prefix = self
            .prefixes
            .get(id)
            .unwrap_or_else(|| panic!("Decision on unknown {}", id));
        let path = self
            .paths
            .get(prefix.path)
            .unwrap_or_else(|| panic!("{} links to missing {}", id, prefix.path));
        let peer = self
            .peers
            .get(prefix.peer)
            .unwrap_or_else(|| panic!("{} belongs to unknown peer {}", id, prefix.peer));
        Candidate {
            prefix,
            attrs: path.attrs.as_ref(),
            peer,
        }
    }

    fn candidate_eligible(&self, c: &Candidate) -> bool {
        if c.attrs.flags.ineligible() {
            return false;
        }
        match c.attrs.nexthop {
            None => true,
            Some(addr) => self
                .nexthops
                .get(&addr)
                .map_or(false, Nexthop::is_reachable),
        }
    }

    /// Loop free, no attribute error and a usable nexthop
    pub fn eligible(&self, id: PrefixId) -> bool {
        let c = self.candidate(id);
        self.candidate_eligible(&c)
    }

    fn neighbor_as(c: &Candidate) -> u32 {
        c.attrs.as_path.neighbor().unwrap_or(c.peer.local_as)
    }

    fn decided(
        &self,
        a: PrefixId,
        b: PrefixId,
        rule: &str,
        order: Ordering,
        med: MedOutcome,
    ) -> Preference {
        trace!("{} vs {}: {:?} by {} ({:?})", a, b, order, rule, med);
        Preference { order, med }
    }

    /// Compare two candidates of the same network
    pub fn prefix_cmp(&self, a: PrefixId, b: PrefixId) -> Preference {
        use Ordering::Equal;
        let (ca, cb) = (self.candidate(a), self.candidate(b));
        let none = MedOutcome::NotReached;

        // 0. Ineligible paths lose against everything else
        let (ea, eb) = (self.candidate_eligible(&ca), self.candidate_eligible(&cb));
        if ea != eb {
            return self.decided(a, b, "eligibility", ea.cmp(&eb), none);
        }

        // 1. Higher local preference
        let order = ca.attrs.local_pref.cmp(&cb.attrs.local_pref);
        if order != Equal {
            return self.decided(a, b, "local-pref", order, none);
        }

        // 2. Shorter AS path
        let order = cb.attrs.as_path.hops().cmp(&ca.attrs.as_path.hops());
        if order != Equal {
            return self.decided(a, b, "as-path length", order, none);
        }

        // 3. Lowest origin
        let order = cb.attrs.origin.cmp(&ca.attrs.origin);
        if order != Equal {
            return self.decided(a, b, "origin", order, none);
        }

        // 4. Lowest MED, only between the same neighbor AS unless forced
        let med = if self.flags.always_compare_med {
            let order = cb.attrs.med.cmp(&ca.attrs.med);
            if order != Equal {
                return self.decided(a, b, "med", order, none);
            }
            MedOutcome::NotReached
        } else if Self::neighbor_as(&ca) == Self::neighbor_as(&cb) {
            let order = cb.attrs.med.cmp(&ca.attrs.med);
            if order != Equal {
                return self.decided(a, b, "med", order, MedOutcome::Compared);
            }
            MedOutcome::Compared
        } else {
            MedOutcome::Skipped
        };

        // 5. eBGP over iBGP
        let order = ca.peer.is_ebgp().cmp(&cb.peer.is_ebgp());
        if order != Equal {
            return self.decided(a, b, "ebgp", order, med);
        }

        // 6. Higher weight
        let order = ca.attrs.weight.cmp(&cb.attrs.weight);
        if order != Equal {
            return self.decided(a, b, "weight", order, med);
        }

        // 7. Older route
        if self.flags.route_age {
            let order = cb.prefix.lastchange.cmp(&ca.prefix.lastchange);
            if order != Equal {
                return self.decided(a, b, "route age", order, med);
            }
        }

        // 8. Lowest ORIGINATOR_ID or BGP id
        let ida = ca.attrs.originator_id().unwrap_or(ca.peer.remote_bgpid);
        let idb = cb.attrs.originator_id().unwrap_or(cb.peer.remote_bgpid);
        let order = idb.cmp(&ida);
        if order != Equal {
            return self.decided(a, b, "originator id", order, med);
        }

        // 9. Shortest CLUSTER_LIST
        let order = cb
            .attrs
            .cluster_list_len()
            .cmp(&ca.attrs.cluster_list_len());
        if order != Equal {
            return self.decided(a, b, "cluster list", order, med);
        }

        // 10. Lowest peer address, IPv4 before IPv6
        let order = cb.peer.remote_addr.cmp(&ca.peer.remote_addr);
        if order != Equal {
            return self.decided(a, b, "peer address", order, med);
        }

        // 11. Lowest path id
        let order = cb.prefix.path_id.cmp(&ca.prefix.path_id);
        if order != Equal {
            return self.decided(a, b, "path id", order, med);
        }

        panic!("Unable to order {} and {}: same peer and path id", a, b);
    }

    /// Insert `new` into a sorted candidate list
    ///
    /// The scan starts at `ep` (or the head). Entries that lost against `new`
    /// on MED are pulled out and re-inserted one by one once `new` is placed,
    /// starting from `new`.
    pub fn prefix_insert(&self, list: &mut Vec<PrefixId>, new: PrefixId, ep: Option<PrefixId>) {
        let mut redo = Vec::new();
        let mut insertp = ep;
        let mut selected = false;
        let mut i = ep
            .and_then(|ep| list.iter().position(|x| *x == ep))
            .unwrap_or(0);

        while i < list.len() {
            let xp = list[i];
            let pref = self.prefix_cmp(new, xp);
            if pref.order == Ordering::Greater {
                match pref.med {
                    MedOutcome::NotReached => break,
                    MedOutcome::Compared => {
                        list.remove(i);
                        if insertp == Some(xp) {
                            insertp = if i > 0 { Some(list[i - 1]) } else { None };
                        }
                        redo.push(xp);
                        continue;
                    }
                    // The best MED path of this neighbor AS comes first
                    MedOutcome::Skipped => selected = true,
                }
            } else if !selected {
                insertp = Some(xp);
            }
            i += 1;
        }

        let pos = insertp
            .and_then(|p| list.iter().position(|x| *x == p))
            .map_or(0, |p| p + 1);
        list.insert(pos, new);

        for xp in redo {
            trace!("Re-inserting {} after {}", xp, new);
            self.prefix_insert(list, xp, Some(new));
        }
    }

    /// Remove `old` from a sorted candidate list
    ///
    /// `old` must still resolve through the tables: successors whose order
    /// against it was decided by MED are re-inserted from the predecessor.
    pub fn prefix_remove(&self, list: &mut Vec<PrefixId>, old: PrefixId) {
        let idx = list
            .iter()
            .position(|x| *x == old)
            .unwrap_or_else(|| panic!("{} is not in its node list", old));
        let pp = if idx > 0 { Some(list[idx - 1]) } else { None };
        list.remove(idx);

        let mut redo = Vec::new();
        if idx < list.len() && self.prefix_cmp(old, list[idx]).med != MedOutcome::NotReached {
            let mut i = idx;
            while i < list.len() {
                let xp = list[i];
                if self.prefix_cmp(old, xp).med == MedOutcome::Compared {
                    list.remove(i);
                    redo.push(xp);
                } else {
                    i += 1;
                }
            }
        }

        for xp in redo {
            trace!("Re-inserting {} after removal of {}", xp, old);
            self.prefix_insert(list, xp, pp);
        }
    }

    /// Head of the list when it is eligible
    pub fn best(&self, list: &[PrefixId]) -> Option<PrefixId> {
        list.first().copied().filter(|id| self.eligible(*id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bgp_rs::{ASPath, Segment};
    use chrono::{Duration, Utc};

    use crate::rib::aspath::AsPath;
    use crate::rib::attributes::{AttributeStore, Labels, Origin, PathFlags};
    use crate::rib::community::{CommunitySet, CommunityStore};
    use crate::rib::families::NetworkKey;
    use crate::rib::peer::{PeerId, RdePeer};

    struct Fixture {
        store: AttributeStore,
        comms: CommunityStore,
        peers: PeerTable,
        paths: PathTable,
        prefixes: PrefixTable,
        nexthops: NexthopTable,
        list: Vec<PrefixId>,
        flags: DecisionFlags,
    }

    struct Route {
        peer: u32,
        neighbor: u32,
        med: u32,
        local_pref: u32,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: AttributeStore::new(),
                comms: CommunityStore::new(),
                peers: PeerTable::new(),
                paths: PathTable::new(),
                prefixes: PrefixTable::new(),
                nexthops: NexthopTable::new(),
                list: vec![],
                flags: DecisionFlags::default(),
            }
        }

        fn peer(&mut self, id: u32, remote_as: u32, bgpid: u32) {
            let addr = format!("192.0.2.{}", id).parse().unwrap();
            self.peers
                .add(RdePeer::new(PeerId(id), addr, remote_as, 65000, bgpid))
                .unwrap();
        }

        fn route(&mut self, route: Route) -> PrefixId {
            let raw = AsPath::encode(&ASPath {
                segments: vec![Segment::AS_SEQUENCE(vec![route.neighbor])],
            });
            let attrs = PathAttributes {
                origin: Origin::Igp,
                as_path: self.store.intern_aspath(raw).unwrap(),
                med: route.med,
                local_pref: route.local_pref,
                weight: 0,
                nexthop: None,
                communities: self.comms.intern(CommunitySet::new()),
                others: vec![],
                labels: Labels::default(),
                flags: PathFlags::default(),
            };
            let peer = PeerId(route.peer);
            let path = self.paths.insert(peer, 0, attrs);
            let key: NetworkKey = "10.0.0.0/24".parse().unwrap();
            let id = self.prefixes.insert(Prefix {
                peer,
                key,
                path,
                path_id: 0,
                lastchange: Utc::now(),
            });
            self.paths.link_prefix(path, id);
            id
        }

        fn insert(&mut self, id: PrefixId) {
            let decision = Decision::new(
                &self.prefixes,
                &self.paths,
                &self.peers,
                &self.nexthops,
                self.flags,
            );
            decision.prefix_insert(&mut self.list, id, None);
        }

        fn remove(&mut self, id: PrefixId) {
            let decision = Decision::new(
                &self.prefixes,
                &self.paths,
                &self.peers,
                &self.nexthops,
                self.flags,
            );
            decision.prefix_remove(&mut self.list, id);
        }

        fn decision(&self) -> Decision<'_> {
            Decision::new(
                &self.prefixes,
                &self.paths,
                &self.peers,
                &self.nexthops,
                self.flags,
            )
        }

        /// Pairs decided before MED must appear in preference order
        fn assert_sorted(&self) {
            let decision = self.decision();
            for (i, a) in self.list.iter().enumerate() {
                for b in &self.list[i + 1..] {
                    let pref = decision.prefix_cmp(*a, *b);
                    if pref.med == MedOutcome::NotReached {
                        assert_eq!(pref.order, Ordering::Greater, "{} before {}", a, b);
                    }
                }
            }
        }
    }

    /// A and C share neighbor AS 1, B comes from AS 2
    fn med_fixture() -> (Fixture, PrefixId, PrefixId, PrefixId) {
        let mut fx = Fixture::new();
        fx.peer(1, 1, 0x0a00_0002);
        fx.peer(2, 2, 0x0a00_0001);
        fx.peer(3, 1, 0x0a00_0003);
        let a = fx.route(Route {
            peer: 1,
            neighbor: 1,
            med: 10,
            local_pref: 100,
        });
        let b = fx.route(Route {
            peer: 2,
            neighbor: 2,
            med: 5,
            local_pref: 100,
        });
        let c = fx.route(Route {
            peer: 3,
            neighbor: 1,
            med: 20,
            local_pref: 100,
        });
        (fx, a, b, c)
    }

    #[test]
    fn test_med_outcomes() {
        let (fx, a, b, c) = med_fixture();
        let decision = fx.decision();
        assert_eq!(decision.prefix_cmp(a, b).med, MedOutcome::Skipped);
        assert_eq!(decision.prefix_cmp(b, c).med, MedOutcome::Skipped);
        let pref = decision.prefix_cmp(a, c);
        assert_eq!(pref.med, MedOutcome::Compared);
        assert_eq!(pref.order, Ordering::Greater);
    }

    #[test]
    fn test_med_scenario_all_orders() {
        let orders = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        for order in orders.iter() {
            let (mut fx, a, b, c) = med_fixture();
            let ids = [a, b, c];
            for i in order.iter() {
                fx.insert(ids[*i]);
            }
            assert_eq!(fx.list, vec![b, a, c], "insert order {:?}", order);
            fx.remove(b);
            assert_eq!(fx.list, vec![a, c], "insert order {:?}", order);
        }
    }

    #[test]
    fn test_always_compare_med() {
        let (mut fx, a, b, c) = med_fixture();
        fx.flags.always_compare_med = true;
        let decision = fx.decision();
        let pref = decision.prefix_cmp(b, a);
        assert_eq!(pref.med, MedOutcome::NotReached);
        assert_eq!(pref.order, Ordering::Greater);
        for id in [c, a, b].iter() {
            fx.insert(*id);
        }
        assert_eq!(fx.list, vec![b, a, c]);
    }

    #[test]
    fn test_antisymmetry() {
        let (fx, a, b, c) = med_fixture();
        let decision = fx.decision();
        for x in [a, b, c].iter() {
            for y in [a, b, c].iter().filter(|y| *y != x) {
                let xy = decision.prefix_cmp(*x, *y);
                let yx = decision.prefix_cmp(*y, *x);
                assert_eq!(xy.order, yx.order.reverse());
                assert_ne!(xy.order, Ordering::Equal);
            }
        }
    }

    #[test]
    fn test_ineligible_loses() {
        let mut fx = Fixture::new();
        fx.peer(1, 65001, 1);
        fx.peer(2, 65002, 2);
        let a = fx.route(Route {
            peer: 1,
            neighbor: 65001,
            med: 0,
            local_pref: 200,
        });
        let b = fx.route(Route {
            peer: 2,
            neighbor: 65002,
            med: 0,
            local_pref: 100,
        });
        // Unresolved nexthop on the higher local-pref path
        let path = fx.prefixes.get(a).unwrap().path;
        let mut attrs = (*fx.paths.get(path).unwrap().attrs).clone();
        attrs.nexthop = Some("198.51.100.1".parse().unwrap());
        let unresolved = fx.paths.insert(PeerId(1), 1, attrs);
        fx.prefixes.get_mut(a).unwrap().path = unresolved;

        fx.insert(a);
        fx.insert(b);
        assert_eq!(fx.list, vec![b, a]);
        let decision = fx.decision();
        assert!(!decision.eligible(a));
        assert_eq!(decision.best(&fx.list), Some(b));
        assert_eq!(decision.best(&fx.list[1..]), None);
    }

    #[test]
    fn test_route_age() {
        let mut fx = Fixture::new();
        fx.flags.route_age = true;
        fx.peer(1, 65001, 2);
        fx.peer(2, 65002, 1);
        let a = fx.route(Route {
            peer: 1,
            neighbor: 65001,
            med: 0,
            local_pref: 100,
        });
        let b = fx.route(Route {
            peer: 2,
            neighbor: 65002,
            med: 0,
            local_pref: 100,
        });
        fx.prefixes.get_mut(a).unwrap().lastchange = Utc::now() - Duration::hours(1);
        let decision = fx.decision();
        assert_eq!(decision.prefix_cmp(a, b).order, Ordering::Greater);
        fx.flags.route_age = false;
        let decision = fx.decision();
        // Falls through to the lower BGP id
        assert_eq!(decision.prefix_cmp(a, b).order, Ordering::Less);
    }

    #[test]
    fn test_ebgp_over_ibgp() {
        let mut fx = Fixture::new();
        fx.peer(1, 65000, 1);
        fx.peer(2, 65002, 2);
        let ibgp = fx.route(Route {
            peer: 1,
            neighbor: 65009,
            med: 0,
            local_pref: 100,
        });
        let ebgp = fx.route(Route {
            peer: 2,
            neighbor: 65002,
            med: 0,
            local_pref: 100,
        });
        assert_eq!(
            fx.decision().prefix_cmp(ebgp, ibgp),
            Preference {
                order: Ordering::Greater,
                med: MedOutcome::Skipped
            }
        );
    }

    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self, bound: u32) -> u32 {
            self.0 = self
                .0
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            ((self.0 >> 33) % u64::from(bound)) as u32
        }
    }

    #[test]
    fn test_random_insert_remove_keeps_order() {
        for seed in 1..20u64 {
            let mut rng = Lcg(seed);
            let mut fx = Fixture::new();
            let mut ids = vec![];
            for peer in 1..=8 {
                fx.peer(peer, 1 + rng.next(3), rng.next(1000));
                ids.push(fx.route(Route {
                    peer,
                    neighbor: 1 + rng.next(3),
                    med: rng.next(4),
                    local_pref: 100 + rng.next(2) * 100,
                }));
            }
            for _ in 0..40 {
                let id = ids[rng.next(ids.len() as u32) as usize];
                if fx.list.contains(&id) {
                    fx.remove(id);
                } else {
                    fx.insert(id);
                }
                fx.assert_sorted();
                let decision = fx.decision();
                assert_eq!(decision.best(&fx.list), fx.list.first().copied());
            }
        }
    }
}
