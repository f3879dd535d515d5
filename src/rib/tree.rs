use std::collections::btree_map::{self, BTreeMap};
use std::net::IpAddr;

use ipnetwork::IpNetwork;

use super::families::{Family, NetworkKey};
use super::prefix::PrefixId;

/// One network with at least one candidate path
#[derive(Debug, Clone)]
pub struct PrefixNode {
    pub key: NetworkKey,
    /// Candidates, most preferred first
    pub entries: Vec<PrefixId>,
    /// First entry when it is eligible
    pub active: Option<PrefixId>,
}

impl PrefixNode {
    fn new(key: NetworkKey) -> Self {
        Self {
            key,
            entries: Vec::with_capacity(2),
            active: None,
        }
    }

    pub fn refcnt(&self) -> usize {
        self.entries.len()
    }
}

/// Index of every network in the RIB, ordered by family, rd and prefix
#[derive(Debug, Default)]
pub struct PrefixTree {
    nodes: BTreeMap<NetworkKey, PrefixNode>,
}

impl PrefixTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &NetworkKey) -> Option<&PrefixNode> {
        self.nodes.get(key)
    }

    pub fn get_mut(&mut self, key: &NetworkKey) -> Option<&mut PrefixNode> {
        self.nodes.get_mut(key)
    }

    /// Get or create
    pub fn add(&mut self, key: NetworkKey) -> &mut PrefixNode {
        self.nodes
            .entry(key)
            .or_insert_with(|| PrefixNode::new(key))
    }

    /// Free an empty node, panics if entries remain
    pub fn remove(&mut self, key: &NetworkKey) {
        if let Some(node) = self.nodes.get(key) {
            if node.refcnt() != 0 {
                panic!(
                    "Removing prefix node {} with {} entries",
                    key,
                    node.refcnt()
                );
            }
            self.nodes.remove(key);
        }
    }

    /// Most specific network covering `addr`
    pub fn longest_match(
        &self,
        family: Family,
        rd: Option<u64>,
        addr: IpAddr,
    ) -> Option<&PrefixNode> {
        if family.is_ipv4() != addr.is_ipv4() {
            return None;
        }
        (0..=family.max_len()).rev().find_map(|len| {
            let network = IpNetwork::new(addr, len).ok()?;
            let key = NetworkKey {
                family,
                rd,
                addr: network.network(),
                len,
            };
            self.nodes.get(&key)
        })
    }

    pub fn iter(&self) -> btree_map::Values<NetworkKey, PrefixNode> {
        self.nodes.values()
    }

    /// Visit every node of one family in key order
    pub fn walk<F>(&self, family: Family, mut f: F)
    where
        F: FnMut(&PrefixNode),
    {
        self.nodes
            .values()
            .filter(|n| n.key.family == family)
            .for_each(|n| f(n));
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> NetworkKey {
        s.parse().unwrap()
    }

    #[test]
    fn test_add_get_remove() {
        let mut tree = PrefixTree::new();
        assert!(tree.get(&key("10.0.0.0/24")).is_none());
        tree.add(key("10.0.0.0/24"));
        // Second add returns the same node
        tree.add(key("10.0.0.0/24")).entries.push(PrefixId(1));
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.get(&key("10.0.0.0/24")).unwrap().refcnt(), 1);
        tree.get_mut(&key("10.0.0.0/24")).unwrap().entries.clear();
        tree.remove(&key("10.0.0.0/24"));
        assert!(tree.is_empty());
    }

    #[test]
    #[should_panic]
    fn test_remove_busy_node() {
        let mut tree = PrefixTree::new();
        tree.add(key("10.0.0.0/24")).entries.push(PrefixId(1));
        tree.remove(&key("10.0.0.0/24"));
    }

    #[test]
    fn test_longest_match() {
        let mut tree = PrefixTree::new();
        tree.add(key("10.0.0.0/8"));
        tree.add(key("10.1.0.0/16"));
        tree.add(key("2001:db8::/32"));
        tree.add(key("rd 65000:1 10.1.1.0/24"));
        let addr: IpAddr = "10.1.1.1".parse().unwrap();
        let found = tree.longest_match(Family::Ipv4Unicast, None, addr).unwrap();
        assert_eq!(found.key, key("10.1.0.0/16"));
        let addr: IpAddr = "10.2.0.1".parse().unwrap();
        let found = tree.longest_match(Family::Ipv4Unicast, None, addr).unwrap();
        assert_eq!(found.key, key("10.0.0.0/8"));
        let addr: IpAddr = "10.1.1.1".parse().unwrap();
        let found = tree
            .longest_match(Family::Ipv4Vpn, Some(65000 << 32 | 1), addr)
            .unwrap();
        assert_eq!(found.key, key("rd 65000:1 10.1.1.0/24"));
        let addr: IpAddr = "192.0.2.1".parse().unwrap();
        assert!(tree.longest_match(Family::Ipv4Unicast, None, addr).is_none());
        let addr: IpAddr = "2001:db8::1".parse().unwrap();
        assert!(tree.longest_match(Family::Ipv6Unicast, None, addr).is_some());
    }

    #[test]
    fn test_walk_by_family() {
        let mut tree = PrefixTree::new();
        tree.add(key("10.0.0.0/8"));
        tree.add(key("10.0.0.0/16"));
        tree.add(key("2001:db8::/32"));
        let mut seen = vec![];
        tree.walk(Family::Ipv4Unicast, |n| seen.push(n.key.to_string()));
        assert_eq!(seen, vec!["10.0.0.0/8", "10.0.0.0/16"]);
    }
}
