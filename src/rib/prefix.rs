use std::collections::{BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};

use super::families::NetworkKey;
use super::path::PathId;
use super::peer::PeerId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PrefixId(pub u64);

impl fmt::Display for PrefixId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "prefix#{}", self.0)
    }
}

/// RIB row: one per (peer, network)
#[derive(Debug, Clone)]
pub struct Prefix {
    pub peer: PeerId,
    pub key: NetworkKey,
    pub path: PathId,
    pub path_id: u32,
    pub lastchange: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct PrefixTable {
    rows: HashMap<PrefixId, Prefix>,
    index: HashMap<(PeerId, NetworkKey), PrefixId>,
    by_peer: HashMap<PeerId, BTreeSet<PrefixId>>,
    next_id: u64,
}

impl PrefixTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, peer: PeerId, key: &NetworkKey) -> Option<PrefixId> {
        self.index.get(&(peer, *key)).copied()
    }

    pub fn insert(&mut self, prefix: Prefix) -> PrefixId {
        self.next_id += 1;
        let id = PrefixId(self.next_id);
        let peer = prefix.peer;
        let previous = self.index.insert((peer, prefix.key), id);
        if let Some(previous) = previous {
            panic!("Duplicate prefix {} for peer {} ({})", prefix.key, peer, previous);
        }
        self.by_peer.entry(peer).or_default().insert(id);
        self.rows.insert(id, prefix);
        id
    }

    pub fn remove(&mut self, id: PrefixId) -> Option<Prefix> {
        let prefix = self.rows.remove(&id)?;
        self.index.remove(&(prefix.peer, prefix.key));
        if let Some(ids) = self.by_peer.get_mut(&prefix.peer) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_peer.remove(&prefix.peer);
            }
        }
        Some(prefix)
    }

    pub fn get(&self, id: PrefixId) -> Option<&Prefix> {
        self.rows.get(&id)
    }

    pub fn get_mut(&mut self, id: PrefixId) -> Option<&mut Prefix> {
        self.rows.get_mut(&id)
    }

    /// Prefixes of one peer in creation order
    pub fn by_peer(&self, peer: PeerId) -> Vec<PrefixId> {
        self.by_peer
            .get(&peer)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(peer: u32, key: &str) -> Prefix {
        Prefix {
            peer: PeerId(peer),
            key: key.parse().unwrap(),
            path: PathId(1),
            path_id: 0,
            lastchange: Utc::now(),
        }
    }

    #[test]
    fn test_insert_lookup_remove() {
        let mut table = PrefixTable::new();
        let a = table.insert(row(1, "10.0.0.0/24"));
        let b = table.insert(row(2, "10.0.0.0/24"));
        let key: NetworkKey = "10.0.0.0/24".parse().unwrap();
        assert_eq!(table.lookup(PeerId(1), &key), Some(a));
        assert_eq!(table.lookup(PeerId(2), &key), Some(b));
        assert_eq!(table.by_peer(PeerId(1)), vec![a]);
        assert_eq!(table.remove(a).unwrap().peer, PeerId(1));
        assert_eq!(table.lookup(PeerId(1), &key), None);
        assert!(table.remove(a).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    #[should_panic]
    fn test_duplicate_row() {
        let mut table = PrefixTable::new();
        table.insert(row(1, "10.0.0.0/24"));
        table.insert(row(1, "10.0.0.0/24"));
    }
}
