use std::collections::{hash_map::DefaultHasher, BTreeSet, HashMap};
use std::fmt;
use std::hash::Hasher;
use std::rc::Rc;

use super::attributes::PathAttributes;
use super::peer::PeerId;
use super::prefix::PrefixId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PathId(pub u64);

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "path#{}", self.0)
    }
}

/// Bundle lookup key, collisions are resolved by full comparison
pub fn aspath_hash(raw: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    hasher.write(raw);
    hasher.finish()
}

/// Attribute bundle of one peer and the prefixes using it
#[derive(Debug)]
pub struct PathEntry {
    pub peer: PeerId,
    pub attrs: Rc<PathAttributes>,
    pub hash: u64,
    pub prefixes: BTreeSet<PrefixId>,
}

impl PathEntry {
    pub fn refcnt(&self) -> usize {
        self.prefixes.len()
    }
}

#[derive(Debug, Default)]
pub struct PathTable {
    entries: HashMap<PathId, PathEntry>,
    index: HashMap<(PeerId, u64), Vec<PathId>>,
    by_peer: HashMap<PeerId, BTreeSet<PathId>>,
    next_id: u64,
}

impl PathTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing bundle of `peer` with exactly these attributes
    pub fn find(&self, peer: PeerId, hash: u64, attrs: &PathAttributes) -> Option<PathId> {
        self.index.get(&(peer, hash))?.iter().copied().find(|id| {
            self.entries
                .get(id)
                .map_or(false, |entry| entry.attrs.as_ref() == attrs)
        })
    }

    pub fn insert(&mut self, peer: PeerId, hash: u64, attrs: PathAttributes) -> PathId {
        self.next_id += 1;
        let id = PathId(self.next_id);
        self.entries.insert(
            id,
            PathEntry {
                peer,
                attrs: Rc::new(attrs),
                hash,
                prefixes: BTreeSet::new(),
            },
        );
        self.index.entry((peer, hash)).or_default().push(id);
        self.by_peer.entry(peer).or_default().insert(id);
        id
    }

    /// Drop an unused bundle from every index
    pub fn remove(&mut self, id: PathId) -> Option<PathEntry> {
        let entry = self.entries.remove(&id)?;
        if entry.refcnt() != 0 {
            panic!("Removing {} with {} prefixes", id, entry.refcnt());
        }
        let key = (entry.peer, entry.hash);
        if let Some(ids) = self.index.get_mut(&key) {
            ids.retain(|i| *i != id);
            if ids.is_empty() {
                self.index.remove(&key);
            }
        }
        if let Some(ids) = self.by_peer.get_mut(&entry.peer) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_peer.remove(&entry.peer);
            }
        }
        Some(entry)
    }

    pub fn link_prefix(&mut self, id: PathId, prefix: PrefixId) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.prefixes.insert(prefix);
        }
    }

    /// Returns true when the bundle has no prefixes left
    pub fn unlink_prefix(&mut self, id: PathId, prefix: PrefixId) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.prefixes.remove(&prefix);
                entry.refcnt() == 0
            }
            None => false,
        }
    }

    pub fn get(&self, id: PathId) -> Option<&PathEntry> {
        self.entries.get(&id)
    }

    pub fn by_peer(&self, peer: PeerId) -> Vec<PathId> {
        self.by_peer
            .get(&peer)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
