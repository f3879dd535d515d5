use std::cell::RefCell;
use std::collections::{hash_map::DefaultHasher, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::rc::{Rc, Weak};

type Buckets<T> = RefCell<HashMap<u64, Vec<Weak<Slot<T>>>>>;

struct Slot<T> {
    value: T,
    hash: u64,
    table: Weak<Buckets<T>>,
}

impl<T> Drop for Slot<T> {
    // Last handle is gone, evict the dead entry from its bucket
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            if let Ok(mut buckets) = table.try_borrow_mut() {
                prune(&mut buckets, self.hash);
            }
        }
    }
}

fn prune<T>(buckets: &mut HashMap<u64, Vec<Weak<Slot<T>>>>, hash: u64) {
    if let Some(bucket) = buckets.get_mut(&hash) {
        bucket.retain(|w| w.strong_count() > 0);
        if bucket.is_empty() {
            buckets.remove(&hash);
        }
    }
}

fn content_hash<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Content-addressed table of shared values
///
/// The table only holds weak references: an entry lives exactly as long as
/// at least one [`Interned`] handle to it exists.
pub struct InternTable<T> {
    buckets: Rc<Buckets<T>>,
}

impl<T> InternTable<T>
where
    T: Hash + Eq,
{
    pub fn new() -> Self {
        Self {
            buckets: Rc::new(RefCell::new(HashMap::new())),
        }
    }

    /// Return the canonical handle for `value`, allocating it on first use
    pub fn intern(&self, value: T) -> Interned<T> {
        let hash = content_hash(&value);
        let mut buckets = self.buckets.borrow_mut();
        let bucket = buckets.entry(hash).or_insert_with(Vec::new);
        if let Some(slot) = bucket
            .iter()
            .filter_map(Weak::upgrade)
            .find(|slot| slot.value == value)
        {
            return Interned(slot);
        }
        let slot = Rc::new(Slot {
            value,
            hash,
            table: Rc::downgrade(&self.buckets),
        });
        bucket.push(Rc::downgrade(&slot));
        Interned(slot)
    }

    /// Lookup without allocating
    pub fn get(&self, value: &T) -> Option<Interned<T>> {
        let hash = content_hash(value);
        let buckets = self.buckets.borrow();
        buckets
            .get(&hash)?
            .iter()
            .filter_map(Weak::upgrade)
            .find(|slot| &slot.value == value)
            .map(Interned)
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.buckets
            .borrow()
            .values()
            .flat_map(|b| b.iter())
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for InternTable<T>
where
    T: Hash + Eq,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for InternTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<InternTable buckets={}>", self.buckets.borrow().len())
    }
}

/// Shared handle to an interned value
///
/// Equality and hashing are by identity; within one table equal content
/// always yields the same handle.
pub struct Interned<T>(Rc<Slot<T>>);

impl<T> Interned<T> {
    /// Number of live handles, including this one
    pub fn refcount(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }
}

impl<T> Clone for Interned<T> {
    fn clone(&self) -> Self {
        Interned(Rc::clone(&self.0))
    }
}

impl<T> Deref for Interned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0.value
    }
}

impl<T> PartialEq for Interned<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<T> Eq for Interned<T> {}

impl<T> Hash for Interned<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Rc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl<T: fmt::Debug> fmt::Debug for Interned<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.value.fmt(f)
    }
}

impl<T: fmt::Display> fmt::Display for Interned<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.value.fmt(f)
    }
}
