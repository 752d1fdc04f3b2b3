//! a [CostBasedLru] is an Lru cache which uses the cost of the items in the cache to decide when to evict.
//!
//! This is a vec-backed doubly linked list plus a hash index from key to slot.  Unlike a plain LRU, eviction is
//! reported back to the caller, since evicted values here are handles that must be released.
use std::collections::HashMap;
use std::hash::Hash;

use ahash::RandomState;

struct OccupiedEntry<K, V> {
    key: K,
    item: V,
    prev: Option<usize>,
    next: Option<usize>,
    cost: u64,
}

enum CacheEntry<K, V> {
    /// Free slot, pointing at the next free slot.
    Empty { next_empty: Option<usize> },
    Occupied(OccupiedEntry<K, V>),
}

impl<K, V> CacheEntry<K, V> {
    fn occupied(&self) -> &OccupiedEntry<K, V> {
        match self {
            Self::Occupied(x) => x,
            Self::Empty { .. } => panic!("Entry should be occupied"),
        }
    }

    fn occupied_mut(&mut self) -> &mut OccupiedEntry<K, V> {
        match self {
            Self::Occupied(x) => x,
            Self::Empty { .. } => panic!("Entry should be occupied"),
        }
    }
}

/// What an insert displaced.
#[derive(Debug, PartialEq, Eq)]
pub struct InsertOutcome<K, V> {
    /// The previous value under the same key.
    pub replaced: Option<V>,
    /// Entries pushed out to get back under the cost limit, least recently used first.
    pub evicted: Vec<(K, V)>,
}

pub struct CostBasedLru<K: Hash + Eq, V> {
    entries: Vec<CacheEntry<K, V>>,
    index: HashMap<K, usize, RandomState>,
    max_cost: u64,
    /// Most recently used.
    head: Option<usize>,
    /// Least recently used; evicted first.
    tail: Option<usize>,
    empty_head: Option<usize>,
    current_cost: u64,
}

impl<K: Hash + Eq + Clone, V> CostBasedLru<K, V> {
    pub fn new(max_cost: u64) -> CostBasedLru<K, V> {
        CostBasedLru {
            entries: Default::default(),
            index: Default::default(),
            max_cost,
            head: None,
            tail: None,
            empty_head: None,
            current_cost: 0,
        }
    }

    pub fn max_cost(&self) -> u64 {
        self.max_cost
    }

    pub fn current_cost(&self) -> u64 {
        self.current_cost
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Take a slot out of the list without freeing it.
    fn unlink(&mut self, slot: usize) {
        let (prev, next) = {
            let e = self.entries[slot].occupied();
            (e.prev, e.next)
        };
        match prev {
            Some(p) => self.entries[p].occupied_mut().next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.entries[n].occupied_mut().prev = prev,
            None => self.tail = prev,
        }
    }

    fn push_front(&mut self, slot: usize) {
        {
            let e = self.entries[slot].occupied_mut();
            e.prev = None;
            e.next = self.head;
        }
        if let Some(h) = self.head {
            self.entries[h].occupied_mut().prev = Some(slot);
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }

    /// Unlink and free a slot, returning what was in it.
    fn vacate(&mut self, slot: usize) -> (K, V) {
        self.unlink(slot);
        let old = std::mem::replace(
            &mut self.entries[slot],
            CacheEntry::Empty {
                next_empty: self.empty_head,
            },
        );
        self.empty_head = Some(slot);
        match old {
            CacheEntry::Occupied(OccupiedEntry {
                key, item, cost, ..
            }) => {
                self.index.remove(&key);
                self.current_cost -= cost;
                (key, item)
            }
            CacheEntry::Empty { .. } => panic!("Should have been occupied"),
        }
    }

    fn free_slot(&mut self) -> usize {
        if let Some(e) = self.empty_head {
            self.empty_head = match self.entries[e] {
                CacheEntry::Empty { next_empty } => next_empty,
                CacheEntry::Occupied(_) => panic!("Entry should be empty"),
            };
            return e;
        }
        self.entries.push(CacheEntry::Empty { next_empty: None });
        self.entries.len() - 1
    }

    /// Look an item up, marking it most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let slot = *self.index.get(key)?;
        self.unlink(slot);
        self.push_front(slot);
        Some(&self.entries[slot].occupied().item)
    }

    /// Look an item up without touching its recency.
    pub fn peek(&self, key: &K) -> Option<&V> {
        let slot = *self.index.get(key)?;
        Some(&self.entries[slot].occupied().item)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let slot = *self.index.get(key)?;
        Some(self.vacate(slot).1)
    }

    /// Insert as the most recently used item, then evict from the cold end until back under the limit.
    ///
    /// An item costing more than the limit on its own evicts everything, itself included.
    pub fn insert(&mut self, key: K, value: V, cost: u64) -> InsertOutcome<K, V> {
        let replaced = self.remove(&key);
        let slot = self.free_slot();
        self.entries[slot] = CacheEntry::Occupied(OccupiedEntry {
            key: key.clone(),
            item: value,
            prev: None,
            next: None,
            cost,
        });
        self.index.insert(key, slot);
        self.push_front(slot);
        self.current_cost += cost;

        let mut evicted = vec![];
        while self.current_cost > self.max_cost {
            let cold = self.tail.expect("Not enough entries to explain cost");
            evicted.push(self.vacate(cold));
        }

        InsertOutcome { replaced, evicted }
    }

    /// Remove everything, most recently used first.
    pub fn drain(&mut self) -> Vec<(K, V)> {
        let mut out = Vec::with_capacity(self.len());
        while let Some(h) = self.head {
            out.push(self.vacate(h));
        }
        self.entries.clear();
        self.empty_head = None;
        out
    }

    /// Iterator visiting entries in most-recently-used order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        let mut slot = self.head;
        std::iter::from_fn(move || {
            let cur = self.entries[slot?].occupied();
            slot = cur.next;
            Some((&cur.key, &cur.item))
        })
    }
}
