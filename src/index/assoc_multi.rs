//! Multi-value hash table
//!
//! `AssocMulti` maps keys to one or many elements. Storage is a power-of-two
//! number of independent buckets; an element's bucket is a pure function of
//! its key hash. Each bucket is an open-addressing slot array with linear
//! probing, and the slots additionally carry an intrusive doubly-linked list
//! (`prev`/`next` slot indices) chaining all elements that share a key.
//!
//! - the first element of a key is the chain head (`prev == INVALID`); it
//!   lives at or after the slot given by the key hash
//! - every further element lives at or after the slot given by its identity
//!   hash and is spliced into the chain right after the head
//! - each entry caches the hash that determines its ideal slot, so resize
//!   and hole healing never consult the helper
//!
//! # Invariants
//!
//! A. Chain integrity: `prev == INVALID` iff the entry is the head of its
//!    chain; following `next` from a head visits exactly the elements of
//!    that key and ends at `INVALID`.
//!
//! B. Probe reachability: scanning forward cyclically from an entry's ideal
//!    slot reaches the entry before any empty slot.
//!
//! C. Load factor: `3 * used < 2 * capacity` is checked before every insert;
//!    a bucket that fails the check grows to `2 * capacity + 1` first.
//!
//! The helper is consulted only before elements are placed or unlinked, so
//! a failing helper never leaves a half-done operation behind. A bucket may
//! already have grown at that point; growth does not change its contents.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use rayon::prelude::*;
use serde::Serialize;

use super::errors::{IndexError, IndexResult};

/// Sentinel for "no slot"
pub const INVALID: usize = usize::MAX;

/// Smallest capacity that always keeps a free slot under invariant C
pub const MIN_BUCKET_CAPACITY: usize = 3;

/// Hashing and comparison of stored elements.
///
/// `hash_element(e, true)` must agree with `hash_key` for equal keys, and
/// both must agree with the equality predicates.
pub trait AssocHelper<E> {
    /// Lookup key type
    type Key: ?Sized;

    fn hash_key(&self, key: &Self::Key) -> IndexResult<u64>;

    /// Key hash (`by_key`) or identity hash of an element
    fn hash_element(&self, element: &E, by_key: bool) -> IndexResult<u64>;

    fn is_equal_key_element(&self, key: &Self::Key, element: &E) -> IndexResult<bool>;

    /// Same identity and same key
    fn is_equal_element_element(&self, left: &E, right: &E) -> IndexResult<bool>;

    /// Same key
    fn is_equal_element_element_by_key(&self, left: &E, right: &E) -> IndexResult<bool>;
}

/// Whether a key may carry more than one element
pub trait KeyPolicy: Send + Sync {
    const UNIQUE: bool;
    const NAME: &'static str;
}

/// Keys chain any number of elements
#[derive(Debug, Clone, Copy, Default)]
pub struct Multi;

/// A second element for an existing key is refused
#[derive(Debug, Clone, Copy, Default)]
pub struct Unique;

impl KeyPolicy for Multi {
    const UNIQUE: bool = false;
    const NAME: &'static str = "multi";
}

impl KeyPolicy for Unique {
    const UNIQUE: bool = true;
    const NAME: &'static str = "unique";
}

#[derive(Debug, Clone, Copy)]
struct Entry<E> {
    element: Option<E>,
    next: usize,
    prev: usize,
    /// Key hash for a head, identity hash otherwise
    hash_cache: u64,
}

impl<E> Entry<E> {
    const EMPTY: Self = Entry {
        element: None,
        next: INVALID,
        prev: INVALID,
        hash_cache: 0,
    };

    fn is_head(&self) -> bool {
        self.prev == INVALID
    }
}

/// Per-bucket occupancy figures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BucketStats {
    pub capacity: usize,
    pub used: usize,
    pub collisions: usize,
    pub resizes: usize,
}

/// A structural invariant does not hold
#[derive(Debug, thiserror::Error)]
pub enum InvariantViolation {
    #[error("bucket {bucket}, slot {slot}: {detail}")]
    Structure {
        bucket: usize,
        slot: usize,
        detail: String,
    },
    #[error("bucket {bucket}: {detail}")]
    Counters { bucket: usize, detail: String },
    #[error(transparent)]
    Helper(#[from] IndexError),
}

#[inline]
fn ideal_slot(hash: u64, capacity: usize) -> usize {
    (hash % capacity as u64) as usize
}

#[inline]
fn incr(slot: usize, capacity: usize) -> usize {
    if slot + 1 == capacity {
        0
    } else {
        slot + 1
    }
}

/// Whether `k` lies in the cyclic interval `(from, to]`
#[inline]
fn in_cyclic_range(from: usize, k: usize, to: usize) -> bool {
    if from <= to {
        from < k && k <= to
    } else {
        from < k || k <= to
    }
}

fn empty_entries<E: Copy>(capacity: usize) -> IndexResult<Vec<Entry<E>>> {
    let mut entries = Vec::new();
    entries.try_reserve_exact(capacity).map_err(|e| {
        IndexError::out_of_memory(format!("bucket of {} slots: {}", capacity, e))
    })?;
    entries.resize(capacity, Entry::EMPTY);
    Ok(entries)
}

#[derive(Debug, Clone)]
struct Bucket<E> {
    entries: Vec<Entry<E>>,
    used: usize,
    collisions: usize,
    resizes: usize,
}

impl<E: Copy> Bucket<E> {
    fn with_capacity(capacity: usize) -> IndexResult<Self> {
        Ok(Self {
            entries: empty_entries(capacity)?,
            used: 0,
            collisions: 0,
            resizes: 0,
        })
    }

    fn capacity(&self) -> usize {
        self.entries.len()
    }

    fn stats(&self) -> BucketStats {
        BucketStats {
            capacity: self.capacity(),
            used: self.used,
            collisions: self.collisions,
            resizes: self.resizes,
        }
    }

    /// Probe from `key_hash` for a head accepted by `matches`, or the first
    /// empty slot.
    fn probe_head<F>(&self, key_hash: u64, mut matches: F) -> IndexResult<usize>
    where
        F: FnMut(&E) -> IndexResult<bool>,
    {
        let capacity = self.capacity();
        let mut i = ideal_slot(key_hash, capacity);
        loop {
            let entry = &self.entries[i];
            match &entry.element {
                None => return Ok(i),
                Some(element) if entry.is_head() && entry.hash_cache == key_hash => {
                    if matches(element)? {
                        return Ok(i);
                    }
                }
                Some(_) => {}
            }
            i = incr(i, capacity);
        }
    }

    /// Probe from `id_hash` for a non-head accepted by `matches`, or the
    /// first empty slot.
    fn probe_further<F>(&self, id_hash: u64, mut matches: F) -> IndexResult<usize>
    where
        F: FnMut(&E) -> IndexResult<bool>,
    {
        let capacity = self.capacity();
        let mut i = ideal_slot(id_hash, capacity);
        loop {
            let entry = &self.entries[i];
            match &entry.element {
                None => return Ok(i),
                Some(element) if !entry.is_head() && entry.hash_cache == id_hash => {
                    if matches(element)? {
                        return Ok(i);
                    }
                }
                Some(_) => {}
            }
            i = incr(i, capacity);
        }
    }

    fn find_head_by_key<H>(
        &self,
        helper: &H,
        key: &H::Key,
        key_hash: u64,
    ) -> IndexResult<Option<usize>>
    where
        H: AssocHelper<E> + ?Sized,
    {
        let i = self.probe_head(key_hash, |head| helper.is_equal_key_element(key, head))?;
        Ok(self.entries[i].element.is_some().then_some(i))
    }

    /// Slot holding exactly `element`
    fn find_element<H>(&self, helper: &H, element: &E, key_hash: u64) -> IndexResult<Option<usize>>
    where
        H: AssocHelper<E> + ?Sized,
    {
        let i = self.probe_head(key_hash, |head| {
            helper.is_equal_element_element_by_key(element, head)
        })?;
        let Some(head) = &self.entries[i].element else {
            return Ok(None);
        };
        if helper.is_equal_element_element(element, head)? {
            return Ok(Some(i));
        }

        let id_hash = helper.hash_element(element, false)?;
        let j = self.probe_further(id_hash, |candidate| {
            helper.is_equal_element_element(element, candidate)
        })?;
        Ok(self.entries[j].element.is_some().then_some(j))
    }

    fn insert<H>(
        &mut self,
        helper: &H,
        element: E,
        key_hash: u64,
        overwrite: bool,
        check_equality: bool,
        unique: bool,
    ) -> IndexResult<Option<E>>
    where
        H: AssocHelper<E> + ?Sized,
    {
        if 3 * self.used >= 2 * self.capacity() {
            self.resize(2 * self.capacity() + 1)?;
        }

        let i = self.probe_head(key_hash, |head| {
            helper.is_equal_element_element_by_key(&element, head)
        })?;
        let Some(head) = self.entries[i].element else {
            self.entries[i] = Entry {
                element: Some(element),
                next: INVALID,
                prev: INVALID,
                hash_cache: key_hash,
            };
            self.used += 1;
            return Ok(None);
        };

        if unique {
            if overwrite && check_equality && helper.is_equal_element_element(&element, &head)? {
                self.entries[i].element = Some(element);
            }
            return Ok(Some(head));
        }

        if check_equality && helper.is_equal_element_element(&element, &head)? {
            if overwrite {
                self.entries[i].element = Some(element);
            }
            return Ok(Some(head));
        }

        let id_hash = helper.hash_element(&element, false)?;
        let j = self.probe_further(id_hash, |candidate| {
            if check_equality {
                helper.is_equal_element_element(&element, candidate)
            } else {
                Ok(false)
            }
        })?;

        if let Some(existing) = self.entries[j].element {
            if overwrite {
                self.entries[j].element = Some(element);
            }
            return Ok(Some(existing));
        }

        self.link_after(i, j, element, id_hash);
        self.used += 1;
        self.collisions += 1;
        Ok(None)
    }

    /// Place `element` in the empty slot `slot`, right after `head`.
    fn link_after(&mut self, head: usize, slot: usize, element: E, id_hash: u64) {
        let next = self.entries[head].next;
        self.entries[slot] = Entry {
            element: Some(element),
            next,
            prev: head,
            hash_cache: id_hash,
        };
        if next != INVALID {
            self.entries[next].prev = slot;
        }
        self.entries[head].next = slot;
    }

    fn remove<H>(&mut self, helper: &H, element: &E, key_hash: u64) -> IndexResult<Option<E>>
    where
        H: AssocHelper<E> + ?Sized,
    {
        let Some(i) = self.find_element(helper, element, key_hash)? else {
            return Ok(None);
        };

        let entry = self.entries[i];
        if entry.is_head() {
            if entry.next == INVALID {
                self.entries[i] = Entry::EMPTY;
                self.used -= 1;
                self.heal_hole(i);
            } else {
                // The successor becomes the head and moves into the head slot,
                // where it is found through the key hash.
                let successor = entry.next;
                let moved = self.entries[successor];
                self.entries[i] = Entry {
                    element: moved.element,
                    next: moved.next,
                    prev: INVALID,
                    hash_cache: entry.hash_cache,
                };
                if moved.next != INVALID {
                    self.entries[moved.next].prev = i;
                }
                self.entries[successor] = Entry::EMPTY;
                self.used -= 1;
                self.collisions -= 1;
                self.heal_hole(successor);
            }
        } else {
            self.entries[entry.prev].next = entry.next;
            if entry.next != INVALID {
                self.entries[entry.next].prev = entry.prev;
            }
            self.entries[i] = Entry::EMPTY;
            self.used -= 1;
            self.collisions -= 1;
            self.heal_hole(i);
        }

        Ok(entry.element)
    }

    /// Relocate displaced entries into the hole left at `hole`.
    fn heal_hole(&mut self, mut hole: usize) {
        let capacity = self.capacity();
        let mut j = incr(hole, capacity);
        while self.entries[j].element.is_some() {
            let ideal = ideal_slot(self.entries[j].hash_cache, capacity);
            if !in_cyclic_range(hole, ideal, j) {
                self.move_entry(j, hole);
                hole = j;
            }
            j = incr(j, capacity);
        }
    }

    fn move_entry(&mut self, from: usize, to: usize) {
        let entry = self.entries[from];
        self.entries[to] = entry;
        self.entries[from] = Entry::EMPTY;
        if entry.prev != INVALID {
            self.entries[entry.prev].next = to;
        }
        if entry.next != INVALID {
            self.entries[entry.next].prev = to;
        }
    }

    fn resize(&mut self, new_capacity: usize) -> IndexResult<()> {
        if new_capacity < MIN_BUCKET_CAPACITY || new_capacity * 2 < self.used * 3 {
            return Err(IndexError::bad_parameter(format!(
                "capacity {} cannot hold {} elements within the load factor",
                new_capacity, self.used
            )));
        }

        let old = std::mem::replace(&mut self.entries, empty_entries(new_capacity)?);
        for (i, entry) in old.iter().enumerate() {
            let Some(element) = entry.element else {
                continue;
            };
            if !entry.is_head() {
                continue;
            }
            let head = self.insert_first(element, entry.hash_cache);

            if entry.next == INVALID {
                continue;
            }
            let mut tail = entry.next;
            while old[tail].next != INVALID {
                tail = old[tail].next;
            }
            let mut k = tail;
            while k != i {
                if let Some(member) = old[k].element {
                    self.insert_further(head, member, old[k].hash_cache);
                }
                k = old[k].prev;
            }
        }

        self.resizes += 1;
        Ok(())
    }

    /// Place a known-unique head, skipping all comparisons.
    fn insert_first(&mut self, element: E, key_hash: u64) -> usize {
        let capacity = self.capacity();
        let mut i = ideal_slot(key_hash, capacity);
        while self.entries[i].element.is_some() {
            i = incr(i, capacity);
        }
        self.entries[i] = Entry {
            element: Some(element),
            next: INVALID,
            prev: INVALID,
            hash_cache: key_hash,
        };
        i
    }

    /// Attach a known-distinct chain member right after `head`.
    fn insert_further(&mut self, head: usize, element: E, id_hash: u64) {
        let capacity = self.capacity();
        let mut j = ideal_slot(id_hash, capacity);
        while self.entries[j].element.is_some() {
            j = incr(j, capacity);
        }
        self.link_after(head, j, element, id_hash);
    }

    /// Elements of the chain starting at `start`, at most `limit` (0 = all)
    fn collect_chain(&self, start: usize, limit: usize) -> Vec<E> {
        let mut out = Vec::new();
        let mut i = start;
        while i != INVALID && (limit == 0 || out.len() < limit) {
            if let Some(element) = self.entries[i].element {
                out.push(element);
            }
            i = self.entries[i].next;
        }
        out
    }

    fn check_invariants<H>(
        &self,
        bucket: usize,
        helper: &H,
        mask: usize,
    ) -> Result<(), InvariantViolation>
    where
        H: AssocHelper<E> + ?Sized,
    {
        let capacity = self.capacity();
        let structure = |slot: usize, detail: String| InvariantViolation::Structure {
            bucket,
            slot,
            detail,
        };

        let mut used = 0;
        let mut heads = 0;
        let mut chained = 0;

        for (i, entry) in self.entries.iter().enumerate() {
            let Some(element) = &entry.element else {
                continue;
            };
            used += 1;

            // A: neighbours point back
            if entry.prev != INVALID {
                let prev = self.entries.get(entry.prev).filter(|p| p.element.is_some());
                if prev.map(|p| p.next) != Some(i) {
                    return Err(structure(i, format!("prev {} does not link back", entry.prev)));
                }
            }
            if entry.next != INVALID {
                let next = self.entries.get(entry.next).filter(|n| n.element.is_some());
                if next.map(|n| n.prev) != Some(i) {
                    return Err(structure(i, format!("next {} does not link back", entry.next)));
                }
            }

            // B: reachable from the ideal slot
            let mut k = ideal_slot(entry.hash_cache, capacity);
            while k != i {
                if self.entries[k].element.is_none() {
                    let detail = format!("unreachable, empty slot {} on probe path", k);
                    return Err(structure(i, detail));
                }
                k = incr(k, capacity);
            }

            if !entry.is_head() {
                if entry.hash_cache != helper.hash_element(element, false)? {
                    return Err(structure(i, "stale identity hash".to_string()));
                }
                continue;
            }

            heads += 1;
            if entry.hash_cache != helper.hash_element(element, true)? {
                return Err(structure(i, "stale key hash".to_string()));
            }
            if (entry.hash_cache as usize & mask) != bucket {
                return Err(structure(i, "head stored in the wrong bucket".to_string()));
            }

            let mut member = entry.next;
            let mut steps = 0;
            while member != INVALID {
                steps += 1;
                if steps > self.used {
                    return Err(structure(i, "chain does not terminate".to_string()));
                }
                let Some(value) = &self.entries[member].element else {
                    return Err(structure(member, "chain runs through an empty slot".to_string()));
                };
                if !helper.is_equal_element_element_by_key(element, value)? {
                    return Err(structure(member, "chain member has a different key".to_string()));
                }
                member = self.entries[member].next;
            }
            chained += steps;
        }

        let counters = |detail: String| InvariantViolation::Counters { bucket, detail };
        if used != self.used {
            return Err(counters(format!("used is {} but {} slots are occupied", self.used, used)));
        }
        if chained != used - heads {
            return Err(counters(format!(
                "{} non-head entries but {} reachable from heads",
                used - heads,
                chained
            )));
        }
        if self.collisions != used - heads {
            return Err(counters(format!(
                "collisions is {} but {} entries are not heads",
                self.collisions,
                used - heads
            )));
        }
        if used >= capacity || 3 * used.saturating_sub(1) >= 2 * capacity {
            return Err(counters(format!(
                "{} entries exceed the load factor of capacity {}",
                used, capacity
            )));
        }
        Ok(())
    }
}

/// Elements of one bucket for a bulk load: (input position, key hash, element)
type Partition<E> = Vec<(usize, u64, E)>;

/// Elements one bulk-load worker inserted and the ones it turned away
struct WorkerOutcome<E> {
    inserted: Vec<(u64, E)>,
    rejected: Vec<E>,
}

/// Sharded multi-value hash table over `Copy` element handles
#[derive(Debug)]
pub struct AssocMulti<E, P = Multi> {
    buckets: Vec<Bucket<E>>,
    mask: usize,
    initial_capacity: usize,
    _policy: PhantomData<fn() -> P>,
}

impl<E: Copy, P: KeyPolicy> AssocMulti<E, P> {
    /// Create a table of `num_buckets` buckets (a power of two) with
    /// `initial_capacity` slots each.
    pub fn new(num_buckets: usize, initial_capacity: usize) -> IndexResult<Self> {
        if num_buckets == 0 || !num_buckets.is_power_of_two() {
            return Err(IndexError::bad_parameter(format!(
                "number of buckets must be a power of two, got {}",
                num_buckets
            )));
        }
        if initial_capacity < MIN_BUCKET_CAPACITY {
            return Err(IndexError::bad_parameter(format!(
                "bucket capacity must be at least {}, got {}",
                MIN_BUCKET_CAPACITY, initial_capacity
            )));
        }
        let buckets = (0..num_buckets)
            .map(|_| Bucket::with_capacity(initial_capacity))
            .collect::<IndexResult<Vec<_>>>()?;
        Ok(Self {
            buckets,
            mask: num_buckets - 1,
            initial_capacity,
            _policy: PhantomData,
        })
    }

    pub fn is_unique(&self) -> bool {
        P::UNIQUE
    }

    pub fn policy_name(&self) -> &'static str {
        P::NAME
    }

    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Bucket a key hash maps to
    pub fn bucket_for_hash(&self, key_hash: u64) -> usize {
        key_hash as usize & self.mask
    }

    /// Bucket a key is stored in
    pub fn bucket_for_key<H>(&self, helper: &H, key: &H::Key) -> IndexResult<usize>
    where
        H: AssocHelper<E> + ?Sized,
    {
        Ok(self.bucket_for_hash(helper.hash_key(key)?))
    }

    /// Insert `element`.
    ///
    /// Returns `None` when the element was stored. Otherwise returns the
    /// element already present and leaves the table as it was, except that
    /// `overwrite` replaces an identical element in place:
    ///
    /// - with `check_equality`, an identical element (same identity and key)
    /// - on a unique table, the head of the existing key
    pub fn insert<H>(
        &mut self,
        helper: &H,
        element: E,
        overwrite: bool,
        check_equality: bool,
    ) -> IndexResult<Option<E>>
    where
        H: AssocHelper<E> + ?Sized,
    {
        let key_hash = helper.hash_element(&element, true)?;
        let b = self.bucket_for_hash(key_hash);
        self.buckets[b].insert(helper, element, key_hash, overwrite, check_equality, P::UNIQUE)
    }

    /// All elements with `key`, head first; at most `limit` (0 = unbounded).
    pub fn lookup_by_key<H>(&self, helper: &H, key: &H::Key, limit: usize) -> IndexResult<Vec<E>>
    where
        H: AssocHelper<E> + ?Sized,
    {
        let key_hash = helper.hash_key(key)?;
        let bucket = &self.buckets[self.bucket_for_hash(key_hash)];
        match bucket.find_head_by_key(helper, key, key_hash)? {
            Some(head) => Ok(bucket.collect_chain(head, limit)),
            None => Ok(Vec::new()),
        }
    }

    /// Next page of the chain of `key`, continuing after `last`.
    ///
    /// Empty when `last` was the final element, is no longer stored, or
    /// no longer carries `key`.
    pub fn lookup_by_key_continue<H>(
        &self,
        helper: &H,
        key: &H::Key,
        last: &E,
        limit: usize,
    ) -> IndexResult<Vec<E>>
    where
        H: AssocHelper<E> + ?Sized,
    {
        if !helper.is_equal_key_element(key, last)? {
            return Ok(Vec::new());
        }
        let key_hash = helper.hash_key(key)?;
        let bucket = &self.buckets[self.bucket_for_hash(key_hash)];
        let Some(slot) = bucket.find_element(helper, last, key_hash)? else {
            return Ok(Vec::new());
        };
        let next = bucket.entries[slot].next;
        if next == INVALID {
            return Ok(Vec::new());
        }
        Ok(bucket.collect_chain(next, limit))
    }

    /// The stored element equal to `element`
    pub fn lookup<H>(&self, helper: &H, element: &E) -> IndexResult<Option<E>>
    where
        H: AssocHelper<E> + ?Sized,
    {
        let key_hash = helper.hash_element(element, true)?;
        let bucket = &self.buckets[self.bucket_for_hash(key_hash)];
        Ok(bucket
            .find_element(helper, element, key_hash)?
            .and_then(|slot| bucket.entries[slot].element))
    }

    /// Remove the element equal to `element` and return the stored one.
    pub fn remove<H>(&mut self, helper: &H, element: &E) -> IndexResult<Option<E>>
    where
        H: AssocHelper<E> + ?Sized,
    {
        let key_hash = helper.hash_element(element, true)?;
        let b = self.bucket_for_hash(key_hash);
        self.buckets[b].remove(helper, element, key_hash)
    }

    /// Rebuild bucket `bucket` with `new_capacity` slots.
    pub fn resize_bucket(&mut self, bucket: usize, new_capacity: usize) -> IndexResult<()> {
        let num_buckets = self.buckets.len();
        self.buckets
            .get_mut(bucket)
            .ok_or_else(|| {
                IndexError::bad_parameter(format!(
                    "bucket {} out of range for {} buckets",
                    bucket, num_buckets
                ))
            })?
            .resize(new_capacity)
    }

    /// Grow buckets so that `additional` more elements, spread evenly, fit
    /// without further resizing.
    pub fn reserve(&mut self, additional: usize) -> IndexResult<()> {
        let per_bucket = additional.div_ceil(self.buckets.len());
        for bucket in &mut self.buckets {
            let target = bucket.used + per_bucket;
            let wanted = (3 * target).div_ceil(2) + 1;
            if wanted > bucket.capacity() {
                bucket.resize(wanted)?;
            }
        }
        Ok(())
    }

    /// Insert many elements on up to `threads` workers.
    ///
    /// Elements are assumed distinct, so no equality check is made. On a
    /// unique table, `on_conflict(new, existing)` decides about elements
    /// whose key is taken: `Ok` turns the new element away, `Err` aborts the
    /// load. After a failure every element this call inserted is removed
    /// again before the error is returned.
    ///
    /// Returns the elements turned away.
    pub fn batch_insert<H, F>(
        &mut self,
        helper: &H,
        elements: &[E],
        threads: usize,
        on_conflict: F,
    ) -> IndexResult<Vec<E>>
    where
        E: Send + Sync,
        H: AssocHelper<E> + Sync + ?Sized,
        F: Fn(&E, &E) -> IndexResult<()> + Sync,
    {
        if elements.is_empty() {
            return Ok(Vec::new());
        }

        let num_buckets = self.buckets.len();
        let threads = threads.min(num_buckets).min(elements.len()).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| IndexError::bad_parameter(format!("bulk load thread pool: {}", e)))?;

        // Partition by bucket. Positions keep the per-bucket order stable.
        let mask = self.mask;
        let chunk_size = elements.len().div_ceil(threads);
        let partitions: Mutex<Vec<Partition<E>>> = Mutex::new(vec![Vec::new(); num_buckets]);
        pool.install(|| {
            elements
                .par_chunks(chunk_size)
                .enumerate()
                .try_for_each(|(chunk_number, chunk)| -> IndexResult<()> {
                    let mut local: Vec<Partition<E>> = vec![Vec::new(); num_buckets];
                    for (offset, element) in chunk.iter().enumerate() {
                        let key_hash = helper.hash_element(element, true)?;
                        let position = chunk_number * chunk_size + offset;
                        local[key_hash as usize & mask].push((position, key_hash, *element));
                    }
                    let mut merged = partitions.lock().unwrap_or_else(PoisonError::into_inner);
                    for (target, items) in merged.iter_mut().zip(local) {
                        target.extend(items);
                    }
                    Ok(())
                })
        })?;
        let mut partitions = partitions.into_inner().unwrap_or_else(PoisonError::into_inner);
        for items in &mut partitions {
            items.sort_unstable_by_key(|(position, _, _)| *position);
        }

        // Workers own disjoint bucket sets: bucket b goes to worker b % threads.
        let failed = AtomicBool::new(false);
        let first_error: Mutex<Option<IndexError>> = Mutex::new(None);
        let fail = |err: IndexError| {
            failed.store(true, Ordering::Relaxed);
            let mut slot = first_error.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                *slot = Some(err);
            }
        };

        let mut work: Vec<Vec<(&mut Bucket<E>, Partition<E>)>> =
            (0..threads).map(|_| Vec::new()).collect();
        for (b, (bucket, items)) in self.buckets.iter_mut().zip(partitions).enumerate() {
            if !items.is_empty() {
                work[b % threads].push((bucket, items));
            }
        }

        let outcomes: Vec<WorkerOutcome<E>> = pool.install(|| {
            work.into_par_iter()
                .map(|assigned| {
                    let mut outcome = WorkerOutcome {
                        inserted: Vec::new(),
                        rejected: Vec::new(),
                    };
                    'buckets: for (bucket, items) in assigned {
                        for (_, key_hash, element) in items {
                            if failed.load(Ordering::Relaxed) {
                                break 'buckets;
                            }
                            let inserted =
                                bucket.insert(helper, element, key_hash, false, false, P::UNIQUE);
                            match inserted {
                                Ok(None) => outcome.inserted.push((key_hash, element)),
                                Ok(Some(existing)) => match on_conflict(&element, &existing) {
                                    Ok(()) => outcome.rejected.push(element),
                                    Err(err) => {
                                        fail(err);
                                        break 'buckets;
                                    }
                                },
                                Err(err) => {
                                    fail(err);
                                    break 'buckets;
                                }
                            }
                        }
                    }
                    outcome
                })
                .collect()
        });

        if let Some(err) = first_error.into_inner().unwrap_or_else(PoisonError::into_inner) {
            for &(key_hash, element) in outcomes.iter().flat_map(|o| o.inserted.iter()) {
                let b = self.bucket_for_hash(key_hash);
                // A helper failure here leaves the element behind; the load
                // error is reported either way.
                let _ = self.buckets[b].remove(helper, &element, key_hash);
            }
            return Err(err);
        }

        Ok(outcomes.into_iter().flat_map(|o| o.rejected).collect())
    }

    /// Number of stored elements
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.used).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of elements that are not the head of their chain
    pub fn collisions(&self) -> usize {
        self.buckets.iter().map(|b| b.collisions).sum()
    }

    /// Number of bucket rebuilds so far
    pub fn resizes(&self) -> usize {
        self.buckets.iter().map(|b| b.resizes).sum()
    }

    pub fn bucket_stats(&self) -> Vec<BucketStats> {
        self.buckets.iter().map(Bucket::stats).collect()
    }

    /// Slot storage in bytes
    pub fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>()
            + self
                .buckets
                .iter()
                .map(|b| {
                    std::mem::size_of::<Bucket<E>>()
                        + b.capacity() * std::mem::size_of::<Entry<E>>()
                })
                .sum::<usize>()
    }

    /// Drop all elements and shrink every bucket to the initial capacity.
    pub fn truncate(&mut self) -> IndexResult<()> {
        for bucket in &mut self.buckets {
            *bucket = Bucket::with_capacity(self.initial_capacity)?;
        }
        Ok(())
    }

    /// Verify invariants A, B and C plus the counters and cached hashes.
    pub fn check_invariants<H>(&self, helper: &H) -> Result<(), InvariantViolation>
    where
        H: AssocHelper<E> + ?Sized,
    {
        for (b, bucket) in self.buckets.iter().enumerate() {
            bucket.check_invariants(b, helper, self.mask)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::cell::Cell;
    use std::collections::HashSet;

    /// (key, identity)
    type Pair = (u32, u32);

    /// Hashes deliberately collide: keys modulo `key_spread`, identities
    /// modulo `id_spread`.
    struct PairHelper {
        key_spread: u64,
        id_spread: u64,
    }

    impl PairHelper {
        fn spread() -> Self {
            Self {
                key_spread: u64::MAX,
                id_spread: u64::MAX,
            }
        }

        fn clustered() -> Self {
            Self {
                key_spread: 5,
                id_spread: 3,
            }
        }
    }

    fn mix(v: u64) -> u64 {
        xxhash_rust::xxh3::xxh3_64(&v.to_le_bytes())
    }

    impl AssocHelper<Pair> for PairHelper {
        type Key = u32;

        fn hash_key(&self, key: &u32) -> IndexResult<u64> {
            Ok(mix(*key as u64 % self.key_spread))
        }

        fn hash_element(&self, element: &Pair, by_key: bool) -> IndexResult<u64> {
            if by_key {
                self.hash_key(&element.0)
            } else {
                Ok(mix(element.1 as u64 % self.id_spread) ^ 0x5555)
            }
        }

        fn is_equal_key_element(&self, key: &u32, element: &Pair) -> IndexResult<bool> {
            Ok(*key == element.0)
        }

        fn is_equal_element_element(&self, left: &Pair, right: &Pair) -> IndexResult<bool> {
            Ok(left == right)
        }

        fn is_equal_element_element_by_key(&self, left: &Pair, right: &Pair) -> IndexResult<bool> {
            Ok(left.0 == right.0)
        }
    }

    /// Fails every call once armed
    struct FailingHelper {
        inner: PairHelper,
        armed: Cell<bool>,
    }

    impl AssocHelper<Pair> for FailingHelper {
        type Key = u32;

        fn hash_key(&self, key: &u32) -> IndexResult<u64> {
            self.inner.hash_key(key)
        }

        fn hash_element(&self, element: &Pair, by_key: bool) -> IndexResult<u64> {
            if self.armed.get() && !by_key {
                let id = crate::document::DocumentId(element.1 as u64);
                return Err(IndexError::document_not_found(id, "gone"));
            }
            self.inner.hash_element(element, by_key)
        }

        fn is_equal_key_element(&self, key: &u32, element: &Pair) -> IndexResult<bool> {
            self.inner.is_equal_key_element(key, element)
        }

        fn is_equal_element_element(&self, left: &Pair, right: &Pair) -> IndexResult<bool> {
            self.inner.is_equal_element_element(left, right)
        }

        fn is_equal_element_element_by_key(&self, left: &Pair, right: &Pair) -> IndexResult<bool> {
            self.inner.is_equal_element_element_by_key(left, right)
        }
    }

    fn table(capacity: usize) -> AssocMulti<Pair, Multi> {
        AssocMulti::new(1, capacity).unwrap()
    }

    fn ids(pairs: &[Pair]) -> Vec<u32> {
        pairs.iter().map(|p| p.1).collect()
    }

    #[test]
    fn test_rejects_bad_geometry() {
        assert!(AssocMulti::<Pair, Multi>::new(3, 7).is_err());
        assert!(AssocMulti::<Pair, Multi>::new(0, 7).is_err());
        assert!(AssocMulti::<Pair, Multi>::new(4, 2).is_err());
        assert!(AssocMulti::<Pair, Multi>::new(4, 3).is_ok());
    }

    #[test]
    fn test_insert_and_lookup_chain() {
        let helper = PairHelper::spread();
        let mut t = table(7);

        assert_eq!(t.insert(&helper, (1, 10), false, true).unwrap(), None);
        assert_eq!(t.insert(&helper, (1, 11), false, true).unwrap(), None);
        assert_eq!(t.insert(&helper, (1, 12), false, true).unwrap(), None);
        assert_eq!(t.insert(&helper, (2, 20), false, true).unwrap(), None);

        assert_eq!(t.len(), 4);
        assert_eq!(t.collisions(), 2);

        // Head first, later members spliced right after the head
        assert_eq!(ids(&t.lookup_by_key(&helper, &1, 0).unwrap()), vec![10, 12, 11]);
        assert_eq!(ids(&t.lookup_by_key(&helper, &2, 0).unwrap()), vec![20]);
        assert!(t.lookup_by_key(&helper, &3, 0).unwrap().is_empty());
        t.check_invariants(&helper).unwrap();
    }

    #[test]
    fn test_duplicate_element() {
        let helper = PairHelper::spread();
        let mut t = table(7);

        t.insert(&helper, (1, 10), false, true).unwrap();
        t.insert(&helper, (1, 11), false, true).unwrap();

        assert_eq!(t.insert(&helper, (1, 10), false, true).unwrap(), Some((1, 10)));
        assert_eq!(t.insert(&helper, (1, 11), false, true).unwrap(), Some((1, 11)));
        assert_eq!(t.insert(&helper, (1, 11), true, true).unwrap(), Some((1, 11)));
        assert_eq!(t.len(), 2);
        t.check_invariants(&helper).unwrap();
    }

    #[test]
    fn test_unique_policy_refuses_second_key() {
        let helper = PairHelper::spread();
        let mut t: AssocMulti<Pair, Unique> = AssocMulti::new(2, 7).unwrap();

        assert_eq!(t.insert(&helper, (1, 10), false, false).unwrap(), None);
        assert_eq!(t.insert(&helper, (1, 11), false, false).unwrap(), Some((1, 10)));
        assert_eq!(t.len(), 1);
        assert_eq!(t.collisions(), 0);
        assert_eq!(ids(&t.lookup_by_key(&helper, &1, 0).unwrap()), vec![10]);
    }

    #[test]
    fn test_lookup_limit_and_continue() {
        let helper = PairHelper::spread();
        let mut t = table(7);
        for id in 0..10 {
            t.insert(&helper, (1, id), false, true).unwrap();
        }
        let all = t.lookup_by_key(&helper, &1, 0).unwrap();
        assert_eq!(all.len(), 10);

        let mut paged = t.lookup_by_key(&helper, &1, 3).unwrap();
        assert_eq!(paged.len(), 3);
        loop {
            let last = *paged.last().unwrap();
            let page = t.lookup_by_key_continue(&helper, &1, &last, 3).unwrap();
            if page.is_empty() {
                break;
            }
            paged.extend(page);
        }
        assert_eq!(paged, all);
    }

    #[test]
    fn test_continue_from_head() {
        let helper = PairHelper::clustered();
        let mut t = table(7);
        t.insert(&helper, (1, 1), false, true).unwrap();
        t.insert(&helper, (1, 2), false, true).unwrap();

        let first = t.lookup_by_key(&helper, &1, 1).unwrap();
        assert_eq!(first, vec![(1, 1)]);
        assert_eq!(t.lookup_by_key_continue(&helper, &1, &first[0], 0).unwrap(), vec![(1, 2)]);
    }

    #[test]
    fn test_continue_with_other_key_is_empty() {
        let helper = PairHelper::clustered();
        let mut t = table(7);
        t.insert(&helper, (1, 1), false, true).unwrap();
        t.insert(&helper, (1, 2), false, true).unwrap();
        t.insert(&helper, (2, 3), false, true).unwrap();
        t.insert(&helper, (2, 4), false, true).unwrap();

        assert!(t.lookup_by_key_continue(&helper, &1, &(2, 3), 0).unwrap().is_empty());
        assert_eq!(t.lookup_by_key_continue(&helper, &2, &(2, 3), 0).unwrap(), vec![(2, 4)]);
    }

    #[test]
    fn test_lookup_exact_element() {
        let helper = PairHelper::spread();
        let mut t = table(7);
        t.insert(&helper, (1, 10), false, true).unwrap();
        t.insert(&helper, (1, 11), false, true).unwrap();

        assert_eq!(t.lookup(&helper, &(1, 11)).unwrap(), Some((1, 11)));
        assert_eq!(t.lookup(&helper, &(1, 12)).unwrap(), None);
        assert_eq!(t.lookup(&helper, &(2, 11)).unwrap(), None);
    }

    #[test]
    fn test_remove_head_promotes_successor() {
        let helper = PairHelper::spread();
        let mut t = table(7);
        for id in [10, 11, 12] {
            t.insert(&helper, (1, id), false, true).unwrap();
        }

        assert_eq!(t.remove(&helper, &(1, 10)).unwrap(), Some((1, 10)));
        t.check_invariants(&helper).unwrap();
        assert_eq!(ids(&t.lookup_by_key(&helper, &1, 0).unwrap()), vec![12, 11]);
        assert_eq!(t.collisions(), 1);

        assert_eq!(t.remove(&helper, &(1, 11)).unwrap(), Some((1, 11)));
        assert_eq!(t.remove(&helper, &(1, 12)).unwrap(), Some((1, 12)));
        assert!(t.is_empty());
        assert_eq!(t.remove(&helper, &(1, 12)).unwrap(), None);
        t.check_invariants(&helper).unwrap();
    }

    #[test]
    fn test_remove_keeps_relative_order() {
        let helper = PairHelper::clustered();
        let mut t = table(7);
        for id in 0..8 {
            t.insert(&helper, (4, id), false, true).unwrap();
        }
        let before = ids(&t.lookup_by_key(&helper, &4, 0).unwrap());

        t.remove(&helper, &(4, 3)).unwrap();
        t.check_invariants(&helper).unwrap();

        let expected: Vec<u32> = before.into_iter().filter(|id| *id != 3).collect();
        assert_eq!(ids(&t.lookup_by_key(&helper, &4, 0).unwrap()), expected);
    }

    #[test]
    fn test_grows_before_insert() {
        let helper = PairHelper::spread();
        let mut t = table(7);
        for key in 0..6 {
            t.insert(&helper, (key, key), false, true).unwrap();
        }
        let stats = t.bucket_stats()[0];
        assert_eq!(stats.capacity, 15);
        assert_eq!(stats.resizes, 1);
        t.check_invariants(&helper).unwrap();
    }

    #[test]
    fn test_resize_preserves_content() {
        let helper = PairHelper::clustered();
        let mut t = table(7);
        for key in 0..3 {
            for id in 0..3 {
                t.insert(&helper, (key, id), false, true).unwrap();
            }
        }
        let before: Vec<HashSet<Pair>> = (0..3)
            .map(|k| t.lookup_by_key(&helper, &k, 0).unwrap().into_iter().collect())
            .collect();

        t.resize_bucket(0, 61).unwrap();
        t.check_invariants(&helper).unwrap();
        assert_eq!(t.bucket_stats()[0].capacity, 61);

        for (k, expected) in before.iter().enumerate() {
            let after: HashSet<Pair> = t
                .lookup_by_key(&helper, &(k as u32), 0)
                .unwrap()
                .into_iter()
                .collect();
            assert_eq!(&after, expected);
        }
    }

    #[test]
    fn test_resize_rejects_overfull_capacity() {
        let helper = PairHelper::spread();
        let mut t = table(15);
        for key in 0..6 {
            t.insert(&helper, (key, key), false, true).unwrap();
        }
        let err = t.resize_bucket(0, 8).unwrap_err();
        assert_eq!(err.code().code(), "AERO_INDEX_BAD_PARAMETER");
        assert!(t.resize_bucket(0, 9).is_ok());
        assert!(t.resize_bucket(5, 31).is_err());
        t.check_invariants(&helper).unwrap();
    }

    #[test]
    fn test_failing_helper_leaves_table_untouched() {
        let helper = FailingHelper {
            inner: PairHelper::spread(),
            armed: Cell::new(false),
        };
        let mut t = table(7);
        t.insert(&helper, (1, 10), false, true).unwrap();

        helper.armed.set(true);
        // A second element for key 1 needs its identity hash.
        assert!(t.insert(&helper, (1, 11), false, true).is_err());
        assert_eq!(t.len(), 1);
        assert_eq!(t.collisions(), 0);

        helper.armed.set(false);
        t.check_invariants(&helper).unwrap();
    }

    #[test]
    fn test_truncate_resets_capacity() {
        let helper = PairHelper::spread();
        let mut t = table(7);
        for key in 0..20 {
            t.insert(&helper, (key, key), false, true).unwrap();
        }
        t.truncate().unwrap();
        assert!(t.is_empty());
        assert_eq!(t.bucket_stats()[0].capacity, 7);
        assert!(t.lookup_by_key(&helper, &3, 0).unwrap().is_empty());
    }

    #[test]
    fn test_reserve_avoids_growth() {
        let helper = PairHelper::spread();
        let mut t: AssocMulti<Pair, Multi> = AssocMulti::new(4, 3).unwrap();
        t.reserve(400).unwrap();
        let resizes = t.resizes();
        for key in 0..400 {
            t.insert(&helper, (key, key), false, true).unwrap();
        }
        // Keys do not spread perfectly evenly; allow a few late rebuilds.
        assert!(t.resizes() - resizes <= 4);
        t.check_invariants(&helper).unwrap();
    }

    #[test]
    fn test_batch_insert_matches_serial() {
        let helper = PairHelper::clustered();
        let elements: Vec<Pair> = (0..500).map(|i| (i % 37, i)).collect();

        let mut parallel: AssocMulti<Pair, Multi> = AssocMulti::new(8, 3).unwrap();
        let rejected = parallel.batch_insert(&helper, &elements, 4, |_, _| Ok(())).unwrap();
        assert!(rejected.is_empty());
        assert_eq!(parallel.len(), 500);
        parallel.check_invariants(&helper).unwrap();

        for key in 0..37 {
            let found: HashSet<Pair> = parallel
                .lookup_by_key(&helper, &key, 0)
                .unwrap()
                .into_iter()
                .collect();
            let expected: HashSet<Pair> = elements.iter().copied().filter(|p| p.0 == key).collect();
            assert_eq!(found, expected);
        }
    }

    #[test]
    fn test_batch_insert_unique_conflict_rolls_back() {
        let helper = PairHelper::spread();
        let mut t: AssocMulti<Pair, Unique> = AssocMulti::new(4, 7).unwrap();
        t.insert(&helper, (1000, 1), false, false).unwrap();

        let mut elements: Vec<Pair> = (0..100).map(|i| (i, i + 10)).collect();
        elements.push((1000, 999));

        let err = t
            .batch_insert(&helper, &elements, 3, |_, existing| {
                Err(IndexError::unique_violation(crate::document::DocumentId(existing.1 as u64)))
            })
            .unwrap_err();
        assert!(err.is_unique_violation());
        assert_eq!(t.len(), 1);
        assert_eq!(t.lookup_by_key(&helper, &1000, 0).unwrap(), vec![(1000, 1)]);
        t.check_invariants(&helper).unwrap();
    }

    #[test]
    fn test_batch_insert_reports_rejected() {
        let helper = PairHelper::spread();
        let mut t: AssocMulti<Pair, Unique> = AssocMulti::new(2, 7).unwrap();
        t.insert(&helper, (5, 1), false, false).unwrap();

        let rejected = t.batch_insert(&helper, &[(5, 1), (6, 2)], 2, |_, _| Ok(())).unwrap();
        assert_eq!(rejected, vec![(5, 1)]);
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_random_interleavings_keep_invariants() {
        for (seed, helper) in [(7u64, PairHelper::clustered()), (11u64, PairHelper::spread())] {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut t: AssocMulti<Pair, Multi> = AssocMulti::new(2, 3).unwrap();
            let mut model: HashSet<Pair> = HashSet::new();

            for step in 0..3000 {
                let element = (rng.gen_range(0..12u32), rng.gen_range(0..40u32));
                match rng.gen_range(0..10) {
                    0..=5 => {
                        let result = t.insert(&helper, element, false, true).unwrap();
                        assert_eq!(result.is_some(), !model.insert(element));
                    }
                    6..=8 => {
                        let result = t.remove(&helper, &element).unwrap();
                        assert_eq!(result.is_some(), model.remove(&element));
                    }
                    _ => {
                        let bucket = rng.gen_range(0..2);
                        let used = t.bucket_stats()[bucket].used;
                        let capacity =
                            (used * 3).div_ceil(2).max(MIN_BUCKET_CAPACITY) + rng.gen_range(0..20);
                        t.resize_bucket(bucket, capacity).unwrap();
                    }
                }
                if let Err(violation) = t.check_invariants(&helper) {
                    panic!("seed {} step {}: {}", seed, step, violation);
                }
            }

            assert_eq!(t.len(), model.len());
            for key in 0..12 {
                let found: HashSet<Pair> = t
                    .lookup_by_key(&helper, &key, 0)
                    .unwrap()
                    .into_iter()
                    .collect();
                let expected: HashSet<Pair> =
                    model.iter().copied().filter(|p| p.0 == key).collect();
                assert_eq!(found, expected);
            }
        }
    }
}
