//! Fixed-capacity bucket table: open hashing, LRU, free list.
//!
//! Entries live in an arena of fixed-size slots addressed by `u32` index;
//! the hash chains, the LRU list and the free list are all intrusive index
//! links inside [`Entry`]. Nothing is ever boxed per-entry and growth
//! relocates the whole arena at once, so the structure stays cache-dense
//! and the indices stay valid.
//!
//! Every live entry is reachable from exactly one hash chain and from the
//! LRU; vacant slots are on the free list and nowhere else. The table never
//! refuses an insertion: past `max` capacity the coldest entry is recycled.

use crate::clock::{RebaseHandler, Timestamp};
use crate::entry::{Entry, NONE};
use crate::key::Key;
use crate::log::Journal;

/// Arena growth step: half the current capacity, at least this many slots.
const GROWTH_MIN_STEP: usize = 64;

/// Smallest bucket array.
const MIN_BUCKETS: usize = 16;

pub(crate) struct Table {
    arena: Vec<Entry>,
    /// Power-of-two array of hash-chain heads.
    buckets: Vec<u32>,
    free_head: u32,
    lru_head: u32,
    lru_tail: u32,
    used: usize,
    min: usize,
    max: usize,
    /// Highest retired clock generation not yet purged from the LRU tail.
    retired_through: Option<u32>,
}

impl Table {
    pub(crate) fn new(min: usize, max: usize) -> Self {
        debug_assert!(min > 0 && min <= max);
        let mut table = Self {
            arena: Vec::new(),
            buckets: Vec::new(),
            free_head: NONE,
            lru_head: NONE,
            lru_tail: NONE,
            used: 0,
            min,
            max,
            retired_through: None,
        };
        table.grow_arena(min);
        table.rebuild_buckets();
        table
    }

    /// Number of live entries.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.used
    }

    /// Number of allocated slots.
    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.arena.len()
    }

    #[inline]
    pub(crate) fn entry_mut(&mut self, idx: u32) -> &mut Entry {
        &mut self.arena[idx as usize]
    }

    #[inline]
    fn bucket_of(&self, hash: u32) -> usize {
        hash as usize & (self.buckets.len() - 1)
    }

    /// Finds the entry for `key`, creating it if necessary. The returned
    /// index is valid until the next call that may evict or shrink.
    ///
    /// `ts` and `rate` seed a newly created entry; an existing entry is
    /// promoted to the front of the LRU and returned untouched.
    pub(crate) fn get(
        &mut self,
        key: Key,
        hash: u32,
        ts: Timestamp,
        rate: u32,
        journal: &mut Journal,
    ) -> u32 {
        self.purge_retired(journal);

        let b = self.bucket_of(hash);
        let mut idx = self.buckets[b];
        while idx != NONE {
            let e = &self.arena[idx as usize];
            if e.hash == hash && e.key == key {
                self.lru_touch(idx);
                return idx;
            }
            idx = e.chain_next;
        }

        // The eviction inside allocate cannot touch the bucket array, so
        // `b` is still the right chain.
        let idx = self.allocate(journal);
        let e = &mut self.arena[idx as usize];
        e.reset(key, hash, ts, rate);
        e.live = true;
        e.chain_next = self.buckets[b];
        self.buckets[b] = idx;
        self.lru_push_front(idx);
        self.used += 1;

        self.maybe_expand();
        idx
    }

    /// Takes a vacant slot, preferring the free list, then arena growth,
    /// then recycling the LRU tail.
    fn allocate(&mut self, journal: &mut Journal) -> u32 {
        if self.free_head == NONE {
            if self.capacity() < self.max {
                self.grow_arena(self.growth_step());
            } else {
                let tail = self.lru_tail;
                assert!(tail != NONE, "table has capacity but no entries");
                self.evict(tail, journal);
            }
        }
        let idx = self.free_head;
        self.free_head = self.arena[idx as usize].chain_next;
        idx
    }

    fn growth_step(&self) -> usize {
        let step = (self.capacity() / 2).max(GROWTH_MIN_STEP);
        step.min(self.max - self.capacity())
    }

    /// Appends `count` vacant slots to the arena and free list.
    fn grow_arena(&mut self, count: usize) {
        debug_assert!(self.capacity() + count <= self.max.max(self.min));
        self.arena.reserve(count);
        for _ in 0..count {
            let idx = self.arena.len() as u32;
            let mut e = Entry::vacant();
            e.chain_next = self.free_head;
            self.free_head = idx;
            self.arena.push(e);
        }
    }

    /// Grows the arena ahead of demand once occupancy crosses the
    /// high-water mark, rebuilding the bucket array to match.
    fn maybe_expand(&mut self) {
        if self.capacity() < self.max && self.used * 8 >= self.capacity() * 7 {
            self.grow_arena(self.growth_step());
            self.rebuild_buckets();
        }
    }

    /// Sizes the bucket array to the arena and relinks every live chain.
    fn rebuild_buckets(&mut self) {
        let size = self.capacity().max(MIN_BUCKETS).next_power_of_two();
        self.buckets.clear();
        self.buckets.resize(size, NONE);
        for idx in 0..self.arena.len() as u32 {
            if !self.arena[idx as usize].live {
                continue;
            }
            let b = self.bucket_of(self.arena[idx as usize].hash);
            self.arena[idx as usize].chain_next = self.buckets[b];
            self.buckets[b] = idx;
        }
    }

    /// Frees one live entry: closes its log episode, unlinks it from its
    /// chain and the LRU, and returns the slot to the free list.
    fn evict(&mut self, idx: u32, journal: &mut Journal) {
        journal.close_episode(&mut self.arena[idx as usize]);
        self.unlink_chain(idx);
        self.lru_unlink(idx);
        let e = &mut self.arena[idx as usize];
        e.live = false;
        e.chain_next = self.free_head;
        self.free_head = idx;
        self.used -= 1;
    }

    fn unlink_chain(&mut self, idx: u32) {
        let b = self.bucket_of(self.arena[idx as usize].hash);
        let next = self.arena[idx as usize].chain_next;
        if self.buckets[b] == idx {
            self.buckets[b] = next;
            return;
        }
        let mut cur = self.buckets[b];
        while cur != NONE {
            if self.arena[cur as usize].chain_next == idx {
                self.arena[cur as usize].chain_next = next;
                return;
            }
            cur = self.arena[cur as usize].chain_next;
        }
        unreachable!("entry missing from its hash chain");
    }

    fn lru_push_front(&mut self, idx: u32) {
        let e = &mut self.arena[idx as usize];
        e.lru_prev = NONE;
        e.lru_next = self.lru_head;
        if self.lru_head != NONE {
            self.arena[self.lru_head as usize].lru_prev = idx;
        }
        self.lru_head = idx;
        if self.lru_tail == NONE {
            self.lru_tail = idx;
        }
    }

    fn lru_unlink(&mut self, idx: u32) {
        let (prev, next) = {
            let e = &self.arena[idx as usize];
            (e.lru_prev, e.lru_next)
        };
        if prev != NONE {
            self.arena[prev as usize].lru_next = next;
        } else {
            self.lru_head = next;
        }
        if next != NONE {
            self.arena[next as usize].lru_prev = prev;
        } else {
            self.lru_tail = prev;
        }
    }

    fn lru_touch(&mut self, idx: u32) {
        if self.lru_head == idx {
            return;
        }
        self.lru_unlink(idx);
        self.lru_push_front(idx);
    }

    /// Reaps entries anchored to retired clock bases from the cold end of
    /// the LRU. Stops at the first tail entry with a live base; stragglers
    /// further up decode as expired and refresh on their next touch.
    fn purge_retired(&mut self, journal: &mut Journal) {
        let Some(retired) = self.retired_through.take() else {
            return;
        };
        while self.lru_tail != NONE {
            let tail = self.lru_tail;
            let gen = self.arena[tail as usize].timestamp().generation();
            if !generation_is_retired(retired, gen) {
                break;
            }
            self.evict(tail, journal);
        }
    }

    /// Releases trailing vacant arena slots, never below the configured
    /// minimum. Intended for the caller's idle maintenance; a quarter-full
    /// table is left alone.
    pub(crate) fn shrink_if_quiet(&mut self) {
        if self.capacity() <= self.min || self.used * 4 > self.capacity() {
            return;
        }
        let mut keep = self.capacity();
        while keep > self.min && !self.arena[keep - 1].live {
            keep -= 1;
        }
        if keep == self.capacity() {
            return;
        }
        self.arena.truncate(keep);
        self.rebuild_free_list();
        self.rebuild_buckets();
    }

    fn rebuild_free_list(&mut self) {
        self.free_head = NONE;
        for idx in (0..self.arena.len() as u32).rev() {
            if !self.arena[idx as usize].live {
                self.arena[idx as usize].chain_next = self.free_head;
                self.free_head = idx;
            }
        }
    }
}

impl RebaseHandler for Table {
    fn base_retired(&mut self, generation: u32) {
        self.retired_through = Some(match self.retired_through {
            Some(r) if generation_is_retired(r, generation) => r,
            _ => generation,
        });
    }
}

/// True if `gen` is at or before `retired_through` in wrapping order.
#[inline]
fn generation_is_retired(retired_through: u32, gen: u32) -> bool {
    retired_through.wrapping_sub(gen) < u32::MAX / 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TimestampBases;
    use crate::key::{ipv4_mask, ipv6_mask, KeyHasher, ResponseKind};
    use crate::log::MemorySink;
    use quell_proto::{Class, Name, RecordType};
    use std::net::IpAddr;
    use std::str::FromStr;

    struct Harness {
        table: Table,
        bases: TimestampBases,
        hasher: KeyHasher,
        journal: Journal,
    }

    impl Harness {
        fn new(min: usize, max: usize) -> Self {
            Self {
                table: Table::new(min, max),
                bases: TimestampBases::new(1000),
                hasher: KeyHasher::new(1000, 0),
                journal: Journal::new(Box::new(MemorySink::new()), 24, 56),
            }
        }

        fn key(&self, client: &str, qname: &str) -> (Key, u32) {
            let key = Key::new(
                client.parse::<IpAddr>().unwrap(),
                Class::default(),
                RecordType::A.into(),
                Some(&Name::from_str(qname).unwrap()),
                ResponseKind::Query,
                ipv4_mask(24),
                ipv6_mask(56),
                &self.hasher,
            );
            (key, self.hasher.key_hash(&key))
        }

        fn get(&mut self, client: &str, qname: &str, now: u64) -> u32 {
            let ts = self.bases.encode(now, &mut self.table);
            let (key, hash) = self.key(client, qname);
            self.table.get(key, hash, ts, 5, &mut self.journal)
        }
    }

    #[test]
    fn test_hit_returns_same_entry() {
        let mut h = Harness::new(16, 16);
        let a = h.get("192.0.2.7", "a.example", 1000);
        let b = h.get("192.0.2.250", "a.example", 1000);
        let c = h.get("192.0.2.7", "c.example", 1000);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(h.table.len(), 2);
    }

    #[test]
    fn test_distinct_keys_distinct_entries() {
        let mut h = Harness::new(64, 64);
        for i in 0..32 {
            h.get(&format!("198.51.{i}.1"), "a.example", 1000);
        }
        assert_eq!(h.table.len(), 32);
    }

    #[test]
    fn test_eviction_at_max_capacity() {
        let mut h = Harness::new(8, 8);
        for i in 0..32u32 {
            h.get(&format!("198.51.{i}.1"), "a.example", 1000);
        }
        assert_eq!(h.table.len(), 8);
        assert_eq!(h.table.capacity(), 8);

        // The most recent keys survived; re-getting one must hit, not
        // allocate.
        let before = h.table.len();
        let idx = h.get("198.51.31.1", "a.example", 1000);
        assert_eq!(h.table.len(), before);
        assert!(h.table.entry_mut(idx).live);
    }

    #[test]
    fn test_lru_eviction_order() {
        let mut h = Harness::new(4, 4);
        for i in 0..4u32 {
            h.get(&format!("198.51.{i}.1"), "a.example", 1000);
        }
        // Touch the oldest so the second-oldest becomes the victim.
        h.get("198.51.0.1", "a.example", 1000);
        h.get("203.0.113.1", "a.example", 1000);

        let len_before = h.table.len();
        h.get("198.51.0.1", "a.example", 1000);
        assert_eq!(h.table.len(), len_before, "oldest was touched, must survive");

        h.get("198.51.1.1", "a.example", 1000);
        assert_eq!(h.table.len(), len_before, "victim slot was recycled");
    }

    #[test]
    fn test_arena_grows_to_max() {
        let mut h = Harness::new(8, 1024);
        for i in 0..200u32 {
            h.get(&format!("198.{}.{}.1", i / 250, i % 250), "a.example", 1000);
        }
        assert_eq!(h.table.len(), 200);
        assert!(h.table.capacity() >= 200);
        assert!(h.table.capacity() <= 1024);
    }

    #[test]
    fn test_rebase_purges_tail() {
        let mut h = Harness::new(64, 64);
        for i in 0..10u32 {
            h.get(&format!("198.51.{i}.1"), "a.example", 1000);
        }
        assert_eq!(h.table.len(), 10);

        // Rotate the clock ring until generation 0 retires; the next get
        // reaps every generation-0 entry from the tail.
        for step in 1..=4u64 {
            let now = 1000 + step * 300;
            h.bases.encode(now, &mut h.table);
        }
        h.get("203.0.113.9", "a.example", 2300);
        assert_eq!(h.table.len(), 1);
    }

    #[test]
    fn test_shrink_if_quiet_respects_min() {
        let mut h = Harness::new(8, 1024);
        for i in 0..200u32 {
            h.get(&format!("198.{}.{}.1", i / 250, i % 250), "a.example", 1000);
        }
        let grown = h.table.capacity();
        assert!(grown > 8);

        // Age everything out, then shrink.
        for step in 1..=4u64 {
            let now = 1000 + step * 300;
            h.bases.encode(now, &mut h.table);
        }
        h.get("203.0.113.9", "a.example", 2300);
        assert_eq!(h.table.len(), 1);

        h.table.shrink_if_quiet();
        assert!(h.table.capacity() < grown);
        assert!(h.table.capacity() >= 8);
        assert_eq!(h.table.len(), 1);

        // The surviving entry is still findable.
        let len = h.table.len();
        h.get("203.0.113.9", "a.example", 2300);
        assert_eq!(h.table.len(), len);
    }
}
