//! Interning pool for qnames referenced by open log episodes.
//!
//! When an episode opens, the qname is pinned here so the matching "stop
//! limiting" line can name it later — possibly long after the caller's
//! buffer is gone. The pool is strictly bounded: slots whose episodes have
//! all closed are reclaimed least-recently-released first, and when every
//! slot is pinned, interning fails and the stop line degrades to the keyed
//! fields. Decisions never depend on anything in here.

use compact_str::{CompactString, ToCompactString};
use quell_proto::Name;
use std::collections::{HashMap, VecDeque};

/// Number of name slots available for open episodes.
pub(crate) const LOG_NAME_POOL_SIZE: usize = 1024;

/// A stable reference to a pooled name.
///
/// The generation guards against slot reuse: a stale handle yields `None`
/// from [`NamePool::format`] rather than someone else's name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PoolHandle {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
struct Slot {
    name: Name,
    text: CompactString,
    generation: u32,
    refs: u32,
}

/// Bounded interning pool.
#[derive(Debug)]
pub(crate) struct NamePool {
    slots: Vec<Slot>,
    capacity: usize,
    /// Interned name -> slot index.
    index: HashMap<Name, u32>,
    /// Slots whose refcount dropped to zero, oldest first. May contain
    /// stale entries for slots that were re-pinned since; skipped on pop.
    idle: VecDeque<u32>,
}

impl NamePool {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            capacity,
            index: HashMap::new(),
            idle: VecDeque::new(),
        }
    }

    /// Pins `name` in the pool and returns its handle, or `None` if every
    /// slot is pinned by some other open episode.
    pub(crate) fn intern(&mut self, name: &Name) -> Option<PoolHandle> {
        if let Some(&i) = self.index.get(name) {
            let slot = &mut self.slots[i as usize];
            slot.refs += 1;
            return Some(PoolHandle {
                index: i,
                generation: slot.generation,
            });
        }

        if self.slots.len() < self.capacity {
            let i = self.slots.len() as u32;
            self.slots.push(Slot {
                name: name.clone(),
                text: name.to_compact_string(),
                generation: 0,
                refs: 1,
            });
            self.index.insert(name.clone(), i);
            return Some(PoolHandle {
                index: i,
                generation: 0,
            });
        }

        if let Some(i) = self.acquire_slot() {
            let slot = &mut self.slots[i as usize];
            slot.name = name.clone();
            slot.text = name.to_compact_string();
            slot.refs = 1;
            let generation = slot.generation;
            self.index.insert(name.clone(), i);
            return Some(PoolHandle {
                index: i,
                generation,
            });
        }

        None
    }

    /// Reclaims the least recently released unpinned slot, evicting its
    /// previous occupant.
    fn acquire_slot(&mut self) -> Option<u32> {
        while let Some(i) = self.idle.pop_front() {
            let slot = &mut self.slots[i as usize];
            if slot.refs != 0 {
                // Re-pinned since it went idle.
                continue;
            }
            self.index.remove(&slot.name);
            slot.generation = slot.generation.wrapping_add(1);
            return Some(i);
        }
        None
    }

    /// Returns the textual form behind a handle, or `None` if the slot has
    /// been reclaimed since.
    pub(crate) fn format(&self, handle: PoolHandle) -> Option<&str> {
        let slot = self.slots.get(handle.index as usize)?;
        (slot.generation == handle.generation).then_some(slot.text.as_str())
    }

    /// Releases one pin. The slot becomes reclaimable once every pin on it
    /// is released.
    pub(crate) fn release(&mut self, handle: PoolHandle) {
        let Some(slot) = self.slots.get_mut(handle.index as usize) else {
            return;
        };
        if slot.generation != handle.generation || slot.refs == 0 {
            return;
        }
        slot.refs -= 1;
        if slot.refs == 0 {
            self.idle.push_back(handle.index);
        }
    }

    /// Number of distinct names currently interned.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.index.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn name(s: &str) -> Name {
        Name::from_str(s).unwrap()
    }

    #[test]
    fn test_intern_and_format() {
        let mut pool = NamePool::new(4);
        let h = pool.intern(&name("a.example")).unwrap();
        assert_eq!(pool.format(h), Some("a.example."));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_dedupe_shares_slot() {
        let mut pool = NamePool::new(4);
        let h1 = pool.intern(&name("a.example")).unwrap();
        let h2 = pool.intern(&name("A.EXAMPLE")).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_exhaustion_when_all_pinned() {
        let mut pool = NamePool::new(2);
        let _a = pool.intern(&name("a.example")).unwrap();
        let _b = pool.intern(&name("b.example")).unwrap();
        assert!(pool.intern(&name("c.example")).is_none());
    }

    #[test]
    fn test_release_allows_reuse_lru_first() {
        let mut pool = NamePool::new(2);
        let a = pool.intern(&name("a.example")).unwrap();
        let b = pool.intern(&name("b.example")).unwrap();
        pool.release(b);
        pool.release(a);

        // b went idle first, so c evicts b.
        let c = pool.intern(&name("c.example")).unwrap();
        assert_eq!(pool.format(c), Some("c.example."));
        assert_eq!(pool.format(b), None);
        assert_eq!(pool.format(a), Some("a.example."));
    }

    #[test]
    fn test_stale_handle_after_reuse() {
        let mut pool = NamePool::new(1);
        let a = pool.intern(&name("a.example")).unwrap();
        pool.release(a);
        let _b = pool.intern(&name("b.example")).unwrap();
        assert_eq!(pool.format(a), None);
    }

    #[test]
    fn test_repin_survives_idle_queue() {
        let mut pool = NamePool::new(1);
        let a1 = pool.intern(&name("a.example")).unwrap();
        pool.release(a1);
        // Re-pin before any eviction happened; the stale idle record must
        // not surrender the slot while pinned.
        let a2 = pool.intern(&name("a.example")).unwrap();
        assert_eq!(a1, a2);
        assert!(pool.intern(&name("b.example")).is_none());
        assert_eq!(pool.format(a2), Some("a.example."));
    }

    #[test]
    fn test_double_release_is_inert() {
        let mut pool = NamePool::new(2);
        let a = pool.intern(&name("a.example")).unwrap();
        pool.release(a);
        pool.release(a);
        let b = pool.intern(&name("b.example")).unwrap();
        assert_eq!(pool.format(b), Some("b.example."));
    }
}
