//! Virtual coarse-grained clock shared by all table entries.
//!
//! Storing an 8-byte wall-clock time in every entry would double the entry
//! size for no benefit: the accounting only ever needs second granularity
//! and only cares about the recent past. Instead the limiter keeps a small
//! ring of absolute base times and each entry stores a one-byte offset from
//! one of them, tagged with the generation that installed the base.
//!
//! When `now` runs past the reach of the current base, the clock rotates:
//! the generation advances and the oldest slot's base is discarded. Entries
//! still anchored to a discarded base decode as [`Expired`] and are simply
//! refreshed on their next touch — anything that old has long since earned
//! back its full balance anyway. The table learns about each retirement
//! through [`RebaseHandler`] so it can also reap such entries eagerly from
//! the cold end of its LRU.

/// Maximum encodable offset from a base, in seconds.
pub(crate) const OFFSET_MAX: u64 = 255;

/// Number of base-time slots in the ring.
const BASE_SLOTS: usize = 4;

/// A compact per-entry timestamp: the generation whose base anchors it plus
/// a one-byte offset in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Timestamp {
    generation: u32,
    offset: u8,
}

impl Timestamp {
    #[inline]
    pub(crate) fn generation(self) -> u32 {
        self.generation
    }

    /// A placeholder for vacant arena slots; generation 0 offset 0 decodes
    /// against whatever base 0 currently holds, so vacant slots must never
    /// be read before `reset`.
    pub(crate) fn vacant() -> Self {
        Self {
            generation: 0,
            offset: 0,
        }
    }
}

/// Receiver for base-retirement notifications.
///
/// Implemented by the table; the limiter owns both sides and lends the
/// table to the clock for the duration of one call.
pub(crate) trait RebaseHandler {
    /// Called when the base installed by `generation` has been discarded.
    /// Entries anchored to it (or to anything older) are dead weight.
    fn base_retired(&mut self, generation: u32);
}

/// The ring of base times.
#[derive(Debug)]
pub(crate) struct TimestampBases {
    bases: [u64; BASE_SLOTS],
    generation: u32,
}

impl TimestampBases {
    pub(crate) fn new(now: u64) -> Self {
        Self {
            bases: [now; BASE_SLOTS],
            generation: 0,
        }
    }

    /// Returns the base time of the current generation.
    #[inline]
    pub(crate) fn current_base(&self) -> u64 {
        self.bases[self.generation as usize % BASE_SLOTS]
    }

    /// Returns the base `now` resolves against, without rotating: the
    /// current base while `now` is within its reach, otherwise the base a
    /// rotation would install.
    #[inline]
    pub(crate) fn base_for(&self, now: u64) -> u64 {
        let base = self.current_base();
        if now >= base && now - base <= OFFSET_MAX {
            base
        } else {
            now
        }
    }

    /// Encodes `now` against the current base, rotating first if `now` is
    /// out of reach.
    pub(crate) fn encode(&mut self, now: u64, handler: &mut dyn RebaseHandler) -> Timestamp {
        self.advance(now, handler);
        let offset = now.saturating_sub(self.current_base()).min(OFFSET_MAX) as u8;
        Timestamp {
            generation: self.generation,
            offset,
        }
    }

    /// Rotates to a fresh base at `now` if the current one cannot represent
    /// it, retiring the slot being reused. A clock that moved backwards
    /// past the current base also rotates, so offsets never go negative.
    pub(crate) fn advance(&mut self, now: u64, handler: &mut dyn RebaseHandler) {
        let base = self.current_base();
        if now >= base && now - base <= OFFSET_MAX {
            return;
        }
        self.generation = self.generation.wrapping_add(1);
        if self.generation >= BASE_SLOTS as u32 {
            handler.base_retired(self.generation.wrapping_sub(BASE_SLOTS as u32));
        }
        self.bases[self.generation as usize % BASE_SLOTS] = now;
    }

    /// Decodes an entry timestamp back to absolute seconds, or `None` if
    /// the anchoring base has been retired since.
    #[inline]
    pub(crate) fn decode(&self, ts: Timestamp) -> Option<u64> {
        if self.generation.wrapping_sub(ts.generation) as usize >= BASE_SLOTS {
            return None;
        }
        Some(self.bases[ts.generation as usize % BASE_SLOTS] + u64::from(ts.offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Collects retirement notifications.
    #[derive(Default)]
    struct Retired(Vec<u32>);

    impl RebaseHandler for Retired {
        fn base_retired(&mut self, generation: u32) {
            self.0.push(generation);
        }
    }

    #[test]
    fn test_encode_within_reach() {
        let mut bases = TimestampBases::new(1000);
        let mut r = Retired::default();

        let ts = bases.encode(1000, &mut r);
        assert_eq!(bases.decode(ts), Some(1000));

        let ts = bases.encode(1255, &mut r);
        assert_eq!(bases.decode(ts), Some(1255));

        assert!(r.0.is_empty());
        assert_eq!(bases.current_base(), 1000);
    }

    #[test]
    fn test_rotation_installs_new_base() {
        let mut bases = TimestampBases::new(1000);
        let mut r = Retired::default();

        let ts = bases.encode(1300, &mut r);
        assert_eq!(bases.current_base(), 1300);
        assert_eq!(bases.decode(ts), Some(1300));
        // The first three rotations reuse slots that never held a base.
        assert!(r.0.is_empty());
    }

    #[test]
    fn test_retirement_after_full_ring() {
        let mut bases = TimestampBases::new(1000);
        let mut r = Retired::default();

        let ts0 = bases.encode(1000, &mut r);
        for i in 1..=3u64 {
            bases.encode(1000 + i * 300, &mut r);
        }
        // Generation 0's base still live: ring holds generations 0..=3.
        assert_eq!(bases.decode(ts0), Some(1000));
        assert!(r.0.is_empty());

        bases.encode(1000 + 4 * 300, &mut r);
        assert_eq!(r.0, vec![0]);
        assert_eq!(bases.decode(ts0), None);
    }

    #[test]
    fn test_base_for_is_pure() {
        let mut bases = TimestampBases::new(1000);
        let mut r = Retired::default();
        bases.encode(1100, &mut r);

        assert_eq!(bases.base_for(1100), 1000);
        assert_eq!(bases.base_for(1255), 1000);
        // Out of reach, forwards or backwards: reports the base a rotation
        // would install, but installs nothing.
        assert_eq!(bases.base_for(1300), 1300);
        assert_eq!(bases.base_for(900), 900);
        assert_eq!(bases.current_base(), 1000);
    }

    #[test]
    fn test_clock_backwards_rotates() {
        let mut bases = TimestampBases::new(1000);
        let mut r = Retired::default();

        let ts = bases.encode(900, &mut r);
        assert_eq!(bases.decode(ts), Some(900));
        assert_eq!(bases.current_base(), 900);
    }

    #[test]
    fn test_old_generation_still_decodes() {
        let mut bases = TimestampBases::new(1000);
        let mut r = Retired::default();

        let old = bases.encode(1100, &mut r);
        bases.encode(2000, &mut r);
        // One rotation: the old generation remains within the ring.
        assert_eq!(bases.decode(old), Some(1100));
    }
}
