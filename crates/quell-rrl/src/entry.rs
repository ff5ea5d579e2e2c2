//! Per-bucket state and token accounting.
//!
//! An entry is one leaky bucket. The balance is a signed count of
//! milli-responses: credit accrues with elapsed time at the bucket's rate,
//! every response debits 1000, and the sign of the post-debit balance is
//! the decision. The milli scale lets sub-second elapsed intervals
//! accumulate without floating point.
//!
//! Entries live in the table's arena and carry their own intrusive links:
//! a hash-chain/free-list `next` and LRU `prev`/`next` indices.

use crate::clock::{Timestamp, TimestampBases};
use crate::key::Key;
use crate::pool::PoolHandle;
use crate::Decision;

/// Milli-responses debited per response sent.
const MILLI_PER_RESPONSE: i64 = 1000;

/// Null index for intrusive links.
pub(crate) const NONE: u32 = u32::MAX;

/// Logging sub-state of an entry.
///
/// `Pending` means the entry is in the red but the opening line has not
/// been emitted yet (the sink was disabled when the episode began); it is
/// retried on the next limited decision. A `Pending` episode that recovers
/// before the line goes out closes silently, keeping limit/stop lines
/// paired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LogState {
    None,
    Pending,
    Logged,
}

/// One rate-limit bucket plus its intrusive table links.
#[derive(Debug)]
pub(crate) struct Entry {
    pub(crate) key: Key,
    /// Table hash of the key, kept so chains can be unlinked and rebuilt
    /// without rehashing.
    pub(crate) hash: u32,
    ts: Timestamp,
    /// Token balance in milli-responses. Negative means limited.
    balance: i64,
    /// Limited decisions since the last Slip (or since recovery).
    slip_counter: u32,
    pub(crate) log_state: LogState,
    pub(crate) log_name: Option<PoolHandle>,
    /// Hash-chain successor, or free-list successor while vacant.
    pub(crate) chain_next: u32,
    pub(crate) lru_prev: u32,
    pub(crate) lru_next: u32,
    /// True while linked into a hash chain and the LRU.
    pub(crate) live: bool,
}

impl Entry {
    /// Creates a vacant slot for the arena.
    pub(crate) fn vacant() -> Self {
        Self {
            key: Key::vacant(),
            hash: 0,
            ts: Timestamp::vacant(),
            balance: 0,
            slip_counter: 0,
            log_state: LogState::None,
            log_name: None,
            chain_next: NONE,
            lru_prev: NONE,
            lru_next: NONE,
            live: false,
        }
    }

    /// Initializes a recycled slot for a new bucket with one second of
    /// burst credit.
    pub(crate) fn reset(&mut self, key: Key, hash: u32, ts: Timestamp, rate: u32) {
        self.key = key;
        self.hash = hash;
        self.ts = ts;
        self.balance = i64::from(rate) * MILLI_PER_RESPONSE;
        self.slip_counter = 0;
        self.log_state = LogState::None;
        self.log_name = None;
    }

    #[inline]
    pub(crate) fn timestamp(&self) -> Timestamp {
        self.ts
    }

    #[cfg(test)]
    pub(crate) fn balance(&self) -> i64 {
        self.balance
    }

    /// Accounts one response against this bucket and decides its fate.
    ///
    /// `ts` is the already-encoded timestamp for `now`; `rate` is this
    /// bucket's budget and must be nonzero (zero-rate kinds never reach the
    /// table).
    pub(crate) fn update_balance(
        &mut self,
        bases: &TimestampBases,
        rate: u32,
        ts: Timestamp,
        slip: u32,
        aggressive_penalty: bool,
        now: u64,
        window: u32,
    ) -> Decision {
        debug_assert!(rate > 0);
        let rate_m = i64::from(rate) * MILLI_PER_RESPONSE;

        match bases.decode(self.ts) {
            Some(then) => {
                // A backwards clock reads as zero elapsed, never as a
                // negative credit.
                let elapsed = now.saturating_sub(then);
                if elapsed > 0 {
                    // Credit for idle time, but a bucket never holds more
                    // than one second of burst.
                    self.balance = self
                        .balance
                        .saturating_add(rate_m.saturating_mul(elapsed as i64))
                        .min(rate_m);
                }
            }
            None => {
                // The anchoring base was retired; anything that old has
                // fully recovered.
                self.balance = rate_m;
                self.slip_counter = 0;
            }
        }
        self.ts = ts;

        let debit = if aggressive_penalty && self.balance < 0 {
            2 * MILLI_PER_RESPONSE
        } else {
            MILLI_PER_RESPONSE
        };
        let post = self.balance - debit;

        if post >= 0 {
            self.balance = post;
            self.slip_counter = 0;
            return Decision::Allow;
        }

        let floor = -rate_m * i64::from(window);
        if post < floor {
            // Deep in the red: clamp the debt and never slip, so a spoofed
            // flood cannot be converted into a stream of TC=1 replies.
            self.balance = floor;
            return Decision::Drop;
        }
        self.balance = post;

        if slip > 0 {
            self.slip_counter += 1;
            if self.slip_counter >= slip {
                self.slip_counter = 0;
                return Decision::Slip;
            }
        }
        Decision::Drop
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::RebaseHandler;
    use crate::key::{ipv4_mask, ipv6_mask, KeyHasher, ResponseKind};
    use quell_proto::{Class, Name, RecordType};
    use std::str::FromStr;

    struct Ignore;
    impl RebaseHandler for Ignore {
        fn base_retired(&mut self, _generation: u32) {}
    }

    fn test_key() -> Key {
        let hasher = KeyHasher::new(1000, 0);
        Key::new(
            "192.0.2.7".parse().unwrap(),
            Class::default(),
            RecordType::A.into(),
            Some(&Name::from_str("a.example").unwrap()),
            ResponseKind::Query,
            ipv4_mask(24),
            ipv6_mask(56),
            &hasher,
        )
    }

    fn fresh_entry(bases: &mut TimestampBases, rate: u32, now: u64) -> Entry {
        let ts = bases.encode(now, &mut Ignore);
        let mut e = Entry::vacant();
        e.reset(test_key(), 0, ts, rate);
        e
    }

    fn check(bases: &mut TimestampBases, e: &mut Entry, now: u64, slip: u32) -> Decision {
        let ts = bases.encode(now, &mut Ignore);
        e.update_balance(bases, 5, ts, slip, false, now, 15)
    }

    #[test]
    fn test_burst_within_budget() {
        let mut bases = TimestampBases::new(1000);
        let mut e = fresh_entry(&mut bases, 5, 1000);
        for _ in 0..5 {
            assert_eq!(check(&mut bases, &mut e, 1000, 2), Decision::Allow);
        }
        assert_eq!(e.balance(), 0);
    }

    #[test]
    fn test_overrun_slip_cadence() {
        let mut bases = TimestampBases::new(1000);
        let mut e = fresh_entry(&mut bases, 5, 1000);
        let decisions: Vec<_> = (0..10)
            .map(|_| check(&mut bases, &mut e, 1000, 2))
            .collect();
        assert_eq!(
            decisions,
            vec![
                Decision::Allow,
                Decision::Allow,
                Decision::Allow,
                Decision::Allow,
                Decision::Allow,
                Decision::Drop,
                Decision::Slip,
                Decision::Drop,
                Decision::Slip,
                Decision::Drop,
            ]
        );
    }

    #[test]
    fn test_slip_every_time() {
        let mut bases = TimestampBases::new(1000);
        let mut e = fresh_entry(&mut bases, 5, 1000);
        for _ in 0..5 {
            check(&mut bases, &mut e, 1000, 1);
        }
        for _ in 0..3 {
            assert_eq!(check(&mut bases, &mut e, 1000, 1), Decision::Slip);
        }
    }

    #[test]
    fn test_slip_disabled() {
        let mut bases = TimestampBases::new(1000);
        let mut e = fresh_entry(&mut bases, 5, 1000);
        for _ in 0..5 {
            check(&mut bases, &mut e, 1000, 0);
        }
        for _ in 0..5 {
            assert_eq!(check(&mut bases, &mut e, 1000, 0), Decision::Drop);
        }
    }

    #[test]
    fn test_recovery_capped_at_one_second() {
        let mut bases = TimestampBases::new(1000);
        let mut e = fresh_entry(&mut bases, 5, 1000);
        for _ in 0..10 {
            check(&mut bases, &mut e, 1000, 2);
        }
        assert_eq!(e.balance(), -5000);

        // Two idle seconds credit 10 responses but cap at one second of
        // burst, so exactly 5 get through.
        let decisions: Vec<_> = (0..10)
            .map(|_| check(&mut bases, &mut e, 1002, 2))
            .collect();
        assert_eq!(
            decisions.iter().filter(|d| d.is_allow()).count(),
            5,
            "{decisions:?}"
        );
        assert!(decisions[..5].iter().all(|d| d.is_allow()));
    }

    #[test]
    fn test_debt_floor_suppresses_slip() {
        let mut bases = TimestampBases::new(1000);
        let mut e = fresh_entry(&mut bases, 5, 1000);
        // 5 allowed + 75 limited responses reach the -R*W floor.
        for _ in 0..80 {
            check(&mut bases, &mut e, 1000, 2);
        }
        assert_eq!(e.balance(), -5 * 15 * 1000);
        // Past the floor nothing slips.
        for _ in 0..10 {
            assert_eq!(check(&mut bases, &mut e, 1000, 2), Decision::Drop);
        }
        assert_eq!(e.balance(), -5 * 15 * 1000);
    }

    #[test]
    fn test_clock_backwards_is_zero_elapsed() {
        let mut bases = TimestampBases::new(1000);
        let mut e = fresh_entry(&mut bases, 5, 1000);
        for _ in 0..6 {
            check(&mut bases, &mut e, 1000, 0);
        }
        let before = e.balance();
        let d = check(&mut bases, &mut e, 990, 0);
        assert_eq!(d, Decision::Drop);
        assert_eq!(e.balance(), before - 1000);
    }

    #[test]
    fn test_expired_base_refreshes() {
        let mut bases = TimestampBases::new(1000);
        let mut e = fresh_entry(&mut bases, 5, 1000);
        for _ in 0..10 {
            check(&mut bases, &mut e, 1000, 2);
        }
        assert!(e.balance() < 0);

        // Rotate the ring far enough that the entry's base retires.
        for i in 1..=4u64 {
            bases.encode(1000 + i * 300, &mut Ignore);
        }
        assert!(bases.decode(e.timestamp()).is_none());

        // Next touch sees a fresh bucket: full burst minus this debit.
        let d = check(&mut bases, &mut e, 2200, 2);
        assert_eq!(d, Decision::Allow);
        assert_eq!(e.balance(), 4000);
    }

    #[test]
    fn test_aggressive_penalty_doubles_debit() {
        let mut bases = TimestampBases::new(1000);
        let mut e = fresh_entry(&mut bases, 5, 1000);
        let ts = bases.encode(1000, &mut Ignore);
        for _ in 0..6 {
            e.update_balance(&bases, 5, ts, 0, true, 1000, 15);
        }
        // 5 normal debits to zero, one into the red, then doubled.
        assert_eq!(e.balance(), -1000);
        e.update_balance(&bases, 5, ts, 0, true, 1000, 15);
        assert_eq!(e.balance(), -3000);
    }
}
