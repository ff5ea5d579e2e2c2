//! The limiter façade.
//!
//! [`ResponseLimiter`] owns every moving part — table, rates, clock ring,
//! journal — and exposes the one call the server makes per response:
//! [`ResponseLimiter::check`]. The call is synchronous, infallible, and
//! constant expected time; all sizing and seeding happen at construction.

use crate::clock::TimestampBases;
use crate::config::{ConfigError, RrlConfig};
use crate::entry::LogState;
use crate::key::{self, Key, KeyHasher, ResponseKind};
use crate::log::{Journal, LogSink, TracingSink};
use crate::rates::Rates;
use crate::table::Table;
use crate::Decision;
use quell_proto::{Class, Name, ResponseCode, Type};
use std::net::IpAddr;

/// Response Rate Limiter for one worker.
///
/// Construct once at startup; call [`check`](Self::check) just before
/// sending each response. The limiter is `Send` but not internally
/// synchronized — give each worker its own instance or guard a shared one
/// with a mutex around the (short) `check` call.
pub struct ResponseLimiter {
    table: Table,
    rates: Rates,
    ts_bases: TimestampBases,
    journal: Journal,
    hasher: KeyHasher,
    window: u32,
    slip: u32,
    log_only: bool,
    aggressive_penalty: bool,
    ipv4_prefix_len: u8,
    ipv6_prefix_len: u8,
    ipv4_mask: u32,
    ipv6_mask: u128,
}

impl ResponseLimiter {
    /// Creates a limiter logging through [`TracingSink`].
    ///
    /// `now` seeds both the virtual clock and (mixed with `config.salt`)
    /// the key hash.
    pub fn new(config: &RrlConfig, now: u64) -> Result<Self, ConfigError> {
        Self::with_sink(config, now, Box::new(TracingSink))
    }

    /// Creates a limiter with a caller-provided log sink.
    pub fn with_sink(
        config: &RrlConfig,
        now: u64,
        sink: Box<dyn LogSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            table: Table::new(config.min_table_size, config.max_table_size),
            rates: Rates::new(
                config.responses_per_second,
                config.nxdomains_per_second,
                config.errors_per_second,
            ),
            ts_bases: TimestampBases::new(now),
            journal: Journal::new(sink, config.ipv4_prefix_len, config.ipv6_prefix_len),
            hasher: KeyHasher::new(now, config.salt),
            window: config.window,
            slip: config.slip,
            log_only: config.log_only,
            aggressive_penalty: config.aggressive_penalty,
            ipv4_prefix_len: config.ipv4_prefix_len,
            ipv6_prefix_len: config.ipv6_prefix_len,
            ipv4_mask: key::ipv4_mask(config.ipv4_prefix_len),
            ipv6_mask: key::ipv6_mask(config.ipv6_prefix_len),
        })
    }

    /// Decides the fate of one response, just before it is sent.
    ///
    /// `qname` is the query name for ordinary answers and the closest
    /// enclosing existing ancestor for NXDOMAIN answers; error responses
    /// may pass `None`. `now` is wall-clock seconds and should be
    /// monotone; a backwards step is absorbed as zero elapsed time.
    #[allow(clippy::too_many_arguments)]
    pub fn check(
        &mut self,
        client: IpAddr,
        is_tcp: bool,
        qclass: Class,
        qtype: Type,
        qname: Option<&Name>,
        rcode: ResponseCode,
        now: u64,
    ) -> Decision {
        // TCP responses are never limited: the transport is not usefully
        // spoofable and it is where slipped clients retry.
        if is_tcp {
            return Decision::Allow;
        }

        let kind = ResponseKind::from_rcode(rcode);
        let rate = self.rates.rate_for(kind);
        if rate == 0 {
            return Decision::Allow;
        }

        let ts = self.ts_bases.encode(now, &mut self.table);
        let key = Key::new(
            client,
            qclass,
            qtype,
            qname,
            kind,
            self.ipv4_mask,
            self.ipv6_mask,
            &self.hasher,
        );
        let hash = self.hasher.key_hash(&key);

        let idx = self.table.get(key, hash, ts, rate, &mut self.journal);
        let entry = self.table.entry_mut(idx);
        let decision = entry.update_balance(
            &self.ts_bases,
            rate,
            ts,
            self.slip,
            self.aggressive_penalty,
            now,
            self.window,
        );

        if decision.is_limited() {
            if entry.log_state != LogState::Logged {
                self.journal.open_episode(entry, qname);
            }
        } else if entry.log_state != LogState::None {
            self.journal.close_episode(entry);
        }

        if self.log_only {
            Decision::Allow
        } else {
            decision
        }
    }

    /// Releases excess table memory after a quiet period. Safe to call
    /// from the caller's idle maintenance at any cadence.
    pub fn shrink_if_quiet(&mut self) {
        self.table.shrink_if_quiet();
    }

    /// The configured budget for ordinary responses, per second.
    pub fn response_rate(&self) -> u32 {
        self.rates.rate_for(ResponseKind::Query)
    }

    /// The configured budget for NXDOMAIN responses, per second.
    pub fn nxdomain_rate(&self) -> u32 {
        self.rates.rate_for(ResponseKind::Nxdomain)
    }

    /// The configured budget for error responses, per second.
    pub fn error_rate(&self) -> u32 {
        self.rates.rate_for(ResponseKind::Error)
    }

    /// Number of live buckets.
    pub fn entry_count(&self) -> usize {
        self.table.len()
    }

    /// The debt window in seconds.
    pub fn window(&self) -> u32 {
        self.window
    }

    /// The slip cadence.
    pub fn slip(&self) -> u32 {
        self.slip
    }

    /// Whether decisions are being reported as Allow regardless.
    pub fn is_log_only(&self) -> bool {
        self.log_only
    }

    /// The base of the virtual clock that `now` resolves against, in
    /// seconds. Does not advance the clock; during an idle period this
    /// reports the base a rotation would install rather than a stale one.
    pub fn current_timestamp_base(&self, now: u64) -> u64 {
        self.ts_bases.base_for(now)
    }

    /// The configured IPv4 aggregation prefix length.
    pub fn ipv4_prefix_len(&self) -> u8 {
        self.ipv4_prefix_len
    }

    /// The configured IPv6 aggregation prefix length.
    pub fn ipv6_prefix_len(&self) -> u8 {
        self.ipv6_prefix_len
    }

    /// The IPv4 mask derived from the prefix length.
    pub fn ipv4_mask(&self) -> u32 {
        self.ipv4_mask
    }

    /// The IPv6 mask derived from the prefix length.
    pub fn ipv6_mask(&self) -> u128 {
        self.ipv6_mask
    }
}
