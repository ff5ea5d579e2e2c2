//! Rate-limit episode logging.
//!
//! A "limited episode" spans from the first limited decision on an entry
//! until the entry recovers or is evicted. Each episode produces at most
//! one opening line and, if the opening line was emitted, exactly one
//! closing line:
//!
//! ```text
//! limit query responses to 192.0.2.0/24 for a.example./IN/A
//! stop limiting query responses to 192.0.2.0/24 for a.example./IN/A
//! ```
//!
//! NXDOMAIN episodes name the ancestor the responses collapsed to and omit
//! the qtype (the bucket aggregates all types); error episodes carry no
//! name at all. Lines go to a caller-provided [`LogSink`]; logging is
//! advisory and never affects decisions.

use crate::entry::{Entry, LogState};
use crate::key::Key;
use crate::pool::{NamePool, LOG_NAME_POOL_SIZE};
use quell_proto::{Class, Name, Type};
use std::fmt::Write;
use std::sync::Arc;

/// Destination for episode lines.
///
/// Sinks must be `Send` so a limiter can live behind a mutex shared by
/// several workers.
pub trait LogSink: Send {
    /// Whether the sink currently accepts lines. An episode that opens
    /// while the sink is disabled stays pending and retries later.
    fn enabled(&self) -> bool {
        true
    }

    /// Emits one line. Must not panic; failures are the sink's problem.
    fn emit(&mut self, line: &str);
}

/// Forwards episode lines to `tracing` at INFO level under the
/// `quell::rrl` target.
#[derive(Debug, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn enabled(&self) -> bool {
        tracing::enabled!(target: "quell::rrl", tracing::Level::INFO)
    }

    fn emit(&mut self, line: &str) {
        tracing::info!(target: "quell::rrl", "{line}");
    }
}

/// Collects episode lines in memory; meant for tests and dry runs.
///
/// Clones share the same buffer, so a caller can keep one handle and give
/// the other to the limiter.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    lines: Arc<parking_lot::Mutex<Vec<String>>>,
    disabled: Arc<parking_lot::Mutex<bool>>,
}

impl MemorySink {
    /// Creates an empty, enabled sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything emitted so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Enables or disables the sink.
    pub fn set_enabled(&self, enabled: bool) {
        *self.disabled.lock() = !enabled;
    }
}

impl LogSink for MemorySink {
    fn enabled(&self) -> bool {
        !*self.disabled.lock()
    }

    fn emit(&mut self, line: &str) {
        self.lines.lock().push(line.to_string());
    }
}

/// Owns the sink and the name pool; drives the per-entry episode state
/// machine on behalf of the table and the limiter.
pub(crate) struct Journal {
    sink: Box<dyn LogSink>,
    pool: NamePool,
    ipv4_prefix_len: u8,
    ipv6_prefix_len: u8,
}

impl Journal {
    pub(crate) fn new(sink: Box<dyn LogSink>, ipv4_prefix_len: u8, ipv6_prefix_len: u8) -> Self {
        Self {
            sink,
            pool: NamePool::new(LOG_NAME_POOL_SIZE),
            ipv4_prefix_len,
            ipv6_prefix_len,
        }
    }

    /// Opens (or retries opening) the episode for an entry that just got a
    /// limited decision. `qname` is the name from the current check call.
    pub(crate) fn open_episode(&mut self, entry: &mut Entry, qname: Option<&Name>) {
        debug_assert!(entry.log_state != LogState::Logged);
        if !self.sink.enabled() {
            entry.log_state = LogState::Pending;
            return;
        }
        let name_text = qname.map(|n| n.to_string());
        let line = self.episode_line("limit", &entry.key, name_text.as_deref());
        self.sink.emit(&line);
        entry.log_name = qname.and_then(|n| self.pool.intern(n));
        entry.log_state = LogState::Logged;
    }

    /// Closes an entry's episode, on recovery or eviction. Emits the stop
    /// line only if the opening line went out.
    pub(crate) fn close_episode(&mut self, entry: &mut Entry) {
        if entry.log_state == LogState::Logged && self.sink.enabled() {
            let name_text = entry
                .log_name
                .and_then(|h| self.pool.format(h))
                .map(str::to_owned);
            let line = self.episode_line("stop limiting", &entry.key, name_text.as_deref());
            self.sink.emit(&line);
        }
        if let Some(handle) = entry.log_name.take() {
            self.pool.release(handle);
        }
        entry.log_state = LogState::None;
    }

    fn episode_line(&self, verb: &str, key: &Key, name: Option<&str>) -> String {
        let prefix_len = if key.prefix().is_v6() {
            self.ipv6_prefix_len
        } else {
            self.ipv4_prefix_len
        };
        let mut line = format!(
            "{verb} {} responses to {}/{}",
            key.kind(),
            key.prefix().addr(),
            prefix_len
        );
        if let Some(name) = name {
            let qclass = Class::from_u16(key.qclass());
            // NXDOMAIN and error buckets aggregate all qtypes; only query
            // buckets carry one worth printing.
            match key.qtype() {
                0 => {
                    let _ = write!(line, " for {name}/{qclass}");
                }
                t => {
                    let _ = write!(line, " for {name}/{qclass}/{}", Type::from_u16(t));
                }
            }
        }
        line
    }
}
