//! Range matcher for range-scoped decisions.
//!
//! Readers load an immutable [`RangeTables`] snapshot through [`ArcSwap`]
//! and never take a lock. Writers clone the current snapshot, apply their
//! changes, and publish the result with a single pointer store; in-flight
//! lookups finish against the version they loaded.

mod trie;

pub use trie::{PrefixTrie, RangeEntry};

use arc_swap::ArcSwap;
use ipnet::IpNet;
use parking_lot::Mutex;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use crate::clock::{Clock, SystemClock};
use crate::error::RangeError;
use crate::remediation::DecisionKind;

fn net_key(net: &IpNet) -> (u128, u8) {
    match net {
        IpNet::V4(n) => ((u32::from(n.network()) as u128) << 96, n.prefix_len()),
        IpNet::V6(n) => (u128::from(n.network()), n.prefix_len()),
    }
}

/// One immutable version of the active ranges, one trie per address family.
#[derive(Debug, Clone, Default)]
pub struct RangeTables {
    v4: PrefixTrie,
    v6: PrefixTrie,
}

impl RangeTables {
    fn trie_mut(&mut self, net: &IpNet) -> &mut PrefixTrie {
        match net {
            IpNet::V4(_) => &mut self.v4,
            IpNet::V6(_) => &mut self.v6,
        }
    }

    /// Insert or replace the decision for `net`.
    pub fn insert(&mut self, net: IpNet, kind: DecisionKind, expires_at: Instant, origin: &str) {
        let net = net.trunc();
        let (key, prefix_len) = net_key(&net);
        self.trie_mut(&net).insert(
            key,
            RangeEntry {
                kind,
                prefix_len,
                expires_at,
                origin: origin.to_string(),
            },
        );
    }

    /// Remove the decision for `net`. Returns whether one was present.
    pub fn remove(&mut self, net: IpNet) -> bool {
        let net = net.trunc();
        let (key, prefix_len) = net_key(&net);
        self.trie_mut(&net).remove(key, prefix_len).is_some()
    }

    /// Entry stored for exactly `net`.
    pub fn get(&self, net: IpNet) -> Option<&RangeEntry> {
        let net = net.trunc();
        let (key, prefix_len) = net_key(&net);
        match net {
            IpNet::V4(_) => self.v4.get(key, prefix_len),
            IpNet::V6(_) => self.v6.get(key, prefix_len),
        }
    }

    /// Best active entry covering `ip`.
    pub fn lookup(&self, ip: IpAddr, now: Instant) -> Option<&RangeEntry> {
        match ip.to_canonical() {
            IpAddr::V4(v4) => self.v4.lookup((u32::from(v4) as u128) << 96, now),
            IpAddr::V6(v6) => self.v6.lookup(u128::from(v6), now),
        }
    }

    pub fn purge_expired(&mut self, now: Instant) -> usize {
        self.v4.purge_expired(now) + self.v6.purge_expired(now)
    }

    pub fn v4_count(&self) -> usize {
        self.v4.len()
    }

    pub fn v6_count(&self) -> usize {
        self.v6.len()
    }

    pub fn len(&self) -> usize {
        self.v4_count() + self.v6_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared matcher for banned/challenged address ranges.
pub struct RangeMatcher {
    current: ArcSwap<RangeTables>,
    /// Serializes writers; readers never touch it.
    write_lock: Mutex<()>,
    clock: Arc<dyn Clock>,
}

impl RangeMatcher {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            current: ArcSwap::from_pointee(RangeTables::default()),
            write_lock: Mutex::new(()),
            clock,
        }
    }

    /// Current snapshot. Holding it gives a stable view for one request.
    pub fn snapshot(&self) -> Arc<RangeTables> {
        self.current.load_full()
    }

    /// Apply a batch of changes and publish them as one new version.
    pub fn update<R>(&self, apply: impl FnOnce(&mut RangeTables) -> R) -> R {
        let _guard = self.write_lock.lock();
        let mut next = RangeTables::clone(&self.current.load());
        let result = apply(&mut next);
        self.current.store(Arc::new(next));
        result
    }

    /// Insert a range in CIDR notation.
    pub fn insert(
        &self,
        prefix: &str,
        kind: DecisionKind,
        expires_at: Instant,
    ) -> Result<(), RangeError> {
        let net: IpNet = prefix
            .trim()
            .parse()
            .map_err(|_| RangeError::InvalidCidr(prefix.to_string()))?;
        self.update(|tables| tables.insert(net, kind, expires_at, ""));
        Ok(())
    }

    /// Remove a range. Absent or malformed prefixes are a no-op.
    pub fn remove(&self, prefix: &str) -> bool {
        match prefix.trim().parse::<IpNet>() {
            Ok(net) => self.update(|tables| tables.remove(net)),
            Err(_) => false,
        }
    }

    /// Kind of the best active range covering `ip`, if any.
    pub fn contains(&self, ip: IpAddr) -> Option<DecisionKind> {
        self.contains_in(&self.current.load(), ip)
    }

    /// Same as [`RangeMatcher::contains`] against a snapshot the caller holds.
    pub fn contains_in(&self, tables: &RangeTables, ip: IpAddr) -> Option<DecisionKind> {
        tables.lookup(ip, self.clock.now()).map(|e| e.kind)
    }

    /// Drop expired ranges. Skips publishing when nothing expired.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let _guard = self.write_lock.lock();
        let current = self.current.load_full();
        let mut next = RangeTables::clone(&current);
        let removed = next.purge_expired(now);
        if removed > 0 {
            self.current.store(Arc::new(next));
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.current.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RangeMatcher {
    fn default() -> Self {
        Self::new()
    }
}
