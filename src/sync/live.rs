//! Per-address queries against the remote authority.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use super::{DecisionBatch, DecisionSource};
use crate::clock::{Clock, SystemClock};
use crate::error::SyncError;
use crate::range::RangeMatcher;
use crate::remediation::{Remediation, NOT_BANNED_VALUE};
use crate::store::CacheClient;

/// Expiry drift tolerated before a repeated range answer is republished.
const EXPIRY_SLACK: Duration = Duration::from_secs(1);

/// Live-mode synchronizer.
///
/// Each query result is cached under the address for at most the live
/// cache TTL, so repeated requests from one client skip the remote call.
/// A negative result is cached too.
pub struct LiveSync {
    source: Arc<dyn DecisionSource>,
    cache: CacheClient,
    ranges: Arc<RangeMatcher>,
    cache_ttl: Duration,
    ceiling: Duration,
    clock: Arc<dyn Clock>,
}

impl LiveSync {
    pub fn new(
        source: Arc<dyn DecisionSource>,
        cache: CacheClient,
        ranges: Arc<RangeMatcher>,
        cache_ttl: Duration,
        ceiling: Duration,
    ) -> Self {
        Self {
            source,
            cache,
            ranges,
            cache_ttl,
            ceiling,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Ask the authority about `ip` and cache the answer.
    ///
    /// On error nothing is written; the caller decides the fallback.
    pub fn query(&self, ip: IpAddr) -> Result<Remediation, SyncError> {
        let records = self.source.query_ip(ip).map_err(|e| {
            log::warn!("live: query for {} failed: {}", ip, e);
            e
        })?;

        let now = self.clock.now();
        let batch = DecisionBatch::from_records(&records, now, self.ceiling);

        // Publishing clones the whole table set, so ranges the matcher
        // already holds with the same kind and expiry are left alone.
        let current = self.ranges.snapshot();
        let changed: Vec<_> = batch
            .ranges
            .iter()
            .filter(|(net, d)| {
                current.get(*net).map_or(true, |held| {
                    held.kind != d.kind
                        || d.expires_at.saturating_duration_since(held.expires_at) > EXPIRY_SLACK
                })
            })
            .collect();
        if !changed.is_empty() {
            self.ranges.update(|tables| {
                for (net, d) in &changed {
                    tables.insert(*net, d.kind, d.expires_at, &d.origin);
                }
            });
        }

        // The authority answers with every decision covering `ip`, so the
        // most severe one decides.
        let strongest = batch
            .addresses
            .iter()
            .chain(batch.ranges.iter().map(|(_, d)| d))
            .max_by_key(|d| (d.kind, d.expires_at));

        let key = ip.to_canonical().to_string();
        let verdict = match strongest {
            Some(d) => {
                let ttl = d.remaining(now).min(self.cache_ttl);
                self.cache.set(&key, d.kind.cache_value(), ttl);
                Remediation::from(d.kind)
            }
            None => {
                self.cache.set(&key, NOT_BANNED_VALUE, self.cache_ttl);
                Remediation::Allow
            }
        };

        log::debug!(
            "live: {} -> {} ({} decisions, {} skipped)",
            ip,
            verdict,
            records.len(),
            batch.skipped
        );
        Ok(verdict)
    }
}
