//! Request-time remediation resolution.
//!
//! Order of evaluation for one address:
//!
//! 1. decision store (exact address); an unreachable store short-circuits
//!    to the store fallback
//! 2. range matcher snapshot
//! 3. live query to the authority (live mode only); a failed query yields
//!    the authority fallback
//!
//! In stream mode an unhealthy feed yields the authority fallback for
//! addresses with no known decision.

use std::net::IpAddr;
use std::sync::Arc;

use crate::config::FallbackConfig;
use crate::error::CacheError;
use crate::range::RangeMatcher;
use crate::remediation::Remediation;
use crate::store::CacheClient;
use crate::sync::{LiveSync, StreamSync};

/// How decisions reach the local state.
#[derive(Clone)]
pub enum Synchronizer {
    /// Query the authority on every miss
    Live(Arc<LiveSync>),
    /// Background feed keeps the state current
    Stream(Arc<StreamSync>),
}

/// Combines the decision store, range matcher and fallback policy into one
/// verdict per address.
#[derive(Clone)]
pub struct Resolver {
    cache: CacheClient,
    ranges: Arc<RangeMatcher>,
    sync: Synchronizer,
    fallback: FallbackConfig,
}

impl Resolver {
    pub fn new(
        cache: CacheClient,
        ranges: Arc<RangeMatcher>,
        sync: Synchronizer,
        fallback: FallbackConfig,
    ) -> Self {
        Self {
            cache,
            ranges,
            sync,
            fallback,
        }
    }

    pub fn fallback(&self) -> &FallbackConfig {
        &self.fallback
    }

    pub fn synchronizer(&self) -> &Synchronizer {
        &self.sync
    }

    /// Resolve an address given as text.
    ///
    /// An address that cannot be parsed gets the authority fallback, since
    /// no decision can ever be looked up for it.
    pub fn resolve_str(&self, addr: &str) -> Remediation {
        match addr.trim().parse::<IpAddr>() {
            Ok(ip) => self.resolve(ip),
            Err(_) => {
                let verdict = self.fallback.authority_unreachable.remediation();
                log::warn!("resolve: invalid address {:?}, fallback {}", addr, verdict);
                verdict
            }
        }
    }

    pub fn resolve(&self, ip: IpAddr) -> Remediation {
        let ip = ip.to_canonical();
        let key = ip.to_string();

        match self.cache.get(&key) {
            Ok(value) => match Remediation::from_cache_value(&value) {
                Some(verdict) => return verdict,
                None => log::warn!("resolve: unexpected cache value {:?} for {}", value, key),
            },
            Err(CacheError::Unreachable) => {
                let verdict = self.fallback.store_unreachable.remediation();
                log::warn!(
                    "resolve: store {} unreachable, fallback {} for {}",
                    self.cache.backend_name(),
                    verdict,
                    key
                );
                return verdict;
            }
            Err(CacheError::Miss) => {}
        }

        // One snapshot per request
        let snapshot = self.ranges.snapshot();
        if let Some(kind) = self.ranges.contains_in(&snapshot, ip) {
            return kind.into();
        }

        match &self.sync {
            Synchronizer::Live(live) => match live.query(ip) {
                Ok(verdict) => verdict,
                Err(_) => self.fallback.authority_unreachable.remediation(),
            },
            Synchronizer::Stream(stream) if !stream.is_healthy() => {
                let verdict = self.fallback.authority_unreachable.remediation();
                log::debug!("resolve: feed unhealthy, fallback {} for {}", verdict, key);
                verdict
            }
            Synchronizer::Stream(_) => Remediation::Allow,
        }
    }
}
