//! Decision synchronization with the remote authority.
//!
//! - [`LiveSync`]: query the authority for one address on a cache miss
//! - [`StreamSync`]: pull the full decision set once, then deltas on an interval
//!
//! Both normalize decisions the same way: single-address decisions go to
//! the decision store keyed by address, range decisions go to the range
//! matcher keyed by prefix, and every lifetime is clamped to a ceiling.

mod lapi;
mod live;
mod stream;

pub use lapi::LapiClient;
pub use live::LiveSync;
pub use stream::{StreamSync, SyncHandle};

use ahash::AHashMap;
use ipnet::IpNet;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use crate::decision::{Decision, DecisionDelta, DecisionRecord, Scope};
use crate::error::SyncError;

/// Access to the remote decision authority.
pub trait DecisionSource: Send + Sync {
    /// Active decisions matching one address.
    fn query_ip(&self, ip: IpAddr) -> Result<Vec<DecisionRecord>, SyncError>;

    /// Full decision set (`startup`) or the changes since the previous pull.
    fn pull_stream(&self, startup: bool) -> Result<DecisionDelta, SyncError>;
}

/// Counters for one applied batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Single-address decisions written
    pub addresses_added: usize,
    /// Range decisions written
    pub ranges_added: usize,
    /// Removal events applied
    pub removed: usize,
    /// Records ignored (expired, unsupported type or scope, malformed)
    pub skipped: usize,
}

/// Decisions from one batch, reduced to one per key.
///
/// When a key appears more than once the more severe kind wins, then the
/// later expiry.
#[derive(Debug, Default)]
pub(crate) struct DecisionBatch {
    pub addresses: Vec<Decision>,
    pub ranges: Vec<(IpNet, Decision)>,
    pub skipped: usize,
}

impl DecisionBatch {
    pub(crate) fn from_records(records: &[DecisionRecord], now: Instant, ceiling: Duration) -> Self {
        let mut by_key: AHashMap<(bool, String), Decision> = AHashMap::new();
        let mut skipped = 0;

        for record in records {
            let Some(decision) = Decision::from_record(record, now, ceiling) else {
                skipped += 1;
                continue;
            };
            let is_range = match decision.scope {
                Scope::Ip => false,
                Scope::Range => true,
                Scope::Other(ref scope) => {
                    log::debug!("sync: ignoring decision with scope {}", scope);
                    skipped += 1;
                    continue;
                }
            };
            let key = (is_range, decision.value.clone());
            let replace = by_key.get(&key).map_or(true, |existing| {
                (existing.kind, existing.expires_at) < (decision.kind, decision.expires_at)
            });
            if replace {
                by_key.insert(key, decision);
            }
        }

        let mut batch = DecisionBatch {
            skipped,
            ..Default::default()
        };
        for ((is_range, _), decision) in by_key {
            if is_range {
                // Canonicalized by Decision::from_record
                if let Ok(net) = decision.value.parse::<IpNet>() {
                    batch.ranges.push((net, decision));
                }
            } else {
                batch.addresses.push(decision);
            }
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remediation::DecisionKind;

    fn record(scope: &str, value: &str, kind: &str, duration: &str) -> DecisionRecord {
        DecisionRecord {
            scope: scope.to_string(),
            value: value.to_string(),
            kind: kind.to_string(),
            origin: "crowdsec".to_string(),
            scenario: "crowdsecurity/ssh-bf".to_string(),
            duration: duration.to_string(),
        }
    }

    #[test]
    fn test_batch_splits_by_scope() {
        let now = Instant::now();
        let batch = DecisionBatch::from_records(
            &[
                record("Ip", "203.0.113.5", "ban", "1h"),
                record("Range", "203.0.113.0/24", "captcha", "1h"),
                record("Country", "FR", "ban", "1h"),
                record("Ip", "203.0.113.6", "ban", "-1s"),
            ],
            now,
            Duration::from_secs(86400),
        );

        assert_eq!(batch.addresses.len(), 1);
        assert_eq!(batch.ranges.len(), 1);
        assert_eq!(batch.ranges[0].0.to_string(), "203.0.113.0/24");
        assert_eq!(batch.skipped, 2);
    }

    #[test]
    fn test_batch_keeps_most_severe_per_key() {
        let now = Instant::now();
        let batch = DecisionBatch::from_records(
            &[
                record("Ip", "203.0.113.5", "ban", "1h"),
                record("Ip", "203.0.113.5", "captcha", "4h"),
                record("Ip", "203.0.113.7", "ban", "1h"),
                record("Ip", "203.0.113.7", "ban", "2h"),
            ],
            now,
            Duration::from_secs(86400),
        );

        assert_eq!(batch.addresses.len(), 2);
        for d in &batch.addresses {
            assert_eq!(d.kind, DecisionKind::Ban);
            if d.value == "203.0.113.7" {
                assert_eq!(d.remaining(now), Duration::from_secs(7200));
            }
        }
    }
}
