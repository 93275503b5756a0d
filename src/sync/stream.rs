//! Periodic full/incremental pulls from the remote authority.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::{DecisionBatch, DecisionSource, SyncStats};
use crate::clock::{Clock, SystemClock};
use crate::decision::{Decision, DecisionDelta, Scope};
use crate::error::{Error, Result, SyncError};
use crate::range::RangeMatcher;
use crate::store::CacheClient;

/// Stream-mode synchronizer.
///
/// The first successful pull asks for the full decision set; every later
/// pull asks only for changes. A failed pull leaves applied decisions in
/// place and is retried on the next tick.
pub struct StreamSync {
    source: Arc<dyn DecisionSource>,
    cache: CacheClient,
    ranges: Arc<RangeMatcher>,
    ceiling: Duration,
    max_failures: Option<u32>,
    started: AtomicBool,
    failures: AtomicU32,
    clock: Arc<dyn Clock>,
}

impl StreamSync {
    pub fn new(
        source: Arc<dyn DecisionSource>,
        cache: CacheClient,
        ranges: Arc<RangeMatcher>,
        ceiling: Duration,
        max_failures: Option<u32>,
    ) -> Self {
        Self {
            source,
            cache,
            ranges,
            ceiling,
            max_failures,
            started: AtomicBool::new(false),
            failures: AtomicU32::new(0),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Whether a full pull has succeeded yet.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }

    /// False once `max_update_failures` consecutive pulls have failed.
    pub fn is_healthy(&self) -> bool {
        match self.max_failures {
            Some(max) if max > 0 => self.consecutive_failures() < max,
            _ => true,
        }
    }

    /// Run one pull and apply its result.
    pub fn pull_once(&self) -> std::result::Result<SyncStats, SyncError> {
        let startup = !self.is_started();
        let delta = match self.source.pull_stream(startup) {
            Ok(delta) => delta,
            Err(e) => {
                let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
                log::warn!(
                    "stream: pull failed (startup={}, {} in a row): {}",
                    startup,
                    failures,
                    e
                );
                if self.max_failures == Some(failures) {
                    log::error!(
                        "stream: {} consecutive failures, applying authority fallback",
                        failures
                    );
                }
                return Err(e);
            }
        };

        let was_unhealthy = !self.is_healthy();
        self.failures.store(0, Ordering::Release);
        self.started.store(true, Ordering::Release);
        if was_unhealthy {
            log::info!("stream: authority reachable again");
        }

        let stats = self.apply(&delta);
        log::info!(
            "stream: pulled (startup={}) +{} addresses +{} ranges -{} removed, {} skipped",
            startup,
            stats.addresses_added,
            stats.ranges_added,
            stats.removed,
            stats.skipped
        );
        Ok(stats)
    }

    /// Apply one delta. Removals go first so a decision re-issued in the
    /// same pull survives.
    pub fn apply(&self, delta: &DecisionDelta) -> SyncStats {
        let now = self.clock.now();
        let mut stats = SyncStats::default();

        let mut removed_ranges = Vec::new();
        for record in &delta.deleted {
            match Decision::removal_key(record) {
                Some((Scope::Ip, value)) => {
                    self.cache.delete(&value);
                    stats.removed += 1;
                }
                Some((Scope::Range, value)) => match value.parse::<ipnet::IpNet>() {
                    Ok(net) => removed_ranges.push(net),
                    Err(_) => stats.skipped += 1,
                },
                Some((Scope::Other(_), _)) | None => stats.skipped += 1,
            }
        }

        let batch = DecisionBatch::from_records(&delta.new, now, self.ceiling);
        stats.skipped += batch.skipped;

        for d in &batch.addresses {
            self.cache.set(&d.value, d.kind.cache_value(), d.remaining(now));
            stats.addresses_added += 1;
        }

        let purged = self.ranges.update(|tables| {
            for net in &removed_ranges {
                tables.remove(*net);
            }
            for (net, d) in &batch.ranges {
                tables.insert(*net, d.kind, d.expires_at, &d.origin);
            }
            tables.purge_expired(now)
        });
        stats.removed += removed_ranges.len();
        stats.ranges_added = batch.ranges.len();

        if purged > 0 {
            log::debug!("stream: purged {} expired ranges", purged);
        }
        stats
    }

    /// Start the background worker pulling every `interval`.
    ///
    /// The first pull happens after one interval; callers wanting the
    /// initial state sooner call [`StreamSync::pull_once`] first.
    pub fn spawn(self: &Arc<Self>, interval: Duration) -> Result<SyncHandle> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let sync = Arc::clone(self);

        let thread = std::thread::Builder::new()
            .name("k2bouncer-stream".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        // Failure is logged and counted inside
                        let _ = sync.pull_once();
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        log::debug!("stream: worker stopping");
                        break;
                    }
                }
            })
            .map_err(Error::Io)?;

        log::info!("stream: worker started, interval {:?}", interval);
        Ok(SyncHandle {
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }
}

/// Owns the stream worker thread. Dropping it stops and joins the worker.
pub struct SyncHandle {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SyncHandle {
    /// Stop the worker and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    /// Block until the worker exits (it only exits once stopped).
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("stream: worker panicked");
            }
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
