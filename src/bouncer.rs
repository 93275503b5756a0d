//! Bouncer facade: everything a request handler needs, built once.

use ipnet::IpNet;
use std::net::IpAddr;
use std::sync::Arc;

use crate::captcha::{CaptchaClient, CaptchaVerifier, ChallengeRequest, ChallengeResponse, HttpVerifier};
use crate::clock::{Clock, SystemClock};
use crate::config::{CacheBackend, Config, Mode};
use crate::error::Result;
use crate::range::RangeMatcher;
use crate::remediation::Remediation;
use crate::resolver::{Resolver, Synchronizer};
use crate::store::{CacheClient, RedisStore};
use crate::sync::{DecisionSource, LapiClient, LiveSync, StreamSync, SyncHandle, SyncStats};

/// Shared bouncer state.
///
/// Construct once at startup and share it (behind an `Arc`) with every
/// request handler. Nothing here is a process-wide global, so independent
/// instances can coexist, one per test for example.
pub struct Bouncer {
    config: Config,
    cache: CacheClient,
    ranges: Arc<RangeMatcher>,
    resolver: Resolver,
    captcha: Arc<CaptchaClient>,
    trusted: Vec<IpNet>,
}

impl Bouncer {
    /// Build from configuration, connecting to the configured backends.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let cache = match config.cache.backend {
            CacheBackend::Local => CacheClient::local(),
            CacheBackend::Redis => {
                let store = RedisStore::new(&config.cache.redis.store_config())?;
                CacheClient::new(Arc::new(store))
            }
        };
        let source = Arc::new(LapiClient::new(&config.lapi));
        let verifier = Arc::new(HttpVerifier::new(config.captcha.timeout())?);

        Self::with_parts(config, cache, source, verifier, Arc::new(SystemClock))
    }

    /// Build from explicit collaborators.
    pub fn with_parts(
        config: &Config,
        cache: CacheClient,
        source: Arc<dyn DecisionSource>,
        verifier: Arc<dyn CaptchaVerifier>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let trusted = config.parse_trusted_ips()?;
        let ranges = Arc::new(RangeMatcher::with_clock(clock.clone()));
        let ceiling = config.decisions.max_lifetime();

        let sync = match config.mode {
            Mode::Live => Synchronizer::Live(Arc::new(
                LiveSync::new(
                    source,
                    cache.clone(),
                    ranges.clone(),
                    config.decisions.live_cache_ttl(),
                    ceiling,
                )
                .with_clock(clock),
            )),
            Mode::Stream => Synchronizer::Stream(Arc::new(
                StreamSync::new(
                    source,
                    cache.clone(),
                    ranges.clone(),
                    ceiling,
                    config.lapi.max_update_failures,
                )
                .with_clock(clock),
            )),
        };

        let captcha = Arc::new(CaptchaClient::with_verifier(
            &config.captcha,
            cache.clone(),
            verifier,
        )?);
        let resolver = Resolver::new(cache.clone(), ranges.clone(), sync, config.fallback);

        log::info!(
            "bouncer: mode {:?}, store {}, captcha {}, {} trusted networks",
            config.mode,
            cache.backend_name(),
            captcha.provider().map(|p| p.name).unwrap_or("disabled"),
            trusted.len()
        );

        Ok(Self {
            config: config.clone(),
            cache,
            ranges,
            resolver,
            captcha,
            trusted,
        })
    }

    /// In stream mode, pull the initial decision set and start the
    /// background worker. Returns `None` in live mode.
    ///
    /// A failed initial pull is logged and retried by the worker.
    pub fn start(&self) -> Result<Option<SyncHandle>> {
        let Synchronizer::Stream(stream) = self.resolver.synchronizer() else {
            return Ok(None);
        };
        if let Err(e) = stream.pull_once() {
            log::warn!("bouncer: initial pull failed, retrying on schedule: {}", e);
        }
        let handle = stream.spawn(self.config.lapi.update_interval())?;
        Ok(Some(handle))
    }

    /// In stream mode, run one pull in the caller's thread.
    pub fn sync_once(&self) -> Result<Option<SyncStats>> {
        match self.resolver.synchronizer() {
            Synchronizer::Stream(stream) => Ok(Some(stream.pull_once()?)),
            Synchronizer::Live(_) => Ok(None),
        }
    }

    /// Verdict for a request from `addr` to `host`.
    ///
    /// Trusted addresses always pass. A `captcha` verdict becomes `allow`
    /// when the visitor holds a session for this host, or when no captcha
    /// provider is configured.
    pub fn evaluate(&self, addr: &str, host: &str) -> Remediation {
        let ip = match addr.trim().parse::<IpAddr>() {
            Ok(ip) => ip.to_canonical(),
            Err(_) => return self.resolver.resolve_str(addr),
        };
        if self.is_trusted(ip) {
            log::trace!("bouncer: {} trusted", ip);
            return Remediation::Allow;
        }

        match self.resolver.resolve(ip) {
            Remediation::Captcha if !self.captcha.is_enabled() => Remediation::Allow,
            Remediation::Captcha if self.captcha.check(&ip.to_string(), host) => {
                Remediation::Allow
            }
            verdict => verdict,
        }
    }

    /// Serve or verify the captcha challenge for a visitor.
    pub fn serve_challenge(&self, addr: &str, req: &ChallengeRequest) -> ChallengeResponse {
        let addr = addr
            .trim()
            .parse::<IpAddr>()
            .map(|ip| ip.to_canonical().to_string())
            .unwrap_or_else(|_| addr.trim().to_string());
        self.captcha.serve_challenge(&addr, req)
    }

    pub fn is_trusted(&self, ip: IpAddr) -> bool {
        let ip = ip.to_canonical();
        self.trusted.iter().any(|net| net.contains(&ip))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn captcha(&self) -> &Arc<CaptchaClient> {
        &self.captcha
    }

    pub fn ranges(&self) -> &Arc<RangeMatcher> {
        &self.ranges
    }

    pub fn cache(&self) -> &CacheClient {
        &self.cache
    }
}
