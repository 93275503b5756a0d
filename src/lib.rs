//! K2Bouncer - request-time remediation engine for CrowdSec decisions.
//!
//! For every incoming request the bouncer decides, in microseconds, whether
//! the client address is banned, must solve a captcha, or may pass, based on
//! decisions issued by a CrowdSec Local API (the remote authority).
//!
//! # Features
//!
//! - **Decision store**: in-process sharded map or a shared Redis database,
//!   with an explicit distinction between "not cached" and "unreachable"
//! - **Range matching**: binary trie per address family, published as
//!   lock-free copy-on-write snapshots
//! - **Live mode**: query the authority on a cache miss and cache the answer
//! - **Stream mode**: full pull at startup, then periodic deltas on a
//!   background thread
//! - **Fallback policy**: fail-open or fail-closed, configured separately
//!   for store and authority failures
//! - **Captcha**: hCaptcha, reCAPTCHA and Turnstile, with sessions bound to
//!   the (address, host) pair
//!
//! # Quick Start
//!
//! ```ignore
//! use k2bouncer::{Bouncer, Config, Remediation};
//! use std::path::Path;
//!
//! let config = Config::load(Path::new("/etc/k2bouncer.yaml"))?;
//! let bouncer = Bouncer::from_config(&config)?;
//!
//! // Stream mode: initial pull plus background worker
//! let _worker = bouncer.start()?;
//!
//! match bouncer.evaluate("203.0.113.5", "example.com") {
//!     Remediation::Allow => { /* forward */ }
//!     Remediation::Ban => { /* 403 */ }
//!     Remediation::Captcha => { /* bouncer.serve_challenge(...) */ }
//! }
//! ```
//!
//! # Resolution Order
//!
//! 1. Trusted networks (always allow)
//! 2. Decision store, exact address
//! 3. Range matcher
//! 4. Live query (live mode only)
//! 5. Captcha session override for `captcha` verdicts

mod error;

pub mod bouncer;
pub mod captcha;
pub mod clock;
pub mod config;
pub mod decision;
pub mod range;
pub mod remediation;
pub mod resolver;
pub mod store;
pub mod sync;

// Re-export core types
pub use error::{CacheError, Error, ProviderError, RangeError, Result, SyncError};
pub use remediation::{DecisionKind, Remediation};

pub use bouncer::Bouncer;
pub use config::{Config, FailPolicy, FallbackConfig, Mode};
pub use resolver::{Resolver, Synchronizer};

// Re-export building blocks for custom wiring
pub use captcha::{CaptchaClient, CaptchaVerifier, ChallengeRequest, ChallengeResponse};
pub use clock::{Clock, ManualClock, SystemClock};
pub use decision::{Decision, DecisionDelta, DecisionRecord, Scope};
pub use range::RangeMatcher;
pub use store::{CacheClient, DecisionStore, LocalStore, RedisStore};
pub use sync::{DecisionSource, LapiClient, LiveSync, StreamSync, SyncHandle, SyncStats};
