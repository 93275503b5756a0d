//! Error types for k2bouncer.

use thiserror::Error;

/// Error type for k2bouncer setup and configuration.
///
/// Request-path faults never surface through this type: they are folded
/// into a [`Remediation`](crate::Remediation) by the resolver.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid CIDR pattern
    #[error("invalid CIDR pattern: {0}")]
    InvalidCidrPattern(String),

    /// Shared cache backend could not be set up
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// HTTP client could not be built
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Decision feed failure surfaced to the operator (CLI sync)
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),
}

/// Result type alias for k2bouncer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of a failed decision store lookup.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheError {
    /// The backend answered and holds no live value for the key.
    #[error("cache:miss")]
    Miss,

    /// The backend could not be consulted at all.
    #[error("cache:unreachable")]
    Unreachable,
}

/// Error talking to the remote decision authority.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Connection, DNS or timeout failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status
    #[error("HTTP status {0}")]
    Status(u16),

    /// Body was not the expected JSON shape
    #[error("invalid response: {0}")]
    Decode(String),
}

/// Error from a captcha provider verification call.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// HTTP request failed or timed out
    #[error("verification request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Response announced JSON but could not be decoded
    #[error("invalid verification response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Error type for range matcher operations.
#[derive(Error, Debug)]
pub enum RangeError {
    /// Invalid CIDR notation
    #[error("invalid CIDR notation: {0}")]
    InvalidCidr(String),
}
