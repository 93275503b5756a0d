//! Bouncer configuration.

use ipnet::IpNet;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use crate::captcha::provider_info;
use crate::error::{Error, Result};
use crate::remediation::Remediation;
use crate::store::RedisStoreConfig;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Decision synchronization mode.
    #[serde(default)]
    pub mode: Mode,

    /// Remote decision authority.
    pub lapi: LapiConfig,

    /// Decision lifetime limits.
    #[serde(default)]
    pub decisions: DecisionSettings,

    /// Behaviour when a dependency cannot be reached.
    #[serde(default)]
    pub fallback: FallbackConfig,

    /// Decision store backend.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Captcha challenge settings.
    #[serde(default)]
    pub captcha: CaptchaConfig,

    /// Addresses and ranges that are always allowed.
    #[serde(default)]
    pub trusted_ips: Vec<String>,
}

/// How decisions reach the store.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Query the authority on each cache miss.
    #[default]
    Live,
    /// Periodically pull the full and then incremental decision set.
    Stream,
}

/// Remote decision authority settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LapiConfig {
    /// Base URL, e.g. `http://crowdsec:8080`.
    pub url: String,

    /// Value sent in the `X-Api-Key` header.
    pub api_key: String,

    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Stream mode pull interval.
    #[serde(default = "default_update_interval")]
    pub update_interval_seconds: u64,

    /// Consecutive failed pulls after which the stream is considered unhealthy.
    #[serde(default)]
    pub max_update_failures: Option<u32>,
}

impl LapiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_seconds)
    }
}

/// Decision lifetime limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DecisionSettings {
    /// Live mode: how long a lookup result is cached.
    #[serde(default = "default_live_cache_seconds")]
    pub live_cache_seconds: u64,

    /// Ceiling applied to every decision's lifetime.
    #[serde(default = "default_max_decision_seconds")]
    pub max_decision_seconds: u64,
}

impl DecisionSettings {
    pub fn live_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.live_cache_seconds)
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_decision_seconds)
    }
}

impl Default for DecisionSettings {
    fn default() -> Self {
        Self {
            live_cache_seconds: default_live_cache_seconds(),
            max_decision_seconds: default_max_decision_seconds(),
        }
    }
}

/// Verdict applied when a dependency is unreachable.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FailPolicy {
    /// Fail-open.
    #[default]
    Allow,
    /// Fail-closed.
    Ban,
}

impl FailPolicy {
    pub fn remediation(&self) -> Remediation {
        match self {
            FailPolicy::Allow => Remediation::Allow,
            FailPolicy::Ban => Remediation::Ban,
        }
    }
}

/// Fallback policies, one per failing dependency.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct FallbackConfig {
    /// Decision store could not be consulted.
    #[serde(default)]
    pub store_unreachable: FailPolicy,

    /// Remote authority could not be consulted (live query or unhealthy stream).
    #[serde(default)]
    pub authority_unreachable: FailPolicy,
}

impl FallbackConfig {
    /// Block on every dependency failure.
    pub fn strict() -> Self {
        Self {
            store_unreachable: FailPolicy::Ban,
            authority_unreachable: FailPolicy::Ban,
        }
    }
}

/// Decision store backend selection.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Local,
    Redis,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,

    #[serde(default)]
    pub redis: RedisConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_host")]
    pub host: String,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub database: i64,

    #[serde(default = "default_redis_timeout")]
    pub timeout_seconds: u64,

    #[serde(default = "default_redis_pool")]
    pub pool_size: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: default_redis_host(),
            password: None,
            database: 0,
            timeout_seconds: default_redis_timeout(),
            pool_size: default_redis_pool(),
        }
    }
}

impl RedisConfig {
    pub fn store_config(&self) -> RedisStoreConfig {
        RedisStoreConfig {
            host: self.host.clone(),
            password: self.password.clone(),
            database: self.database,
            timeout: Duration::from_secs(self.timeout_seconds),
            pool_size: self.pool_size,
        }
    }
}

/// Captcha challenge settings. No provider means captcha is disabled.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaptchaConfig {
    /// `hcaptcha`, `recaptcha` or `turnstile`.
    #[serde(default)]
    pub provider: Option<String>,

    #[serde(default)]
    pub site_key: String,

    #[serde(default)]
    pub secret_key: String,

    /// How long a passed challenge is honoured.
    #[serde(default = "default_grace_period")]
    pub grace_period_seconds: u64,

    /// Provider verification call timeout.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Custom challenge page template.
    #[serde(default)]
    pub template_path: Option<String>,

    /// Response header set to `captcha` on challenge pages.
    #[serde(default)]
    pub remediation_header: Option<String>,
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            provider: None,
            site_key: String::new(),
            secret_key: String::new(),
            grace_period_seconds: default_grace_period(),
            timeout_seconds: default_timeout_seconds(),
            template_path: None,
            remediation_header: None,
        }
    }
}

impl CaptchaConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_seconds)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Whether a known provider is configured.
    pub fn is_enabled(&self) -> bool {
        self.provider.as_deref().and_then(provider_info).is_some()
    }
}

/// Longest TTL or interval accepted anywhere in the config, ten years.
pub const MAX_TTL_SECONDS: u64 = 10 * 365 * 86400;

fn check_ttl(name: &str, secs: u64) -> Result<()> {
    if secs > MAX_TTL_SECONDS {
        return Err(Error::Config(format!(
            "{} must be <= {}",
            name, MAX_TTL_SECONDS
        )));
    }
    Ok(())
}

fn default_timeout_seconds() -> u64 {
    10
}

fn default_update_interval() -> u64 {
    60
}

fn default_live_cache_seconds() -> u64 {
    60
}

fn default_max_decision_seconds() -> u64 {
    86400
}

fn default_redis_host() -> String {
    "127.0.0.1:6379".to_string()
}

fn default_redis_timeout() -> u64 {
    2
}

fn default_redis_pool() -> usize {
    8
}

fn default_grace_period() -> u64 {
    1800
}

impl Config {
    /// Load configuration from a YAML file, expanding `${VAR}` references.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content)?;
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Minimal live-mode configuration.
    pub fn new(lapi_url: &str, api_key: &str) -> Self {
        Self {
            mode: Mode::default(),
            lapi: LapiConfig {
                url: lapi_url.to_string(),
                api_key: api_key.to_string(),
                timeout_seconds: default_timeout_seconds(),
                update_interval_seconds: default_update_interval(),
                max_update_failures: None,
            },
            decisions: DecisionSettings::default(),
            fallback: FallbackConfig::default(),
            cache: CacheConfig::default(),
            captcha: CaptchaConfig::default(),
            trusted_ips: Vec::new(),
        }
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.lapi.url.trim().is_empty() {
            return Err(Error::Config("lapi.url must be set".to_string()));
        }
        if self.lapi.api_key.trim().is_empty() {
            return Err(Error::Config("lapi.api_key must be set".to_string()));
        }
        if self.lapi.timeout_seconds == 0 {
            return Err(Error::Config("lapi.timeout_seconds must be > 0".to_string()));
        }
        if self.mode == Mode::Stream && self.lapi.update_interval_seconds == 0 {
            return Err(Error::Config(
                "lapi.update_interval_seconds must be > 0".to_string(),
            ));
        }
        if self.decisions.max_decision_seconds == 0 {
            return Err(Error::Config(
                "decisions.max_decision_seconds must be > 0".to_string(),
            ));
        }
        if self.mode == Mode::Live && self.decisions.live_cache_seconds == 0 {
            return Err(Error::Config(
                "decisions.live_cache_seconds must be > 0".to_string(),
            ));
        }
        check_ttl("decisions.max_decision_seconds", self.decisions.max_decision_seconds)?;
        check_ttl("decisions.live_cache_seconds", self.decisions.live_cache_seconds)?;
        check_ttl("captcha.grace_period_seconds", self.captcha.grace_period_seconds)?;
        check_ttl("lapi.timeout_seconds", self.lapi.timeout_seconds)?;
        check_ttl("lapi.update_interval_seconds", self.lapi.update_interval_seconds)?;
        check_ttl("captcha.timeout_seconds", self.captcha.timeout_seconds)?;
        check_ttl("cache.redis.timeout_seconds", self.cache.redis.timeout_seconds)?;

        if let Some(provider) = self.captcha.provider.as_deref().filter(|p| !p.is_empty()) {
            if provider_info(provider).is_none() {
                log::warn!("config: unknown captcha provider {}, captcha disabled", provider);
            } else {
                if self.captcha.site_key.is_empty() || self.captcha.secret_key.is_empty() {
                    return Err(Error::Config(
                        "captcha.site_key and captcha.secret_key must be set".to_string(),
                    ));
                }
                if self.captcha.grace_period_seconds == 0 {
                    return Err(Error::Config(
                        "captcha.grace_period_seconds must be > 0".to_string(),
                    ));
                }
            }
        }

        self.parse_trusted_ips()?;
        Ok(())
    }

    /// Parse the trusted list into networks; single addresses become host routes.
    pub fn parse_trusted_ips(&self) -> Result<Vec<IpNet>> {
        self.trusted_ips
            .iter()
            .map(|entry| {
                let entry = entry.trim();
                if let Ok(net) = entry.parse::<IpNet>() {
                    Ok(net.trunc())
                } else if let Ok(ip) = entry.parse::<IpAddr>() {
                    Ok(IpNet::from(ip))
                } else {
                    Err(Error::InvalidCidrPattern(entry.to_string()))
                }
            })
            .collect()
    }

    /// Generate example configuration YAML.
    pub fn example() -> String {
        r#"# k2bouncer configuration

mode: stream                   # live or stream

lapi:
  url: "http://crowdsec:8080"
  api_key: "${CROWDSEC_BOUNCER_API_KEY}"
  timeout_seconds: 10
  update_interval_seconds: 60  # stream mode pull interval
  max_update_failures: 5       # stream unhealthy after 5 failed pulls

decisions:
  live_cache_seconds: 60       # live mode lookup cache
  max_decision_seconds: 86400  # lifetime ceiling for any decision

fallback:
  store_unreachable: allow     # allow or ban
  authority_unreachable: allow # allow or ban

cache:
  backend: local               # local or redis
  redis:
    host: "redis:6379"
    password: "${REDIS_PASSWORD}"
    database: 0

captcha:
  provider: turnstile          # hcaptcha, recaptcha or turnstile
  site_key: "${CAPTCHA_SITE_KEY}"
  secret_key: "${CAPTCHA_SECRET_KEY}"
  grace_period_seconds: 1800
  remediation_header: "X-Remediation"

trusted_ips:
  - "127.0.0.1"
  - "10.0.0.0/8"
"#
        .to_string()
    }
}

/// Expand environment variables in the format ${VAR_NAME}.
fn expand_env_vars(content: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| Error::Config(e.to_string()))?;
    Ok(re
        .replace_all(content, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
lapi:
  url: "http://localhost:8080"
  api_key: "secret"
"#;

    #[test]
    fn test_defaults() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.mode, Mode::Live);
        assert_eq!(config.lapi.timeout_seconds, 10);
        assert_eq!(config.lapi.update_interval_seconds, 60);
        assert_eq!(config.lapi.max_update_failures, None);
        assert_eq!(config.decisions.live_cache_seconds, 60);
        assert_eq!(config.decisions.max_decision_seconds, 86400);
        assert_eq!(config.fallback, FallbackConfig::default());
        assert_eq!(config.fallback.store_unreachable, FailPolicy::Allow);
        assert_eq!(config.cache.backend, CacheBackend::Local);
        assert!(!config.captcha.is_enabled());
        assert_eq!(config.captcha.grace_period_seconds, 1800);
    }

    #[test]
    fn test_example_parses() {
        std::env::set_var("CROWDSEC_BOUNCER_API_KEY", "k");
        std::env::set_var("CAPTCHA_SITE_KEY", "site");
        std::env::set_var("CAPTCHA_SECRET_KEY", "secret");
        let config = Config::from_yaml(&Config::example()).unwrap();

        assert_eq!(config.mode, Mode::Stream);
        assert_eq!(config.lapi.max_update_failures, Some(5));
        assert_eq!(config.cache.redis.host, "redis:6379");
        assert_eq!(config.captcha.provider.as_deref(), Some("turnstile"));
        assert_eq!(config.parse_trusted_ips().unwrap().len(), 2);
    }

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("K2BOUNCER_TEST_KEY", "secret123");
        let result = expand_env_vars("api_key: ${K2BOUNCER_TEST_KEY}").unwrap();
        assert_eq!(result, "api_key: secret123");
        std::env::remove_var("K2BOUNCER_TEST_KEY");

        let result = expand_env_vars("api_key: ${K2BOUNCER_MISSING_VAR}").unwrap();
        assert_eq!(result, "api_key: ");
    }

    #[test]
    fn test_fallback_policies() {
        let yaml = format!(
            "{}\nfallback:\n  store_unreachable: ban\n  authority_unreachable: allow\n",
            MINIMAL
        );
        let config = Config::from_yaml(&yaml).unwrap();
        assert_eq!(config.fallback.store_unreachable.remediation(), Remediation::Ban);
        assert_eq!(config.fallback.authority_unreachable.remediation(), Remediation::Allow);
        assert_eq!(FallbackConfig::strict().authority_unreachable, FailPolicy::Ban);
    }

    #[test]
    fn test_validate_rejects_missing_key() {
        let mut config = Config::new("http://localhost:8080", "");
        assert!(config.validate().is_err());
        config.lapi.api_key = "k".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_captcha() {
        let mut config = Config::new("http://localhost:8080", "k");
        config.captcha.provider = Some("geetest".to_string());
        assert!(config.validate().is_ok());
        assert!(!config.captcha.is_enabled());

        config.captcha.provider = Some("hcaptcha".to_string());
        assert!(config.validate().is_err()); // keys missing

        config.captcha.site_key = "site".to_string();
        config.captcha.secret_key = "secret".to_string();
        assert!(config.validate().is_ok());
        assert!(config.captcha.is_enabled());
    }

    #[test]
    fn test_validate_rejects_unbounded_ttls() {
        let mut config = Config::new("http://localhost:8080", "k");
        config.decisions.live_cache_seconds = MAX_TTL_SECONDS;
        assert!(config.validate().is_ok());

        config.decisions.live_cache_seconds = u64::MAX;
        assert!(config.validate().is_err());

        config.decisions.live_cache_seconds = 60;
        config.decisions.max_decision_seconds = MAX_TTL_SECONDS + 1;
        assert!(config.validate().is_err());

        config.decisions.max_decision_seconds = 86400;
        config.captcha.grace_period_seconds = u64::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_trusted_ips() {
        let mut config = Config::new("http://localhost:8080", "k");
        config.trusted_ips = vec!["10.0.0.0/8".to_string(), "::1".to_string()];
        let nets = config.parse_trusted_ips().unwrap();
        assert_eq!(nets[1].prefix_len(), 128);

        config.trusted_ips.push("not-an-ip".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}mode: stream\n", MINIMAL).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.mode, Mode::Stream);
        assert_eq!(config.lapi.update_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(Config::load(Path::new("/nonexistent/k2bouncer.yaml")).is_err());
    }
}
