//! Captcha challenge flow.
//!
//! A visitor under a `captcha` remediation is served a challenge page. The
//! submitted token is verified against the configured provider and, on
//! success, a session bound to the exact (address, host) pair is cached for
//! the grace period. Sessions never carry over to another host or address.

mod provider;
mod verifier;

pub use provider::{provider_info, ProviderInfo, HCAPTCHA, RECAPTCHA, TURNSTILE};
pub use verifier::{CaptchaVerifier, HttpVerifier, VerifyResponse};

use std::sync::Arc;
use std::time::Duration;

use crate::config::CaptchaConfig;
use crate::error::{ProviderError, Result};
use crate::remediation::CAPTCHA_DONE_VALUE;
use crate::store::CacheClient;

const DEFAULT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>Verification required</title>
  <script src="{{FrontendJS}}" async defer></script>
</head>
<body>
  <form method="POST">
    <p>Please complete the challenge to continue.</p>
    <div class="{{FrontendKey}}" data-sitekey="{{SiteKey}}" data-callback="captchaCallback"></div>
  </form>
  <script>function captchaCallback() { document.forms[0].submit(); }</script>
</body>
</html>
"#;

/// The parts of an incoming request the challenge flow needs.
#[derive(Debug, Clone, Default)]
pub struct ChallengeRequest {
    pub method: String,
    /// `Host` header, port included if present
    pub host: String,
    /// Original request URI, used as the redirect target
    pub uri: String,
    /// `application/x-www-form-urlencoded` body
    pub body: String,
}

impl ChallengeRequest {
    pub fn get(host: &str, uri: &str) -> Self {
        Self {
            method: "GET".to_string(),
            host: host.to_string(),
            uri: uri.to_string(),
            body: String::new(),
        }
    }

    pub fn post_form(host: &str, uri: &str, fields: &[(&str, &str)]) -> Self {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields)
            .finish();
        Self {
            method: "POST".to_string(),
            host: host.to_string(),
            uri: uri.to_string(),
            body,
        }
    }

    /// First value of a form field.
    pub fn form_value(&self, name: &str) -> Option<String> {
        url::form_urlencoded::parse(self.body.as_bytes())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }
}

/// HTTP response produced by the challenge flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl ChallengeResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Host without a `:port` suffix, lowercased.
fn bare_host(host: &str) -> String {
    let host = host.trim();
    let bare = if let Some(rest) = host.strip_prefix('[') {
        rest.split(']').next().unwrap_or(rest)
    } else {
        match host.rsplit_once(':') {
            Some((name, port)) if !name.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => name,
            _ => host,
        }
    };
    bare.to_ascii_lowercase()
}

/// Captcha client shared by all request handlers.
pub struct CaptchaClient {
    provider: Option<&'static ProviderInfo>,
    site_key: String,
    secret_key: String,
    remediation_header: Option<String>,
    grace_period: Duration,
    template: String,
    cache: CacheClient,
    verifier: Arc<dyn CaptchaVerifier>,
}

impl CaptchaClient {
    /// Build from configuration with an HTTP verifier.
    pub fn new(config: &CaptchaConfig, cache: CacheClient) -> Result<Self> {
        let verifier = Arc::new(HttpVerifier::new(config.timeout())?);
        Self::with_verifier(config, cache, verifier)
    }

    /// Build with a custom verifier.
    ///
    /// An unset or unknown provider yields a disabled client.
    pub fn with_verifier(
        config: &CaptchaConfig,
        cache: CacheClient,
        verifier: Arc<dyn CaptchaVerifier>,
    ) -> Result<Self> {
        let provider = match config.provider.as_deref().filter(|p| !p.is_empty()) {
            Some(name) => {
                let info = provider_info(name);
                if info.is_none() {
                    log::warn!("captcha:new unknown provider {}, captcha disabled", name);
                }
                info
            }
            None => None,
        };

        let template = match (&config.template_path, provider) {
            (Some(path), Some(_)) => std::fs::read_to_string(path)?,
            _ => DEFAULT_TEMPLATE.to_string(),
        };

        log::debug!(
            "captcha:new provider:{}",
            provider.map(|p| p.name).unwrap_or("disabled")
        );

        Ok(Self {
            provider,
            site_key: config.site_key.clone(),
            secret_key: config.secret_key.clone(),
            remediation_header: config.remediation_header.clone().filter(|h| !h.is_empty()),
            grace_period: config.grace_period(),
            template,
            cache,
            verifier,
        })
    }

    /// A client that never challenges.
    pub fn disabled(cache: CacheClient) -> Self {
        Self {
            provider: None,
            site_key: String::new(),
            secret_key: String::new(),
            remediation_header: None,
            grace_period: Duration::ZERO,
            template: DEFAULT_TEMPLATE.to_string(),
            cache,
            verifier: Arc::new(NoopVerifier),
        }
    }

    /// Whether a provider is configured. A disabled client never challenges.
    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }

    pub fn provider(&self) -> Option<&'static ProviderInfo> {
        self.provider
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Cache key of the session for one (address, host) pair.
    pub fn cache_key(remote_ip: &str, hostname: &str) -> String {
        format!("{}_{}_captcha", remote_ip, hostname)
    }

    /// Whether a passed, unexpired session exists for exactly this pair.
    pub fn check(&self, remote_ip: &str, hostname: &str) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let passed = self
            .cache
            .get(&Self::cache_key(remote_ip, hostname))
            .is_ok_and(|v| v == CAPTCHA_DONE_VALUE);
        log::debug!(
            "captcha:check ip:{} host:{} pass:{}",
            remote_ip,
            hostname,
            passed
        );
        passed
    }

    /// Record a passed challenge for the grace period.
    pub fn mark_passed(&self, remote_ip: &str, hostname: &str) {
        self.cache.set(
            &Self::cache_key(remote_ip, hostname),
            CAPTCHA_DONE_VALUE,
            self.grace_period,
        );
    }

    /// Verify a challenge submission with the provider.
    ///
    /// Only POST requests carrying the provider's response field are
    /// verified; everything else is simply not passed. A provider reply
    /// that is not JSON is treated as not passed. A reported hostname that
    /// differs from the request host fails the check even on success.
    pub fn validate(&self, req: &ChallengeRequest) -> std::result::Result<bool, ProviderError> {
        let Some(provider) = self.provider else {
            return Ok(false);
        };
        if !req.method.eq_ignore_ascii_case("POST") {
            log::debug!("captcha:validate invalid method: {}", req.method);
            return Ok(false);
        }
        let token = match req.form_value(&provider.response_field()) {
            Some(token) if !token.is_empty() => token,
            _ => {
                log::debug!("captcha:validate no captcha response found in request");
                return Ok(false);
            }
        };

        let Some(reply) = self
            .verifier
            .verify(provider.verify_url, &self.secret_key, &token)?
        else {
            return Ok(false);
        };

        if let Some(hostname) = reply.hostname.as_deref().filter(|h| !h.is_empty()) {
            let expected = bare_host(&req.host);
            if bare_host(hostname) != expected {
                log::warn!(
                    "captcha:validate hostname mismatch token:{} request:{}",
                    hostname,
                    expected
                );
                return Ok(false);
            }
        }

        log::debug!("captcha:validate success:{}", reply.success);
        Ok(reply.success)
    }

    /// Handle a request under a captcha remediation.
    ///
    /// Redirects to the original URI on a verified submission, answers `400`
    /// with an empty body when the provider call fails, and otherwise
    /// serves the challenge page.
    pub fn serve_challenge(&self, remote_ip: &str, req: &ChallengeRequest) -> ChallengeResponse {
        match self.validate(req) {
            Err(e) => {
                log::info!("captcha:serve validate {}", e);
                return ChallengeResponse {
                    status: 400,
                    headers: Vec::new(),
                    body: String::new(),
                };
            }
            Ok(true) => {
                log::debug!("captcha:serve captcha:valid ip:{} host:{}", remote_ip, req.host);
                self.mark_passed(remote_ip, &req.host);
                let location = if req.uri.is_empty() { "/" } else { req.uri.as_str() };
                return ChallengeResponse {
                    status: 302,
                    headers: vec![("Location".to_string(), location.to_string())],
                    body: String::new(),
                };
            }
            Ok(false) => {}
        }

        let mut headers = vec![(
            "Content-Type".to_string(),
            "text/html; charset=utf-8".to_string(),
        )];
        if let Some(name) = &self.remediation_header {
            headers.push((name.clone(), "captcha".to_string()));
        }
        ChallengeResponse {
            status: 200,
            headers,
            body: self.render_page(),
        }
    }

    /// Challenge page with provider script and site key filled in.
    pub fn render_page(&self) -> String {
        let (js, key) = self
            .provider
            .map(|p| (p.script_url, p.field_prefix))
            .unwrap_or_default();
        self.template
            .replace("{{SiteKey}}", &self.site_key)
            .replace("{{FrontendJS}}", js)
            .replace("{{FrontendKey}}", key)
    }
}

struct NoopVerifier;

impl CaptchaVerifier for NoopVerifier {
    fn verify(
        &self,
        _endpoint: &str,
        _secret: &str,
        _response: &str,
    ) -> std::result::Result<Option<VerifyResponse>, ProviderError> {
        Ok(None)
    }
}
