//! Server-side verification of captcha tokens.

use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use std::time::Duration;

use crate::error::{ProviderError, Result};

/// Verification verdict returned by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VerifyResponse {
    pub success: bool,
    /// Site the token was issued for, when the provider reports it.
    #[serde(default)]
    pub hostname: Option<String>,
}

/// Posts `{secret, response}` to a provider verification endpoint.
pub trait CaptchaVerifier: Send + Sync {
    /// Returns `Ok(None)` when the provider answered with something other
    /// than JSON.
    fn verify(
        &self,
        endpoint: &str,
        secret: &str,
        response: &str,
    ) -> std::result::Result<Option<VerifyResponse>, ProviderError>;
}

/// Blocking HTTP verifier with a bounded timeout.
pub struct HttpVerifier {
    client: Client,
}

impl HttpVerifier {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("k2bouncer/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

impl CaptchaVerifier for HttpVerifier {
    fn verify(
        &self,
        endpoint: &str,
        secret: &str,
        response: &str,
    ) -> std::result::Result<Option<VerifyResponse>, ProviderError> {
        let res = self
            .client
            .post(endpoint)
            .form(&[("secret", secret), ("response", response)])
            .send()?;

        let is_json = res
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("application/json"));
        if !is_json {
            log::debug!("captcha:verify responseType:noJson status:{}", res.status());
            return Ok(None);
        }

        let body = res.bytes()?;
        Ok(Some(serde_json::from_slice(&body)?))
    }
}
