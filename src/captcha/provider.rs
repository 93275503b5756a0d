//! Static captcha provider table.

use ahash::AHashMap;
use once_cell::sync::Lazy;

pub const HCAPTCHA: &str = "hcaptcha";
pub const RECAPTCHA: &str = "recaptcha";
pub const TURNSTILE: &str = "turnstile";

/// Endpoints and form naming for one captcha provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInfo {
    pub name: &'static str,
    /// Client-side script embedded in the challenge page
    pub script_url: &'static str,
    /// CSS class of the widget; the response field is `<prefix>-response`
    pub field_prefix: &'static str,
    /// Server-side verification endpoint
    pub verify_url: &'static str,
}

impl ProviderInfo {
    /// Form field carrying the visitor's token.
    pub fn response_field(&self) -> String {
        format!("{}-response", self.field_prefix)
    }
}

static PROVIDERS: Lazy<AHashMap<&'static str, ProviderInfo>> = Lazy::new(|| {
    [
        ProviderInfo {
            name: HCAPTCHA,
            script_url: "https://hcaptcha.com/1/api.js",
            field_prefix: "h-captcha",
            verify_url: "https://api.hcaptcha.com/siteverify",
        },
        ProviderInfo {
            name: RECAPTCHA,
            script_url: "https://www.google.com/recaptcha/api.js",
            field_prefix: "g-recaptcha",
            verify_url: "https://www.google.com/recaptcha/api/siteverify",
        },
        ProviderInfo {
            name: TURNSTILE,
            script_url: "https://challenges.cloudflare.com/turnstile/v0/api.js",
            field_prefix: "cf-turnstile",
            verify_url: "https://challenges.cloudflare.com/turnstile/v0/siteverify",
        },
    ]
    .into_iter()
    .map(|p| (p.name, p))
    .collect()
});

/// Look up a provider by identifier (case-insensitive).
pub fn provider_info(name: &str) -> Option<&'static ProviderInfo> {
    PROVIDERS.get(name.trim().to_lowercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_providers() {
        let h = provider_info("hcaptcha").unwrap();
        assert_eq!(h.response_field(), "h-captcha-response");
        assert_eq!(h.verify_url, "https://api.hcaptcha.com/siteverify");

        assert_eq!(provider_info("reCAPTCHA").unwrap().field_prefix, "g-recaptcha");
        assert_eq!(
            provider_info("turnstile").unwrap().response_field(),
            "cf-turnstile-response"
        );
    }

    #[test]
    fn test_unknown_provider() {
        assert!(provider_info("").is_none());
        assert!(provider_info("geetest").is_none());
    }
}
