//! Remediation verdicts and their compact cache encoding.

use std::fmt;

/// Cache value for an address under a ban.
pub const BANNED_VALUE: &str = "t";
/// Cache value for an address known to have no decision (live mode).
pub const NOT_BANNED_VALUE: &str = "f";
/// Cache value for an address that must solve a captcha.
pub const CAPTCHA_VALUE: &str = "c";
/// Cache value for a passed captcha session.
pub const CAPTCHA_DONE_VALUE: &str = "d";

/// Kind of a decision issued by the remote authority.
///
/// Ordered by severity: `Ban` outranks `Captcha`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DecisionKind {
    Captcha,
    Ban,
}

impl DecisionKind {
    /// Parse a wire decision type (case-insensitive).
    ///
    /// Returns `None` for types this bouncer does not enforce.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "ban" => Some(DecisionKind::Ban),
            "captcha" => Some(DecisionKind::Captcha),
            _ => None,
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionKind::Ban => "ban",
            DecisionKind::Captcha => "captcha",
        }
    }

    /// Value written to the decision store for this kind.
    pub fn cache_value(&self) -> &'static str {
        match self {
            DecisionKind::Ban => BANNED_VALUE,
            DecisionKind::Captcha => CAPTCHA_VALUE,
        }
    }
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal verdict for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Remediation {
    /// Let the request through
    #[default]
    Allow,
    /// Block the request
    Ban,
    /// Serve a captcha challenge
    Captcha,
}

impl Remediation {
    /// Decode a decision store value.
    ///
    /// Returns `None` for values that do not encode a verdict
    /// (including [`CAPTCHA_DONE_VALUE`], which lives under its own key).
    pub fn from_cache_value(value: &str) -> Option<Self> {
        match value {
            BANNED_VALUE => Some(Remediation::Ban),
            CAPTCHA_VALUE => Some(Remediation::Captcha),
            NOT_BANNED_VALUE => Some(Remediation::Allow),
            _ => None,
        }
    }

    /// Encode for the decision store.
    pub fn cache_value(&self) -> &'static str {
        match self {
            Remediation::Allow => NOT_BANNED_VALUE,
            Remediation::Ban => BANNED_VALUE,
            Remediation::Captcha => CAPTCHA_VALUE,
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Remediation::Allow => "allow",
            Remediation::Ban => "ban",
            Remediation::Captcha => "captcha",
        }
    }
}

impl From<DecisionKind> for Remediation {
    fn from(kind: DecisionKind) -> Self {
        match kind {
            DecisionKind::Ban => Remediation::Ban,
            DecisionKind::Captcha => Remediation::Captcha,
        }
    }
}

impl fmt::Display for Remediation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
