//! Decisions issued by the remote authority and their wire representation.

use ipnet::IpNet;
use serde::Deserialize;
use std::fmt;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use crate::clock::deadline;
use crate::remediation::DecisionKind;

/// What a decision targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// A single address
    Ip,
    /// An address range in CIDR notation
    Range,
    /// Any other identifier class (country, AS, ...), not enforced here
    Other(String),
}

impl Scope {
    /// Parse a wire scope (case-insensitive).
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "ip" => Scope::Ip,
            "range" => Scope::Range,
            _ => Scope::Other(s.to_string()),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Ip => write!(f, "Ip"),
            Scope::Range => write!(f, "Range"),
            Scope::Other(s) => write!(f, "{}", s),
        }
    }
}

/// A decision record as returned by the remote authority.
#[derive(Debug, Clone, Deserialize)]
pub struct DecisionRecord {
    pub scope: String,
    pub value: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub scenario: String,
    pub duration: String,
}

/// Body of a stream pull: additions and removals since the previous pull.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DecisionDelta {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub new: Vec<DecisionRecord>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub deleted: Vec<DecisionRecord>,
}

/// The authority sends `null` instead of `[]` for empty lists.
fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<DecisionRecord>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<DecisionRecord>>::deserialize(deserializer)?.unwrap_or_default())
}

/// An active, normalized decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub scope: Scope,
    /// Canonical address or network literal
    pub value: String,
    pub kind: DecisionKind,
    pub origin: String,
    pub expires_at: Instant,
}

impl Decision {
    /// Normalize a wire record.
    ///
    /// The lifetime is clamped to `ceiling`. Returns `None` for records that
    /// are already expired, carry an unknown type, an unparsable duration,
    /// or a value that does not match their scope.
    pub fn from_record(record: &DecisionRecord, now: Instant, ceiling: Duration) -> Option<Self> {
        let kind = match DecisionKind::parse(&record.kind) {
            Some(kind) => kind,
            None => {
                log::debug!("decision: skipping unsupported type {}", record.kind);
                return None;
            }
        };

        let lifetime = match parse_go_duration(&record.duration) {
            Some(secs) if secs > 0.0 => {
                Duration::try_from_secs_f64(secs).map_or(ceiling, |d| d.min(ceiling))
            }
            Some(_) => return None,
            None => {
                log::warn!(
                    "decision: invalid duration {:?} for {}",
                    record.duration,
                    record.value
                );
                return None;
            }
        };

        let scope = Scope::parse(&record.scope);
        let value = canonical_value(&scope, &record.value)?;

        Some(Self {
            scope,
            value,
            kind,
            origin: record.origin.clone(),
            expires_at: deadline(now, lifetime),
        })
    }

    /// Build a removal key from a `deleted` record, ignoring its duration.
    pub fn removal_key(record: &DecisionRecord) -> Option<(Scope, String)> {
        let scope = Scope::parse(&record.scope);
        let value = canonical_value(&scope, &record.value)?;
        Some((scope, value))
    }

    /// Time left before expiry, zero if already expired.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }

    pub fn is_active(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

fn canonical_value(scope: &Scope, value: &str) -> Option<String> {
    let value = value.trim();
    match scope {
        Scope::Ip => match value.parse::<IpAddr>() {
            Ok(ip) => Some(ip.to_canonical().to_string()),
            Err(_) => {
                log::warn!("decision: invalid address {:?}", value);
                None
            }
        },
        Scope::Range => match value.parse::<IpNet>() {
            Ok(net) => Some(net.trunc().to_string()),
            Err(_) => {
                log::warn!("decision: invalid range {:?}", value);
                None
            }
        },
        Scope::Other(_) => Some(value.to_string()),
    }
}

/// Parse a Go-style duration string (`"3h59m58.5s"`, `"-2ms"`) into signed seconds.
pub fn parse_go_duration(input: &str) -> Option<f64> {
    let s = input.trim();
    let (negative, mut rest) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    if rest == "0" {
        return Some(0.0);
    }
    if rest.is_empty() {
        return None;
    }

    let mut total = 0.0;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if num_len == 0 {
            return None;
        }
        let number: f64 = rest[..num_len].parse().ok()?;
        rest = &rest[num_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1e-9,
            "us" | "µs" | "μs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return None,
        };
        rest = &rest[unit_len..];
        total += number * scale;
    }

    Some(if negative { -total } else { total })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(scope: &str, value: &str, kind: &str, duration: &str) -> DecisionRecord {
        DecisionRecord {
            scope: scope.to_string(),
            value: value.to_string(),
            kind: kind.to_string(),
            origin: "crowdsec".to_string(),
            scenario: "crowdsecurity/http-probing".to_string(),
            duration: duration.to_string(),
        }
    }

    #[test]
    fn test_parse_go_duration() {
        assert_eq!(parse_go_duration("1h"), Some(3600.0));
        assert_eq!(parse_go_duration("3h59m58s"), Some(14398.0));
        assert_eq!(parse_go_duration("1.5s"), Some(1.5));
        assert_eq!(parse_go_duration("250ms"), Some(0.25));
        assert_eq!(parse_go_duration("-2s"), Some(-2.0));
        assert_eq!(parse_go_duration("0"), Some(0.0));
        assert_eq!(parse_go_duration(""), None);
        assert_eq!(parse_go_duration("10"), None);
        assert_eq!(parse_go_duration("5d"), None);
    }

    #[test]
    fn test_from_record_ip() {
        let now = Instant::now();
        let d = Decision::from_record(
            &record("Ip", "203.0.113.5", "ban", "1h"),
            now,
            Duration::from_secs(86400),
        )
        .unwrap();

        assert_eq!(d.scope, Scope::Ip);
        assert_eq!(d.value, "203.0.113.5");
        assert_eq!(d.kind, DecisionKind::Ban);
        assert_eq!(d.remaining(now), Duration::from_secs(3600));
        assert!(d.is_active(now));
        assert!(!d.is_active(now + Duration::from_secs(3600)));
    }

    #[test]
    fn test_from_record_clamps_lifetime() {
        let now = Instant::now();
        let d = Decision::from_record(
            &record("Ip", "203.0.113.5", "ban", "8760h"),
            now,
            Duration::from_secs(600),
        )
        .unwrap();
        assert_eq!(d.remaining(now), Duration::from_secs(600));
    }

    #[test]
    fn test_from_record_clamps_unrepresentable_lifetime() {
        let now = Instant::now();
        let ceiling = Duration::from_secs(86400);

        let overflowing = format!("{}h", "9".repeat(400));
        for duration in ["100000000000000000000000h", overflowing.as_str()] {
            let d = Decision::from_record(&record("Ip", "203.0.113.5", "ban", duration), now, ceiling)
                .unwrap();
            assert_eq!(d.remaining(now), ceiling);
        }
    }

    #[test]
    fn test_from_record_canonicalizes() {
        let now = Instant::now();
        let ceiling = Duration::from_secs(86400);

        let v6 = Decision::from_record(&record("ip", "2001:DB8:0::1", "ban", "1h"), now, ceiling)
            .unwrap();
        assert_eq!(v6.value, "2001:db8::1");

        let range = Decision::from_record(
            &record("Range", "203.0.113.77/24", "captcha", "1h"),
            now,
            ceiling,
        )
        .unwrap();
        assert_eq!(range.scope, Scope::Range);
        assert_eq!(range.value, "203.0.113.0/24");
        assert_eq!(range.kind, DecisionKind::Captcha);
    }

    #[test]
    fn test_from_record_rejects() {
        let now = Instant::now();
        let ceiling = Duration::from_secs(86400);

        assert!(Decision::from_record(&record("Ip", "1.2.3.4", "throttle", "1h"), now, ceiling).is_none());
        assert!(Decision::from_record(&record("Ip", "1.2.3.4", "ban", "-5s"), now, ceiling).is_none());
        assert!(Decision::from_record(&record("Ip", "not-an-ip", "ban", "1h"), now, ceiling).is_none());
        assert!(Decision::from_record(&record("Range", "1.2.3.4", "ban", "1h"), now, ceiling).is_none());
    }

    #[test]
    fn test_delta_null_lists() {
        let delta: DecisionDelta = serde_json::from_str(r#"{"new": null, "deleted": null}"#).unwrap();
        assert!(delta.new.is_empty());
        assert!(delta.deleted.is_empty());

        let delta: DecisionDelta = serde_json::from_str(
            r#"{"new": [{"scope":"Ip","value":"1.2.3.4","type":"ban","origin":"cscli","scenario":"manual","duration":"4h"}]}"#,
        )
        .unwrap();
        assert_eq!(delta.new.len(), 1);
        assert_eq!(delta.new[0].kind, "ban");
        assert!(delta.deleted.is_empty());
    }
}
