//! HTTP client for the remote decision authority (CrowdSec LAPI protocol).

use std::net::IpAddr;

use super::DecisionSource;
use crate::config::LapiConfig;
use crate::decision::{DecisionDelta, DecisionRecord};
use crate::error::SyncError;

/// Blocking LAPI client.
///
/// Every call is bounded by the configured timeout.
pub struct LapiClient {
    agent: ureq::Agent,
    base_url: String,
    api_key: String,
}

impl LapiClient {
    pub fn new(config: &LapiConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(config.timeout())
            .user_agent(concat!("k2bouncer/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            agent,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }

    fn decisions_url(&self) -> String {
        format!("{}/v1/decisions", self.base_url)
    }

    fn stream_url(&self) -> String {
        format!("{}/v1/decisions/stream", self.base_url)
    }

    fn get(&self, url: &str, query: (&str, &str)) -> Result<String, SyncError> {
        let response = self
            .agent
            .get(url)
            .set("X-Api-Key", &self.api_key)
            .set("Accept", "application/json")
            .query(query.0, query.1)
            .call()
            .map_err(|e| match e {
                ureq::Error::Status(code, _) => SyncError::Status(code),
                ureq::Error::Transport(t) => SyncError::Transport(t.to_string()),
            })?;

        response
            .into_string()
            .map_err(|e| SyncError::Transport(format!("failed to read response: {}", e)))
    }
}

/// Live lookups answer `null` when nothing matches.
pub(crate) fn parse_live_body(body: &str) -> Result<Vec<DecisionRecord>, SyncError> {
    serde_json::from_str::<Option<Vec<DecisionRecord>>>(body)
        .map(Option::unwrap_or_default)
        .map_err(|e| SyncError::Decode(e.to_string()))
}

pub(crate) fn parse_stream_body(body: &str) -> Result<DecisionDelta, SyncError> {
    serde_json::from_str(body).map_err(|e| SyncError::Decode(e.to_string()))
}

impl DecisionSource for LapiClient {
    fn query_ip(&self, ip: IpAddr) -> Result<Vec<DecisionRecord>, SyncError> {
        let body = self.get(&self.decisions_url(), ("ip", &ip.to_string()))?;
        parse_live_body(&body)
    }

    fn pull_stream(&self, startup: bool) -> Result<DecisionDelta, SyncError> {
        let startup = if startup { "true" } else { "false" };
        let body = self.get(&self.stream_url(), ("startup", startup))?;
        parse_stream_body(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> LapiConfig {
        LapiConfig {
            url: url.to_string(),
            api_key: "key".to_string(),
            timeout_seconds: 1,
            update_interval_seconds: 60,
            max_update_failures: None,
        }
    }

    #[test]
    fn test_urls() {
        let client = LapiClient::new(&config("http://crowdsec:8080/"));
        assert_eq!(client.decisions_url(), "http://crowdsec:8080/v1/decisions");
        assert_eq!(client.stream_url(), "http://crowdsec:8080/v1/decisions/stream");
    }

    #[test]
    fn test_parse_live_body() {
        assert!(parse_live_body("null").unwrap().is_empty());
        assert!(parse_live_body("[]").unwrap().is_empty());

        let records = parse_live_body(
            r#"[{"duration":"3h59m55s","id":1,"origin":"crowdsec","scenario":"crowdsecurity/ssh-bf","scope":"Ip","type":"ban","value":"203.0.113.5"}]"#,
        )
        .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, "203.0.113.5");

        assert!(matches!(parse_live_body("<html>"), Err(SyncError::Decode(_))));
    }

    #[test]
    fn test_parse_stream_body() {
        let delta = parse_stream_body(
            r#"{"new":[{"duration":"1h","origin":"cscli","scenario":"manual","scope":"Range","type":"captcha","value":"203.0.113.0/24"}],"deleted":[{"duration":"-2s","origin":"crowdsec","scenario":"x","scope":"Ip","type":"ban","value":"198.51.100.1"}]}"#,
        )
        .unwrap();
        assert_eq!(delta.new.len(), 1);
        assert_eq!(delta.deleted.len(), 1);
        assert_eq!(delta.deleted[0].value, "198.51.100.1");
    }

    #[test]
    fn test_unreachable_authority() {
        let client = LapiClient::new(&config("http://127.0.0.1:1"));
        assert!(matches!(
            client.pull_stream(true),
            Err(SyncError::Transport(_))
        ));
        assert!(client.query_ip("203.0.113.5".parse().unwrap()).is_err());
    }
}
