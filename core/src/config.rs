//! Client configuration.
//!
//! # Design
//! `ClientConfig` is plain data: serde-deserializable with per-field
//! defaults, so it can be embedded in an application's own config file, and
//! loadable from `COUCHDB_*` environment variables. It is fixed once a client
//! is built; only the response cache is swappable (see `dispatch`).

use std::fmt;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::CouchError;

pub const DEFAULT_PROTOCOL: &str = "http";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5984;
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Basic-auth credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub user: String,
    pub pass: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, pass: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            pass: pass.into(),
        }
    }

    /// Value for the `Authorization` header.
    pub fn authorization(&self) -> String {
        format!("Basic {}", STANDARD.encode(format!("{}:{}", self.user, self.pass)))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("pass", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    /// Per-request deadline in milliseconds.
    pub timeout_ms: u64,
    pub auth: Option<Credentials>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            protocol: DEFAULT_PROTOCOL.to_string(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            auth: None,
        }
    }
}

impl ClientConfig {
    /// `protocol://host:port`, without a trailing slash.
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn with_auth(mut self, user: impl Into<String>, pass: impl Into<String>) -> Self {
        self.auth = Some(Credentials::new(user, pass));
        self
    }

    /// Load from `COUCHDB_PROTOCOL`, `COUCHDB_HOST`, `COUCHDB_PORT`,
    /// `COUCHDB_TIMEOUT_MS`, `COUCHDB_USER` and `COUCHDB_PASSWORD`.
    pub fn from_env() -> Result<Self, CouchError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    /// Unset or blank values keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CouchError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = ClientConfig::default();

        if let Some(protocol) = get("COUCHDB_PROTOCOL") {
            config.protocol = protocol;
        }
        if let Some(host) = get("COUCHDB_HOST") {
            config.host = host;
        }
        if let Some(port) = get("COUCHDB_PORT") {
            config.port = port
                .parse()
                .map_err(|_| CouchError::Config(format!("COUCHDB_PORT is not a valid port: {port}")))?;
        }
        if let Some(timeout) = get("COUCHDB_TIMEOUT_MS") {
            config.timeout_ms = timeout
                .parse()
                .map_err(|_| CouchError::Config(format!("COUCHDB_TIMEOUT_MS is not a number: {timeout}")))?;
        }
        if let Some(user) = get("COUCHDB_USER") {
            config.auth = Some(Credentials::new(user, get("COUCHDB_PASSWORD").unwrap_or_default()));
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn default_base_url() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url(), "http://127.0.0.1:5984");
        assert_eq!(config.timeout(), Duration::from_millis(5000));
        assert!(config.auth.is_none());
    }

    #[test]
    fn authorization_header_is_basic_base64() {
        let creds = Credentials::new("admin", "secret");
        assert_eq!(creds.authorization(), "Basic YWRtaW46c2VjcmV0");
    }

    #[test]
    fn debug_redacts_password() {
        let creds = Credentials::new("admin", "secret");
        let out = format!("{creds:?}");
        assert!(out.contains("admin"));
        assert!(!out.contains("secret"));
    }

    #[test]
    fn deserializes_partial_config() {
        let config: ClientConfig = serde_json::from_str(r#"{"host":"db.local","auth":{"user":"u","pass":"p"}}"#).unwrap();
        assert_eq!(config.base_url(), "http://db.local:5984");
        assert_eq!(config.auth, Some(Credentials::new("u", "p")));
    }

    #[test]
    fn env_overrides_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("COUCHDB_PROTOCOL", "https"),
            ("COUCHDB_HOST", "couch.example"),
            ("COUCHDB_PORT", "6984"),
            ("COUCHDB_TIMEOUT_MS", "250"),
            ("COUCHDB_USER", "admin"),
            ("COUCHDB_PASSWORD", "pw"),
        ]))
        .unwrap();
        assert_eq!(config.base_url(), "https://couch.example:6984");
        assert_eq!(config.timeout_ms, 250);
        assert_eq!(config.auth, Some(Credentials::new("admin", "pw")));
    }

    #[test]
    fn blank_env_values_keep_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[("COUCHDB_HOST", "  "), ("COUCHDB_PORT", "")])).unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[rstest]
    #[case("COUCHDB_PORT", "70000")]
    #[case("COUCHDB_PORT", "http")]
    #[case("COUCHDB_TIMEOUT_MS", "-1")]
    fn rejects_unparsable_numbers(#[case] name: &str, #[case] value: &str) {
        let err = ClientConfig::from_lookup(lookup(&[(name, value)])).unwrap_err();
        assert!(matches!(err, CouchError::Config(msg) if msg.contains(name)));
    }
}
