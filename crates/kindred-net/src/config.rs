//! Channel configuration loaded from environment variables.
//!
//! Every setting has a default so the client starts with zero configuration
//! against the development broker.

use std::time::Duration;

use kindred_shared::constants::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_HEARTBEAT_MS, DEV_WS_URL, PROD_WS_URL,
};

use crate::frame::Heartbeat;
use crate::retry::RetryPolicy;
use crate::session::SessionConfig;

/// Build environment, selecting the default broker endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            Environment::Development => DEV_WS_URL,
            Environment::Production => PROD_WS_URL,
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(Environment::Development),
            "production" | "prod" => Some(Environment::Production),
            _ => None,
        }
    }
}

/// Messaging channel configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Build environment.
    /// Env: `KINDRED_ENV` (`development` / `production`)
    /// Default: `development`
    pub environment: Environment,

    /// Broker endpoint (`http(s)://` or `ws(s)://`).
    /// Env: `KINDRED_WS_URL`
    /// Default: the environment's endpoint.
    pub endpoint: String,

    /// Whether `endpoint` is a SockJS endpoint (dial `{endpoint}/websocket`).
    /// Env: `KINDRED_SOCKJS` (true/false)
    /// Default: `true`
    pub sockjs: bool,

    /// Upper bound for transport connect + STOMP handshake.
    /// Env: `KINDRED_CONNECT_TIMEOUT_MS`
    /// Default: `10000`
    pub connect_timeout: Duration,

    /// Heart-beat offered in both directions, in milliseconds (0 disables).
    /// Env: `KINDRED_HEARTBEAT_MS`
    /// Default: `10000`
    pub heartbeat: Heartbeat,

    /// Optional STOMP `host` header.
    /// Env: `KINDRED_STOMP_HOST`
    pub host: Option<String>,

    /// Connect retry schedule. Off unless configured.
    /// Env: `KINDRED_RETRY_ATTEMPTS`, `KINDRED_RETRY_BACKOFF_MS`
    pub retry: RetryPolicy,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::for_environment(Environment::Development)
    }
}

impl ChannelConfig {
    pub fn for_environment(environment: Environment) -> Self {
        Self {
            environment,
            endpoint: environment.default_endpoint().to_string(),
            sockjs: true,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            heartbeat: Heartbeat::new(DEFAULT_HEARTBEAT_MS, DEFAULT_HEARTBEAT_MS),
            host: None,
            retry: RetryPolicy::none(),
        }
    }

    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = match lookup("KINDRED_ENV") {
            Some(raw) => Environment::parse(&raw).unwrap_or_else(|| {
                tracing::warn!(value = %raw, "Invalid KINDRED_ENV, using development");
                Environment::Development
            }),
            None => Environment::Development,
        };
        let mut config = Self::for_environment(environment);

        if let Some(url) = lookup("KINDRED_WS_URL") {
            if !url.trim().is_empty() {
                config.endpoint = url.trim().to_string();
            }
        }

        if let Some(val) = lookup("KINDRED_SOCKJS") {
            config.sockjs = val != "false" && val != "0";
        }

        if let Some(val) = lookup("KINDRED_CONNECT_TIMEOUT_MS") {
            match val.parse::<u64>() {
                Ok(ms) if ms > 0 => config.connect_timeout = Duration::from_millis(ms),
                _ => tracing::warn!(value = %val, "Invalid KINDRED_CONNECT_TIMEOUT_MS, using default"),
            }
        }

        if let Some(val) = lookup("KINDRED_HEARTBEAT_MS") {
            match val.parse::<u64>() {
                Ok(ms) => config.heartbeat = Heartbeat::new(ms, ms),
                Err(_) => tracing::warn!(value = %val, "Invalid KINDRED_HEARTBEAT_MS, using default"),
            }
        }

        if let Some(host) = lookup("KINDRED_STOMP_HOST") {
            if !host.is_empty() {
                config.host = Some(host);
            }
        }

        if let Some(val) = lookup("KINDRED_RETRY_ATTEMPTS") {
            match val.parse::<u32>() {
                Ok(attempts) => {
                    let backoff = lookup("KINDRED_RETRY_BACKOFF_MS")
                        .and_then(|v| v.parse::<u64>().ok())
                        .unwrap_or(1_000);
                    config.retry =
                        RetryPolicy::exponential(attempts, Duration::from_millis(backoff));
                }
                Err(_) => tracing::warn!(value = %val, "Invalid KINDRED_RETRY_ATTEMPTS, retry disabled"),
            }
        }

        config
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            connect_timeout: self.connect_timeout,
            heartbeat: self.heartbeat,
            host: self.host.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ChannelConfig::default();
        assert_eq!(config.endpoint, "http://192.168.1.105:8080/ws");
        assert!(config.sockjs);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.heartbeat, Heartbeat::new(10_000, 10_000));
        assert!(!config.retry.is_enabled());
    }

    #[test]
    fn test_production_environment() {
        let config = ChannelConfig::from_lookup(lookup_from(&[("KINDRED_ENV", "production")]));
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.endpoint, "wss://your-production-domain.com/ws");
    }

    #[test]
    fn test_overrides() {
        let config = ChannelConfig::from_lookup(lookup_from(&[
            ("KINDRED_WS_URL", "ws://localhost:61614/stomp"),
            ("KINDRED_SOCKJS", "false"),
            ("KINDRED_CONNECT_TIMEOUT_MS", "2500"),
            ("KINDRED_HEARTBEAT_MS", "0"),
            ("KINDRED_STOMP_HOST", "/"),
            ("KINDRED_RETRY_ATTEMPTS", "4"),
            ("KINDRED_RETRY_BACKOFF_MS", "200"),
        ]));
        assert_eq!(config.endpoint, "ws://localhost:61614/stomp");
        assert!(!config.sockjs);
        assert_eq!(config.connect_timeout, Duration::from_millis(2500));
        assert_eq!(config.heartbeat, Heartbeat::new(0, 0));
        assert_eq!(config.host.as_deref(), Some("/"));
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.backoff_for(1), Some(Duration::from_millis(200)));
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = ChannelConfig::from_lookup(lookup_from(&[
            ("KINDRED_ENV", "staging"),
            ("KINDRED_CONNECT_TIMEOUT_MS", "soon"),
            ("KINDRED_RETRY_ATTEMPTS", "many"),
        ]));
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert!(!config.retry.is_enabled());
    }
}
