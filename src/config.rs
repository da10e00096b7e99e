//! Session configuration parsed from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::query::RetryPolicy;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:4000";
pub const DEFAULT_APP: &str = "webapp";
pub const DEFAULT_STORE_DIR: &str = ".session";
pub const DEFAULT_REFRESH_LEAD_SECS: u64 = 120;
pub const DEFAULT_FETCH_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BASE_MS: u64 = 1000;
pub const DEFAULT_RETRY_MAX_MS: u64 = 30_000;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub api_url: String,
    pub app: String,
    pub cookie: Option<String>,
    pub store_dir: PathBuf,
    pub refresh_lead: Duration,
    pub retry: RetryPolicy,
    pub timeouts: HttpTimeouts,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_owned(),
            app: DEFAULT_APP.to_owned(),
            cookie: None,
            store_dir: PathBuf::from(DEFAULT_STORE_DIR),
            refresh_lead: Duration::from_secs(DEFAULT_REFRESH_LEAD_SECS),
            retry: RetryPolicy::default(),
            timeouts: HttpTimeouts {
                request_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
                connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            },
        }
    }
}

impl SessionConfig {
    /// Build typed session config from environment variables.
    ///
    /// All optional:
    /// - `SESSION_API_URL`: identity API base URL (default `http://127.0.0.1:4000`)
    /// - `SESSION_APP`: value of the `app` request header (default `webapp`)
    /// - `SESSION_COOKIE`: `Cookie` header sent with the user request
    /// - `SESSION_STORE_DIR`: snapshot directory (default `.session`)
    /// - `SESSION_REFRESH_LEAD_SECS`: refresh this long before expiry (default 120)
    /// - `SESSION_FETCH_RETRIES`: retries after a failed fetch (default 3)
    /// - `SESSION_RETRY_BASE_MS` / `SESSION_RETRY_MAX_MS`: back-off base and cap
    /// - `SESSION_REQUEST_TIMEOUT_SECS` / `SESSION_CONNECT_TIMEOUT_SECS`
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_url = std::env::var("SESSION_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_owned());
        let api_url = parse_api_url(&api_url)?;
        let app = std::env::var("SESSION_APP")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_APP.to_owned());
        let cookie = std::env::var("SESSION_COOKIE").ok().filter(|v| !v.is_empty());
        let store_dir = std::env::var("SESSION_STORE_DIR").map_or_else(|_| PathBuf::from(DEFAULT_STORE_DIR), PathBuf::from);

        let retry = RetryPolicy {
            retries: env_parse("SESSION_FETCH_RETRIES", DEFAULT_FETCH_RETRIES),
            base: Duration::from_millis(env_parse("SESSION_RETRY_BASE_MS", DEFAULT_RETRY_BASE_MS)),
            max: Duration::from_millis(env_parse("SESSION_RETRY_MAX_MS", DEFAULT_RETRY_MAX_MS)),
        };
        let timeouts = HttpTimeouts {
            request_secs: env_parse("SESSION_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_secs: env_parse("SESSION_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS),
        };

        Ok(Self {
            api_url,
            app,
            cookie,
            store_dir,
            refresh_lead: Duration::from_secs(env_parse("SESSION_REFRESH_LEAD_SECS", DEFAULT_REFRESH_LEAD_SECS)),
            retry,
            timeouts,
        })
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Accept `http(s)://host[:port][/prefix]`, normalised without a trailing slash.
pub fn parse_api_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let rest = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .ok_or_else(|| ConfigError::Invalid {
            var: "SESSION_API_URL",
            reason: format!("expected http:// or https:// URL, got {raw:?}"),
        })?;
    if rest.is_empty() || rest.starts_with('/') {
        return Err(ConfigError::Invalid { var: "SESSION_API_URL", reason: format!("missing host in {raw:?}") });
    }
    Ok(trimmed.to_owned())
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
