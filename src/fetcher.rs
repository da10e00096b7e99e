//! Remote user fetcher — the identity endpoint seam.
//!
//! DESIGN
//! ======
//! `UserFetcher` is the only way the session accessor reaches the network, so
//! tests substitute a scripted fetcher and production wires in
//! `HttpUserFetcher`. Pure parsing lives in `parse_user` for testability.
//!
//! ERROR HANDLING
//! ==============
//! `FetchError` carries display strings instead of source errors so one
//! failed fetch can be cloned to every caller sharing a de-duplicated
//! request. Retry policy is not decided here; see `query::RetryPolicy`.

use std::time::Duration;

use tracing::debug;

use crate::config::SessionConfig;
use crate::user::User;

const ME_PATH: &str = "/v1/users/me";
const APP_HEADER: &str = "app";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The underlying HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),

    /// The request never produced a response (DNS, connect, timeout).
    #[error("user request failed: {0}")]
    Request(String),

    /// The endpoint answered with a non-success status.
    #[error("user endpoint returned status {status}")]
    Status { status: u16, body: String },

    /// The response body is not a user payload.
    #[error("user payload decode failed: {0}")]
    Decode(String),
}

/// Fetch the current visitor from the identity endpoint.
#[async_trait::async_trait]
pub trait UserFetcher: Send + Sync {
    async fn fetch(&self, app: &str) -> Result<User, FetchError>;
}

// =============================================================================
// HTTP FETCHER
// =============================================================================

/// `reqwest`-backed fetcher for `GET {api_url}/v1/users/me`.
pub struct HttpUserFetcher {
    http: reqwest::Client,
    url: String,
    cookie: Option<String>,
}

impl HttpUserFetcher {
    /// Build a fetcher for `api_url` with the given timeouts.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build.
    pub fn new(
        api_url: &str,
        cookie: Option<String>,
        request_timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| FetchError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, url: me_url(api_url), cookie })
    }

    /// Build a fetcher from a parsed session config.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build.
    pub fn from_config(config: &SessionConfig) -> Result<Self, FetchError> {
        Self::new(
            &config.api_url,
            config.cookie.clone(),
            Duration::from_secs(config.timeouts.request_secs),
            Duration::from_secs(config.timeouts.connect_secs),
        )
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl UserFetcher for HttpUserFetcher {
    async fn fetch(&self, app: &str) -> Result<User, FetchError> {
        let mut request = self.http.get(&self.url).header(APP_HEADER, app);
        if let Some(cookie) = &self.cookie {
            request = request.header(reqwest::header::COOKIE, cookie);
        }

        let response = request.send().await.map_err(|e| FetchError::Request(e.to_string()))?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| FetchError::Request(e.to_string()))?;

        if !(200..300).contains(&status) {
            return Err(FetchError::Status { status, body: text });
        }

        let user = parse_user(&text)?;
        debug!(user_id = %user.id(), logged = user.as_logged().is_some(), "fetched user");
        Ok(user)
    }
}

pub(crate) fn me_url(api_url: &str) -> String {
    format!("{}{ME_PATH}", api_url.trim_end_matches('/'))
}

pub(crate) fn parse_user(text: &str) -> Result<User, FetchError> {
    serde_json::from_str(text).map_err(|e| FetchError::Decode(e.to_string()))
}

#[cfg(test)]
#[path = "fetcher_test.rs"]
mod tests;
