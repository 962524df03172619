//! The Cloudflare zone-analytics fetcher.
//!
//! Performs the authenticated GET against the dashboard endpoint and hands
//! the raw payload back. Whether the payload decodes is the forwarder's
//! concern; this module only distinguishes "payload present" from "payload
//! absent".

use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

/// Base URL of Cloudflare's v4 client API.
pub const DEFAULT_BASE_URL: &str = "https://api.cloudflare.com/client/v4";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Cloudflare`].
pub enum Error {
    /// Transport or body-read failure.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The API answered with a non-2xx status.
    #[error("unexpected status: {status}")]
    Status {
        /// The status the API answered with.
        status: reqwest::StatusCode,
    },
}

/// Source of raw analytics payloads.
#[allow(async_fn_in_trait)]
pub trait Fetch {
    /// Retrieve one raw analytics payload.
    ///
    /// # Errors
    ///
    /// Function will return an error if the payload could not be retrieved;
    /// the caller treats that as an empty cycle.
    async fn fetch(&self) -> Result<Bytes, Error>;
}

/// Configuration for [`Cloudflare`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Base URL of the analytics API. Overridable so tests can point at a
    /// local server.
    pub base_url: String,
    /// Cloudflare zone identifier.
    pub zone: String,
    /// X-Auth-Email credential header value.
    pub auth_email: String,
    /// X-Auth-Key credential header value.
    pub auth_key: String,
    /// Lookback window in minutes, sent as `since=-<minutes>`.
    pub lookback_minutes: u32,
}

/// The Cloudflare dashboard fetcher.
#[derive(Debug)]
pub struct Cloudflare {
    client: reqwest::Client,
    url: String,
    auth_email: String,
    auth_key: String,
}

impl Cloudflare {
    /// Create a new [`Cloudflare`] instance from `config`.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let url = format!(
            "{base}/zones/{zone}/analytics/dashboard?since=-{lookback}",
            base = config.base_url,
            zone = config.zone,
            lookback = config.lookback_minutes
        );
        debug!(url = %url, "analytics endpoint");
        Self {
            client: reqwest::Client::new(),
            url,
            auth_email: config.auth_email.clone(),
            auth_key: config.auth_key.clone(),
        }
    }
}

impl Fetch for Cloudflare {
    async fn fetch(&self) -> Result<Bytes, Error> {
        let response = self
            .client
            .get(&self.url)
            .header("X-Auth-Email", &self.auth_email)
            .header("X-Auth-Key", &self.auth_key)
            .header("Content-Type", "application/json")
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status { status });
        }

        Ok(response.bytes().await?)
    }
}
