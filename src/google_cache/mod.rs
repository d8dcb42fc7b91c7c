//! Google cache lookup (read-only slot).

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::backends::Lookup;
use crate::collect::{BackendError, Slot};
use crate::constants::ARCHIVAL_USER_AGENT;

/// Checks whether Google holds a cached copy and returns its address.
pub struct GoogleCacheLookup {
    http: Client,
    base: String,
}

impl GoogleCacheLookup {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(ARCHIVAL_USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    fn cache_url(&self, url: &Url) -> String {
        format!("{}/search?q=cache:{}", self.base, urlencoding::encode(url.as_str()))
    }
}

#[async_trait]
impl Lookup for GoogleCacheLookup {
    fn slot(&self) -> Slot {
        Slot::Gc
    }

    async fn lookup(&self, url: &Url) -> Result<String, BackendError> {
        let cache_url = self.cache_url(url);
        debug!(cache_url = %cache_url, "Checking Google cache");

        let response = self.http.get(&cache_url).send().await?;
        match response.status().as_u16() {
            200..=299 => Ok(cache_url),
            404 => Err(BackendError::NotFound),
            429 => Err(BackendError::RateLimited),
            code => Err(BackendError::Status(code)),
        }
    }
}
