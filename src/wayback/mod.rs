//! Internet Archive Wayback Machine slot.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, warn};
use url::Url;

use crate::backends::{Archiver, Lookup};
use crate::bundle::Bundle;
use crate::collect::{BackendError, Slot};
use crate::config::Endpoints;
use crate::constants::ARCHIVAL_USER_AGENT;

/// Wayback Machine client for the save and availability APIs.
pub struct WaybackClient {
    client: Client,
    /// Base of the save endpoint and snapshot URLs.
    web_base: String,
    /// Base of the availability API.
    api_base: String,
}

impl WaybackClient {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(endpoints: &Endpoints) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .user_agent(ARCHIVAL_USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            web_base: endpoints.wayback.trim_end_matches('/').to_string(),
            api_base: endpoints.wayback_api.trim_end_matches('/').to_string(),
        })
    }

    /// Submit a URL to the Wayback Machine for archiving.
    ///
    /// Returns the snapshot URL, or the generic capture listing when the
    /// response does not name a specific snapshot.
    pub async fn submit(&self, url: &str) -> Result<String, BackendError> {
        debug!(url = %url, "Submitting URL to Wayback Machine");

        let save_url = format!("{}/save/{url}", self.web_base);
        let response = self.client.get(&save_url).send().await?;
        let status = response.status();

        if status.is_success() || status.as_u16() == 302 {
            if let Some(loc) = response
                .headers()
                .get("content-location")
                .and_then(|v| v.to_str().ok())
            {
                let snapshot_url = format!("{}{loc}", self.web_base);
                info!(url = %url, snapshot = %snapshot_url, "Wayback snapshot created");
                return Ok(snapshot_url);
            }

            if let Some(memento) = response
                .headers()
                .get("link")
                .and_then(|v| v.to_str().ok())
                .and_then(extract_memento_url)
            {
                info!(url = %url, snapshot = %memento, "Wayback snapshot created");
                return Ok(memento);
            }

            info!(url = %url, "Wayback submission accepted (no specific snapshot URL)");
            return Ok(format!("{}/web/*/{url}", self.web_base));
        }

        match status.as_u16() {
            429 => {
                warn!(url = %url, "Wayback Machine rate limited");
                Err(BackendError::RateLimited)
            }
            code @ (520 | 523) => {
                warn!(url = %url, status = %status, "Target site may be blocking Wayback archival");
                Err(BackendError::Status(code))
            }
            code => Err(BackendError::Status(code)),
        }
    }

    /// Most recent snapshot of a URL, if any.
    pub async fn check_existing(&self, url: &str) -> Result<Option<String>, BackendError> {
        let check_url = format!(
            "{}/wayback/available?url={}",
            self.api_base,
            urlencoding::encode(url)
        );

        let response = self.client.get(&check_url).send().await?;
        if !response.status().is_success() {
            return Err(BackendError::Status(response.status().as_u16()));
        }

        let json: serde_json::Value = response.json().await?;

        Ok(json
            .get("archived_snapshots")
            .and_then(|s| s.get("closest"))
            .filter(|c| c.get("available").and_then(serde_json::Value::as_bool).unwrap_or(true))
            .and_then(|c| c.get("url"))
            .and_then(|u| u.as_str())
            .map(String::from))
    }
}

#[async_trait]
impl Archiver for WaybackClient {
    fn slot(&self) -> Slot {
        Slot::Ia
    }

    async fn archive(&self, url: &Url, _bundle: Option<&Bundle>) -> Result<String, BackendError> {
        self.submit(url.as_str()).await
    }
}

#[async_trait]
impl Lookup for WaybackClient {
    fn slot(&self) -> Slot {
        Slot::Ia
    }

    async fn lookup(&self, url: &Url) -> Result<String, BackendError> {
        self.check_existing(url.as_str())
            .await?
            .ok_or(BackendError::NotFound)
    }
}

/// Extract memento URL from Link header.
fn extract_memento_url(link_header: &str) -> Option<String> {
    // Link headers look like: <url>; rel="memento"; ...
    link_header
        .split(',')
        .filter(|part| part.contains("rel=\"memento\"") || part.contains("rel=memento"))
        .find_map(|part| {
            let start = part.find('<')?;
            let end = part.find('>')?;
            (start < end).then(|| part[start + 1..end].to_string())
        })
}
