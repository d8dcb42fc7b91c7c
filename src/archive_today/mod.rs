use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, warn};
use url::Url;

use crate::backends::{Archiver, Lookup};
use crate::bundle::Bundle;
use crate::collect::{BackendError, Slot};
use crate::constants::ARCHIVAL_USER_AGENT;

/// Hosts that serve archive.today snapshots.
const ARCHIVE_HOSTS: [&str; 6] = [
    "archive.today/",
    "archive.ph/",
    "archive.is/",
    "archive.li/",
    "archive.vn/",
    "archive.md/",
];

/// Archive.today client.
pub struct ArchiveTodayClient {
    client: Client,
    base: String,
}

impl ArchiveTodayClient {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .user_agent(ARCHIVAL_USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    /// Submit a URL to Archive.today for archiving.
    ///
    /// An existing snapshot is returned instead of creating a new one.
    pub async fn submit(&self, url: &str) -> Result<String, BackendError> {
        if let Some(existing) = self.check_existing(url).await? {
            info!(url = %url, archive = %existing, "URL already archived on Archive.today");
            return Ok(existing);
        }

        debug!(url = %url, "Submitting URL to Archive.today");

        let response = self
            .client
            .post(format!("{}/submit/", self.base))
            .form(&[("url", url), ("anyway", "1")])
            .send()
            .await?;

        let status = response.status();
        let final_url = response.url().to_string();

        if status.is_success() || status.is_redirection() {
            if is_archive_url(&final_url) {
                info!(url = %url, archive = %final_url, "Archive.today snapshot created");
                return Ok(final_url);
            }

            let body = response.text().await.unwrap_or_default();
            if let Some(archive_url) = extract_archive_url(&body) {
                info!(url = %url, archive = %archive_url, "Archive.today snapshot created");
                return Ok(archive_url);
            }

            // Work in progress pages redirect later; link the timegate instead.
            info!(url = %url, "Archive.today submission accepted");
            return Ok(format!("{}/newest/{url}", self.base));
        }

        if status.as_u16() == 429 {
            warn!(url = %url, "Archive.today rate limited");
            return Err(BackendError::RateLimited);
        }
        warn!(url = %url, status = %status, "Archive.today submission failed");
        Err(BackendError::Status(status.as_u16()))
    }

    /// Most recent archive of a URL on Archive.today, if any.
    pub async fn check_existing(&self, url: &str) -> Result<Option<String>, BackendError> {
        let response = self
            .client
            .get(format!("{}/newest/{url}", self.base))
            .send()
            .await?;

        if !response.status().is_success() {
            return Ok(None);
        }

        let final_url = response.url().to_string();
        if is_archive_url(&final_url) {
            return Ok(Some(final_url));
        }

        let body = response.text().await.unwrap_or_default();
        Ok(extract_archive_url(&body))
    }
}

#[async_trait]
impl Archiver for ArchiveTodayClient {
    fn slot(&self) -> Slot {
        Slot::Is
    }

    async fn archive(&self, url: &Url, _bundle: Option<&Bundle>) -> Result<String, BackendError> {
        self.submit(url.as_str()).await
    }
}

#[async_trait]
impl Lookup for ArchiveTodayClient {
    fn slot(&self) -> Slot {
        Slot::Is
    }

    async fn lookup(&self, url: &Url) -> Result<String, BackendError> {
        self.check_existing(url.as_str())
            .await?
            .ok_or(BackendError::NotFound)
    }
}

/// Check if a URL is an Archive.today snapshot URL.
fn is_archive_url(url: &str) -> bool {
    // Known non-archive paths that should not be matched
    const EXCLUDED_PATHS: [&str; 6] = ["submit", "search", "about", "faq", "timegate", "newest"];

    ARCHIVE_HOSTS.iter().any(|host| {
        let Some(after_domain) = url.split(host).nth(1) else {
            return false;
        };
        if !url.starts_with("https://") && !url.starts_with("http://") {
            return false;
        }
        let scheme_len = url.find("://").map_or(0, |i| i + 3);
        if !url[scheme_len..].starts_with(host) {
            return false;
        }
        let first_part = after_domain.split('/').next().unwrap_or("");
        !EXCLUDED_PATHS
            .iter()
            .any(|p| first_part.eq_ignore_ascii_case(p))
            && (5..=10).contains(&first_part.len())
            && first_part.chars().all(char::is_alphanumeric)
    })
}

/// Extract archive URL from HTML response body.
fn extract_archive_url(body: &str) -> Option<String> {
    for marker in ["rel=\"canonical\" href=\"", "property=\"og:url\" content=\""] {
        if let Some(start) = body.find(marker) {
            let after_start = &body[start + marker.len()..];
            if let Some(end) = after_start.find('"') {
                let url = &after_start[..end];
                if is_archive_url(url) {
                    return Some(url.to_string());
                }
            }
        }
    }

    for pattern in ["https://archive.today/", "https://archive.ph/", "https://archive.is/"] {
        if let Some(start) = body.find(pattern) {
            let after_start = &body[start..];
            let end = after_start
                .find(|c: char| c == '"' || c == '\'' || c == '<' || c == '>' || c.is_whitespace())
                .unwrap_or(after_start.len());

            let url = &after_start[..end];
            if is_archive_url(url) {
                return Some(url.to_string());
            }
        }
    }

    None
}
