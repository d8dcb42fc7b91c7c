//! Memento Time Travel lookup (read-only slot).

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::backends::Lookup;
use crate::collect::{BackendError, Slot};
use crate::constants::ARCHIVAL_USER_AGENT;

#[derive(Debug, Deserialize)]
struct TimeMap {
    mementos: Mementos,
}

#[derive(Debug, Deserialize)]
struct Mementos {
    closest: Option<Memento>,
}

#[derive(Debug, Deserialize)]
struct Memento {
    #[serde(default)]
    uri: Vec<String>,
}

/// Asks the Time Travel aggregator for the memento closest to now.
pub struct TimeTravelLookup {
    http: Client,
    base: String,
}

impl TimeTravelLookup {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(ARCHIVAL_USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Lookup for TimeTravelLookup {
    fn slot(&self) -> Slot {
        Slot::Tt
    }

    async fn lookup(&self, url: &Url) -> Result<String, BackendError> {
        let timestamp = Utc::now().format("%Y%m%d%H%M%S");
        let endpoint = format!("{}/api/json/{timestamp}/{url}", self.base);
        debug!(endpoint = %endpoint, "Querying Time Travel");

        let response = self.http.get(&endpoint).send().await?;
        match response.status().as_u16() {
            404 => return Err(BackendError::NotFound),
            429 => return Err(BackendError::RateLimited),
            code if !response.status().is_success() => return Err(BackendError::Status(code)),
            _ => {}
        }

        let map: TimeMap = response.json().await?;
        map.mementos
            .closest
            .and_then(|m| m.uri.into_iter().next())
            .ok_or(BackendError::NotFound)
    }
}
