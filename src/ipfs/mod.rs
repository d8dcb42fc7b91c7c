//! IPFS slot.
//!
//! Communicates with an IPFS daemon via its HTTP API. Archived pages are
//! pinned and linked into the daemon's mutable file system under
//! `/wayback/<sha256 of url>.html`, which is also how lookups find them.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use url::Url;

use crate::backends::{Archiver, Lookup};
use crate::bundle::Bundle;
use crate::collect::{BackendError, Slot};
use crate::config::Config;
use crate::constants::ARCHIVAL_USER_AGENT;

/// MFS directory holding one file per archived URL.
const MFS_ROOT: &str = "/wayback";

/// IPFS API response for add operation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AddResponse {
    hash: String,
}

/// IPFS API response for files/stat.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StatResponse {
    hash: String,
}

/// IPFS client for pinning content.
#[derive(Clone)]
pub struct IpfsClient {
    http: reqwest::Client,
    api_url: String,
    gateway_url: String,
}

impl IpfsClient {
    /// Create a new IPFS client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .user_agent(ARCHIVAL_USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;

        let mut gateway_url = config.ipfs_gateway_url.clone();
        if !gateway_url.ends_with('/') {
            gateway_url.push('/');
        }

        Ok(Self {
            http,
            api_url: config.ipfs_api_url.trim_end_matches('/').to_string(),
            gateway_url,
        })
    }

    /// Pin bytes to IPFS and return its CID.
    ///
    /// # Errors
    ///
    /// Returns an error if the content cannot be pinned.
    pub async fn pin_bytes(&self, data: Vec<u8>, filename: &str) -> Result<String, BackendError> {
        let part = multipart::Part::bytes(data).file_name(filename.to_string());
        let form = multipart::Form::new().part("file", part);

        let url = format!("{}/api/v0/add?pin=true", self.api_url);
        debug!(url = %url, filename = %filename, "Pinning bytes to IPFS");

        let response = self.http.post(&url).multipart(form).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            warn!(status = %status, body = %body, "IPFS add failed");
            return Err(BackendError::Status(status.as_u16()));
        }

        let add_response: AddResponse = response.json().await?;
        info!(cid = %add_response.hash, filename = %filename, "Pinned bytes to IPFS");

        Ok(add_response.hash)
    }

    /// Point the MFS entry for `src` at `cid`, replacing any previous link.
    async fn link(&self, src: &str, cid: &str) -> Result<(), BackendError> {
        let path = mfs_path(src);

        self.call("files/mkdir", &[("arg", MFS_ROOT), ("parents", "true")])
            .await?;
        // Missing entries are fine here.
        if let Err(e) = self
            .call("files/rm", &[("arg", path.as_str()), ("force", "true")])
            .await
        {
            debug!(path = %path, "No previous MFS entry: {e}");
        }
        let ipfs_path = format!("/ipfs/{cid}");
        self.call("files/cp", &[("arg", ipfs_path.as_str()), ("arg", path.as_str())])
            .await?;

        debug!(path = %path, cid = %cid, "Linked into MFS");
        Ok(())
    }

    async fn call(&self, cmd: &str, query: &[(&str, &str)]) -> Result<reqwest::Response, BackendError> {
        let response = self
            .http
            .post(format!("{}/api/v0/{cmd}", self.api_url))
            .query(query)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(BackendError::Status(response.status().as_u16()));
        }
        Ok(response)
    }

    async fn fetch_page(&self, url: &Url) -> Result<Vec<u8>, BackendError> {
        let response = self.http.get(url.as_str()).send().await?;
        if !response.status().is_success() {
            return Err(BackendError::Status(response.status().as_u16()));
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// Public gateway URL for a CID.
    #[must_use]
    pub fn gateway_url(&self, cid: &str) -> String {
        format!("{}{cid}", self.gateway_url)
    }
}

#[async_trait]
impl Archiver for IpfsClient {
    fn slot(&self) -> Slot {
        Slot::Ip
    }

    async fn archive(&self, url: &Url, bundle: Option<&Bundle>) -> Result<String, BackendError> {
        let html = match bundle.filter(|b| !b.html.is_empty()) {
            Some(bundle) => bundle.html.as_bytes().to_vec(),
            None => self.fetch_page(url).await?,
        };

        let cid = self.pin_bytes(html, "index.html").await?;
        self.link(url.as_str(), &cid).await?;

        Ok(self.gateway_url(&cid))
    }
}

#[async_trait]
impl Lookup for IpfsClient {
    fn slot(&self) -> Slot {
        Slot::Ip
    }

    async fn lookup(&self, url: &Url) -> Result<String, BackendError> {
        let path = mfs_path(url.as_str());
        let response = match self.call("files/stat", &[("arg", path.as_str())]).await {
            Ok(response) => response,
            // The daemon answers 500 for paths that do not exist.
            Err(BackendError::Status(500)) => return Err(BackendError::NotFound),
            Err(e) => return Err(e),
        };
        let stat: StatResponse = response.json().await?;
        Ok(self.gateway_url(&stat.hash))
    }
}

/// MFS path under which the archive of `src` is linked.
fn mfs_path(src: &str) -> String {
    let key = hex::encode(Sha256::digest(src.as_bytes()));
    format!("{MFS_ROOT}/{key}.html")
}

impl std::fmt::Debug for IpfsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpfsClient")
            .field("api_url", &self.api_url)
            .field("gateway_url", &self.gateway_url)
            .finish()
    }
}
