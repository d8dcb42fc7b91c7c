//! Mirrors bundle assets to catbox.moe so replies can link public copies.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::multipart;
use tracing::{debug, warn};

use super::Artifact;
use crate::constants::ARCHIVAL_USER_AGENT;

#[derive(Clone, Debug)]
pub struct CatboxClient {
    http: reqwest::Client,
    endpoint: String,
}

impl CatboxClient {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(endpoint: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .user_agent(ARCHIVAL_USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    /// Upload one file anonymously, returning its public URL.
    pub async fn upload(&self, path: &Path) -> Result<String> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file")
            .to_string();
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let mime = mime_guess::from_path(path).first_or_octet_stream();
        let part = multipart::Part::bytes(bytes)
            .file_name(filename)
            .mime_str(mime.as_ref())
            .context("Failed to set mime type")?;
        let form = multipart::Form::new()
            .text("reqtype", "fileupload")
            .part("fileToUpload", part);

        let response = self
            .http
            .post(format!("{}/user/api.php", self.endpoint))
            .multipart(form)
            .send()
            .await
            .context("Failed to upload to catbox")?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let url = body.trim();
        if !status.is_success() || !url.starts_with("http") {
            anyhow::bail!("catbox upload failed: {status} - {url}");
        }

        debug!(file = %path.display(), remote = %url, "Mirrored asset");
        Ok(url.to_string())
    }

    /// Upload every local asset of `artifact`, filling in `remote`.
    ///
    /// Individual failures are logged and leave that asset without a mirror.
    pub async fn mirror(&self, artifact: &mut Artifact) {
        for (label, asset) in artifact.assets_mut() {
            let Some(local) = asset.local.clone() else {
                continue;
            };
            match self.upload(&local).await {
                Ok(remote) => asset.remote = Some(remote),
                Err(e) => warn!(asset = label, "Failed to mirror asset: {e:#}"),
            }
        }
    }
}
