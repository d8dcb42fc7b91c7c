//! Default [`BundleProvider`]: fetches each page once and captures its assets.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::future::join_all;
use tracing::{debug, info, warn};

use super::catbox::CatboxClient;
use super::extract::{extract_text, extract_title};
use super::monolith::{create_single_file, MonolithConfig};
use super::screenshot::{BrowserCapture, CaptureConfig};
use super::{Artifact, Asset, Bundle, BundleProvider, Bundles};
use crate::config::Config;
use crate::constants::ARCHIVAL_USER_AGENT;

/// Captures raw HTML, readable text and, when configured, screenshot, PDF
/// and single-file HTML for every URL of a batch.
pub struct Reduxer {
    http: reqwest::Client,
    work_dir: PathBuf,
    browser: Option<Arc<BrowserCapture>>,
    monolith: MonolithConfig,
    catbox: Option<CatboxClient>,
}

impl Reduxer {
    /// # Errors
    ///
    /// Returns an error if the HTTP clients cannot be built.
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(ARCHIVAL_USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;

        let capture = CaptureConfig {
            chrome_path: config.chrome_path.clone(),
            screenshot: config.screenshot_enabled,
            pdf: config.pdf_enabled,
            ..Default::default()
        };
        let browser = capture
            .is_enabled()
            .then(|| Arc::new(BrowserCapture::new(capture)));

        let catbox = if config.catbox_enabled {
            Some(CatboxClient::new(&config.endpoints.catbox)?)
        } else {
            None
        };

        Ok(Self {
            http,
            work_dir: config.work_dir.clone(),
            browser,
            monolith: MonolithConfig {
                enabled: config.monolith_enabled,
                path: config.monolith_path.clone(),
                ..Default::default()
            },
            catbox,
        })
    }

    /// Capture one URL into `dir`.
    async fn capture(&self, url: &str, dir: &Path) -> Result<Bundle> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let response = self
            .http
            .get(url)
            .send()
            .await
            .context("Failed to fetch page")?;
        if !response.status().is_success() {
            anyhow::bail!("Page fetch failed with status {}", response.status());
        }
        let html = response.text().await.context("Failed to read page body")?;

        let mut artifact = Artifact::default();

        let raw_path = dir.join("raw.html");
        tokio::fs::write(&raw_path, &html)
            .await
            .context("Failed to write raw HTML")?;
        artifact.raw = Asset::local(&raw_path);

        let title = extract_title(&html).unwrap_or_default();
        let text = extract_text(&html).unwrap_or_default();
        if !text.is_empty() {
            let txt_path = dir.join("content.txt");
            tokio::fs::write(&txt_path, &text)
                .await
                .context("Failed to write text content")?;
            artifact.txt = Asset::local(&txt_path);
        }

        if let Some(browser) = &self.browser {
            match browser.capture(url).await {
                Ok(capture) => {
                    let (png, pdf) = capture.write_to(dir).await?;
                    if let Some(png) = png {
                        artifact.img = Asset::local(png);
                    }
                    if let Some(pdf) = pdf {
                        artifact.pdf = Asset::local(pdf);
                    }
                }
                Err(e) => warn!(url = %url, "Browser capture failed: {e:#}"),
            }
        }

        if self.monolith.enabled {
            let single = dir.join("single.html");
            match create_single_file(url, &single, &self.monolith).await {
                Ok(()) => artifact.htm = Asset::local(single),
                Err(e) => warn!(url = %url, "Single-file capture failed: {e:#}"),
            }
        }

        if let Some(catbox) = &self.catbox {
            catbox.mirror(&mut artifact).await;
        }

        debug!(url = %url, title = %title, "Bundle captured");

        Ok(Bundle {
            src: url.to_string(),
            title,
            html,
            text,
            artifact,
        })
    }
}

#[async_trait]
impl BundleProvider for Reduxer {
    async fn produce(&self, urls: &[String]) -> Result<Bundles> {
        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .with_context(|| format!("Failed to create work directory: {}", self.work_dir.display()))?;
        let scratch = tempfile::Builder::new()
            .prefix("bundle-")
            .tempdir_in(&self.work_dir)
            .context("Failed to create bundle scratch directory")?;

        let captures = urls.iter().enumerate().map(|(i, url)| {
            let dir = scratch.path().join(i.to_string());
            async move { (url, self.capture(url, &dir).await) }
        });

        let mut bundles = Bundles::new();
        for (url, result) in join_all(captures).await {
            match result {
                Ok(bundle) => bundles.insert(bundle),
                Err(e) => warn!(url = %url, "Bundle capture failed: {e:#}"),
            }
        }

        info!(requested = urls.len(), captured = bundles.len(), "Bundles ready");
        Ok(bundles.with_scratch(scratch))
    }

    async fn shutdown(&self) {
        if let Some(browser) = &self.browser {
            browser.shutdown().await;
        }
    }
}
