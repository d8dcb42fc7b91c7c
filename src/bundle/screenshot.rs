//! Screenshot and PDF capture through headless Chromium.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::PrintToPdfParams;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures_util::StreamExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

pub const DEFAULT_VIEWPORT: (u32, u32) = (1280, 800);

pub const DEFAULT_PAGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Flags for an unattended, container-friendly headless session.
const CHROME_ARGS: &[&str] = &[
    "--headless=new",
    "--disable-gpu",
    "--disable-dev-shm-usage",
    "--no-first-run",
    "--no-default-browser-check",
    "--disable-background-networking",
    "--disable-extensions",
    "--mute-audio",
    "--hide-scrollbars",
];

/// Pause after navigation so late scripts can finish layout.
const SETTLE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub viewport: (u32, u32),
    pub page_timeout: Duration,
    /// Chrome/Chromium executable; auto-detected when unset.
    pub chrome_path: Option<String>,
    pub screenshot: bool,
    pub pdf: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            viewport: DEFAULT_VIEWPORT,
            page_timeout: DEFAULT_PAGE_TIMEOUT,
            chrome_path: None,
            screenshot: false,
            pdf: false,
        }
    }
}

impl CaptureConfig {
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.screenshot || self.pdf
    }
}

/// Browser output for one page.
#[derive(Debug, Default)]
pub struct Capture {
    pub png: Option<Vec<u8>>,
    pub pdf: Option<Vec<u8>>,
}

impl Capture {
    /// Write the captured files into `dir` as `screenshot.png` and `page.pdf`.
    ///
    /// Returns the paths of the files written, in that order.
    pub async fn write_to(&self, dir: &Path) -> Result<(Option<PathBuf>, Option<PathBuf>)> {
        let png = write_optional(dir, "screenshot.png", self.png.as_deref()).await?;
        let pdf = write_optional(dir, "page.pdf", self.pdf.as_deref()).await?;
        Ok((png, pdf))
    }
}

async fn write_optional(dir: &Path, name: &str, bytes: Option<&[u8]>) -> Result<Option<PathBuf>> {
    let Some(bytes) = bytes else {
        return Ok(None);
    };
    let path = dir.join(name);
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(Some(path))
}

/// One headless browser, launched on first use and shared by every capture
/// of the process.
pub struct BrowserCapture {
    config: CaptureConfig,
    browser: Mutex<Option<Browser>>,
}

impl BrowserCapture {
    #[must_use]
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            browser: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.is_enabled()
    }

    async fn launch(&self) -> Result<Browser> {
        info!("Launching headless browser for bundle capture");

        let (width, height) = self.config.viewport;
        let mut builder = CHROME_ARGS.iter().fold(
            BrowserConfig::builder()
                .window_size(width, height)
                .request_timeout(self.config.page_timeout)
                .no_sandbox()
                .disable_default_args(),
            |builder, arg| builder.arg(*arg),
        );
        if let Some(path) = &self.config.chrome_path {
            builder = builder.chrome_executable(path);
        }
        let browser_config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("Invalid browser config: {e}"))?;

        let (browser, mut events) = Browser::launch(browser_config)
            .await
            .context("Failed to launch browser")?;

        // The CDP event stream must be drained for the browser to make progress.
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let Err(e) = event {
                    debug!("Browser event error: {e}");
                }
            }
        });

        Ok(browser)
    }

    async fn open(&self, url: &str) -> Result<Page> {
        let mut guard = self.browser.lock().await;
        if guard.is_none() {
            *guard = Some(self.launch().await?);
        }
        let browser = guard.as_ref().context("Browser not running")?;
        browser.new_page(url).await.context("Failed to open page")
    }

    /// Load `url` once and take every enabled capture.
    pub async fn capture(&self, url: &str) -> Result<Capture> {
        anyhow::ensure!(self.is_enabled(), "Browser capture is disabled");

        let page = self.open(url).await?;
        let result = self.render(&page).await;
        if let Err(e) = page.close().await {
            warn!(url = %url, "Failed to close page: {e}");
        }

        let capture = result?;
        debug!(
            url = %url,
            png = capture.png.as_ref().map_or(0, Vec::len),
            pdf = capture.pdf.as_ref().map_or(0, Vec::len),
            "Browser capture finished"
        );
        Ok(capture)
    }

    async fn render(&self, page: &Page) -> Result<Capture> {
        page.wait_for_navigation()
            .await
            .context("Page did not finish loading")?;
        tokio::time::sleep(SETTLE).await;

        let png = if self.config.screenshot {
            let params = ScreenshotParams::builder().full_page(true).build();
            Some(page.screenshot(params).await.context("Screenshot failed")?)
        } else {
            None
        };
        let pdf = if self.config.pdf {
            Some(
                page.pdf(PrintToPdfParams::default())
                    .await
                    .context("PDF print failed")?,
            )
        } else {
            None
        };
        Ok(Capture { png, pdf })
    }

    /// Close the browser if it was ever launched.
    pub async fn shutdown(&self) {
        let Some(mut browser) = self.browser.lock().await.take() else {
            return;
        };
        match browser.close().await {
            Ok(_) => info!("Browser closed"),
            Err(e) => error!("Failed to close browser: {e}"),
        }
    }
}
