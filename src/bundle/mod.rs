//! Pre-captured page assets shared across the backends of one batch.
//!
//! A [`BundleProvider`] runs once per batch before any backend task starts.
//! Backends that can reuse captured HTML or text (IPFS, Telegraph) read the
//! bundle for their URL; the rest ignore it. Bundles are immutable once
//! produced and handed out as `Arc<Bundle>`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;

pub mod catbox;
pub mod extract;
pub mod monolith;
pub mod reduxer;
pub mod screenshot;

pub use reduxer::Reduxer;

/// One captured file: where it lives locally and, optionally, a public mirror.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Asset {
    pub local: Option<PathBuf>,
    pub remote: Option<String>,
}

impl Asset {
    #[must_use]
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            local: Some(path.into()),
            remote: None,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.local.is_none() && self.remote.is_none()
    }
}

/// Every asset kind a capture may produce.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Artifact {
    /// Full-page screenshot.
    pub img: Asset,
    pub pdf: Asset,
    /// Raw HTML as served.
    pub raw: Asset,
    /// Readable plain text.
    pub txt: Asset,
    pub har: Asset,
    /// Single-file HTML with inlined resources.
    pub htm: Asset,
    pub warc: Asset,
    pub media: Asset,
}

impl Artifact {
    /// Mutable access to every asset with a short label, for mirroring.
    pub fn assets_mut(&mut self) -> [(&'static str, &mut Asset); 8] {
        [
            ("img", &mut self.img),
            ("pdf", &mut self.pdf),
            ("raw", &mut self.raw),
            ("txt", &mut self.txt),
            ("har", &mut self.har),
            ("htm", &mut self.htm),
            ("warc", &mut self.warc),
            ("media", &mut self.media),
        ]
    }
}

/// Captured content for one URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bundle {
    pub src: String,
    pub title: String,
    /// Raw HTML body.
    pub html: String,
    /// Readable text extracted from the HTML.
    pub text: String,
    pub artifact: Artifact,
}

/// Bundles of one batch, keyed by source URL.
///
/// Owns the scratch directory holding the local assets; dropping the value
/// removes it.
#[derive(Debug, Default)]
pub struct Bundles {
    map: HashMap<String, Arc<Bundle>>,
    scratch: Option<TempDir>,
}

impl Bundles {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the directory the local assets were written to.
    #[must_use]
    pub fn with_scratch(mut self, dir: TempDir) -> Self {
        self.scratch = Some(dir);
        self
    }

    pub fn insert(&mut self, bundle: Bundle) {
        self.map.insert(bundle.src.clone(), Arc::new(bundle));
    }

    #[must_use]
    pub fn get(&self, src: &str) -> Option<Arc<Bundle>> {
        self.map.get(src).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Path of the scratch directory, if any.
    #[must_use]
    pub fn scratch_path(&self) -> Option<&std::path::Path> {
        self.scratch.as_ref().map(TempDir::path)
    }
}

/// Produces bundles for a batch of URLs.
///
/// Best-effort: a URL that cannot be captured is simply absent from the
/// returned [`Bundles`]. An `Err` means nothing could be captured at all.
#[async_trait]
pub trait BundleProvider: Send + Sync {
    async fn produce(&self, urls: &[String]) -> Result<Bundles>;

    /// Release long-lived resources such as a browser process.
    async fn shutdown(&self) {}
}
