//! Fan-out of one batch of URLs across archive slots.
//!
//! A batch runs one task per (URL, slot) pair under a single deadline.
//! Backend failures are recorded in the batch's [`Collect`]s and never stop
//! sibling tasks. A URL that does not parse is a hard error: it cancels the
//! work that has not started yet and the batch returns whatever was already
//! collected alongside the error.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::backends::{Registry, Task};
use crate::bundle::{Bundle, BundleProvider, Bundles, Reduxer};
use crate::collect::{BackendError, Collect, Outcome, Slot, Slots};
use crate::config::Config;

mod playback;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no URLs to archive")]
    EmptyInput,
    /// A URL failed to parse. `partial` holds the records collected before
    /// the batch stopped.
    #[error("invalid URL {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
        partial: Vec<Collect>,
    },
    #[error("archives failure")]
    NoResults,
}

impl DispatchError {
    /// Records collected before the batch failed.
    #[must_use]
    pub fn partial(&self) -> &[Collect] {
        match self {
            Self::InvalidUrl { partial, .. } => partial,
            Self::EmptyInput | Self::NoResults => &[],
        }
    }
}

/// Result of a write batch.
///
/// Holds the batch's bundles so their scratch files outlive the tasks and
/// are released only once the caller drops the batch.
#[derive(Debug)]
pub struct Batch {
    pub collects: Vec<Collect>,
    pub bundles: Bundles,
}

/// What each task of a fan-out does once its URL has parsed.
#[derive(Clone)]
enum Job {
    Archive(Option<Arc<Bundle>>),
    Lookup,
}

impl Job {
    fn resolve(self, registry: &Registry, slot: Slot, url: Url, deadline: Instant) -> Task {
        match self {
            Self::Archive(bundle) => registry.resolve(slot, url, deadline, bundle),
            Self::Lookup => registry.resolve_lookup(slot, url, deadline),
        }
    }
}

pub struct Dispatcher {
    registry: Arc<Registry>,
    bundler: Option<Arc<dyn BundleProvider>>,
    timeout: Duration,
}

impl Dispatcher {
    #[must_use]
    pub fn new(registry: Arc<Registry>, timeout: Duration) -> Self {
        Self {
            registry,
            bundler: None,
            timeout,
        }
    }

    /// Dispatcher with every built-in service and, when enabled, the default
    /// bundle provider.
    ///
    /// # Errors
    ///
    /// Returns an error if a service client cannot be built.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let registry = Arc::new(Registry::from_config(config)?);
        let dispatcher = Self::new(registry, config.wayback_timeout);
        if config.bundle_enabled {
            return Ok(dispatcher.with_bundle_provider(Arc::new(Reduxer::new(config)?)));
        }
        Ok(dispatcher)
    }

    #[must_use]
    pub fn with_bundle_provider(mut self, bundler: Arc<dyn BundleProvider>) -> Self {
        self.bundler = Some(bundler);
        self
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Shut down the bundle provider. Call once no batch is running.
    pub async fn shutdown(&self) {
        if let Some(bundler) = &self.bundler {
            bundler.shutdown().await;
        }
    }

    /// Archive every URL to every enabled slot.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::EmptyInput`] when `urls` is empty.
    /// - [`DispatchError::InvalidUrl`] when a URL does not parse.
    /// - [`DispatchError::NoResults`] when the batch produced no records.
    pub async fn wayback(&self, urls: &[String], slots: &Slots) -> Result<Batch, DispatchError> {
        if urls.is_empty() {
            return Err(DispatchError::EmptyInput);
        }

        let deadline = Instant::now() + self.timeout;
        let enabled: Vec<Slot> = slots
            .iter()
            .filter_map(|(slot, on)| on.then_some(*slot))
            .collect();

        info!(urls = urls.len(), slots = enabled.len(), "Dispatching archive batch");

        let bundles = self.produce_bundles(urls, deadline).await;

        let mut jobs = Vec::with_capacity(urls.len() * enabled.len());
        for src in urls {
            let bundle = bundles.get(src);
            for slot in &enabled {
                jobs.push((src.clone(), *slot, Job::Archive(bundle.clone())));
            }
        }
        let collects = self.fan_out(jobs, deadline).await?;

        Ok(Batch { collects, bundles })
    }

    async fn produce_bundles(&self, urls: &[String], deadline: Instant) -> Bundles {
        let Some(bundler) = &self.bundler else {
            return Bundles::new();
        };

        match tokio::time::timeout_at(deadline, bundler.produce(urls)).await {
            Ok(Ok(bundles)) => {
                debug!(bundles = bundles.len(), urls = urls.len(), "Bundles ready");
                bundles
            }
            Ok(Err(e)) => {
                warn!("Bundle provider failed, continuing without bundles: {e:#}");
                Bundles::new()
            }
            Err(_) => {
                warn!("Bundle provider hit the batch deadline, continuing without bundles");
                Bundles::new()
            }
        }
    }

    /// Run one task per job and gather their records.
    async fn fan_out(
        &self,
        jobs: Vec<(String, Slot, Job)>,
        deadline: Instant,
    ) -> Result<Vec<Collect>, DispatchError> {
        let cancel = CancellationToken::new();
        let hard_error: Arc<OnceLock<(String, url::ParseError)>> = Arc::new(OnceLock::new());
        let results: Arc<Mutex<Vec<Collect>>> = Arc::new(Mutex::new(Vec::new()));
        let mut set = JoinSet::new();

        for (src, slot, job) in jobs {
            let registry = Arc::clone(&self.registry);
            let cancel = cancel.clone();
            let hard_error = Arc::clone(&hard_error);
            let results = Arc::clone(&results);

            set.spawn(async move {
                let url = match Url::parse(&src) {
                    Ok(url) => url,
                    Err(e) => {
                        warn!(url = %src, slot = %slot, "Invalid URL, cancelling batch: {e}");
                        // First error wins.
                        let _ = hard_error.set((src, e));
                        cancel.cancel();
                        return;
                    }
                };

                let outcome = tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        debug!(url = %src, slot = %slot, "Batch cancelled before start");
                        return;
                    }
                    () = tokio::time::sleep_until(deadline) => {
                        Outcome::Failed(BackendError::DeadlineExceeded)
                    }
                    permit = registry.limiter().acquire(slot) => {
                        let _permit = permit;
                        job.resolve(&registry, slot, url, deadline).archive().await
                    }
                };

                results.lock().await.push(Collect::new(src, slot, outcome));
            });
        }

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                error!("Archive task panicked: {e}");
            }
        }

        let collects = std::mem::take(&mut *results.lock().await);

        if let Some((url, source)) = hard_error.get().cloned() {
            warn!(url = %url, collected = collects.len(), "Batch aborted on invalid URL");
            return Err(DispatchError::InvalidUrl {
                url,
                source,
                partial: collects,
            });
        }

        if collects.is_empty() {
            warn!("Batch produced no results");
            return Err(DispatchError::NoResults);
        }

        let archived = collects.iter().filter(|c| c.is_archived()).count();
        info!(
            records = collects.len(),
            archived,
            failed = collects.len() - archived,
            "Batch complete"
        );
        Ok(collects)
    }
}
