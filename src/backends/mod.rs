//! Backend registry: one [`Archiver`] and/or [`Lookup`] per [`Slot`].
//!
//! The dispatcher never branches on concrete services. It asks the
//! [`Registry`] to resolve a slot into a [`Task`] and runs it; adding a
//! service means registering another trait object.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, error, warn};
use url::Url;

use crate::archive_today::ArchiveTodayClient;
use crate::bundle::Bundle;
use crate::collect::{BackendError, Outcome, Slot};
use crate::config::Config;
use crate::google_cache::GoogleCacheLookup;
use crate::ipfs::IpfsClient;
use crate::telegraph::TelegraphClient;
use crate::timetravel::TimeTravelLookup;
use crate::wayback::WaybackClient;

pub mod limiter;

pub use limiter::{SlotLimiter, SlotPermit};

/// Writes a URL to an archive service.
#[async_trait]
pub trait Archiver: Send + Sync {
    fn slot(&self) -> Slot;

    /// Archive `url`, returning the location of the archived copy.
    ///
    /// `bundle` is the pre-captured content for `url` when the batch has one.
    /// Implementations that can reuse it should; others ignore it.
    async fn archive(&self, url: &Url, bundle: Option<&Bundle>) -> Result<String, BackendError>;
}

/// Finds an existing archived copy of a URL.
#[async_trait]
pub trait Lookup: Send + Sync {
    fn slot(&self) -> Slot;

    async fn lookup(&self, url: &Url) -> Result<String, BackendError>;
}

enum Operation {
    Archive {
        archiver: Arc<dyn Archiver>,
        bundle: Option<Arc<Bundle>>,
    },
    Lookup(Arc<dyn Lookup>),
    Unavailable,
}

/// One (URL, slot) unit of work, bounded by its batch deadline.
pub struct Task {
    slot: Slot,
    url: Url,
    deadline: Instant,
    op: Operation,
}

impl Task {
    /// Run the task. Never fails: every error becomes [`Outcome::Failed`].
    pub async fn archive(self) -> Outcome {
        let slot = self.slot;
        let url = &self.url;

        let call = async {
            match &self.op {
                Operation::Archive { archiver, bundle } => {
                    archiver.archive(url, bundle.as_deref()).await
                }
                Operation::Lookup(lookup) => lookup.lookup(url).await,
                Operation::Unavailable => Err(BackendError::Unsupported(slot)),
            }
        };

        let result = match tokio::time::timeout_at(self.deadline, call).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::DeadlineExceeded),
        };

        match result {
            Ok(dst) if !dst.trim().is_empty() => {
                debug!(url = %url, slot = %slot, dst = %dst, "Slot finished");
                Outcome::Archived(dst)
            }
            Ok(_) => {
                warn!(url = %url, slot = %slot, "Slot returned an empty destination");
                Outcome::Failed(BackendError::EmptyDestination)
            }
            Err(BackendError::NotFound) if matches!(self.op, Operation::Lookup(_)) => {
                debug!(url = %url, slot = %slot, "No archived copy found");
                Outcome::Failed(BackendError::NotFound)
            }
            Err(e) => {
                error!(url = %url, slot = %slot, "Slot failed: {e}");
                Outcome::Failed(e)
            }
        }
    }
}

/// Lookup table of archive services plus the shared per-slot limiter.
pub struct Registry {
    archivers: HashMap<Slot, Arc<dyn Archiver>>,
    lookups: HashMap<Slot, Arc<dyn Lookup>>,
    limiter: SlotLimiter,
}

impl Registry {
    #[must_use]
    pub fn new(per_slot_concurrency: usize) -> Self {
        Self {
            archivers: HashMap::new(),
            lookups: HashMap::new(),
            limiter: SlotLimiter::new(per_slot_concurrency),
        }
    }

    /// Build the registry with every built-in service.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry = Self::new(config.per_slot_concurrency);

        let ia = Arc::new(WaybackClient::new(&config.endpoints)?);
        registry.register_archiver(ia.clone());
        registry.register_lookup(ia);

        let is = Arc::new(ArchiveTodayClient::new(&config.endpoints.archive_today)?);
        registry.register_archiver(is.clone());
        registry.register_lookup(is);

        let ip = Arc::new(IpfsClient::new(config)?);
        registry.register_archiver(ip.clone());
        registry.register_lookup(ip);

        let ph = Arc::new(TelegraphClient::new(config)?);
        registry.register_archiver(ph.clone());
        registry.register_lookup(ph);

        registry.register_lookup(Arc::new(TimeTravelLookup::new(&config.endpoints.timetravel)?));
        registry.register_lookup(Arc::new(GoogleCacheLookup::new(&config.endpoints.google_cache)?));

        Ok(registry)
    }

    pub fn register_archiver(&mut self, archiver: Arc<dyn Archiver>) {
        self.archivers.insert(archiver.slot(), archiver);
    }

    pub fn register_lookup(&mut self, lookup: Arc<dyn Lookup>) {
        self.lookups.insert(lookup.slot(), lookup);
    }

    #[must_use]
    pub fn limiter(&self) -> &SlotLimiter {
        &self.limiter
    }

    /// Resolve a write task. Unregistered slots resolve to a task that
    /// records [`BackendError::Unsupported`].
    #[must_use]
    pub fn resolve(&self, slot: Slot, url: Url, deadline: Instant, bundle: Option<Arc<Bundle>>) -> Task {
        let op = self
            .archivers
            .get(&slot)
            .map_or(Operation::Unavailable, |archiver| Operation::Archive {
                archiver: Arc::clone(archiver),
                bundle,
            });
        Task {
            slot,
            url,
            deadline,
            op,
        }
    }

    /// Resolve a read-only lookup task.
    #[must_use]
    pub fn resolve_lookup(&self, slot: Slot, url: Url, deadline: Instant) -> Task {
        let op = self
            .lookups
            .get(&slot)
            .map_or(Operation::Unavailable, |lookup| Operation::Lookup(Arc::clone(lookup)));
        Task {
            slot,
            url,
            deadline,
            op,
        }
    }
}
