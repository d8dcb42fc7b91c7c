//! Message-driven ingestion.
//!
//! An [`Ingestor`] polls one [`MessageSource`], pulls URLs out of each
//! inbound message and archives them in the background. A conversation is
//! processed by at most one cycle at a time; duplicates seen while it is in
//! flight are skipped and picked up again on a later poll.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::collect::{Collect, Slots};
use crate::config::Config;
use crate::constants::{ARCHIVE_FAILURE_NOTICE, NO_URL_NOTICE};
use crate::dispatch::{DispatchError, Dispatcher};
use crate::inflight::InFlight;
use crate::publish::{render_plain, Publisher};

pub mod link_extractor;
pub mod mastodon;
pub mod telegram;

pub use mastodon::MastodonSource;
pub use telegram::TelegramSource;

/// One inbound message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inbound {
    pub conversation_id: String,
    /// Platform id of the message, used to thread replies.
    pub message_id: String,
    pub sender_id: String,
    pub text: String,
    /// Link targets the platform reports separately from the text.
    pub links: Vec<String>,
}

impl Inbound {
    /// Candidate URLs: those found in the text, then any extra link targets.
    #[must_use]
    pub fn urls(&self) -> Vec<String> {
        let mut urls = link_extractor::extract_urls(&self.text);
        for link in &self.links {
            if !urls.contains(link) {
                urls.push(link.clone());
            }
        }
        urls
    }
}

/// A chat platform the relay listens on.
#[async_trait]
pub trait MessageSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fetch messages that arrived since the last poll.
    async fn poll(&self) -> Result<Vec<Inbound>>;

    /// Send `text` back to the conversation `inbound` came from.
    async fn reply(&self, inbound: &Inbound, text: &str) -> Result<()>;

    /// Render a batch for this platform's reply format.
    fn render(&self, collects: &[Collect]) -> String {
        render_plain(collects)
    }

    /// Mark `inbound` as handled on the platform.
    async fn acknowledge(&self, _inbound: &Inbound) -> Result<()> {
        Ok(())
    }
}

/// What [`Ingestor::handle`] did with a message.
#[derive(Debug)]
pub enum Handled {
    /// No URL in the message; a notice was sent.
    NoUrl,
    /// The conversation is already being processed.
    Busy,
    /// Archiving started in the background.
    Spawned(JoinHandle<()>),
}

pub struct Ingestor {
    source: Arc<dyn MessageSource>,
    dispatcher: Arc<Dispatcher>,
    slots: Slots,
    inflight: InFlight,
    publishers: Vec<Arc<dyn Publisher>>,
    poll_interval: Duration,
    grace: Duration,
    shutdown_grace: Duration,
    cycles: TaskTracker,
}

impl Ingestor {
    #[must_use]
    pub fn new(source: Arc<dyn MessageSource>, dispatcher: Arc<Dispatcher>, config: &Config) -> Self {
        Self {
            source,
            dispatcher,
            slots: config.slots.clone(),
            inflight: InFlight::new(),
            publishers: Vec::new(),
            poll_interval: config.poll_interval,
            grace: config.conversation_grace,
            shutdown_grace: config.shutdown_grace,
            cycles: TaskTracker::new(),
        }
    }

    #[must_use]
    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publishers.push(publisher);
        self
    }

    #[must_use]
    pub fn with_inflight(mut self, inflight: InFlight) -> Self {
        self.inflight = inflight;
        self
    }

    #[must_use]
    pub fn inflight(&self) -> &InFlight {
        &self.inflight
    }

    /// Poll until `shutdown` fires, then wait up to the shutdown grace period
    /// for archive cycles that already started.
    pub async fn run(&self, shutdown: CancellationToken) {
        let source = self.source.name();
        info!(source, "Ingestion loop started");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                result = self.poll_once() => match result {
                    Ok(0) => {}
                    Ok(started) => debug!(source, started, "Poll finished"),
                    Err(e) => error!(source, "Poll error: {e:#}"),
                },
            }

            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        self.drain().await;
        info!(source, "Ingestion loop stopped");
    }

    /// Wait for running archive cycles, bounded by the shutdown grace period.
    async fn drain(&self) {
        let source = self.source.name();
        self.cycles.close();
        if self.cycles.is_empty() {
            return;
        }

        info!(source, pending = self.cycles.len(), "Waiting for archive cycles");
        if tokio::time::timeout(self.shutdown_grace, self.cycles.wait())
            .await
            .is_err()
        {
            let pending = self.cycles.len();
            let in_flight = self.inflight.len().await;
            warn!(
                source,
                pending,
                in_flight,
                "Archive cycles still running at shutdown, their messages get no reply"
            );
        }
    }

    /// Poll once and handle every message. Returns how many archive cycles started.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be polled.
    pub async fn poll_once(&self) -> Result<usize> {
        let messages = self.source.poll().await?;
        let mut started = 0;
        for inbound in messages {
            if matches!(self.handle(inbound).await, Handled::Spawned(_)) {
                started += 1;
            }
        }
        Ok(started)
    }

    /// Handle one message.
    pub async fn handle(&self, inbound: Inbound) -> Handled {
        let source = self.source.name();
        let urls = inbound.urls();

        if urls.is_empty() {
            info!(source, conversation = %inbound.conversation_id, "No URL in message");
            if let Err(e) = self.source.reply(&inbound, NO_URL_NOTICE).await {
                warn!(source, "Failed to send notice: {e:#}");
            }
            if let Err(e) = self.source.acknowledge(&inbound).await {
                warn!(source, "Failed to acknowledge message: {e:#}");
            }
            return Handled::NoUrl;
        }

        if !self.inflight.try_claim(&inbound.conversation_id).await {
            return Handled::Busy;
        }

        info!(
            source,
            conversation = %inbound.conversation_id,
            sender = %inbound.sender_id,
            urls = urls.len(),
            "Archiving message"
        );

        let cycle = Cycle {
            source: Arc::clone(&self.source),
            dispatcher: Arc::clone(&self.dispatcher),
            slots: self.slots.clone(),
            inflight: self.inflight.clone(),
            publishers: self.publishers.clone(),
            grace: self.grace,
        };
        Handled::Spawned(self.cycles.spawn(cycle.run(inbound, urls)))
    }
}

/// Everything one background archive cycle needs.
struct Cycle {
    source: Arc<dyn MessageSource>,
    dispatcher: Arc<Dispatcher>,
    slots: Slots,
    inflight: InFlight,
    publishers: Vec<Arc<dyn Publisher>>,
    grace: Duration,
}

impl Cycle {
    /// Process the message in its own task so the conversation is released
    /// even if processing panics.
    async fn run(self, inbound: Inbound, urls: Vec<String>) {
        let source = self.source.name();
        let conversation = inbound.conversation_id.clone();
        let inflight = self.inflight.clone();
        let grace = self.grace;

        if let Err(e) = tokio::spawn(self.process(inbound, urls)).await {
            error!(source, conversation = %conversation, "Archive cycle aborted: {e}");
        }
        inflight.release_after(&conversation, grace).await;
    }

    async fn process(self, inbound: Inbound, urls: Vec<String>) {
        let source = self.source.name();

        match self.dispatcher.wayback(&urls, &self.slots).await {
            Ok(batch) => self.deliver(&inbound, &batch.collects).await,
            Err(DispatchError::InvalidUrl { url, partial, .. }) if !partial.is_empty() => {
                warn!(source, url = %url, "Delivering partial results");
                self.deliver(&inbound, &partial).await;
            }
            Err(e) => {
                error!(source, conversation = %inbound.conversation_id, "Archiving failed: {e}");
                if let Err(e) = self.source.reply(&inbound, ARCHIVE_FAILURE_NOTICE).await {
                    warn!(source, "Failed to send notice: {e:#}");
                }
            }
        }

        if let Err(e) = self.source.acknowledge(&inbound).await {
            warn!(source, "Failed to acknowledge message: {e:#}");
        }
    }

    async fn deliver(&self, inbound: &Inbound, collects: &[Collect]) {
        let source = self.source.name();
        let reply = self.source.render(collects);
        if let Err(e) = self.source.reply(inbound, &reply).await {
            error!(source, conversation = %inbound.conversation_id, "Failed to reply: {e:#}");
        }

        for publisher in &self.publishers {
            if let Err(e) = publisher.publish(collects).await {
                warn!(source, sink = publisher.name(), "Publishing failed: {e:#}");
            }
        }
    }
}
