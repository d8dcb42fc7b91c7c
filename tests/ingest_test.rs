//! Message handling from inbound text to reply.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use url::Url;

use wayback_relay::backends::{Archiver, Registry};
use wayback_relay::bundle::Bundle;
use wayback_relay::collect::{BackendError, Collect, Slot};
use wayback_relay::config::Config;
use wayback_relay::constants::{ARCHIVE_FAILURE_NOTICE, NO_URL_NOTICE};
use wayback_relay::dispatch::Dispatcher;
use wayback_relay::inflight::InFlight;
use wayback_relay::ingest::{Handled, Inbound, Ingestor, MessageSource};
use wayback_relay::publish::Publisher;

/// In-memory chat that records everything the ingestor sends back.
#[derive(Default)]
struct RecordingSource {
    queued: Mutex<VecDeque<Vec<Inbound>>>,
    replies: Mutex<Vec<(String, String)>>,
    acked: Mutex<Vec<String>>,
    polls: AtomicUsize,
}

impl RecordingSource {
    fn with_polls(polls: Vec<Vec<Inbound>>) -> Self {
        Self {
            queued: Mutex::new(polls.into()),
            ..Self::default()
        }
    }

    fn replies(&self) -> Vec<(String, String)> {
        self.replies.lock().unwrap().clone()
    }

    fn acked(&self) -> Vec<String> {
        self.acked.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageSource for RecordingSource {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn poll(&self) -> Result<Vec<Inbound>> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(self.queued.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn reply(&self, inbound: &Inbound, text: &str) -> Result<()> {
        self.replies
            .lock()
            .unwrap()
            .push((inbound.conversation_id.clone(), text.to_string()));
        Ok(())
    }

    async fn acknowledge(&self, inbound: &Inbound) -> Result<()> {
        self.acked.lock().unwrap().push(inbound.conversation_id.clone());
        Ok(())
    }
}

/// Internet Archive stand-in that counts calls and can hold them open.
struct CountingArchiver {
    calls: AtomicUsize,
    gate: Option<Arc<Notify>>,
}

impl CountingArchiver {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            gate: None,
        }
    }

    fn gated(gate: Arc<Notify>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            gate: Some(gate),
        }
    }
}

#[async_trait]
impl Archiver for CountingArchiver {
    fn slot(&self) -> Slot {
        Slot::Ia
    }

    async fn archive(&self, url: &Url, _bundle: Option<&Bundle>) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        Ok(format!("https://web.archive.org/web/2024/{url}"))
    }
}

#[derive(Default)]
struct RecordingPublisher {
    published: Mutex<Vec<String>>,
}

#[async_trait]
impl Publisher for RecordingPublisher {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn render(&self, collects: &[Collect]) -> String {
        collects
            .iter()
            .map(|c| c.src.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    async fn deliver(&self, text: &str) -> Result<()> {
        self.published.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

fn dispatcher_with(archiver: Arc<CountingArchiver>) -> Arc<Dispatcher> {
    let mut registry = Registry::new(4);
    registry.register_archiver(archiver);
    Arc::new(Dispatcher::new(Arc::new(registry), Duration::from_secs(5)))
}

fn message(conversation: &str, text: &str) -> Inbound {
    Inbound {
        conversation_id: conversation.to_string(),
        message_id: "1".to_string(),
        sender_id: "alice".to_string(),
        text: text.to_string(),
        links: Vec::new(),
    }
}

#[tokio::test]
async fn test_message_without_url_gets_notice() {
    let source = Arc::new(RecordingSource::default());
    let archiver = Arc::new(CountingArchiver::new());
    let inflight = InFlight::new();
    let ingestor = Ingestor::new(source.clone(), dispatcher_with(archiver.clone()), &Config::for_testing())
        .with_inflight(inflight.clone());

    let handled = ingestor.handle(message("c1", "no links here")).await;

    assert!(matches!(handled, Handled::NoUrl));
    assert_eq!(source.replies(), vec![("c1".to_string(), NO_URL_NOTICE.to_string())]);
    assert_eq!(source.acked(), vec!["c1".to_string()]);
    assert!(inflight.is_empty().await);
    assert_eq!(archiver.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_archive_reply_publish_and_release() {
    let source = Arc::new(RecordingSource::default());
    let archiver = Arc::new(CountingArchiver::new());
    let publisher = Arc::new(RecordingPublisher::default());
    let ingestor = Ingestor::new(source.clone(), dispatcher_with(archiver.clone()), &Config::for_testing())
        .with_publisher(publisher.clone());

    let handled = ingestor
        .handle(message("c1", "please keep https://example.com/page."))
        .await;
    let Handled::Spawned(cycle) = handled else {
        panic!("expected a background cycle");
    };
    assert!(ingestor.inflight().contains("c1").await);
    cycle.await.unwrap();

    let replies = source.replies();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].0, "c1");
    assert!(replies[0].1.contains("https://example.com/page"));
    assert!(replies[0].1.contains("https://web.archive.org/web/2024/https://example.com/page"));
    assert_eq!(source.acked(), vec!["c1".to_string()]);
    assert_eq!(
        *publisher.published.lock().unwrap(),
        vec!["https://example.com/page".to_string()]
    );
    assert_eq!(archiver.calls.load(Ordering::SeqCst), 1);
    assert!(ingestor.inflight().is_empty().await);
}

#[tokio::test]
async fn test_duplicate_conversation_is_skipped_while_in_flight() {
    let gate = Arc::new(Notify::new());
    let source = Arc::new(RecordingSource::default());
    let archiver = Arc::new(CountingArchiver::gated(gate.clone()));
    let ingestor = Ingestor::new(source.clone(), dispatcher_with(archiver.clone()), &Config::for_testing());

    let first = ingestor.handle(message("c1", "https://example.com/")).await;
    let second = ingestor.handle(message("c1", "https://example.com/")).await;

    assert!(matches!(second, Handled::Busy));
    let Handled::Spawned(cycle) = first else {
        panic!("expected a background cycle");
    };

    gate.notify_one();
    cycle.await.unwrap();

    assert_eq!(archiver.calls.load(Ordering::SeqCst), 1);
    assert_eq!(source.replies().len(), 1);
    assert!(ingestor.inflight().is_empty().await);

    // Once released the conversation can be processed again.
    let again = ingestor.handle(message("c1", "https://example.com/")).await;
    let Handled::Spawned(cycle) = again else {
        panic!("expected a background cycle");
    };
    gate.notify_one();
    cycle.await.unwrap();
    assert_eq!(archiver.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_distinct_conversations_run_concurrently() {
    let gate = Arc::new(Notify::new());
    let source = Arc::new(RecordingSource::default());
    let archiver = Arc::new(CountingArchiver::gated(gate.clone()));
    let ingestor = Ingestor::new(source.clone(), dispatcher_with(archiver.clone()), &Config::for_testing());

    let a = ingestor.handle(message("c1", "https://example.com/")).await;
    let b = ingestor.handle(message("c2", "https://example.org/")).await;
    let (Handled::Spawned(a), Handled::Spawned(b)) = (a, b) else {
        panic!("expected two background cycles");
    };
    assert_eq!(ingestor.inflight().len().await, 2);

    while archiver.calls.load(Ordering::SeqCst) < 2 {
        tokio::task::yield_now().await;
    }
    gate.notify_waiters();
    a.await.unwrap();
    b.await.unwrap();
    assert_eq!(source.replies().len(), 2);
}

#[tokio::test]
async fn test_no_results_sends_failure_notice() {
    let source = Arc::new(RecordingSource::default());
    let archiver = Arc::new(CountingArchiver::new());
    let mut config = Config::for_testing();
    for enabled in config.slots.values_mut() {
        *enabled = false;
    }
    let publisher = Arc::new(RecordingPublisher::default());
    let ingestor = Ingestor::new(source.clone(), dispatcher_with(archiver), &config)
        .with_publisher(publisher.clone());

    let Handled::Spawned(cycle) = ingestor.handle(message("c1", "https://example.com/")).await else {
        panic!("expected a background cycle");
    };
    cycle.await.unwrap();

    assert_eq!(
        source.replies(),
        vec![("c1".to_string(), ARCHIVE_FAILURE_NOTICE.to_string())]
    );
    assert!(publisher.published.lock().unwrap().is_empty());
    assert!(ingestor.inflight().is_empty().await);
}

#[tokio::test]
async fn test_poll_once_counts_started_cycles() {
    let source = Arc::new(RecordingSource::with_polls(vec![vec![
        message("c1", "https://example.com/"),
        message("c1", "https://example.com/ again"),
        message("c2", "nothing to see"),
        message("c3", "https://example.net/"),
    ]]));
    let archiver = Arc::new(CountingArchiver::new());
    let ingestor = Ingestor::new(source.clone(), dispatcher_with(archiver), &Config::for_testing());

    let started = ingestor.poll_once().await.unwrap();

    assert_eq!(started, 2);
    assert!(source
        .replies()
        .contains(&("c2".to_string(), NO_URL_NOTICE.to_string())));
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let source = Arc::new(RecordingSource::default());
    let ingestor = Arc::new(Ingestor::new(
        source.clone(),
        dispatcher_with(Arc::new(CountingArchiver::new())),
        &Config::for_testing(),
    ));
    let shutdown = CancellationToken::new();

    let running = {
        let ingestor = Arc::clone(&ingestor);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { ingestor.run(shutdown).await })
    };

    tokio::time::sleep(Duration::from_millis(120)).await;
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), running)
        .await
        .expect("loop did not stop")
        .unwrap();

    assert!(source.polls.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_shutdown_waits_for_running_cycles() {
    let gate = Arc::new(Notify::new());
    let source = Arc::new(RecordingSource::with_polls(vec![vec![message(
        "c1",
        "https://example.com/",
    )]]));
    let archiver = Arc::new(CountingArchiver::gated(gate.clone()));
    let ingestor = Arc::new(Ingestor::new(
        source.clone(),
        dispatcher_with(archiver.clone()),
        &Config::for_testing(),
    ));
    let shutdown = CancellationToken::new();

    let running = {
        let ingestor = Arc::clone(&ingestor);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { ingestor.run(shutdown).await })
    };

    while archiver.calls.load(Ordering::SeqCst) < 1 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    shutdown.cancel();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!running.is_finished());
    assert!(source.replies().is_empty());

    gate.notify_one();
    tokio::time::timeout(Duration::from_secs(1), running)
        .await
        .expect("loop did not stop")
        .unwrap();

    assert_eq!(source.replies().len(), 1);
    assert_eq!(source.acked(), vec!["c1".to_string()]);
    assert!(ingestor.inflight().is_empty().await);
}

#[tokio::test]
async fn test_shutdown_wait_is_bounded() {
    let gate = Arc::new(Notify::new());
    let source = Arc::new(RecordingSource::with_polls(vec![vec![message(
        "c1",
        "https://example.com/",
    )]]));
    let archiver = Arc::new(CountingArchiver::gated(gate));
    let config = Config {
        shutdown_grace: Duration::from_millis(50),
        ..Config::for_testing()
    };
    let ingestor = Arc::new(Ingestor::new(source.clone(), dispatcher_with(archiver.clone()), &config));
    let shutdown = CancellationToken::new();

    let running = {
        let ingestor = Arc::clone(&ingestor);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { ingestor.run(shutdown).await })
    };

    while archiver.calls.load(Ordering::SeqCst) < 1 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), running)
        .await
        .expect("loop waited past its shutdown grace")
        .unwrap();

    assert!(source.replies().is_empty());
    assert!(ingestor.inflight().contains("c1").await);
}

/// Publisher whose renderer blows up.
struct PanickingPublisher;

#[async_trait]
impl Publisher for PanickingPublisher {
    fn name(&self) -> &'static str {
        "panicking"
    }

    fn render(&self, _collects: &[Collect]) -> String {
        panic!("renderer bug");
    }

    async fn deliver(&self, _text: &str) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_panicking_cycle_still_releases_conversation() {
    let source = Arc::new(RecordingSource::default());
    let ingestor = Ingestor::new(
        source.clone(),
        dispatcher_with(Arc::new(CountingArchiver::new())),
        &Config::for_testing(),
    )
    .with_publisher(Arc::new(PanickingPublisher));

    let Handled::Spawned(cycle) = ingestor.handle(message("c1", "https://example.com/")).await else {
        panic!("expected a background cycle");
    };
    cycle.await.unwrap();

    // The reply went out before the publisher panicked.
    assert_eq!(source.replies().len(), 1);
    assert!(ingestor.inflight().is_empty().await);
    assert!(matches!(
        ingestor.handle(message("c1", "https://example.com/")).await,
        Handled::Spawned(_)
    ));
}
