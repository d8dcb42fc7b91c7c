//! Batch fan-out behaviour of the dispatcher.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use url::Url;

use wayback_relay::backends::{Archiver, Registry};
use wayback_relay::bundle::{Bundle, BundleProvider, Bundles};
use wayback_relay::collect::{BackendError, Outcome, Slot, Slots};
use wayback_relay::dispatch::{DispatchError, Dispatcher};

/// Archives by echoing the URL, or fails with a fixed error.
struct Echo {
    slot: Slot,
    fail: Option<BackendError>,
}

#[async_trait]
impl Archiver for Echo {
    fn slot(&self) -> Slot {
        self.slot
    }

    async fn archive(&self, url: &Url, _bundle: Option<&Bundle>) -> Result<String, BackendError> {
        match &self.fail {
            Some(e) => Err(e.clone()),
            None => Ok(format!("https://{}.example/{url}", self.slot.code())),
        }
    }
}

/// Remembers the address of every bundle it was handed.
struct BundleWitness {
    slot: Slot,
    seen: Arc<Mutex<Vec<(String, Option<usize>)>>>,
}

#[async_trait]
impl Archiver for BundleWitness {
    fn slot(&self) -> Slot {
        self.slot
    }

    async fn archive(&self, url: &Url, bundle: Option<&Bundle>) -> Result<String, BackendError> {
        let addr = bundle.map(|b| std::ptr::from_ref(b) as usize);
        self.seen.lock().unwrap().push((url.to_string(), addr));
        Ok(match bundle {
            Some(b) => format!("bundled:{}", b.title),
            None => format!("fetched:{url}"),
        })
    }
}

/// Sleeps far past any test deadline.
struct Stalled;

#[async_trait]
impl Archiver for Stalled {
    fn slot(&self) -> Slot {
        Slot::Ip
    }

    async fn archive(&self, _url: &Url, _bundle: Option<&Bundle>) -> Result<String, BackendError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok("never".to_string())
    }
}

/// Takes a second of (paused) time before succeeding.
struct Slow;

#[async_trait]
impl Archiver for Slow {
    fn slot(&self) -> Slot {
        Slot::Ia
    }

    async fn archive(&self, url: &Url, _bundle: Option<&Bundle>) -> Result<String, BackendError> {
        tokio::time::sleep(Duration::from_secs(1)).await;
        Ok(format!("slow:{url}"))
    }
}

/// Tracks how many calls run at once.
struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl Archiver for Gauge {
    fn slot(&self) -> Slot {
        Slot::Ia
    }

    async fn archive(&self, url: &Url, _bundle: Option<&Bundle>) -> Result<String, BackendError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(url.to_string())
    }
}

/// Bundle provider that counts calls and can skip URLs or fail outright.
#[derive(Default)]
struct CountingProvider {
    calls: AtomicUsize,
    skip: Vec<String>,
    fail: bool,
}

#[async_trait]
impl BundleProvider for CountingProvider {
    async fn produce(&self, urls: &[String]) -> Result<Bundles> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("capture backend unavailable");
        }
        let mut bundles = Bundles::new();
        for url in urls.iter().filter(|u| !self.skip.contains(u)) {
            bundles.insert(Bundle {
                src: url.clone(),
                title: format!("title of {url}"),
                html: "<html></html>".to_string(),
                ..Bundle::default()
            });
        }
        Ok(bundles)
    }
}

fn slots(on: &[Slot]) -> Slots {
    Slot::WRITABLE
        .into_iter()
        .map(|slot| (slot, on.contains(&slot)))
        .collect()
}

fn urls(list: &[&str]) -> Vec<String> {
    list.iter().map(ToString::to_string).collect()
}

fn echo_registry() -> Registry {
    let mut registry = Registry::new(4);
    registry.register_archiver(Arc::new(Echo { slot: Slot::Ia, fail: None }));
    registry.register_archiver(Arc::new(Echo { slot: Slot::Is, fail: None }));
    registry.register_archiver(Arc::new(Echo {
        slot: Slot::Ip,
        fail: Some(BackendError::Status(502)),
    }));
    registry.register_archiver(Arc::new(Echo {
        slot: Slot::Ph,
        fail: Some(BackendError::RateLimited),
    }));
    registry
}

fn witness_dispatcher(
    provider: Arc<CountingProvider>,
) -> (Dispatcher, Arc<Mutex<Vec<(String, Option<usize>)>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut registry = Registry::new(4);
    registry.register_archiver(Arc::new(BundleWitness { slot: Slot::Ip, seen: Arc::clone(&seen) }));
    registry.register_archiver(Arc::new(BundleWitness { slot: Slot::Ph, seen: Arc::clone(&seen) }));
    let dispatcher =
        Dispatcher::new(Arc::new(registry), Duration::from_secs(5)).with_bundle_provider(provider);
    (dispatcher, seen)
}

#[tokio::test]
async fn test_every_url_gets_one_record_per_enabled_slot() {
    let dispatcher = Dispatcher::new(Arc::new(echo_registry()), Duration::from_secs(5));
    let input = urls(&["https://example.com/", "https://example.org/a", "http://example.net/b?c=d"]);

    let batch = dispatcher.wayback(&input, &slots(&Slot::WRITABLE)).await.unwrap();

    assert_eq!(batch.collects.len(), input.len() * Slot::WRITABLE.len());
    for url in &input {
        let for_url: Vec<_> = batch.collects.iter().filter(|c| &c.src == url).collect();
        assert_eq!(for_url.len(), Slot::WRITABLE.len());
    }
    assert!(batch.collects.iter().all(|c| !c.destination().is_empty()));

    let failed = batch.collects.iter().filter(|c| !c.is_archived()).count();
    assert_eq!(failed, input.len() * 2);
    assert!(batch
        .collects
        .iter()
        .filter(|c| c.slot == Slot::Ip)
        .all(|c| c.outcome == Outcome::Failed(BackendError::Status(502))));
}

#[tokio::test]
async fn test_single_enabled_slot_end_to_end() {
    let dispatcher = Dispatcher::new(Arc::new(echo_registry()), Duration::from_secs(5));
    let mut enabled = Slots::new();
    enabled.insert(Slot::Ia, true);
    enabled.insert(Slot::Is, false);

    let batch = dispatcher
        .wayback(&urls(&["https://example.com/"]), &enabled)
        .await
        .unwrap();

    assert_eq!(batch.collects.len(), 1);
    let collect = &batch.collects[0];
    assert_eq!(collect.slot, Slot::Ia);
    assert_eq!(collect.src, "https://example.com/");
    assert_eq!(collect.ext, Slot::Ia.extra());
    assert!(!collect.destination().is_empty());
}

#[tokio::test]
async fn test_bundle_provider_runs_once_and_bundle_is_shared() {
    let provider = Arc::new(CountingProvider::default());
    let (dispatcher, seen) = witness_dispatcher(Arc::clone(&provider));
    let input = urls(&["https://example.com/", "https://example.org/"]);

    let batch = dispatcher
        .wayback(&input, &slots(&[Slot::Ip, Slot::Ph]))
        .await
        .unwrap();

    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    assert_eq!(batch.collects.len(), 4);
    assert!(batch
        .collects
        .iter()
        .all(|c| c.destination().starts_with("bundled:")));

    let seen = seen.lock().unwrap();
    let mut by_url: HashMap<&str, Vec<Option<usize>>> = HashMap::new();
    for (url, addr) in seen.iter() {
        by_url.entry(url.as_str()).or_default().push(*addr);
    }
    assert_eq!(by_url.len(), 2);
    for addrs in by_url.values() {
        assert_eq!(addrs.len(), 2);
        assert!(addrs[0].is_some());
        assert_eq!(addrs[0], addrs[1]);
    }
}

#[tokio::test]
async fn test_missing_bundle_falls_back_per_url() {
    let provider = Arc::new(CountingProvider {
        skip: vec!["https://example.org/".to_string()],
        ..CountingProvider::default()
    });
    let (dispatcher, _) = witness_dispatcher(Arc::clone(&provider));
    let input = urls(&["https://example.com/", "https://example.org/"]);

    let batch = dispatcher
        .wayback(&input, &slots(&[Slot::Ip, Slot::Ph]))
        .await
        .unwrap();

    assert_eq!(batch.collects.len(), 4);
    for collect in &batch.collects {
        if collect.src == "https://example.org/" {
            assert!(collect.destination().starts_with("fetched:"));
        } else {
            assert!(collect.destination().starts_with("bundled:"));
        }
    }
}

#[tokio::test]
async fn test_bundle_provider_failure_does_not_abort() {
    let provider = Arc::new(CountingProvider {
        fail: true,
        ..CountingProvider::default()
    });
    let (dispatcher, _) = witness_dispatcher(Arc::clone(&provider));
    let input = urls(&["https://example.com/", "https://example.org/"]);

    let batch = dispatcher
        .wayback(&input, &slots(&[Slot::Ip, Slot::Ph]))
        .await
        .unwrap();

    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    assert_eq!(batch.collects.len(), 4);
    assert!(batch.bundles.is_empty());
    assert!(batch
        .collects
        .iter()
        .all(|c| c.destination().starts_with("fetched:")));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_url_is_a_hard_error_with_partial_results() {
    let mut registry = Registry::new(4);
    registry.register_archiver(Arc::new(Slow));
    let dispatcher = Dispatcher::new(Arc::new(registry), Duration::from_secs(60));
    let input = urls(&["https://example.com/", "::not a url::"]);

    let err = dispatcher
        .wayback(&input, &slots(&[Slot::Ia]))
        .await
        .unwrap_err();

    let (url, partial) = match err {
        DispatchError::InvalidUrl { url, partial, .. } => (url, partial),
        other => panic!("expected an invalid URL error, got {other}"),
    };
    assert_eq!(url, "::not a url::");
    // The first URL was mid-call when the batch was cancelled; its record survives.
    assert_eq!(partial.len(), 1);
    assert_eq!(partial[0].src, "https://example.com/");
    assert_eq!(partial[0].slot, Slot::Ia);
    assert_eq!(
        partial[0].outcome,
        Outcome::Archived("slow:https://example.com/".to_string())
    );
}

#[tokio::test]
async fn test_invalid_url_keeps_only_valid_records() {
    let dispatcher = Dispatcher::new(Arc::new(echo_registry()), Duration::from_secs(5));
    let input = urls(&["https://example.com/", "::not a url::", "https://example.org/"]);

    let err = dispatcher
        .wayback(&input, &slots(&[Slot::Ia, Slot::Is]))
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::InvalidUrl { .. }));
    let partial = err.partial();
    assert!(partial.len() <= 4);
    assert!(partial.iter().all(|c| c.src != "::not a url::"));
    assert!(partial.iter().all(|c| !c.destination().is_empty()));
}

#[tokio::test]
async fn test_no_enabled_slots_is_archive_failure() {
    let provider = Arc::new(CountingProvider::default());
    let (dispatcher, seen) = witness_dispatcher(Arc::clone(&provider));

    let err = dispatcher
        .wayback(&urls(&["https://example.com/"]), &slots(&[]))
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::NoResults));
    assert_eq!(err.to_string(), "archives failure");
    assert!(err.partial().is_empty());
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_deadline_records_every_pending_task() {
    let mut registry = Registry::new(1);
    registry.register_archiver(Arc::new(Stalled));
    registry.register_archiver(Arc::new(Echo { slot: Slot::Ia, fail: None }));
    let dispatcher = Dispatcher::new(Arc::new(registry), Duration::from_secs(2));
    let input = urls(&["https://example.com/", "https://example.org/", "https://example.net/"]);

    let batch = dispatcher
        .wayback(&input, &slots(&[Slot::Ia, Slot::Ip]))
        .await
        .unwrap();

    assert_eq!(batch.collects.len(), 6);
    for collect in &batch.collects {
        match collect.slot {
            Slot::Ia => assert!(collect.is_archived()),
            _ => assert_eq!(collect.outcome, Outcome::Failed(BackendError::DeadlineExceeded)),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_per_slot_concurrency_is_bounded() {
    let gauge = Arc::new(Gauge {
        current: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let mut registry = Registry::new(2);
    registry.register_archiver(Arc::clone(&gauge) as Arc<dyn Archiver>);
    let dispatcher = Dispatcher::new(Arc::new(registry), Duration::from_secs(60));
    let input: Vec<String> = (0..8).map(|i| format!("https://example.com/{i}")).collect();

    let batch = dispatcher.wayback(&input, &slots(&[Slot::Ia])).await.unwrap();

    assert_eq!(batch.collects.len(), 8);
    assert!(batch.collects.iter().all(|c| c.is_archived()));
    assert_eq!(gauge.peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_empty_url_list() {
    let dispatcher = Dispatcher::new(Arc::new(echo_registry()), Duration::from_secs(5));
    let err = dispatcher.wayback(&[], &slots(&[Slot::Ia])).await.unwrap_err();
    assert!(matches!(err, DispatchError::EmptyInput));
}
