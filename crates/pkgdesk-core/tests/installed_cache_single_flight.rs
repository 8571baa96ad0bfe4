mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use common::{FakeGateway, cache_for, wait_until};
use pkgdesk_core::mapping::{DefaultPackageMapper, PackageMapper};
use pkgdesk_core::models::{CoreError, CoreErrorKind, EnginePackage, PackageRecord};
use pkgdesk_core::{InstalledPackageCache, ProgressReporter};

/// Panics on its first call, then maps normally.
#[derive(Default)]
struct PanicsOnceMapper {
    panicked: AtomicBool,
}

impl PackageMapper for PanicsOnceMapper {
    fn map(&self, package: &EnginePackage) -> Result<PackageRecord, CoreError> {
        if !self.panicked.swap(true, Ordering::SeqCst) {
            panic!("mapper bug on {}", package.id);
        }
        DefaultPackageMapper.map(package)
    }
}

#[tokio::test]
async fn first_get_calls_engine_and_marks_records_installed() {
    let gateway = Arc::new(FakeGateway::with_packages(&[("git", "2.43.0"), ("7zip", "23.1")]));
    let (cache, progress) = cache_for(gateway.clone());

    let snapshot = cache.get(false).await.unwrap();

    assert_eq!(gateway.list_calls(), 1);
    assert_eq!(snapshot.len(), 2);
    assert!(snapshot.iter().all(|record| record.is_installed));
    assert_eq!(snapshot[0].id.as_str(), "git");
    assert_eq!(snapshot[1].id.as_str(), "7zip");

    let counters = progress.counters();
    assert_eq!((counters.started, counters.stopped), (1, 1));
    assert!(!progress.is_active());
}

#[tokio::test]
async fn cached_get_does_not_touch_engine() {
    let gateway = Arc::new(FakeGateway::with_packages(&[("git", "2.43.0")]));
    let (cache, _progress) = cache_for(gateway.clone());

    let first = cache.get(false).await.unwrap();
    let second = cache.get(false).await.unwrap();

    assert_eq!(gateway.list_calls(), 1);
    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn forced_get_replaces_snapshot() {
    let gateway = Arc::new(FakeGateway::with_packages(&[("git", "2.43.0")]));
    let (cache, _progress) = cache_for(gateway.clone());

    let first = cache.get(false).await.unwrap();
    let second = cache.get(true).await.unwrap();

    assert_eq!(gateway.list_calls(), 2);
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&second, &cache.peek().unwrap()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_forced_gets_share_one_engine_call() {
    let gateway = Arc::new(FakeGateway::with_packages(&[("git", "2.43.0")]));
    let gate = gateway.gate();
    let (cache, progress) = cache_for(gateway.clone());

    let mut handles = Vec::new();
    for _ in 0..16 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move { cache.get(true).await }));
    }

    wait_until(|| gateway.list_calls() == 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(cache.is_refreshing());
    gate.open();

    let mut snapshots = Vec::new();
    for handle in handles {
        snapshots.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(gateway.list_calls(), 1);
    assert_eq!(gateway.peak_in_flight(), 1);
    assert!(
        snapshots
            .iter()
            .all(|snapshot| Arc::ptr_eq(snapshot, &snapshots[0]))
    );
    let counters = progress.counters();
    assert_eq!((counters.started, counters.stopped), (1, 1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cached_caller_joins_in_flight_refresh_on_empty_cache() {
    let gateway = Arc::new(FakeGateway::with_packages(&[("git", "2.43.0")]));
    let gate = gateway.gate();
    let (cache, _progress) = cache_for(gateway.clone());

    let forced = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.get(true).await })
    };
    wait_until(|| gateway.list_calls() == 1).await;

    let cached = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.get(false).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    gate.open();

    let forced = forced.await.unwrap().unwrap();
    let cached = cached.await.unwrap().unwrap();
    assert!(Arc::ptr_eq(&forced, &cached));
    assert_eq!(gateway.list_calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_the_same_error() {
    let gateway = Arc::new(FakeGateway::with_packages(&[("git", "2.43.0")]));
    let gate = gateway.gate();
    gateway.fail_next_lists(1);
    let (cache, progress) = cache_for(gateway.clone());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move { cache.get(true).await }));
    }
    wait_until(|| gateway.list_calls() == 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    gate.open();

    let mut errors = Vec::new();
    for handle in handles {
        errors.push(handle.await.unwrap().unwrap_err());
    }

    assert_eq!(gateway.list_calls(), 1);
    assert!(errors.iter().all(|error| error == &errors[0]));
    assert_eq!(errors[0].kind, CoreErrorKind::Engine);
    assert_eq!(errors[0].root_cause().kind, CoreErrorKind::ProcessFailure);
    assert!(!progress.is_active());
    assert!(cache.peek().is_none());
}

#[tokio::test]
async fn failed_refresh_keeps_last_good_snapshot() {
    let gateway = Arc::new(FakeGateway::with_packages(&[("git", "2.43.0")]));
    let (cache, progress) = cache_for(gateway.clone());

    let good = cache.get(false).await.unwrap();

    gateway.fail_next_lists(1);
    let error = cache.get(true).await.unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::Engine);

    let after = cache.get(false).await.unwrap();
    assert!(Arc::ptr_eq(&good, &after));
    assert_eq!(gateway.list_calls(), 2);

    let counters = progress.counters();
    assert_eq!(counters.started, counters.stopped);
    assert!(!progress.is_active());
}

#[tokio::test]
async fn invalidate_forces_next_cached_get_to_call_engine() {
    let gateway = Arc::new(FakeGateway::with_packages(&[("git", "2.43.0")]));
    let (cache, _progress) = cache_for(gateway.clone());

    cache.get(false).await.unwrap();
    let before = cache.generation();
    let after = cache.invalidate();
    assert_eq!(after, before + 1);
    assert!(cache.peek().is_none());

    cache.get(false).await.unwrap();
    assert_eq!(gateway.list_calls(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn refresh_since_waits_out_stale_refresh_without_overlap() {
    let gateway = Arc::new(FakeGateway::with_packages(&[("git", "2.43.0")]));
    let gate = gateway.gate();
    let (cache, _progress) = cache_for(gateway.clone());

    let stale = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.get(true).await })
    };
    wait_until(|| gateway.list_calls() == 1).await;

    let generation = cache.invalidate();
    let fresh = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.refresh_since(generation).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(gateway.list_calls(), 1);

    gate.open();
    let stale = stale.await.unwrap().unwrap();
    let fresh = fresh.await.unwrap().unwrap();

    assert_eq!(gateway.list_calls(), 2);
    assert_eq!(gateway.peak_in_flight(), 1);
    assert!(!Arc::ptr_eq(&stale, &fresh));
    assert!(Arc::ptr_eq(&fresh, &cache.peek().unwrap()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn abandoned_caller_does_not_strand_refresh() {
    let gateway = Arc::new(FakeGateway::with_packages(&[("git", "2.43.0")]));
    let gate = gateway.gate();
    let (cache, progress) = cache_for(gateway.clone());

    let abandoned = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.get(true).await })
    };
    wait_until(|| gateway.list_calls() == 1).await;
    abandoned.abort();
    let _ = abandoned.await;

    gate.open();
    wait_until(|| !cache.is_refreshing()).await;

    let snapshot = cache.get(false).await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(gateway.list_calls(), 1);
    assert!(!progress.is_active());
}

#[tokio::test]
async fn unmappable_entries_are_skipped() {
    let gateway = Arc::new(FakeGateway::with_packages(&[
        ("git", "2.43.0"),
        ("broken", "not-a-version"),
        ("7zip", "23.1"),
    ]));
    let (cache, _progress) = cache_for(gateway);

    let snapshot = cache.get(false).await.unwrap();
    let ids: Vec<_> = snapshot.iter().map(|record| record.id.as_str()).collect();
    assert_eq!(ids, vec!["git", "7zip"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn panicking_refresh_fails_waiters_and_recovers() {
    let gateway = Arc::new(FakeGateway::with_packages(&[("git", "2.43.0")]));
    let gate = gateway.gate();
    let progress = Arc::new(ProgressReporter::new());
    let cache = InstalledPackageCache::new(
        gateway.clone(),
        Arc::new(PanicsOnceMapper::default()),
        progress.clone(),
    );

    let callers: Vec<_> = (0..4)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get(false).await })
        })
        .collect();
    wait_until(|| gateway.list_calls() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    gate.open();

    for caller in callers {
        let error = tokio::time::timeout(Duration::from_secs(2), caller)
            .await
            .expect("waiter stranded by a panicking refresh")
            .unwrap()
            .unwrap_err();
        assert_eq!(error.kind, CoreErrorKind::Engine);
        assert_eq!(error.root_cause().kind, CoreErrorKind::Internal);
    }
    assert!(!cache.is_refreshing());
    assert!(!progress.is_active());

    let snapshot = cache.get(false).await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(gateway.list_calls(), 2);
}
