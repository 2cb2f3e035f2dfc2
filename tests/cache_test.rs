//! Tests for [`AsyncCache`]: single-flight refresh and serve-stale reads.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use huginn::{
    AsyncCache, Config, Expiration, FnLoader, HuginnError, KeyStatus, LoaderRegistry, Lookup,
};

type Seen = Arc<Mutex<Vec<(String, String)>>>;

/// Cache with a counting loader on prefix `PROF` that returns `value`.
fn counting_cache(config: Config, value: &'static str) -> (AsyncCache<String>, Arc<AtomicU32>, Seen) {
    let calls = Arc::new(AtomicU32::new(0));
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let cache = AsyncCache::builder()
        .config(config)
        .on_error(move |key: &str, err: &HuginnError| {
            sink.lock().unwrap().push((key.to_owned(), err.to_string()));
        })
        .build()
        .unwrap();
    let counter = Arc::clone(&calls);
    cache
        .loaders()
        .register_fn("PROF", move |_key| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(value.to_string()) }
        })
        .unwrap();
    (cache, calls, seen)
}

/// Let spawned refresh tasks run (time is paused, so this is instant).
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn cold_key_then_loaded_value() {
    let (cache, calls, _) = counting_cache(Config::new(), "profile_201");

    let first = cache.get("PROF_1");
    assert_eq!(first.value, None);
    assert_eq!(first.status, KeyStatus::InProgress);

    settle().await;

    let second = cache.get("PROF_1");
    assert_eq!(second.value.as_deref(), Some("profile_201"));
    assert_eq!(second.status, KeyStatus::Done);
    assert_eq!(cache.status("PROF_1"), KeyStatus::Done);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn fresh_hit_does_not_touch_tracker() {
    let (cache, calls, _) = counting_cache(Config::new(), "v");
    cache
        .store()
        .set("PROF_9", "cached".into(), Expiration::Default);

    let got = cache.get("PROF_9");
    assert_eq!(got.value.as_deref(), Some("cached"));
    assert_eq!(got.status, KeyStatus::Done);
    assert_eq!(cache.status("PROF_9"), KeyStatus::NotPresent);
    assert!(cache.tracker().is_empty());

    settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn empty_key_is_invalid_and_changes_nothing() {
    let (cache, calls, _) = counting_cache(Config::new(), "v");

    for _ in 0..3 {
        let got = cache.get("");
        assert_eq!(got.value, None);
        assert_eq!(got.status, KeyStatus::InvalidKey);
    }
    assert!(matches!(cache.try_get(""), Err(HuginnError::InvalidKey)));
    assert!(matches!(
        cache.get_or_wait("").await,
        Err(HuginnError::InvalidKey)
    ));
    assert!(matches!(
        cache.insert("", "x".into()),
        Err(HuginnError::InvalidKey)
    ));

    settle().await;
    assert!(cache.tracker().is_empty());
    assert_eq!(cache.store().get(""), Lookup::Missing);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn in_progress_key_returns_without_launching() {
    let (cache, calls, _) = counting_cache(Config::new(), "v");

    assert_eq!(cache.get("PROF_1").status, KeyStatus::InProgress);
    for _ in 0..10 {
        let got = cache.get("PROF_1");
        assert_eq!(got.status, KeyStatus::InProgress);
        assert_eq!(got.value, None);
    }

    settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cold_reads_fetch_once() {
    let calls = Arc::new(AtomicU32::new(0));
    let cache: AsyncCache<String> = AsyncCache::builder().build().unwrap();
    let counter = Arc::clone(&calls);
    cache
        .loaders()
        .register_fn("PROF", move |key| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(format!("{key}-loaded"))
            }
        })
        .unwrap();

    let barrier = Arc::new(std::sync::Barrier::new(32));
    let statuses: Vec<KeyStatus> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..32)
            .map(|_| {
                let cache = cache.clone();
                let barrier = Arc::clone(&barrier);
                s.spawn(move || {
                    barrier.wait();
                    cache.get("PROF_1").status
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(statuses.iter().all(|s| *s == KeyStatus::InProgress));

    for _ in 0..200 {
        if cache.status("PROF_1") == KeyStatus::Done {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(cache.status("PROF_1"), KeyStatus::Done);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        cache.get("PROF_1").value.as_deref(),
        Some("PROF_1-loaded")
    );
}

#[tokio::test(start_paused = true)]
async fn stale_value_is_served_while_refreshing() {
    let (cache, calls, _) = counting_cache(Config::new(), "new");
    cache.store().set(
        "PROF_1",
        "old".into(),
        Expiration::After(Duration::from_millis(10)),
    );
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(cache.store().get("PROF_1"), Lookup::Stale("old".into()));

    let got = cache.get("PROF_1");
    assert_eq!(got.value.as_deref(), Some("old"));
    assert_eq!(got.status, KeyStatus::Done);
    assert_eq!(cache.status("PROF_1"), KeyStatus::InProgress);

    // A second reader during the refresh still gets the stale value.
    let during = cache.get("PROF_1");
    assert_eq!(during.value.as_deref(), Some("old"));
    assert_eq!(during.status, KeyStatus::InProgress);

    settle().await;

    let after = cache.get("PROF_1");
    assert_eq!(after.value.as_deref(), Some("new"));
    assert_eq!(after.status, KeyStatus::Done);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn loader_failure_marks_error_and_notifies() {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let calls = Arc::new(AtomicU32::new(0));
    let cache: AsyncCache<String> = AsyncCache::builder()
        .on_error(move |key: &str, err: &HuginnError| {
            sink.lock().unwrap().push((key.to_owned(), err.to_string()));
        })
        .build()
        .unwrap();
    let counter = Arc::clone(&calls);
    cache
        .loaders()
        .register_fn("PROF", move |_key| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<String, _>(HuginnError::upstream("db down")) }
        })
        .unwrap();

    assert_eq!(cache.get("PROF_1").status, KeyStatus::InProgress);
    settle().await;

    assert_eq!(cache.status("PROF_1"), KeyStatus::Error);
    assert_eq!(cache.store().get("PROF_1"), Lookup::Missing);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![("PROF_1".to_string(), "upstream error: db down".to_string())]
    );

    // Error does not block the next attempt.
    assert_eq!(cache.get("PROF_1").status, KeyStatus::InProgress);
    settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_refresh_keeps_stale_value() {
    let cache: AsyncCache<String> = AsyncCache::builder()
        .on_error(|_: &str, _: &HuginnError| {})
        .build()
        .unwrap();
    cache
        .loaders()
        .register_fn("PROF", |_key| async {
            Err::<String, _>(HuginnError::upstream("timeout"))
        })
        .unwrap();
    cache.store().set(
        "PROF_1",
        "old".into(),
        Expiration::After(Duration::from_millis(5)),
    );
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(cache.get("PROF_1").value.as_deref(), Some("old"));
    settle().await;

    assert_eq!(cache.status("PROF_1"), KeyStatus::Error);
    assert_eq!(cache.store().get("PROF_1"), Lookup::Stale("old".into()));
}

#[tokio::test(start_paused = true)]
async fn unknown_prefix_is_a_fetch_failure() {
    let (cache, _, seen) = counting_cache(Config::new(), "v");

    assert_eq!(cache.get("ADUN_5890").status, KeyStatus::InProgress);
    assert_eq!(cache.get("XY").status, KeyStatus::InProgress);
    settle().await;

    assert_eq!(cache.status("ADUN_5890"), KeyStatus::Error);
    assert_eq!(cache.status("XY"), KeyStatus::Error);
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|(_, msg)| msg.contains("invalid_key")));
}

#[tokio::test(start_paused = true)]
async fn slow_loader_times_out() {
    let (cache, _, seen) = counting_cache(
        Config::new().fetch_timeout(Duration::from_millis(50)),
        "unused",
    );
    cache
        .loaders()
        .register_fn("SLOW", |_key| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok("late".to_string())
        })
        .unwrap();

    cache.get("SLOW_1");
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(cache.status("SLOW_1"), KeyStatus::Error);
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].1.contains("timed out"));
}

#[tokio::test(start_paused = true)]
async fn panicking_loader_is_reported() {
    let (cache, _, seen) = counting_cache(Config::new(), "unused");
    cache
        .loaders()
        .register_fn("BOOM", |_key| async {
            if true {
                panic!("loader bug");
            }
            Ok(String::new())
        })
        .unwrap();

    cache.get("BOOM_1");
    settle().await;

    assert_eq!(cache.status("BOOM_1"), KeyStatus::Error);
    assert!(seen.lock().unwrap()[0].1.contains("panicked"));
}

#[tokio::test(start_paused = true)]
async fn hung_refresh_is_reported_by_sweep() {
    let (cache, _, seen) = counting_cache(
        Config::new().purge_interval(Duration::from_millis(100)),
        "unused",
    );
    cache
        .loaders()
        .register_fn("HANG", |_key| async {
            std::future::pending::<()>().await;
            Ok(String::new())
        })
        .unwrap();

    cache.get("HANG_1");
    assert_eq!(cache.status("HANG_1"), KeyStatus::InProgress);

    tokio::time::sleep(Duration::from_millis(350)).await;

    assert_eq!(cache.status("HANG_1"), KeyStatus::NotPresent);
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, "HANG_1");
    assert!(seen[0].1.contains("blocked time exceeded"));
}

#[tokio::test(start_paused = true)]
async fn get_or_wait_waits_for_cold_key() {
    let calls = Arc::new(AtomicU32::new(0));
    let cache: AsyncCache<String> = AsyncCache::builder().build().unwrap();
    let counter = Arc::clone(&calls);
    cache
        .loaders()
        .register_fn("PROF", move |_key| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok("profile_201".to_string())
            }
        })
        .unwrap();

    let (waiter, other) = tokio::join!(cache.get_or_wait("PROF_1"), cache.get_or_wait("PROF_1"));

    let waiter = waiter.unwrap();
    assert_eq!(waiter.value.as_deref(), Some("profile_201"));
    assert_eq!(waiter.status, KeyStatus::Done);

    let other = other.unwrap();
    assert_eq!(other.value, None);
    assert_eq!(other.status, KeyStatus::InProgress);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn get_or_wait_returns_loader_error() {
    let cache: AsyncCache<String> = AsyncCache::builder()
        .on_error(|_: &str, _: &HuginnError| {})
        .build()
        .unwrap();
    cache
        .loaders()
        .register_fn("PROF", |_key| async {
            Err::<String, _>(HuginnError::upstream("db down"))
        })
        .unwrap();

    let err = cache.get_or_wait("PROF_1").await.unwrap_err();
    assert!(matches!(err, HuginnError::Upstream(_)));
    assert_eq!(cache.status("PROF_1"), KeyStatus::Error);
}

#[tokio::test(start_paused = true)]
async fn get_or_wait_serves_stale_without_waiting() {
    let (cache, _, _) = counting_cache(Config::new(), "new");
    cache.store().set(
        "PROF_1",
        "old".into(),
        Expiration::After(Duration::from_millis(5)),
    );
    tokio::time::sleep(Duration::from_millis(10)).await;

    let got = cache.get_or_wait("PROF_1").await.unwrap();
    assert_eq!(got.value.as_deref(), Some("old"));
    assert_eq!(got.status, KeyStatus::Done);
}

#[tokio::test(start_paused = true)]
async fn binding_expiration_overrides_config() {
    let (cache, _, _) = counting_cache(
        Config::new().expiration(Expiration::After(Duration::from_secs(1))),
        "short",
    );
    cache
        .loaders()
        .register_with_expiration(
            "PINN",
            Expiration::Never,
            FnLoader::new(|_key: String| async { Ok::<_, HuginnError>("pinned".to_string()) }),
        )
        .unwrap();

    cache.get("PROF_1");
    cache.get("PINN_1");
    settle().await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(cache.store().get("PROF_1"), Lookup::Stale("short".into()));
    assert_eq!(cache.store().get("PINN_1"), Lookup::Fresh("pinned".into()));
}

#[tokio::test(start_paused = true)]
async fn insert_writes_through() {
    let (cache, calls, _) = counting_cache(Config::new(), "v");
    cache.insert("PROF_1", "primed".into()).unwrap();

    assert_eq!(cache.status("PROF_1"), KeyStatus::Done);
    assert_eq!(cache.get("PROF_1").value.as_deref(), Some("primed"));
    settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn insert_during_refresh_keeps_single_flight() {
    let (cache, _, _) = counting_cache(
        Config::new().expiration(Expiration::After(Duration::from_millis(10))),
        "unused",
    );
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    cache
        .loaders()
        .register_fn("SLOW", move |_key| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok("loaded".to_string())
            }
        })
        .unwrap();

    assert_eq!(cache.get("SLOW_1").status, KeyStatus::InProgress);
    settle().await;
    cache.insert("SLOW_1", "primed".into()).unwrap();
    assert_eq!(cache.status("SLOW_1"), KeyStatus::InProgress);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let during = cache.get("SLOW_1");
    assert_eq!(during.value.as_deref(), Some("primed"));
    assert_eq!(during.status, KeyStatus::InProgress);
    settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(cache.status("SLOW_1"), KeyStatus::Done);
    assert_eq!(cache.store().get("SLOW_1").into_value().as_deref(), Some("loaded"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn huge_expiry_never_expires() {
    let config = Config::from_toml_str("[cache]\nexpiry_secs = 9223372036854775807\n").unwrap();
    let (cache, calls, seen) = counting_cache(config, "profile_201");

    cache.get("PROF_1");
    settle().await;

    assert_eq!(cache.status("PROF_1"), KeyStatus::Done);
    assert_eq!(cache.store().get("PROF_1"), Lookup::Fresh("profile_201".into()));
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn huge_intervals_are_accepted() {
    let config = Config::from_toml_str(
        "[cache]\npurge_interval_secs = 9223372036854775807\n\
         default_expiration_secs = 9223372036854775807\n\
         cleanup_interval_secs = 9223372036854775807\n",
    )
    .unwrap();
    let (cache, _, _) = counting_cache(config, "profile_201");

    assert_eq!(cache.get("PROF_1").status, KeyStatus::InProgress);
    settle().await;

    assert_eq!(cache.status("PROF_1"), KeyStatus::Done);
    assert_eq!(cache.store().get("PROF_1"), Lookup::Fresh("profile_201".into()));
}

#[tokio::test(start_paused = true)]
async fn shared_registry_routes_by_prefix() {
    let loaders = Arc::new(LoaderRegistry::<String>::new(4));
    loaders
        .register_fn("PROF", |key| async move { Ok(format!("profile:{key}")) })
        .unwrap();
    loaders
        .register_fn("ADUN", |key| async move { Ok(format!("adunit:{key}")) })
        .unwrap();
    let cache = AsyncCache::builder()
        .loaders(Arc::clone(&loaders))
        .build()
        .unwrap();

    cache.get("PROF_1");
    cache.get("ADUN_1");
    settle().await;

    assert_eq!(
        cache.get("PROF_1").value.as_deref(),
        Some("profile:PROF_1")
    );
    assert_eq!(cache.get("ADUN_1").value.as_deref(), Some("adunit:ADUN_1"));
}

#[test]
fn build_outside_runtime_fails() {
    let result = AsyncCache::<String>::builder().build();
    assert!(matches!(result, Err(HuginnError::Configuration(_))));
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let result = AsyncCache::<String>::builder()
        .config(Config::new().default_expiration(Duration::ZERO))
        .build();
    assert!(matches!(result, Err(HuginnError::Configuration(_))));
}
