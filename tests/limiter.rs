use async_trait::async_trait;
use ratelimit_guard::{
    error::StoreError,
    limiter::{Policy, RateLimiter, RateLimiters},
    store::{CounterStore, MemoryStore, RateLimitKey, RateLimitResult, Scope},
};
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

/// Stands in for Redis: plain counters, reset supported, can be switched off.
#[derive(Default)]
struct FakeBackend {
    counts: Mutex<HashMap<RateLimitKey, u64>>,
    down: AtomicBool,
    calls: AtomicUsize,
    reset_windows: Mutex<Vec<Duration>>,
}

impl FakeBackend {
    fn down() -> Self {
        let backend = Self::default();
        backend.down.store(true, Ordering::SeqCst);
        backend
    }
}

#[async_trait]
impl CounterStore for FakeBackend {
    async fn check_and_increment(
        &self,
        key: &RateLimitKey,
        limit: u64,
        window: Duration,
    ) -> Result<RateLimitResult, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Timeout(Duration::from_millis(250)));
        }

        let mut counts = self.counts.lock().unwrap();
        let count = counts.entry(key.clone()).or_insert(0);
        if *count <= limit {
            *count += 1;
        }
        let reset = chrono::Utc::now().timestamp_millis() + window.as_millis() as i64;
        Ok(RateLimitResult::from_count(*count, limit, reset))
    }

    async fn reset(&self, key: &RateLimitKey, window: Duration) -> Result<(), StoreError> {
        self.reset_windows.lock().unwrap().push(window);
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Timeout(Duration::from_millis(250)));
        }
        self.counts.lock().unwrap().remove(key);
        Ok(())
    }
}

fn outcomes(results: &[RateLimitResult]) -> Vec<(bool, u64)> {
    results.iter().map(|r| (r.success, r.remaining)).collect()
}

#[tokio::test]
async fn login_scenario_locks_out_sixth_attempt() {
    let limiters = RateLimiters::new(None);
    assert!(!limiters.is_backend_configured());

    let mut results = Vec::new();
    for _ in 0..6 {
        results.push(limiters.check_login("a@b.com").await);
    }

    assert_eq!(
        outcomes(&results),
        vec![
            (true, 4),
            (true, 3),
            (true, 2),
            (true, 1),
            (true, 0),
            (false, 0)
        ]
    );
    assert!(results.iter().all(|r| r.limit == 5));

    // The rejection points at the end of the window the first attempt opened.
    assert_eq!(results[5].reset, results[0].reset);
    let wait = results[5].retry_after();
    assert!(wait > Duration::from_secs(14 * 60));
    assert!(wait <= Duration::from_secs(15 * 60));
}

#[tokio::test]
async fn contact_scenario_recovers_after_window() {
    let local = Arc::new(MemoryStore::new());
    let policy = Policy::new(Policy::CONTACT.limit, Duration::from_millis(100));
    let limiter = RateLimiter::new(Scope::Contact, policy, local);

    for expected in [2, 1, 0] {
        let result = limiter.check("203.0.113.5").await;
        assert!(result.success);
        assert_eq!(result.remaining, expected);
    }
    let rejected = limiter.check("203.0.113.5").await;
    assert!(!rejected.success);
    assert_eq!(rejected.remaining, 0);

    tokio::time::sleep(Duration::from_millis(150)).await;

    let result = limiter.check("203.0.113.5").await;
    assert!(result.success);
    assert_eq!(result.remaining, 2);
}

#[tokio::test]
async fn primary_store_answers_when_healthy() {
    let backend = Arc::new(FakeBackend::default());
    let local = Arc::new(MemoryStore::new());
    let limiters = RateLimiters::with_stores(Arc::clone(&local), Some(backend.clone()));
    assert!(limiters.is_backend_configured());

    let result = limiters.check_api("user-42").await;
    assert!(result.success);
    assert_eq!(result.remaining, 99);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    assert!(local.is_empty());
}

#[tokio::test]
async fn failing_backend_falls_back_transparently() {
    let healthy = RateLimiters::with_stores(
        Arc::new(MemoryStore::new()),
        Some(Arc::new(FakeBackend::default())),
    );
    let local = Arc::new(MemoryStore::new());
    let backend = Arc::new(FakeBackend::down());
    let degraded = RateLimiters::with_stores(Arc::clone(&local), Some(backend.clone()));

    let mut expected = Vec::new();
    let mut actual = Vec::new();
    for _ in 0..5 {
        expected.push(healthy.check_contact("203.0.113.5").await);
        actual.push(degraded.check_contact("203.0.113.5").await);
    }

    assert_eq!(outcomes(&actual), outcomes(&expected));
    assert!(actual.iter().zip(&expected).all(|(a, e)| a.limit == e.limit));
    assert_eq!(backend.calls.load(Ordering::SeqCst), 5);
    assert_eq!(local.len(), 1);
}

#[tokio::test]
async fn fallback_is_per_call() {
    let local = Arc::new(MemoryStore::new());
    let backend = Arc::new(FakeBackend::down());
    let limiters = RateLimiters::with_stores(Arc::clone(&local), Some(backend.clone()));

    assert_eq!(limiters.check_api("10.0.0.1").await.remaining, 99);

    backend.down.store(false, Ordering::SeqCst);

    // Back on the primary, which has not seen the earlier hit.
    assert_eq!(limiters.check_api("10.0.0.1").await.remaining, 99);
    assert_eq!(limiters.check_api("10.0.0.1").await.remaining, 98);
    assert_eq!(
        local
            .get(&RateLimitKey::new(Scope::Api, "10.0.0.1"))
            .map(|r| r.count),
        Some(1)
    );
}

#[tokio::test]
async fn reset_login_unlocks_exhausted_identifier() {
    let backend = Arc::new(FakeBackend::default());
    let limiters = RateLimiters::with_stores(Arc::new(MemoryStore::new()), Some(backend.clone()));

    for _ in 0..6 {
        limiters.check_login("a@b.com").await;
    }
    assert!(!limiters.check_login("a@b.com").await.success);

    limiters.reset_login("a@b.com").await;

    let result = limiters.check_login("a@b.com").await;
    assert!(result.success);
    assert_eq!(result.remaining, 4);
    assert_eq!(
        *backend.reset_windows.lock().unwrap(),
        vec![Policy::LOGIN.window]
    );
}

#[tokio::test]
async fn reset_only_touches_the_login_scope() {
    let backend = Arc::new(FakeBackend::default());
    let limiters = RateLimiters::with_stores(Arc::new(MemoryStore::new()), Some(backend));

    limiters.check_login("203.0.113.5").await;
    limiters.check_contact("203.0.113.5").await;
    limiters.reset_login("203.0.113.5").await;

    assert_eq!(limiters.check_login("203.0.113.5").await.remaining, 4);
    assert_eq!(limiters.check_contact("203.0.113.5").await.remaining, 1);
}

#[tokio::test]
async fn reset_failure_is_swallowed() {
    let limiters = RateLimiters::with_stores(
        Arc::new(MemoryStore::new()),
        Some(Arc::new(FakeBackend::down())),
    );

    limiters.check_login("a@b.com").await;
    limiters.reset_login("a@b.com").await;

    // Still counting on the local store, which has no reset path.
    assert_eq!(limiters.check_login("a@b.com").await.remaining, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_checks_admit_exactly_the_limit() {
    let limiters = Arc::new(RateLimiters::new(None));
    let extra = 20;

    let handles: Vec<_> = (0..Policy::LOGIN.limit as usize + extra)
        .map(|_| {
            let limiters = Arc::clone(&limiters);
            tokio::spawn(async move { limiters.check_login("a@b.com").await.success })
        })
        .collect();

    let mut admitted = 0;
    let mut rejected = 0;
    for handle in handles {
        if handle.await.unwrap() {
            admitted += 1;
        } else {
            rejected += 1;
        }
    }

    assert_eq!(admitted, Policy::LOGIN.limit as usize);
    assert_eq!(rejected, extra);
}

#[cfg(feature = "redis")]
#[tokio::test]
async fn unreachable_redis_degrades_to_local_counters() {
    use ratelimit_guard::config::BackendConfig;

    let config =
        BackendConfig::new("redis://127.0.0.1:1", "token").timeout(Duration::from_millis(200));
    let limiters = RateLimiters::new(Some(config));
    assert!(limiters.is_backend_configured());

    let mut results = Vec::new();
    for _ in 0..4 {
        results.push(limiters.check_contact("203.0.113.5").await);
    }
    assert_eq!(
        outcomes(&results),
        vec![(true, 2), (true, 1), (true, 0), (false, 0)]
    );

    // Must not fail the caller's login flow.
    limiters.reset_login("203.0.113.5").await;
    assert_eq!(limiters.local_store().len(), 1);
}
