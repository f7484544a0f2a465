//! Per-use-case rate limiters with a distributed primary store and a local fallback.

use log::{debug, error, info};
use std::{sync::Arc, time::Duration};

use crate::{
    config::BackendConfig,
    store::{CounterStore, MemoryStore, RateLimitKey, RateLimitResult, Scope},
};

/// Limit and window of one use-case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    /// Maximum requests allowed in one window
    pub limit: u64,
    /// Duration of the window
    pub window: Duration,
}

impl Policy {
    /// Login attempts: 5 per 15 minutes, keyed by email.
    pub const LOGIN: Policy = Policy::new(5, Duration::from_secs(15 * 60));
    /// General API traffic: 100 per minute, keyed by user id or IP.
    pub const API: Policy = Policy::new(100, Duration::from_secs(60));
    /// Public contact form: 3 per minute, keyed by IP.
    pub const CONTACT: Policy = Policy::new(3, Duration::from_secs(60));

    pub const fn new(limit: u64, window: Duration) -> Self {
        Self { limit, window }
    }
}

impl Scope {
    /// Policy the use-case runs with in production.
    pub fn policy(&self) -> Policy {
        match self {
            Scope::Login => Policy::LOGIN,
            Scope::Api => Policy::API,
            Scope::Contact => Policy::CONTACT,
        }
    }
}

/// Rate limiter of one use-case.
///
/// Checks go to the primary store when one is wired in. If it fails, the
/// failure is logged and the same check runs against the local store, so a
/// caller always gets a [`RateLimitResult`] of the same shape.
///
/// The limiter owns no counters itself.
pub struct RateLimiter {
    scope: Scope,
    policy: Policy,
    primary: Option<Arc<dyn CounterStore>>,
    fallback: Arc<MemoryStore>,
}

impl RateLimiter {
    /// Creates a limiter that only uses the local store.
    pub fn new(scope: Scope, policy: Policy, fallback: Arc<MemoryStore>) -> Self {
        Self {
            scope,
            policy,
            primary: None,
            fallback,
        }
    }

    /// Puts `store` in front of the local store.
    pub fn with_primary(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.primary = Some(store);
        self
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// Whether checks try a distributed store first.
    pub fn is_distributed(&self) -> bool {
        self.primary.is_some()
    }

    /// Records one hit for `identifier` and reports whether it is admitted.
    ///
    /// Never fails: a rejected request is `success == false`, and a failing
    /// primary store is replaced by the local store for this call.
    pub async fn check(&self, identifier: &str) -> RateLimitResult {
        let key = RateLimitKey::new(self.scope, identifier);
        let Policy { limit, window } = self.policy;

        if let Some(primary) = &self.primary {
            match primary.check_and_increment(&key, limit, window).await {
                Ok(result) => return result,
                Err(err) => {
                    error!(
                        "Distributed rate limit check failed for {}, using local counter: {}",
                        key, err
                    );
                }
            }
        }

        let result = self.fallback.hit(&key, limit, window);
        debug!(
            "Local rate limit check for {}: success={}, remaining={}",
            key, result.success, result.remaining
        );
        result
    }

    /// Clears the distributed counters of `identifier`, best effort.
    ///
    /// Failures are logged and swallowed. Counters held by the local store
    /// are left alone; they expire with their window.
    pub async fn reset(&self, identifier: &str) {
        let Some(primary) = &self.primary else {
            return;
        };

        let key = RateLimitKey::new(self.scope, identifier);
        if let Err(err) = primary.reset(&key, self.policy.window).await {
            error!("Failed to reset rate limit for {}: {}", key, err);
        }
    }
}

/// The limiters of every use-case, wired once at process start.
///
/// ```rust
/// use ratelimit_guard::limiter::RateLimiters;
///
/// # #[tokio::main]
/// # async fn main() {
/// let limiters = RateLimiters::new(None);
/// assert!(!limiters.is_backend_configured());
///
/// let result = limiters.check_login("a@b.com").await;
/// assert!(result.success);
/// assert_eq!(result.remaining, 4);
/// # }
/// ```
pub struct RateLimiters {
    login: Arc<RateLimiter>,
    api: Arc<RateLimiter>,
    contact: Arc<RateLimiter>,
    local: Arc<MemoryStore>,
}

impl RateLimiters {
    /// Builds the limiters from the `RATE_LIMIT_BACKEND_*` environment variables.
    pub fn from_env() -> Self {
        Self::new(BackendConfig::from_env())
    }

    /// Builds the limiters, using a Redis store as primary when `backend` is set.
    ///
    /// A configuration the Redis client rejects is logged and the limiters
    /// run on the local store only.
    pub fn new(backend: Option<BackendConfig>) -> Self {
        let primary = backend.and_then(|config| connect(&config));
        Self::with_stores(Arc::new(MemoryStore::new()), primary)
    }

    /// Builds the limiters on explicit stores.
    pub fn with_stores(local: Arc<MemoryStore>, primary: Option<Arc<dyn CounterStore>>) -> Self {
        let build = |scope: Scope| {
            let limiter = RateLimiter::new(scope, scope.policy(), Arc::clone(&local));
            let limiter = match &primary {
                Some(store) => limiter.with_primary(Arc::clone(store)),
                None => limiter,
            };
            Arc::new(limiter)
        };

        let limiters = Self {
            login: build(Scope::Login),
            api: build(Scope::Api),
            contact: build(Scope::Contact),
            local: Arc::clone(&local),
        };
        info!(
            "Rate limiters ready, distributed backend {}",
            if limiters.is_backend_configured() {
                "enabled"
            } else {
                "disabled, using local counters"
            }
        );
        limiters
    }

    pub async fn check_login(&self, identifier: &str) -> RateLimitResult {
        self.login.check(identifier).await
    }

    pub async fn check_api(&self, identifier: &str) -> RateLimitResult {
        self.api.check(identifier).await
    }

    pub async fn check_contact(&self, identifier: &str) -> RateLimitResult {
        self.contact.check(identifier).await
    }

    /// Forgets failed login attempts of `identifier`, e.g. after a successful login.
    pub async fn reset_login(&self, identifier: &str) {
        self.login.reset(identifier).await
    }

    /// Whether checks go to the distributed backend before the local store.
    pub fn is_backend_configured(&self) -> bool {
        self.login.is_distributed()
    }

    /// Limiter of `scope`, e.g. to wrap it in [`crate::RateLimit`].
    pub fn get(&self, scope: Scope) -> Arc<RateLimiter> {
        match scope {
            Scope::Login => Arc::clone(&self.login),
            Scope::Api => Arc::clone(&self.api),
            Scope::Contact => Arc::clone(&self.contact),
        }
    }

    /// The local store shared by all limiters.
    pub fn local_store(&self) -> Arc<MemoryStore> {
        Arc::clone(&self.local)
    }
}

#[cfg(feature = "redis")]
fn connect(config: &BackendConfig) -> Option<Arc<dyn CounterStore>> {
    match crate::store::RedisStore::new(config) {
        Ok(store) => Some(Arc::new(store)),
        Err(err) => {
            error!("Invalid rate limit backend configuration: {}", err);
            None
        }
    }
}

#[cfg(not(feature = "redis"))]
fn connect(_config: &BackendConfig) -> Option<Arc<dyn CounterStore>> {
    log::warn!("Rate limit backend configured but the `redis` feature is disabled");
    None
}
