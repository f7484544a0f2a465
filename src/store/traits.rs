use async_trait::async_trait;
use std::{fmt, sync::Arc, time::Duration};

use crate::error::StoreError;

/// Use-case a counter belongs to. Counters of different scopes never share a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Login,
    Api,
    Contact,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Login => "login",
            Scope::Api => "api",
            Scope::Contact => "contact",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a counter: a scope plus the caller identifier.
///
/// The identifier is whatever the caller handed in (an email, an IP, a user
/// id). It is stored and compared as-is and never parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    scope: Scope,
    identifier: String,
}

impl RateLimitKey {
    pub fn new(scope: Scope, identifier: &str) -> Self {
        Self {
            scope,
            identifier: identifier.to_string(),
        }
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope, self.identifier)
    }
}

/// Outcome of a single check, identical for every store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitResult {
    /// Whether the request is admitted.
    pub success: bool,
    /// Requests left in the current window.
    pub remaining: u64,
    /// When the current window ends, in milliseconds since the Unix epoch.
    pub reset: i64,
    /// The limit the request was checked against.
    pub limit: u64,
}

impl RateLimitResult {
    /// Builds a result from the count observed after the hit was applied.
    pub fn from_count(count: u64, limit: u64, reset: i64) -> Self {
        Self {
            success: count <= limit,
            remaining: limit.saturating_sub(count),
            reset,
            limit,
        }
    }

    /// Time left until `reset`, zero once it has passed.
    pub fn retry_after(&self) -> Duration {
        let now = chrono::Utc::now().timestamp_millis();
        Duration::from_millis(self.reset.saturating_sub(now).max(0) as u64)
    }
}

/// Storage strategy behind a rate limiter.
///
/// `check_and_increment` records one hit for `key` and reports whether it fits
/// into `limit` hits per `window`. Exceeding the limit is an `Ok` result with
/// `success == false`; `Err` is reserved for a store that could not answer.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn check_and_increment(
        &self,
        key: &RateLimitKey,
        limit: u64,
        window: Duration,
    ) -> Result<RateLimitResult, StoreError>;

    /// Drops the counters held for `key` under `window`.
    ///
    /// Stores without a reset path keep their counters until the window
    /// lapses.
    async fn reset(&self, key: &RateLimitKey, _window: Duration) -> Result<(), StoreError> {
        log::debug!("Store has no reset path, keeping counters for {}", key);
        Ok(())
    }
}

// Shared stores are handed around as `Arc`s, concrete or `dyn`.
#[async_trait]
impl<T> CounterStore for Arc<T>
where
    T: CounterStore + ?Sized,
{
    async fn check_and_increment(
        &self,
        key: &RateLimitKey,
        limit: u64,
        window: Duration,
    ) -> Result<RateLimitResult, StoreError> {
        (**self).check_and_increment(key, limit, window).await
    }

    async fn reset(&self, key: &RateLimitKey, window: Duration) -> Result<(), StoreError> {
        (**self).reset(key, window).await
    }
}
