use actix_web::{HttpResponse, dev::ServiceRequest, http::header};
use std::time::Duration;

use crate::store::RateLimitResult;

/// Environment variable holding the Redis URL.
pub const ENV_BACKEND_URL: &str = "RATE_LIMIT_BACKEND_URL";
/// Environment variable holding the Redis access token.
pub const ENV_BACKEND_TOKEN: &str = "RATE_LIMIT_BACKEND_TOKEN";
/// Optional override of the per-call timeout, in milliseconds.
pub const ENV_BACKEND_TIMEOUT_MS: &str = "RATE_LIMIT_BACKEND_TIMEOUT_MS";
/// Optional override of the Redis key prefix.
pub const ENV_BACKEND_PREFIX: &str = "RATE_LIMIT_BACKEND_PREFIX";

/// Default upper bound of one round trip to the backend.
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_millis(250);
/// Default prefix for Redis keys used by the rate limiter.
pub const DEFAULT_BACKEND_PREFIX: &str = "ratelimit:";

/// Connection settings of the distributed counter backend.
///
/// # Examples
///
/// ```rust
/// use ratelimit_guard::config::BackendConfig;
/// use std::time::Duration;
///
/// let config = BackendConfig::new("rediss://cache.internal:6379", "secret")
///     .timeout(Duration::from_millis(100))
///     .prefix("myapp:ratelimit:");
/// assert_eq!(config.timeout, Duration::from_millis(100));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Redis URL, `redis://` or `rediss://`
    pub url: String,
    /// Access token, sent as the Redis password
    pub token: String,
    /// Upper bound of a single check or reset, connect included
    pub timeout: Duration,
    /// Namespace of every key the store writes
    pub prefix: String,
}

impl BackendConfig {
    pub fn new(url: &str, token: &str) -> Self {
        Self {
            url: url.to_string(),
            token: token.to_string(),
            timeout: DEFAULT_BACKEND_TIMEOUT,
            prefix: DEFAULT_BACKEND_PREFIX.to_string(),
        }
    }

    /// Sets the upper bound of one backend round trip.
    pub fn timeout(mut self, value: Duration) -> Self {
        self.timeout = value;
        Self { ..self }
    }

    /// Sets the Redis key prefix.
    pub fn prefix(mut self, value: &str) -> Self {
        self.prefix = value.to_string();
        Self { ..self }
    }

    /// Reads the backend settings from the process environment.
    ///
    /// Returns `None` when the URL or the token is missing or empty, which
    /// means the distributed path is disabled.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`BackendConfig::from_env`], reading variables through `lookup`.
    ///
    /// ```rust
    /// use ratelimit_guard::config::BackendConfig;
    ///
    /// assert!(BackendConfig::from_lookup(|_| None).is_none());
    /// ```
    pub fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let url = non_empty(ENV_BACKEND_URL)?;
        let token = non_empty(ENV_BACKEND_TOKEN)?;
        let mut config = Self::new(url.trim(), token.trim());

        if let Some(ms) = non_empty(ENV_BACKEND_TIMEOUT_MS) {
            match ms.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => config = config.timeout(Duration::from_millis(ms)),
                _ => log::warn!(
                    "Ignoring invalid {}={:?}, using {:?}",
                    ENV_BACKEND_TIMEOUT_MS,
                    ms,
                    config.timeout
                ),
            }
        }
        if let Some(prefix) = non_empty(ENV_BACKEND_PREFIX) {
            config = config.prefix(&prefix);
        }

        Some(config)
    }
}

/// Configuration for the rate limiting middleware.
///
/// Limits and windows belong to the [`crate::limiter::RateLimiter`] the
/// middleware wraps; this struct only decides who a request belongs to and
/// what a rejected request receives.
///
/// # Examples
///
/// ```rust
/// use actix_web::HttpResponse;
/// use ratelimit_guard::config::RateLimitConfig;
///
/// let config = RateLimitConfig::default()
///     .id(|req| {
///         req.headers()
///             .get("X-API-Key")
///             .and_then(|h| h.to_str().ok())
///             .unwrap_or("anonymous")
///             .to_string()
///     })
///     .exceeded(|id, result, _req| {
///         HttpResponse::TooManyRequests().body(format!(
///             "client {} exceeded {} requests",
///             id, result.limit
///         ))
///     });
/// ```
#[derive(Clone)]
pub struct RateLimitConfig {
    /// Function to extract client identifier from the request.
    /// Typically extracts IP address, but can be customized for API keys, user IDs, etc.
    pub get_id: fn(req: &ServiceRequest) -> String,
    /// Function called when rate limit is exceeded.
    /// Receives the client ID, the rejected check and the request, returns the HTTP response.
    pub on_exceed: fn(id: &str, result: &RateLimitResult, req: &ServiceRequest) -> HttpResponse,
}

impl Default for RateLimitConfig {
    /// Creates a default middleware configuration.
    ///
    /// # Default Values
    ///
    /// - `get_id`: Extracts real IP address from connection info
    /// - `on_exceed`: Returns HTTP 429 with `Retry-After` and a plain text body
    fn default() -> Self {
        Self {
            get_id: |req| {
                req.connection_info()
                    .realip_remote_addr()
                    .unwrap_or("-")
                    .to_string()
            },
            on_exceed: |_id, result, _req| too_many_requests(result),
        }
    }
}

impl RateLimitConfig {
    /// Sets a custom function to extract client identifier from requests.
    pub fn id(mut self, fn_id: fn(req: &ServiceRequest) -> String) -> Self {
        self.get_id = fn_id;
        Self { ..self }
    }

    /// Sets a custom function to handle rate limit exceeded scenarios.
    pub fn exceeded(
        mut self,
        fn_exceed: fn(id: &str, result: &RateLimitResult, req: &ServiceRequest) -> HttpResponse,
    ) -> Self {
        self.on_exceed = fn_exceed;
        Self { ..self }
    }
}

/// 429 response telling the client when to retry.
pub fn too_many_requests(result: &RateLimitResult) -> HttpResponse {
    // Round up so a client never retries before the window has ended.
    let wait = result.retry_after();
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);

    HttpResponse::TooManyRequests()
        .insert_header((header::RETRY_AFTER, secs))
        .body(format!("Too many requests, retry in {} seconds", secs))
}
