#[cfg(feature = "redis")]
mod redis_store_impl {
    use crate::{
        config::BackendConfig,
        error::StoreError,
        store::{CounterStore, RateLimitKey, RateLimitResult},
    };
    use async_trait::async_trait;
    use log::{debug, warn};
    use redis::{Client, IntoConnectionInfo, Script, aio::ConnectionManager};
    use std::{future::Future, time::Duration};
    use tokio::sync::OnceCell;

    /// Counts one hit in the current bucket. The hit that creates the bucket
    /// sets a TTL of one window plus one second, which outlasts the bucket.
    const FIXED_WINDOW_SCRIPT: &str = r#"
local count = redis.call("INCR", KEYS[1])
if count == 1 then
  redis.call("PEXPIRE", KEYS[1], ARGV[1])
end
return count
"#;

    /// Redis-based implementation of [`CounterStore`] using fixed epoch buckets.
    ///
    /// Each hit is one `EVALSHA` of a Lua script, so concurrent hits from any
    /// number of processes are serialized by Redis and never under-count.
    /// Stale buckets are dropped by Redis through their TTL.
    ///
    /// # Redis Data Structure
    ///
    /// Plain integer counters, one per window bucket:
    /// - Key: `{prefix}{scope}:{identifier}:{bucket}`
    /// - Bucket: `now_ms / window_ms`, so every instance agrees on window edges
    /// - TTL: one window plus one second from the first hit of the bucket
    ///
    /// # Failures
    ///
    /// Every call, including the first connect, is bounded by the configured
    /// timeout. Failures are returned as [`StoreError`] so the caller can fall
    /// back to another store.
    pub struct RedisStore {
        /// Redis client for database operations
        client: Client,
        /// Multiplexed connection, created on first use
        conn: OnceCell<ConnectionManager>,
        /// Key prefix for namespacing rate limit data
        prefix: String,
        /// Upper bound of a single check or reset
        timeout: Duration,
        script: Script,
    }

    impl RedisStore {
        /// Creates a new [`RedisStore`] from a backend configuration.
        ///
        /// No connection is made here; the first check connects lazily, so an
        /// unreachable server at startup only costs that check a fallback.
        /// The configured token is used as the Redis password.
        ///
        /// # Examples
        ///
        /// ```rust
        /// # #[cfg(feature = "redis")]
        /// # {
        /// use ratelimit_guard::{config::BackendConfig, store::RedisStore};
        ///
        /// let config = BackendConfig::new("redis://127.0.0.1:6379", "secret");
        /// let store = RedisStore::new(&config)?.with_prefix("myapp:ratelimit:");
        /// # }
        /// # Ok::<(), ratelimit_guard::error::StoreError>(())
        /// ```
        ///
        /// # Errors
        ///
        /// Returns [`StoreError`] if the URL cannot be parsed, the token is
        /// empty or the timeout is zero.
        pub fn new(config: &BackendConfig) -> Result<Self, StoreError> {
            if config.token.is_empty() {
                return Err(StoreError::Config("empty access token".to_string()));
            }
            if config.timeout.is_zero() {
                return Err(StoreError::Config("timeout must be positive".to_string()));
            }

            let mut info = config.url.as_str().into_connection_info()?;
            info.redis.password = Some(config.token.clone());
            let client = Client::open(info)?;

            Ok(Self {
                client,
                conn: OnceCell::new(),
                prefix: config.prefix.clone(),
                timeout: config.timeout,
                script: Script::new(FIXED_WINDOW_SCRIPT),
            })
        }

        /// Sets a custom prefix for Redis keys.
        pub fn with_prefix(mut self, prefix: &str) -> Self {
            self.prefix = prefix.to_string();
            self
        }

        /// Full Redis key of one window bucket of `key`.
        ///
        /// The bucket is the last `:`-separated field and always numeric, so
        /// two identifiers never map to the same key.
        fn bucket_key(&self, key: &RateLimitKey, bucket: i64) -> String {
            format!("{}{}:{}", self.prefix, key, bucket)
        }

        /// Keys a reset has to drop: the live bucket and the one before it,
        /// which may still be live on an instance whose clock lags.
        fn reset_keys(&self, key: &RateLimitKey, window: Duration, now: i64) -> [String; 2] {
            let bucket = now / window_millis(window);
            [
                self.bucket_key(key, bucket),
                self.bucket_key(key, bucket - 1),
            ]
        }

        async fn connection(&self) -> Result<ConnectionManager, StoreError> {
            let conn = self
                .conn
                .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
                .await?;
            Ok(conn.clone())
        }

        async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
        where
            F: Future<Output = Result<T, StoreError>>,
        {
            tokio::time::timeout(self.timeout, fut)
                .await
                .map_err(|_| StoreError::Timeout(self.timeout))?
        }
    }

    fn window_millis(window: Duration) -> i64 {
        (window.as_millis() as i64).max(1)
    }

    #[async_trait]
    impl CounterStore for RedisStore {
        async fn check_and_increment(
            &self,
            key: &RateLimitKey,
            limit: u64,
            window: Duration,
        ) -> Result<RateLimitResult, StoreError> {
            let now = chrono::Utc::now().timestamp_millis();
            let window_ms = window_millis(window);
            let bucket = now / window_ms;
            let bucket_key = self.bucket_key(key, bucket);

            debug!(
                "Checking distributed rate limit for key: {} with limit={}, window={:?}",
                key, limit, window
            );

            let count: u64 = self
                .bounded(async {
                    let mut conn = self.connection().await?;
                    let count: u64 = self
                        .script
                        .key(&bucket_key)
                        .arg(window_ms + 1000)
                        .invoke_async(&mut conn)
                        .await?;
                    Ok(count)
                })
                .await?;

            if count > limit {
                warn!(
                    "Rate limit exceeded for key({}): count({}) > limit({})",
                    key, count, limit
                );
            }

            Ok(RateLimitResult::from_count(
                count,
                limit,
                (bucket + 1) * window_ms,
            ))
        }

        async fn reset(&self, key: &RateLimitKey, window: Duration) -> Result<(), StoreError> {
            let keys = self.reset_keys(key, window, chrono::Utc::now().timestamp_millis());

            self.bounded(async {
                let mut conn = self.connection().await?;
                let removed: u64 = redis::cmd("DEL").arg(&keys[..]).query_async(&mut conn).await?;
                debug!("Reset rate limit for {}: {} buckets removed", key, removed);
                Ok(())
            })
            .await
        }
    }

}

#[cfg(feature = "redis")]
pub use redis_store_impl::RedisStore;
