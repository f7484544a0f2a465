//! Error types for counter stores.

use std::time::Duration;
use thiserror::Error;

/// Failure of a counter store to answer a check or reset.
///
/// A rejected request is never an error: it is an `Ok` result with
/// `success == false`. These variants only cover the cases where the store
/// could not produce a result at all, which makes the caller fall back.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Connection, authentication or protocol failure reported by Redis.
    #[cfg(feature = "redis")]
    #[error("backend error: {0}")]
    Backend(#[from] redis::RedisError),

    /// The backend did not answer within the configured timeout.
    #[error("backend timed out after {0:?}")]
    Timeout(Duration),

    /// The backend configuration cannot be used.
    #[error("invalid backend configuration: {0}")]
    Config(String),
}
