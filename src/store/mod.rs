mod memory_store;
#[cfg(feature = "redis")]
mod redis_store;
mod traits;

pub use memory_store::{CounterRecord, DEFAULT_SWEEP_THRESHOLD, MemoryStore};
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;
pub use traits::{CounterStore, RateLimitKey, RateLimitResult, Scope};
