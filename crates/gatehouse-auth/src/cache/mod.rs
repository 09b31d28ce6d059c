//! Fast-cache abstraction for ephemeral session, session-set and
//! rate-limit data.
//!
//! ## Backends
//!
//! - **Redis**: shared across instances; compound operations run as
//!   server-side Lua scripts so they are indivisible
//! - **Memory**: single-instance mode; one lock per call gives the same
//!   indivisibility
//!
//! ## Key Patterns
//!
//! ```text
//! session:{token}              → "{identity_id}:{role_id}"
//! user_sessions:{identity_id}  → set of tokens
//! ratelimit:{endpoint}:{ip}    → request counter (expires with the window)
//! ```
//!
//! ## Graceful Degradation
//!
//! The authority holds an `Option<Arc<dyn FastCache>>`. `None` is a normal
//! state: rate limiting fails open, validation goes straight to the durable
//! store and session-set bookkeeping becomes a no-op.

pub mod memory;
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::RedisConfig;
use crate::error::CacheResult;

pub use self::memory::MemoryFastCache;
pub use self::redis::RedisFastCache;

/// Result of the atomic increment-and-compare primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterOutcome {
    /// Whether this request fit under the limit.
    pub allowed: bool,
    /// Counter value after the call (unchanged when denied).
    pub count: u64,
}

/// Operations the authority needs from a fast key-value store.
///
/// Every method is a single logical round trip. Methods documented as atomic
/// must not be implemented as separate read and write calls.
#[async_trait]
pub trait FastCache: Send + Sync {
    /// GET a string value.
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// SET a string value with a time-to-live.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;

    /// DEL any number of keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> CacheResult<u64>;

    /// Set a time-to-live on an existing key. Returns `false` if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool>;

    /// Remove the time-to-live of a key. Returns `false` if the key is absent
    /// or had no expiry.
    async fn persist(&self, key: &str) -> CacheResult<bool>;

    /// Atomic rate-limit step.
    ///
    /// Absent counter: set to 1 with `window` as TTL and allow. Present and
    /// below `limit`: increment and allow. At or above `limit`: deny without
    /// incrementing.
    async fn incr_within_limit(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> CacheResult<CounterOutcome>;

    /// Atomic SADD that also raises the set's TTL to at least `ttl`.
    ///
    /// The expiry is never shortened, so the set lives as long as its
    /// longest-lived member.
    async fn set_add_aligned(&self, key: &str, member: &str, ttl: Duration) -> CacheResult<()>;

    /// Atomic SREM that deletes the set when it becomes empty.
    ///
    /// Returns `true` if the member was present.
    async fn set_remove_and_prune(&self, key: &str, member: &str) -> CacheResult<bool>;

    /// SMEMBERS; a missing key yields an empty list.
    async fn set_members(&self, key: &str) -> CacheResult<Vec<String>>;

    /// SCARD; a missing key yields zero.
    async fn set_len(&self, key: &str) -> CacheResult<u64>;

    /// Round-trip health probe.
    async fn ping(&self) -> CacheResult<()>;
}

/// `session:{token}`
pub fn session_key(token: &str) -> String {
    format!("session:{token}")
}

/// `user_sessions:{identity_id}`
pub fn user_sessions_key(identity_id: u32) -> String {
    format!("user_sessions:{identity_id}")
}

/// `ratelimit:{endpoint}:{client}`
pub fn rate_limit_key(endpoint: &str, client: &str) -> String {
    format!("ratelimit:{endpoint}:{client}")
}

/// Create the fast cache from configuration.
///
/// ## Cache Modes
///
/// - **Redis disabled**: returns `None`
/// - **Redis enabled**: connects and probes the pool; on failure logs a
///   warning and returns `None`
///
/// A process that wants single-instance caching without Redis can build a
/// [`MemoryFastCache`] directly.
pub async fn create_fast_cache(config: &RedisConfig) -> Option<Arc<dyn FastCache>> {
    if !config.enabled {
        tracing::info!("Redis disabled, running without a fast cache");
        return None;
    }

    tracing::info!(url = %config.url, "Connecting to Redis");

    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    // `from_url` leaves the pool section unset
    let pool_config = redis_config
        .pool
        .get_or_insert_with(deadpool_redis::PoolConfig::default);
    pool_config.max_size = config.pool_size;
    pool_config.timeouts.wait = Some(config.timeout());
    pool_config.timeouts.create = Some(config.timeout());
    pool_config.timeouts.recycle = Some(config.timeout());

    let pool = match redis_config.create_pool(Some(deadpool_redis::Runtime::Tokio1)) {
        Ok(pool) => pool,
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to create Redis pool. Running without a fast cache."
            );
            return None;
        }
    };

    let cache = RedisFastCache::new(pool, config.timeout());
    match cache.ping().await {
        Ok(()) => {
            tracing::info!("Connected to Redis");
            Some(Arc::new(cache))
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to connect to Redis. Running without a fast cache."
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_namespaces() {
        assert_eq!(session_key("abc"), "session:abc");
        assert_eq!(user_sessions_key(42), "user_sessions:42");
        assert_eq!(
            rate_limit_key("/api/login", "203.0.113.9"),
            "ratelimit:/api/login:203.0.113.9"
        );
    }

    #[tokio::test]
    async fn test_disabled_redis_yields_no_cache() {
        let config = RedisConfig::default();
        assert!(create_fast_cache(&config).await.is_none());
    }
}
