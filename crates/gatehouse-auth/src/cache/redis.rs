//! Redis fast cache.
//!
//! Compound operations are Lua scripts executed server-side, so concurrent
//! callers sharing a key can never interleave between the read and the
//! write. Every round trip is bounded by the configured timeout.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::Pool;
use deadpool_redis::redis::{self, AsyncCommands, RedisResult, Script};

use super::{CounterOutcome, FastCache};
use crate::error::{CacheError, CacheResult};

/// KEYS[1] counter, ARGV[1] limit, ARGV[2] window in milliseconds.
const RATE_LIMIT_LUA: &str = r#"
local limit = tonumber(ARGV[1])
local current = redis.call('GET', KEYS[1])
if not current then
  if limit < 1 then
    return {0, 0}
  end
  redis.call('SET', KEYS[1], 1, 'PX', ARGV[2])
  return {1, 1}
end
current = tonumber(current)
if current < limit then
  return {1, redis.call('INCR', KEYS[1])}
end
return {0, current}
"#;

/// KEYS[1] set, ARGV[1] member, ARGV[2] wanted TTL in milliseconds.
const SET_ADD_ALIGNED_LUA: &str = r#"
local existed = redis.call('EXISTS', KEYS[1])
redis.call('SADD', KEYS[1], ARGV[1])
local wanted = tonumber(ARGV[2])
local current = redis.call('PTTL', KEYS[1])
if existed == 0 or (current >= 0 and current < wanted) then
  redis.call('PEXPIRE', KEYS[1], wanted)
end
return 1
"#;

/// KEYS[1] set, ARGV[1] member.
const SET_REMOVE_AND_PRUNE_LUA: &str = r#"
local removed = redis.call('SREM', KEYS[1], ARGV[1])
if redis.call('SCARD', KEYS[1]) == 0 then
  redis.call('DEL', KEYS[1])
end
return removed
"#;

/// Fast cache backed by a `deadpool-redis` pool.
pub struct RedisFastCache {
    pool: Pool,
    timeout: Duration,
    rate_limit: Script,
    set_add_aligned: Script,
    set_remove_and_prune: Script,
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX).max(1)
}

impl RedisFastCache {
    pub fn new(pool: Pool, timeout: Duration) -> Self {
        Self {
            pool,
            timeout,
            rate_limit: Script::new(RATE_LIMIT_LUA),
            set_add_aligned: Script::new(SET_ADD_ALIGNED_LUA),
            set_remove_and_prune: Script::new(SET_REMOVE_AND_PRUNE_LUA),
        }
    }

    async fn conn(&self) -> CacheResult<deadpool_redis::Connection> {
        match tokio::time::timeout(self.timeout, self.pool.get()).await {
            Ok(conn) => conn.map_err(|e| CacheError::pool(e.to_string())),
            Err(_) => Err(CacheError::Timeout(self.timeout)),
        }
    }

    async fn bounded<T>(&self, fut: impl Future<Output = RedisResult<T>>) -> CacheResult<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(CacheError::Timeout(self.timeout)),
        }
    }
}

#[async_trait]
impl FastCache for RedisFastCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.conn().await?;
        self.bounded(conn.get(key)).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.conn().await?;
        self.bounded(conn.pset_ex(key, value, millis(ttl))).await
    }

    async fn delete(&self, keys: &[String]) -> CacheResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        self.bounded(conn.del(keys.to_vec())).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("PEXPIRE");
        cmd.arg(key).arg(millis(ttl));
        self.bounded(cmd.query_async(&mut conn)).await
    }

    async fn persist(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.conn().await?;
        self.bounded(conn.persist(key)).await
    }

    async fn incr_within_limit(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> CacheResult<CounterOutcome> {
        let mut conn = self.conn().await?;
        let mut invocation = self.rate_limit.key(key);
        invocation.arg(limit).arg(millis(window));
        let reply: Vec<i64> = self.bounded(invocation.invoke_async(&mut conn)).await?;

        match reply.as_slice() {
            [allowed, count] => Ok(CounterOutcome {
                allowed: *allowed == 1,
                count: u64::try_from(*count).unwrap_or(0),
            }),
            other => Err(CacheError::corrupt(format!(
                "rate limit script returned {other:?}"
            ))),
        }
    }

    async fn set_add_aligned(&self, key: &str, member: &str, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.conn().await?;
        let mut invocation = self.set_add_aligned.key(key);
        invocation.arg(member).arg(millis(ttl));
        let _: i64 = self.bounded(invocation.invoke_async(&mut conn)).await?;
        Ok(())
    }

    async fn set_remove_and_prune(&self, key: &str, member: &str) -> CacheResult<bool> {
        let mut conn = self.conn().await?;
        let mut invocation = self.set_remove_and_prune.key(key);
        invocation.arg(member);
        let removed: i64 = self.bounded(invocation.invoke_async(&mut conn)).await?;
        Ok(removed > 0)
    }

    async fn set_members(&self, key: &str) -> CacheResult<Vec<String>> {
        let mut conn = self.conn().await?;
        self.bounded(conn.smembers(key)).await
    }

    async fn set_len(&self, key: &str) -> CacheResult<u64> {
        let mut conn = self.conn().await?;
        self.bounded(conn.scard(key)).await
    }

    async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.conn().await?;
        let _: String = self
            .bounded(redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }
}
