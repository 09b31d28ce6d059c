//! Integration tests for the Redis fast cache.
//!
//! Most of them run the Lua scripts against a real server started with
//! testcontainers and are ignored by default:
//!
//! ```text
//! cargo test -p gatehouse-auth --test redis_fast_cache -- --ignored
//! ```

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::MockSessionStore;
use gatehouse_auth::cache::{FastCache, create_fast_cache, session_key, user_sessions_key};
use gatehouse_auth::config::RedisConfig;
use gatehouse_auth::{
    Principal, RateLimiter, SecurityEventEmitter, SessionOutcome, SessionRegistry,
    SessionValidator,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

async fn redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");
            let host_port = container.get_host_port_ipv4(6379).await.expect("get port");
            (container, format!("redis://127.0.0.1:{host_port}"))
        })
        .await;
    url.clone()
}

async fn fast_cache() -> Arc<dyn FastCache> {
    let config = RedisConfig {
        enabled: true,
        url: redis_url().await,
        ..RedisConfig::default()
    };
    create_fast_cache(&config).await.expect("redis fast cache")
}

#[tokio::test]
async fn unreachable_redis_yields_no_cache() {
    let config = RedisConfig {
        enabled: true,
        url: "redis://127.0.0.1:1".to_string(),
        timeout_ms: 200,
        ..RedisConfig::default()
    };
    assert!(create_fast_cache(&config).await.is_none());
}

#[tokio::test]
#[ignore = "requires a container runtime"]
async fn string_round_trip_and_delete() {
    let cache = fast_cache().await;
    let key = session_key("redis-string");

    cache.set_ex(&key, "1:2", Duration::from_secs(60)).await.unwrap();
    assert_eq!(cache.get(&key).await.unwrap().as_deref(), Some("1:2"));

    assert_eq!(cache.delete(std::slice::from_ref(&key)).await.unwrap(), 1);
    assert!(cache.get(&key).await.unwrap().is_none());
    assert_eq!(cache.delete(&[key]).await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires a container runtime"]
async fn expire_and_persist() {
    let cache = fast_cache().await;
    let key = "gatehouse-test:persist".to_string();

    cache.set_ex(&key, "v", Duration::from_secs(5)).await.unwrap();
    assert!(cache.persist(&key).await.unwrap());
    assert!(!cache.persist(&key).await.unwrap());
    assert!(cache.expire(&key, Duration::from_secs(5)).await.unwrap());
    assert!(!cache.expire("gatehouse-test:absent", Duration::from_secs(5)).await.unwrap());
    cache.delete(&[key]).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires a container runtime"]
async fn rate_limit_script_is_atomic() {
    let cache = fast_cache().await;
    let limiter = Arc::new(RateLimiter::new(
        Some(cache.clone()),
        Arc::new(SecurityEventEmitter::console_only()),
    ));
    limiter.reset("burst-client", "/redis").await.unwrap();

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                limiter
                    .allow("burst-client", "/redis", 5, Duration::from_secs(60))
                    .await
            })
        })
        .collect();

    let mut allowed = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap() {
            allowed += 1;
        }
    }
    assert_eq!(allowed, 5);
}

#[tokio::test]
#[ignore = "requires a container runtime"]
async fn rate_limit_window_expires() {
    let cache = fast_cache().await;
    let limiter = RateLimiter::new(Some(cache), Arc::new(SecurityEventEmitter::console_only()));
    let window = Duration::from_millis(300);
    limiter.reset("short", "/redis").await.unwrap();

    assert!(limiter.allow("short", "/redis", 1, window).await.unwrap());
    assert!(!limiter.allow("short", "/redis", 1, window).await.unwrap());
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(limiter.allow("short", "/redis", 1, window).await.unwrap());
}

#[tokio::test]
#[ignore = "requires a container runtime"]
async fn session_set_lifecycle() {
    let cache = fast_cache().await;
    let registry = SessionRegistry::new(Some(cache.clone()));
    let identity = 900_001;
    registry.invalidate_all(identity).await.unwrap();

    for token in ["r1", "r2", "r3"] {
        registry
            .cache_session(token, Principal::new(identity, 1), Duration::from_secs(600))
            .await
            .unwrap();
        registry
            .register(identity, token, Duration::from_secs(600))
            .await
            .unwrap();
    }
    assert_eq!(registry.active_count(identity).await.unwrap(), 3);

    assert!(registry.unregister(identity, "r3").await.unwrap());
    assert_eq!(registry.invalidate_all(identity).await.unwrap(), 2);

    for token in ["r1", "r2"] {
        assert!(cache.get(&session_key(token)).await.unwrap().is_none());
    }
    assert_eq!(cache.set_len(&user_sessions_key(identity)).await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires a container runtime"]
async fn unregister_last_member_deletes_set() {
    let cache = fast_cache().await;
    let registry = SessionRegistry::new(Some(cache.clone()));
    let identity = 900_002;

    registry
        .register(identity, "only", Duration::from_secs(600))
        .await
        .unwrap();
    assert!(registry.unregister(identity, "only").await.unwrap());
    assert!(cache.set_members(&user_sessions_key(identity)).await.unwrap().is_empty());
    assert!(!cache.expire(&user_sessions_key(identity), Duration::from_secs(1)).await.unwrap());
}

#[tokio::test]
#[ignore = "requires a container runtime"]
async fn validator_reads_sessions_written_by_registry() {
    let cache = fast_cache().await;
    let registry = SessionRegistry::new(Some(cache.clone()));
    let store = MockSessionStore::new();
    let validator = SessionValidator::new(Some(cache), store.clone(), Duration::from_secs(3));

    registry
        .cache_session("redis-tok", Principal::new(55, 6), Duration::from_secs(60))
        .await
        .unwrap();

    assert_eq!(
        validator.validate("redis-tok").await,
        SessionOutcome::Authenticated(Principal::new(55, 6))
    );
    assert_eq!(store.calls(), 0);
}
