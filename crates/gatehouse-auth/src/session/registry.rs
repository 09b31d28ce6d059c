//! Per-identity session sets.
//!
//! `user_sessions:{identity_id}` holds every token registered for an
//! identity so that all of them can be invalidated at once (logout
//! everywhere, account lock).
//!
//! ## Expiry Policy
//!
//! The set's TTL follows its longest-lived member: `register` raises the
//! expiry to the new session's TTL and never lowers it. A set therefore
//! cannot expire while one of its sessions is still cached, and an
//! abandoned set disappears on its own once every member would have expired.
//! `unregister` and `invalidate_all` remain the explicit cleanup path.
//!
//! Without a fast cache every operation is a no-op.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::{FastCache, session_key, user_sessions_key};
use crate::error::{AuthorityError, AuthorityResult};

use super::Principal;

pub struct SessionRegistry {
    cache: Option<Arc<dyn FastCache>>,
}

impl SessionRegistry {
    pub fn new(cache: Option<Arc<dyn FastCache>>) -> Self {
        Self { cache }
    }

    /// Adds `token` to the identity's session set.
    pub async fn register(
        &self,
        identity_id: u32,
        token: &str,
        ttl: Duration,
    ) -> AuthorityResult<()> {
        if ttl.is_zero() {
            return Err(AuthorityError::invalid_input("session ttl must be > 0"));
        }
        let Some(cache) = &self.cache else {
            tracing::debug!(identity_id, "No fast cache, skipping session registration");
            return Ok(());
        };
        cache
            .set_add_aligned(&user_sessions_key(identity_id), token, ttl)
            .await?;
        Ok(())
    }

    /// Writes `session:{token}` for a freshly issued session.
    pub async fn cache_session(
        &self,
        token: &str,
        principal: Principal,
        ttl: Duration,
    ) -> AuthorityResult<()> {
        if ttl.is_zero() {
            return Err(AuthorityError::invalid_input("session ttl must be > 0"));
        }
        let Some(cache) = &self.cache else {
            return Ok(());
        };
        cache
            .set_ex(&session_key(token), &principal.to_cache_value(), ttl)
            .await?;
        Ok(())
    }

    /// Drops `session:{token}`.
    pub async fn forget_session(&self, token: &str) -> AuthorityResult<()> {
        let Some(cache) = &self.cache else {
            return Ok(());
        };
        cache.delete(&[session_key(token)]).await?;
        Ok(())
    }

    /// Removes `token` from the identity's set, deleting the set when it
    /// becomes empty. Returns whether the token was registered.
    pub async fn unregister(&self, identity_id: u32, token: &str) -> AuthorityResult<bool> {
        let Some(cache) = &self.cache else {
            return Ok(false);
        };
        Ok(cache
            .set_remove_and_prune(&user_sessions_key(identity_id), token)
            .await?)
    }

    /// Deletes every cached session of the identity and the set itself.
    ///
    /// A missing set is treated as an empty one. Returns the number of tokens
    /// that were registered.
    pub async fn invalidate_all(&self, identity_id: u32) -> AuthorityResult<usize> {
        let Some(cache) = &self.cache else {
            return Ok(0);
        };
        let set_key = user_sessions_key(identity_id);
        let tokens = cache.set_members(&set_key).await?;

        let mut keys: Vec<String> = tokens.iter().map(|t| session_key(t)).collect();
        keys.push(set_key);
        cache.delete(&keys).await?;

        tracing::info!(identity_id, sessions = tokens.len(), "Invalidated all sessions");
        Ok(tokens.len())
    }

    /// Resets the set's expiry to `ttl`, e.g. after renewing the
    /// longest-lived session.
    ///
    /// Returns `false` when the identity has no registered sessions.
    pub async fn refresh(&self, identity_id: u32, ttl: Duration) -> AuthorityResult<bool> {
        let Some(cache) = &self.cache else {
            return Ok(false);
        };
        Ok(cache.expire(&user_sessions_key(identity_id), ttl).await?)
    }

    /// Number of registered sessions; zero when the set is missing.
    pub async fn active_count(&self, identity_id: u32) -> AuthorityResult<u64> {
        let Some(cache) = &self.cache else {
            return Ok(0);
        };
        Ok(cache.set_len(&user_sessions_key(identity_id)).await?)
    }
}
