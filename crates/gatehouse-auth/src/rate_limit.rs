//! Fixed-window request counting per client and endpoint.
//!
//! Counters live in the fast cache under `ratelimit:{endpoint}:{client}` and
//! advance through the atomic [`FastCache::incr_within_limit`] primitive, so
//! concurrent callers can never push a window past its limit.
//!
//! ## Degradation
//!
//! Availability wins over strictness. Without a fast cache every request is
//! allowed; when the cache errors the request is allowed as well and a
//! `suspicious_activity` event records the failure. Both cases surface as
//! [`RateDecision::DegradedAllowed`].

use std::sync::Arc;
use std::time::Duration;

use crate::audit::{SecurityEvent, SecurityEventEmitter, SecurityEventKind};
use crate::cache::{FastCache, rate_limit_key};
use crate::error::{AuthorityError, AuthorityResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Counted and under the limit.
    Allowed { count: u64 },
    /// The window is exhausted.
    Denied { count: u64 },
    /// Not counted: no fast cache, or the cache failed.
    DegradedAllowed,
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, RateDecision::Denied { .. })
    }
}

pub struct RateLimiter {
    cache: Option<Arc<dyn FastCache>>,
    emitter: Arc<SecurityEventEmitter>,
}

impl RateLimiter {
    pub fn new(cache: Option<Arc<dyn FastCache>>, emitter: Arc<SecurityEventEmitter>) -> Self {
        Self { cache, emitter }
    }

    /// Counts one request and decides whether it fits in the window.
    ///
    /// Fails only on a zero-length window.
    pub async fn check(
        &self,
        client: &str,
        endpoint: &str,
        limit: u64,
        window: Duration,
    ) -> AuthorityResult<RateDecision> {
        if window.is_zero() {
            return Err(AuthorityError::invalid_input("rate limit window must be > 0"));
        }
        let Some(cache) = &self.cache else {
            return Ok(RateDecision::DegradedAllowed);
        };

        let key = rate_limit_key(endpoint, client);
        match cache.incr_within_limit(&key, limit, window).await {
            Ok(outcome) if outcome.allowed => Ok(RateDecision::Allowed {
                count: outcome.count,
            }),
            Ok(outcome) => {
                tracing::debug!(client, endpoint, count = outcome.count, limit, "Rate limit reached");
                Ok(RateDecision::Denied {
                    count: outcome.count,
                })
            }
            Err(e) => {
                tracing::warn!(client, endpoint, error = %e, "Rate limit check failed, allowing request");
                self.emitter
                    .emit(
                        SecurityEvent::new(SecurityEventKind::SuspiciousActivity)
                            .ip(client)
                            .message("rate limit check failed")
                            .detail("endpoint", endpoint)
                            .detail("error", e.to_string()),
                    )
                    .await;
                Ok(RateDecision::DegradedAllowed)
            }
        }
    }

    /// [`check`](Self::check) collapsed to a boolean.
    pub async fn allow(
        &self,
        client: &str,
        endpoint: &str,
        limit: u64,
        window: Duration,
    ) -> AuthorityResult<bool> {
        Ok(self.check(client, endpoint, limit, window).await?.is_allowed())
    }

    /// Deletes the counter. Requires a fast cache.
    pub async fn reset(&self, client: &str, endpoint: &str) -> AuthorityResult<()> {
        let cache = self
            .cache
            .as_ref()
            .ok_or_else(|| AuthorityError::not_configured("fast cache"))?;
        cache.delete(&[rate_limit_key(endpoint, client)]).await?;
        Ok(())
    }
}
