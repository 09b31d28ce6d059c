//! Bearer-session validation.
//!
//! ## Lookup Order
//!
//! ```text
//! token → session:{token} (fast cache) → durable store join
//!             ↓ valid "{id}:{role}"          ↓ live session row
//!         Authenticated                  Authenticated
//! ```
//!
//! The fast cache is an optimization, never a source of truth. A missing
//! key, a cache error or a value that fails strict parsing all fall through
//! to the durable store. Only the durable store can reject a token that made
//! it past the empty check.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::{FastCache, session_key};

use super::{CachedSession, Principal, SessionStore};

/// Why a token was rejected. Only ever recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    EmptyToken,
    /// Absent, expired, or soft-deleted in the durable store.
    NotFound,
    /// The lookup did not finish within the validation deadline.
    DeadlineExceeded,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::EmptyToken => "empty_token",
            RejectReason::NotFound => "not_found",
            RejectReason::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

/// Outcome of validating one bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Authenticated(Principal),
    Rejected(RejectReason),
    /// The durable store could not be queried; authorization is unknown.
    Unavailable,
}

impl SessionOutcome {
    pub fn principal(&self) -> Option<Principal> {
        match self {
            SessionOutcome::Authenticated(p) => Some(*p),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionOutcome::Authenticated(_))
    }
}

/// Validates bearer tokens against the fast cache and the durable store.
///
/// The validator never writes to either store.
pub struct SessionValidator {
    cache: Option<Arc<dyn FastCache>>,
    store: Arc<dyn SessionStore>,
    timeout: Duration,
}

impl SessionValidator {
    pub fn new(
        cache: Option<Arc<dyn FastCache>>,
        store: Arc<dyn SessionStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            cache,
            store,
            timeout,
        }
    }

    /// Validates `token`.
    ///
    /// The whole lookup is bounded by the configured deadline; running out of
    /// time rejects the token. Dropping the returned future abandons any
    /// in-flight store call.
    pub async fn validate(&self, token: &str) -> SessionOutcome {
        if token.trim().is_empty() {
            return SessionOutcome::Rejected(RejectReason::EmptyToken);
        }

        match tokio::time::timeout(self.timeout, self.lookup(token)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Session validation deadline exceeded"
                );
                SessionOutcome::Rejected(RejectReason::DeadlineExceeded)
            }
        }
    }

    async fn lookup(&self, token: &str) -> SessionOutcome {
        if let Some(principal) = self.from_cache(token).await {
            tracing::debug!(identity_id = principal.identity_id, "session hit (fast cache)");
            return SessionOutcome::Authenticated(principal);
        }

        match self.store.find_active(token).await {
            Ok(Some(principal)) if principal.identity_id != 0 => {
                tracing::debug!(identity_id = principal.identity_id, "session hit (durable store)");
                SessionOutcome::Authenticated(principal)
            }
            Ok(_) => SessionOutcome::Rejected(RejectReason::NotFound),
            Err(e) => {
                tracing::error!(error = %e, "Session lookup failed in durable store");
                SessionOutcome::Unavailable
            }
        }
    }

    async fn from_cache(&self, token: &str) -> Option<Principal> {
        let cache = self.cache.as_ref()?;
        match cache.get(&session_key(token)).await {
            Ok(Some(raw)) => match CachedSession::parse(&raw) {
                CachedSession::Valid(principal) => Some(principal),
                CachedSession::Invalid => {
                    tracing::warn!("Malformed cached session value, falling back to durable store");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Fast cache session lookup failed, falling back to durable store");
                None
            }
        }
    }
}
