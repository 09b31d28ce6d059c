//! Bearer-session validation and per-identity session bookkeeping.
//!
//! - [`validator`] - token to `(identity, role)` with cache-first lookup
//! - [`registry`] - `user_sessions:{id}` sets used for bulk invalidation

pub mod registry;
pub mod validator;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;

pub use registry::SessionRegistry;
pub use validator::{RejectReason, SessionOutcome, SessionValidator};

/// An authenticated identity and its role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    pub identity_id: u32,
    pub role_id: u32,
}

impl Principal {
    pub fn new(identity_id: u32, role_id: u32) -> Self {
        Self {
            identity_id,
            role_id,
        }
    }

    /// Value stored under `session:{token}`.
    pub fn to_cache_value(&self) -> String {
        format!("{}:{}", self.identity_id, self.role_id)
    }
}

/// Result of parsing a `session:{token}` value.
///
/// Anything other than `Valid` is a cache miss, never an authentication
/// failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachedSession {
    Valid(Principal),
    Invalid,
}

impl CachedSession {
    /// Strictly parses `"{identity_id}:{role_id}"`.
    ///
    /// Both parts must be plain ASCII digits that fit in `u32`, and the
    /// identity must be non-zero.
    pub fn parse(raw: &str) -> Self {
        let Some((identity, role)) = raw.split_once(':') else {
            return Self::Invalid;
        };
        match (parse_unsigned(identity), parse_unsigned(role)) {
            (Some(identity_id), Some(role_id)) if identity_id != 0 => {
                Self::Valid(Principal::new(identity_id, role_id))
            }
            _ => Self::Invalid,
        }
    }
}

fn parse_unsigned(part: &str) -> Option<u32> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    part.parse().ok()
}

/// Durable-store lookup of live sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Finds the principal behind `token`.
    ///
    /// Only sessions that are not soft-deleted, not expired, and whose
    /// identity is not soft-deleted may match. `Ok(None)` means no such
    /// session.
    async fn find_active(&self, token: &str) -> StoreResult<Option<Principal>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_well_formed() {
        assert_eq!(
            CachedSession::parse("42:3"),
            CachedSession::Valid(Principal::new(42, 3))
        );
        assert_eq!(
            CachedSession::parse("4294967295:0"),
            CachedSession::Valid(Principal::new(u32::MAX, 0))
        );
    }

    #[test]
    fn test_parse_rejects_malformed_values() {
        for raw in [
            "",
            "42",
            "42:",
            ":3",
            "0:3",
            "abc:3",
            "42:x",
            "-1:3",
            "+42:3",
            " 42:3",
            "42:3:1",
            "4294967296:1",
            "42:99999999999",
        ] {
            assert_eq!(CachedSession::parse(raw), CachedSession::Invalid, "{raw:?}");
        }
    }

    #[test]
    fn test_cache_value_round_trip() {
        let principal = Principal::new(7, 2);
        assert_eq!(principal.to_cache_value(), "7:2");
        assert_eq!(
            CachedSession::parse(&principal.to_cache_value()),
            CachedSession::Valid(principal)
        );
    }
}
