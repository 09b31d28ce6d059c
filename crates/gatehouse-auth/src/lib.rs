//! # gatehouse-auth
//!
//! Session authentication and abuse control for HTTP services.
//!
//! This crate provides:
//! - Bearer-session validation, fast cache first with a durable-store fallback
//! - Atomic fixed-window rate limiting that fails open
//! - Per-identity session sets for bulk invalidation
//! - Sanitized security events with best-effort durable persistence
//! - Offline IP geolocation and an identity contact LRU for audit enrichment
//!
//! ## Overview
//!
//! Everything hangs off one [`Authority`], built once at startup from an
//! [`AuthorityConfig`] and the durable-store adapters (see the
//! `gatehouse-auth-postgres` crate). The fast cache (Redis) is optional:
//! without it rate limiting allows everything and session bookkeeping is a
//! no-op, while validation goes straight to the durable store.
//!
//! ## Modules
//!
//! - [`authority`] - Assembled authority and the per-request admission flow
//! - [`session`] - Session validation and per-identity session sets
//! - [`rate_limit`] - Fixed-window request counting
//! - [`audit`] - Security events and the identity contact cache
//! - [`geo`] - IP geolocation
//! - [`cache`] - Fast-cache abstraction with Redis and in-memory backends
//! - [`middleware`] - Axum middleware and rejection responses
//! - [`config`] - Configuration and loading
//! - [`observability`] - Tracing setup

pub mod audit;
pub mod authority;
pub mod cache;
pub mod config;
pub mod error;
pub mod geo;
pub mod middleware;
pub mod observability;
pub mod rate_limit;
pub mod session;

pub use audit::{
    AuditRecord, AuditStore, ContactCache, ContactResolver, ContactStore, SecurityEvent,
    SecurityEventEmitter, SecurityEventKind, sanitize,
};
pub use authority::{Admission, Authority, AuthorityBuilder, AuthorityHealth, RequestMeta};
pub use cache::{FastCache, MemoryFastCache, RedisFastCache, create_fast_cache};
pub use config::{AuthorityConfig, loader::load_config};
pub use error::{AuthorityError, AuthorityResult, CacheError, StoreError, StoreResult};
pub use geo::{GeoDatabase, GeoLocation, GeoResolver, MaxMindDatabase};
pub use middleware::{AuthorityRejection, SessionPrincipal, require_session};
pub use rate_limit::{RateDecision, RateLimiter};
pub use session::{
    CachedSession, Principal, RejectReason, SessionOutcome, SessionRegistry, SessionStore,
    SessionValidator,
};
