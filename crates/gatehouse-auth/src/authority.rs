//! The assembled authority and its per-request flow.
//!
//! ## Request Flow
//!
//! ```text
//! request → rate limit (endpoint rule) → session validation → handler
//!              ↓ denied                     ↓ rejected / unavailable
//!           Throttled                    Unauthorized / Unavailable
//! ```
//!
//! The rate-limit decision always comes first so an abusive client never
//! costs a durable-store round trip. Routes marked `public` skip validation.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::audit::{
    AuditStore, ContactCache, ContactCacheStats, ContactResolver, ContactStore, SecurityEvent,
    SecurityEventEmitter, SecurityEventKind,
};
use crate::cache::{FastCache, create_fast_cache};
use crate::config::{AuthorityConfig, RateLimitConfig};
use crate::error::{AuthorityError, AuthorityResult};
use crate::geo::{GeoDatabase, GeoResolver, GeoStats};
use crate::rate_limit::RateLimiter;
use crate::session::{Principal, SessionOutcome, SessionRegistry, SessionStore, SessionValidator};

/// Client key used when the request carries no address.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// What the authority needs to know about an inbound request.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    /// Bearer token, without the `Bearer ` prefix.
    pub bearer: Option<String>,
    pub client_ip: String,
    pub user_agent: String,
    /// Route path, used for rule matching and as the rate-limit key.
    pub endpoint: String,
}

impl RequestMeta {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    pub fn with_client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = ip.into();
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    fn client_key(&self) -> &str {
        if self.client_ip.is_empty() {
            UNKNOWN_CLIENT
        } else {
            &self.client_ip
        }
    }

    fn event(&self, kind: SecurityEventKind) -> SecurityEvent {
        SecurityEvent::new(kind)
            .ip(self.client_ip.as_str())
            .user_agent(self.user_agent.as_str())
            .detail("endpoint", self.endpoint.as_str())
    }
}

/// Outcome of [`Authority::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Proceed; `None` on public routes.
    Granted(Option<Principal>),
    /// The client exhausted its window.
    Throttled { retry_after: Duration },
    /// The token was rejected.
    Unauthorized,
    /// Authorization could not be determined.
    Unavailable,
}

/// State of the fast cache as seen by [`Authority::health`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheHealth {
    Disabled,
    Healthy,
    Unreachable,
}

#[derive(Debug, Clone)]
pub struct AuthorityHealth {
    pub fast_cache: CacheHealth,
    pub geo_database: bool,
    pub geo_cache: GeoStats,
    pub contact_cache: ContactCacheStats,
}

/// Session validation, rate limiting and security auditing for one process.
pub struct Authority {
    rate_limit: RateLimitConfig,
    trusted_proxies: Vec<IpAddr>,
    cache: Option<Arc<dyn FastCache>>,
    validator: SessionValidator,
    registry: SessionRegistry,
    rate_limiter: RateLimiter,
    emitter: Arc<SecurityEventEmitter>,
}

impl Authority {
    pub fn builder(config: AuthorityConfig) -> AuthorityBuilder {
        AuthorityBuilder::new(config)
    }

    pub fn validator(&self) -> &SessionValidator {
        &self.validator
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn emitter(&self) -> &SecurityEventEmitter {
        &self.emitter
    }

    pub fn fast_cache(&self) -> Option<&Arc<dyn FastCache>> {
        self.cache.as_ref()
    }

    /// Peers allowed to report the client address through forwarding headers.
    pub fn trusted_proxies(&self) -> &[IpAddr] {
        &self.trusted_proxies
    }

    /// Decides whether a request may proceed.
    pub async fn admit(&self, meta: &RequestMeta) -> Admission {
        let policy = self.rate_limit.rule_for(&meta.endpoint);

        match self
            .rate_limiter
            .check(meta.client_key(), &meta.endpoint, policy.limit, policy.window)
            .await
        {
            Ok(decision) if !decision.is_allowed() => {
                self.emitter
                    .emit(
                        meta.event(SecurityEventKind::RateLimitExceeded)
                            .message("rate limit exceeded")
                            .detail("limit", policy.limit),
                    )
                    .await;
                return Admission::Throttled {
                    retry_after: policy.window,
                };
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(endpoint = %meta.endpoint, error = %e, "Rate limit misconfigured, allowing request");
            }
        }

        if !policy.requires_auth {
            return Admission::Granted(None);
        }

        let token = meta.bearer.as_deref().unwrap_or_default();
        match self.validator.validate(token).await {
            SessionOutcome::Authenticated(principal) => Admission::Granted(Some(principal)),
            SessionOutcome::Rejected(reason) => {
                self.emitter
                    .emit(
                        meta.event(SecurityEventKind::UnauthorizedAccess)
                            .message("session rejected")
                            .detail("reason", reason.as_str()),
                    )
                    .await;
                Admission::Unauthorized
            }
            SessionOutcome::Unavailable => {
                self.emitter
                    .emit(
                        meta.event(SecurityEventKind::UnauthorizedAccess)
                            .message("session store unavailable")
                            .detail("reason", "store_unavailable"),
                    )
                    .await;
                Admission::Unavailable
            }
        }
    }

    /// Records a freshly issued session in the fast cache and the identity's
    /// session set, then emits `login_success`.
    ///
    /// The durable session row is authoritative, so a fast-cache outage is
    /// logged and audited but does not fail the login.
    pub async fn open_session(
        &self,
        principal: Principal,
        token: &str,
        ttl: Duration,
        meta: &RequestMeta,
    ) -> AuthorityResult<()> {
        let cached = async {
            self.registry.cache_session(token, principal, ttl).await?;
            self.registry
                .register(principal.identity_id, token, ttl)
                .await
        }
        .await;
        self.tolerate_cache_failure(cached, "open_session", principal.identity_id, meta)
            .await?;

        self.emitter
            .emit(
                meta.event(SecurityEventKind::LoginSuccess)
                    .identity(principal.identity_id)
                    .message("session opened")
                    .detail("role_id", principal.role_id),
            )
            .await;
        Ok(())
    }

    /// Ends one session.
    ///
    /// Revoking the durable session row is the caller's job; this drops the
    /// cached copy and the set membership. A fast-cache outage is tolerated
    /// the same way as in [`open_session`](Self::open_session).
    pub async fn logout(
        &self,
        principal: Principal,
        token: &str,
        meta: &RequestMeta,
    ) -> AuthorityResult<()> {
        let forgotten = async {
            self.registry.forget_session(token).await?;
            self.registry
                .unregister(principal.identity_id, token)
                .await
                .map(|_| ())
        }
        .await;
        self.tolerate_cache_failure(forgotten, "logout", principal.identity_id, meta)
            .await?;

        self.emitter
            .emit(
                meta.event(SecurityEventKind::Logout)
                    .identity(principal.identity_id)
                    .message("session closed"),
            )
            .await;
        Ok(())
    }

    /// Turns a fast-cache error into a warning plus `suspicious_activity`;
    /// every other error is returned.
    async fn tolerate_cache_failure(
        &self,
        result: AuthorityResult<()>,
        operation: &'static str,
        identity_id: u32,
        meta: &RequestMeta,
    ) -> AuthorityResult<()> {
        match result {
            Err(AuthorityError::Cache(e)) => {
                tracing::warn!(operation, identity_id, error = %e, "Fast cache unavailable, continuing without it");
                self.emitter
                    .emit(
                        meta.event(SecurityEventKind::SuspiciousActivity)
                            .identity(identity_id)
                            .message("fast cache unavailable")
                            .detail("operation", operation)
                            .detail("error", e.to_string()),
                    )
                    .await;
                Ok(())
            }
            other => other,
        }
    }

    /// Drops every cached session of an identity. Returns how many were
    /// registered.
    pub async fn logout_everywhere(
        &self,
        identity_id: u32,
        meta: &RequestMeta,
    ) -> AuthorityResult<usize> {
        let invalidated = self.registry.invalidate_all(identity_id).await?;
        self.emitter
            .emit(
                meta.event(SecurityEventKind::SessionInvalidated)
                    .identity(identity_id)
                    .message("all sessions invalidated")
                    .detail("sessions", invalidated),
            )
            .await;
        Ok(invalidated)
    }

    pub async fn health(&self) -> AuthorityHealth {
        let fast_cache = match &self.cache {
            None => CacheHealth::Disabled,
            Some(cache) => match cache.ping().await {
                Ok(()) => CacheHealth::Healthy,
                Err(e) => {
                    tracing::warn!(error = %e, "Fast cache health check failed");
                    CacheHealth::Unreachable
                }
            },
        };
        AuthorityHealth {
            fast_cache,
            geo_database: self.emitter.geo().has_database(),
            geo_cache: self.emitter.geo().stats(),
            contact_cache: self.emitter.contacts().cache().stats(),
        }
    }
}

/// Assembles an [`Authority`] from configuration and injected stores.
pub struct AuthorityBuilder {
    config: AuthorityConfig,
    cache: Option<Arc<dyn FastCache>>,
    session_store: Option<Arc<dyn SessionStore>>,
    audit_store: Option<Arc<dyn AuditStore>>,
    contact_store: Option<Arc<dyn ContactStore>>,
    geo_database: Option<Arc<dyn GeoDatabase>>,
}

impl AuthorityBuilder {
    pub fn new(config: AuthorityConfig) -> Self {
        Self {
            config,
            cache: None,
            session_store: None,
            audit_store: None,
            contact_store: None,
            geo_database: None,
        }
    }

    /// Use this fast cache instead of connecting to Redis.
    pub fn fast_cache(mut self, cache: Arc<dyn FastCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = Some(store);
        self
    }

    pub fn audit_store(mut self, store: Arc<dyn AuditStore>) -> Self {
        self.audit_store = Some(store);
        self
    }

    pub fn contact_store(mut self, store: Arc<dyn ContactStore>) -> Self {
        self.contact_store = Some(store);
        self
    }

    /// Use this geolocation database instead of `geo.database_path`.
    pub fn geo_database(mut self, database: Arc<dyn GeoDatabase>) -> Self {
        self.geo_database = Some(database);
        self
    }

    /// Connects to Redis when enabled and no cache was injected, then builds.
    pub async fn connect(mut self) -> AuthorityResult<Authority> {
        if self.cache.is_none() {
            self.cache = create_fast_cache(&self.config.redis).await;
        }
        self.build()
    }

    /// Builds without connecting anywhere.
    pub fn build(self) -> AuthorityResult<Authority> {
        self.config
            .validate()
            .map_err(AuthorityError::configuration)?;
        let session_store = self
            .session_store
            .ok_or_else(|| AuthorityError::not_configured("session store"))?;
        let config = self.config;

        let geo = match self.geo_database {
            Some(database) => {
                let resolver = GeoResolver::new(config.geo.cache_ttl(), config.geo.cache_max_entries);
                resolver.load_database(database);
                resolver
            }
            None => GeoResolver::from_config(&config.geo),
        };

        let contact_cache = if config.contact_cache.enabled {
            ContactCache::new(config.contact_cache.capacity)
        } else {
            ContactCache::disabled()
        };
        let contacts = ContactResolver::new(
            contact_cache,
            self.contact_store,
            config.session.lookup_timeout(),
        );

        let emitter = Arc::new(SecurityEventEmitter::new(
            self.audit_store,
            Arc::new(geo),
            Arc::new(contacts),
            &config.audit,
        ));

        tracing::info!(
            fast_cache = self.cache.is_some(),
            audit_persist = emitter.persists(),
            rules = config.rate_limit.rules.len(),
            "Session authority initialized"
        );

        Ok(Authority {
            validator: SessionValidator::new(
                self.cache.clone(),
                session_store,
                config.session.lookup_timeout(),
            ),
            registry: SessionRegistry::new(self.cache.clone()),
            rate_limiter: RateLimiter::new(self.cache.clone(), emitter.clone()),
            rate_limit: config.rate_limit,
            trusted_proxies: config.trusted_proxies,
            cache: self.cache,
            emitter,
        })
    }
}
