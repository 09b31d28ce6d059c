//! Security event emission.
//!
//! Every event goes to two sinks:
//!
//! - the process log, as one `tracing` event under target `security`
//! - the durable audit log, best-effort, via [`AuditStore`]
//!
//! Free-text fields are sanitized before either sink sees them. Structured
//! details never reach the log line (only their count does); the durable
//! record keeps them as a JSON blob together with the geolocated address.

pub mod contact;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::config::AuditConfig;
use crate::error::StoreResult;
use crate::geo::GeoResolver;

pub use contact::{ContactCache, ContactCacheStats, ContactResolver, ContactStore};

/// Longest free-text field kept, in characters.
pub const MAX_FIELD_LEN: usize = 200;

const TRUNCATION_MARKER: &str = "...";

/// Kinds of security-relevant events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    LoginSuccess,
    LoginFailure,
    Logout,
    UnauthorizedAccess,
    RateLimitExceeded,
    SuspiciousActivity,
    SessionInvalidated,
    PermissionDenied,
}

impl SecurityEventKind {
    /// Stable code stored in the audit log.
    pub fn code(&self) -> &'static str {
        match self {
            SecurityEventKind::LoginSuccess => "login_success",
            SecurityEventKind::LoginFailure => "login_failure",
            SecurityEventKind::Logout => "logout",
            SecurityEventKind::UnauthorizedAccess => "unauthorized_access",
            SecurityEventKind::RateLimitExceeded => "rate_limit_exceeded",
            SecurityEventKind::SuspiciousActivity => "suspicious_activity",
            SecurityEventKind::SessionInvalidated => "session_invalidated",
            SecurityEventKind::PermissionDenied => "permission_denied",
        }
    }

    /// Failures are logged at `warn`, everything else at `info`.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            SecurityEventKind::LoginFailure
                | SecurityEventKind::UnauthorizedAccess
                | SecurityEventKind::RateLimitExceeded
                | SecurityEventKind::SuspiciousActivity
                | SecurityEventKind::PermissionDenied
        )
    }
}

impl std::fmt::Display for SecurityEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Replaces line breaks and tabs with spaces and truncates to
/// [`MAX_FIELD_LEN`] characters plus a trailing `...`.
pub fn sanitize(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| if matches!(c, '\n' | '\r' | '\t') { ' ' } else { c })
        .collect();
    if cleaned.chars().count() <= MAX_FIELD_LEN {
        return cleaned;
    }
    let mut truncated: String = cleaned.chars().take(MAX_FIELD_LEN).collect();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}

/// Builder for a security event.
#[derive(Debug, Clone)]
pub struct SecurityEvent {
    kind: SecurityEventKind,
    identity_id: Option<u32>,
    contact: Option<String>,
    ip: String,
    user_agent: String,
    message: String,
    details: Map<String, Value>,
}

impl SecurityEvent {
    pub fn new(kind: SecurityEventKind) -> Self {
        Self {
            kind,
            identity_id: None,
            contact: None,
            ip: String::new(),
            user_agent: String::new(),
            message: String::new(),
            details: Map::new(),
        }
    }

    pub fn kind(&self) -> SecurityEventKind {
        self.kind
    }

    /// Set the identity; zero means anonymous.
    pub fn identity(mut self, identity_id: u32) -> Self {
        self.identity_id = (identity_id != 0).then_some(identity_id);
        self
    }

    /// Set the contact. When unset, it is looked up from the identity.
    pub fn contact(mut self, contact: impl Into<String>) -> Self {
        self.contact = Some(contact.into());
        self
    }

    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = ip.into();
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Add a structured detail.
    pub fn detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Sanitizes every free-text field.
    pub fn sanitize(self) -> SanitizedEvent {
        SanitizedEvent {
            kind: self.kind,
            identity_id: self.identity_id,
            contact: self.contact.as_deref().map(sanitize).unwrap_or_default(),
            ip: sanitize(&self.ip),
            user_agent: sanitize(&self.user_agent),
            message: sanitize(&self.message),
            details: self.details,
        }
    }
}

/// A security event whose free-text fields are safe to log.
#[derive(Debug, Clone, PartialEq)]
pub struct SanitizedEvent {
    pub kind: SecurityEventKind,
    pub identity_id: Option<u32>,
    pub contact: String,
    pub ip: String,
    pub user_agent: String,
    pub message: String,
    pub details: Map<String, Value>,
}

/// One row of the durable audit log.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRecord {
    pub kind: SecurityEventKind,
    pub identity_id: Option<u32>,
    pub contact: String,
    pub ip: String,
    /// `"City, Country"`, `"Country"`, or empty.
    pub location: String,
    pub user_agent: String,
    pub message: String,
    /// Full structured details as an opaque JSON object.
    pub details: Value,
    pub recorded_at: OffsetDateTime,
}

/// Durable audit-log sink.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, record: &AuditRecord) -> StoreResult<()>;
}

macro_rules! security_line {
    ($level:expr, $event:expr) => {
        tracing::event!(
            target: "security",
            $level,
            kind = $event.kind.code(),
            identity_id = $event.identity_id,
            contact = %$event.contact,
            ip = %$event.ip,
            user_agent = %$event.user_agent,
            detail_count = $event.details.len(),
            "{}",
            $event.message
        )
    };
}

/// Writes security events to the log and the durable audit store.
pub struct SecurityEventEmitter {
    store: Option<Arc<dyn AuditStore>>,
    geo: Arc<GeoResolver>,
    contacts: Arc<ContactResolver>,
    write_timeout: Duration,
}

impl SecurityEventEmitter {
    /// The durable sink is dropped when `config.persist` is off.
    pub fn new(
        store: Option<Arc<dyn AuditStore>>,
        geo: Arc<GeoResolver>,
        contacts: Arc<ContactResolver>,
        config: &AuditConfig,
    ) -> Self {
        Self {
            store: store.filter(|_| config.persist),
            geo,
            contacts,
            write_timeout: config.write_timeout(),
        }
    }

    /// An emitter that only writes the log line.
    pub fn console_only() -> Self {
        Self {
            store: None,
            geo: Arc::new(GeoResolver::new(Duration::ZERO, 0)),
            contacts: Arc::new(ContactResolver::disabled()),
            write_timeout: Duration::ZERO,
        }
    }

    pub fn persists(&self) -> bool {
        self.store.is_some()
    }

    pub fn geo(&self) -> &GeoResolver {
        &self.geo
    }

    pub fn contacts(&self) -> &ContactResolver {
        &self.contacts
    }

    /// Emits `event`. Never fails; persistence errors are only logged.
    ///
    /// The log line is written first. Contact and location are looked up
    /// only for the durable record.
    pub async fn emit(&self, event: SecurityEvent) {
        let needs_contact = event.contact.is_none();
        let event = event.sanitize();

        if event.kind.is_failure() {
            security_line!(tracing::Level::WARN, event);
        } else {
            security_line!(tracing::Level::INFO, event);
        }

        self.persist(event, needs_contact).await;
    }

    async fn persist(&self, mut event: SanitizedEvent, needs_contact: bool) {
        let Some(store) = &self.store else {
            return;
        };

        if needs_contact
            && let Some(identity_id) = event.identity_id
            && let Some(contact) = self.contacts.resolve(identity_id).await
        {
            event.contact = sanitize(&contact);
        }
        let location = sanitize(&self.geo.resolve(&event.ip).display());
        let record = AuditRecord {
            kind: event.kind,
            identity_id: event.identity_id,
            contact: event.contact,
            ip: event.ip,
            location,
            user_agent: event.user_agent,
            message: event.message,
            details: Value::Object(event.details),
            recorded_at: OffsetDateTime::now_utc(),
        };

        // Failures go to the log only, never back through `emit`.
        match tokio::time::timeout(self.write_timeout, store.append(&record)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(kind = record.kind.code(), error = %e, "Failed to persist security event");
            }
            Err(_) => {
                tracing::error!(
                    kind = record.kind.code(),
                    timeout_ms = self.write_timeout.as_millis() as u64,
                    "Timed out persisting security event"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_replaces_control_characters() {
        assert_eq!(sanitize("a\nb\rc\td"), "a b c d");
        assert_eq!(sanitize("fake\r\n[INFO] entry"), "fake  [INFO] entry");
        assert_eq!(sanitize("plain"), "plain");
    }

    #[test]
    fn test_sanitize_truncates_long_fields() {
        let exact = "x".repeat(MAX_FIELD_LEN);
        assert_eq!(sanitize(&exact), exact);

        let long = "y".repeat(MAX_FIELD_LEN + 1);
        let sanitized = sanitize(&long);
        assert_eq!(sanitized.len(), MAX_FIELD_LEN + TRUNCATION_MARKER.len());
        assert!(sanitized.ends_with("..."));
    }

    #[test]
    fn test_sanitize_counts_characters_not_bytes() {
        let long = "é".repeat(MAX_FIELD_LEN + 5);
        let sanitized = sanitize(&long);
        assert_eq!(sanitized.chars().count(), MAX_FIELD_LEN + 3);
    }

    #[test]
    fn test_builder_sanitizes_every_field() {
        let event = SecurityEvent::new(SecurityEventKind::LoginFailure)
            .identity(0)
            .contact("a@b.c\n")
            .ip("1.2.3.4\t")
            .user_agent("curl\r\n")
            .message("bad\npassword")
            .detail("attempt", 3)
            .sanitize();

        assert_eq!(event.identity_id, None);
        assert_eq!(event.contact, "a@b.c ");
        assert_eq!(event.ip, "1.2.3.4 ");
        assert_eq!(event.user_agent, "curl  ");
        assert_eq!(event.message, "bad password");
        assert_eq!(event.details.len(), 1);
    }

    #[test]
    fn test_kind_codes() {
        assert_eq!(SecurityEventKind::RateLimitExceeded.code(), "rate_limit_exceeded");
        assert_eq!(SecurityEventKind::Logout.to_string(), "logout");
        assert!(SecurityEventKind::UnauthorizedAccess.is_failure());
        assert!(!SecurityEventKind::LoginSuccess.is_failure());
        assert_eq!(
            serde_json::to_value(SecurityEventKind::SessionInvalidated).unwrap(),
            serde_json::json!("session_invalidated")
        );
    }
}
