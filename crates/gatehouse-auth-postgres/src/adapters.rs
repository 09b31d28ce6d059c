//! Arc-owning storage adapters for use with the session authority.
//!
//! These adapters wrap the lifetime-based storage types and own an
//! `Arc<PgPool>`, allowing them to be handed to
//! [`AuthorityBuilder`](gatehouse_auth::AuthorityBuilder) as trait objects.

use std::sync::Arc;

use async_trait::async_trait;
use gatehouse_auth::{AuditRecord, AuditStore, ContactStore, Principal, SessionStore, StoreResult};

use crate::PgPool;
use crate::audit::AuditLogStorage;
use crate::contact::ContactStorage;
use crate::session::SessionStorage;

// =============================================================================
// Sessions
// =============================================================================

/// Arc-owning PostgreSQL session lookup.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: Arc<PgPool>,
}

impl PgSessionStore {
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn find_active(&self, token: &str) -> StoreResult<Option<Principal>> {
        let storage = SessionStorage::new(&self.pool);
        let row = storage.find_active(token).await?;
        Ok(row.map(|row| Principal::new(row.identity_id, row.role_id)))
    }
}

// =============================================================================
// Audit Logs
// =============================================================================

/// Arc-owning PostgreSQL audit sink.
#[derive(Clone)]
pub struct PgAuditStore {
    pool: Arc<PgPool>,
}

impl PgAuditStore {
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn append(&self, record: &AuditRecord) -> StoreResult<()> {
        let storage = AuditLogStorage::new(&self.pool);
        storage.append(record).await?;
        Ok(())
    }
}

// =============================================================================
// Contacts
// =============================================================================

/// Arc-owning PostgreSQL contact lookup.
#[derive(Clone)]
pub struct PgContactStore {
    pool: Arc<PgPool>,
}

impl PgContactStore {
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContactStore for PgContactStore {
    async fn find_contact(&self, identity_id: u32) -> StoreResult<Option<String>> {
        let storage = ContactStorage::new(&self.pool);
        Ok(storage.find_contact(identity_id).await?)
    }
}
