//! PostgreSQL storage backend for Gatehouse Auth
//!
//! Provides the durable store behind the session authority:
//!
//! - Session lookup (sessions joined to users and roles)
//! - Session issue and revocation (soft delete)
//! - Audit log append (one row per security event)
//! - Identity contact lookup (user e-mail)
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use gatehouse_auth::{Authority, load_config};
//! use gatehouse_auth_postgres::PostgresGatehouseStorage;
//!
//! let storage = PostgresGatehouseStorage::connect("postgres://localhost/gatehouse").await?;
//! storage.apply_schema().await?;
//!
//! let authority = Authority::builder(load_config(None)?)
//!     .session_store(Arc::new(storage.session_store()))
//!     .audit_store(Arc::new(storage.audit_store()))
//!     .contact_store(Arc::new(storage.contact_store()))
//!     .connect()
//!     .await?;
//! ```

pub mod adapters;
pub mod audit;
pub mod contact;
pub mod schema;
pub mod session;

use std::sync::Arc;

use gatehouse_auth::StoreError;
use sqlx_core::pool::Pool;
use sqlx_postgres::Postgres;

/// PostgreSQL connection pool type alias.
pub type PgPool = Pool<Postgres>;

pub use adapters::{PgAuditStore, PgContactStore, PgSessionStore};
pub use audit::AuditLogStorage;
pub use contact::ContactStorage;
pub use session::{SessionRow, SessionStorage};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx_core::Error),

    /// A row did not fit the expected shape.
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl StorageError {
    /// Create an `InvalidData` error.
    #[must_use]
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData(message.into())
    }

    /// Returns `true` if this is a database error.
    #[must_use]
    pub fn is_database_error(&self) -> bool {
        matches!(self, Self::Database(_))
    }

    /// Returns `true` if the pool gave up waiting for a connection.
    #[must_use]
    pub fn is_pool_timeout(&self) -> bool {
        matches!(self, Self::Database(sqlx_core::Error::PoolTimedOut))
    }
}

impl From<StorageError> for StoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Database(e) => StoreError::unavailable(e.to_string()),
            StorageError::InvalidData(message) => StoreError::invalid_data(message),
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

// =============================================================================
// Combined Storage
// =============================================================================

/// Combined PostgreSQL storage for the session authority.
///
/// Hands out borrowed storages for direct use and Arc-owning adapters that
/// plug into [`gatehouse_auth::AuthorityBuilder`].
#[derive(Clone)]
pub struct PostgresGatehouseStorage {
    pool: Arc<PgPool>,
}

impl PostgresGatehouseStorage {
    /// Create storage from an existing pool.
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` with default pool options.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        use sqlx_core::pool::PoolOptions;
        let pool = PoolOptions::<Postgres>::new().connect(database_url).await?;
        Ok(Self::new(Arc::new(pool)))
    }

    /// Get the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &Arc<PgPool> {
        &self.pool
    }

    /// Create the tables and indexes if they do not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if a DDL statement fails.
    pub async fn apply_schema(&self) -> StorageResult<()> {
        schema::apply(&self.pool).await
    }

    /// Session storage borrowing the pool.
    #[must_use]
    pub fn sessions(&self) -> SessionStorage<'_> {
        SessionStorage::new(&self.pool)
    }

    /// Audit log storage borrowing the pool.
    #[must_use]
    pub fn audit_logs(&self) -> AuditLogStorage<'_> {
        AuditLogStorage::new(&self.pool)
    }

    /// Contact storage borrowing the pool.
    #[must_use]
    pub fn contacts(&self) -> ContactStorage<'_> {
        ContactStorage::new(&self.pool)
    }

    /// [`gatehouse_auth::SessionStore`] adapter sharing the pool.
    #[must_use]
    pub fn session_store(&self) -> PgSessionStore {
        PgSessionStore::new(self.pool.clone())
    }

    /// [`gatehouse_auth::AuditStore`] adapter sharing the pool.
    #[must_use]
    pub fn audit_store(&self) -> PgAuditStore {
        PgAuditStore::new(self.pool.clone())
    }

    /// [`gatehouse_auth::ContactStore`] adapter sharing the pool.
    #[must_use]
    pub fn contact_store(&self) -> PgContactStore {
        PgContactStore::new(self.pool.clone())
    }
}

/// Converts a database id into the `u32` identifiers the authority uses.
pub(crate) fn id_from_db(value: i64, column: &str) -> StorageResult<u32> {
    u32::try_from(value)
        .map_err(|_| StorageError::invalid_data(format!("{column} {value} is out of range")))
}
