//! Session storage.
//!
//! Sessions are soft-deleted rows keyed by an opaque token. A row is live
//! while it is not deleted, not expired, and its user is not deleted.

use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use time::OffsetDateTime;

use crate::{PgPool, StorageResult, id_from_db};

// =============================================================================
// Types
// =============================================================================

/// The principal behind a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionRow {
    pub identity_id: u32,
    pub role_id: u32,
}

impl SessionRow {
    /// Create from a `(user_id, role_id)` tuple.
    fn from_tuple(row: (i64, i64)) -> StorageResult<Self> {
        Ok(Self {
            identity_id: id_from_db(row.0, "user_id")?,
            role_id: id_from_db(row.1, "role_id")?,
        })
    }
}

/// Fields recorded when a session is issued.
#[derive(Debug, Clone)]
pub struct NewSession<'s> {
    pub identity_id: u32,
    pub token: &'s str,
    pub expires_at: OffsetDateTime,
    pub ip_address: &'s str,
    pub user_agent: &'s str,
}

// =============================================================================
// Session Storage
// =============================================================================

/// Session storage operations.
pub struct SessionStorage<'a> {
    pool: &'a PgPool,
}

impl<'a> SessionStorage<'a> {
    /// Create a new session storage with a connection pool reference.
    #[must_use]
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Find the live session for `token`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails or an id does not fit
    /// in `u32`.
    pub async fn find_active(&self, token: &str) -> StorageResult<Option<SessionRow>> {
        let row: Option<(i64, i64)> = query_as(
            r#"
            SELECT u.id, r.id
            FROM sessions s
            JOIN users u ON u.id = s.user_id
            JOIN roles r ON r.id = u.role_id
            WHERE s.token = $1
              AND s.deleted_at IS NULL
              AND s.expires_at > NOW()
              AND u.deleted_at IS NULL
            LIMIT 1
            "#,
        )
        .bind(token)
        .fetch_optional(self.pool)
        .await?;

        row.map(SessionRow::from_tuple).transpose()
    }

    /// Record a newly issued session.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails, including when a live session
    /// already holds the same token.
    pub async fn create(&self, session: &NewSession<'_>) -> StorageResult<()> {
        query(
            r#"
            INSERT INTO sessions (user_id, token, expires_at, ip_address, user_agent)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(i64::from(session.identity_id))
        .bind(session.token)
        .bind(session.expires_at)
        .bind(session.ip_address)
        .bind(session.user_agent)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Soft-delete the session for `token`.
    ///
    /// Returns `true` if a live session was revoked.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub async fn revoke(&self, token: &str) -> StorageResult<bool> {
        let result = query(
            r#"
            UPDATE sessions
            SET deleted_at = NOW()
            WHERE token = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(token)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Soft-delete every live session of an identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub async fn revoke_all_for_identity(&self, identity_id: u32) -> StorageResult<u64> {
        let result = query(
            r#"
            UPDATE sessions
            SET deleted_at = NOW()
            WHERE user_id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(i64::from(identity_id))
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Soft-delete sessions whose expiry has passed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub async fn purge_expired(&self) -> StorageResult<u64> {
        let result = query(
            r#"
            UPDATE sessions
            SET deleted_at = NOW()
            WHERE expires_at <= NOW() AND deleted_at IS NULL
            "#,
        )
        .execute(self.pool)
        .await?;

        let purged = result.rows_affected();
        if purged > 0 {
            tracing::debug!(purged, "Purged expired sessions");
        }
        Ok(purged)
    }
}
