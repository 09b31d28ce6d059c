//! Audit log storage.

use gatehouse_auth::AuditRecord;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use time::OffsetDateTime;

use crate::{PgPool, StorageResult, id_from_db};

/// Row of the `audit_logs` table.
#[derive(Debug, Clone)]
pub struct AuditLogRow {
    pub id: i64,
    pub event_type: String,
    pub identity_id: Option<u32>,
    pub email: String,
    pub ip_address: String,
    pub location: String,
    pub user_agent: String,
    pub message: String,
    pub details: serde_json::Value,
    pub created_at: OffsetDateTime,
}

type AuditTuple = (
    i64,
    String,
    Option<i64>,
    String,
    String,
    String,
    String,
    String,
    serde_json::Value,
    OffsetDateTime,
);

impl AuditLogRow {
    fn from_tuple(row: AuditTuple) -> StorageResult<Self> {
        Ok(Self {
            id: row.0,
            event_type: row.1,
            identity_id: row.2.map(|id| id_from_db(id, "user_id")).transpose()?,
            email: row.3,
            ip_address: row.4,
            location: row.5,
            user_agent: row.6,
            message: row.7,
            details: row.8,
            created_at: row.9,
        })
    }
}

/// Audit log storage operations.
pub struct AuditLogStorage<'a> {
    pool: &'a PgPool,
}

impl<'a> AuditLogStorage<'a> {
    /// Create a new audit log storage with a connection pool reference.
    #[must_use]
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Append one security event.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn append(&self, record: &AuditRecord) -> StorageResult<()> {
        query(
            r#"
            INSERT INTO audit_logs
                (event_type, user_id, email, ip_address, location, user_agent, message, details, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.kind.code())
        .bind(record.identity_id.map(i64::from))
        .bind(&record.contact)
        .bind(&record.ip)
        .bind(&record.location)
        .bind(&record.user_agent)
        .bind(&record.message)
        .bind(&record.details)
        .bind(record.recorded_at)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Most recent entries for an identity, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn recent_for_identity(
        &self,
        identity_id: u32,
        limit: i64,
    ) -> StorageResult<Vec<AuditLogRow>> {
        let rows: Vec<AuditTuple> = query_as(
            r#"
            SELECT id, event_type, user_id, email, ip_address, location,
                   user_agent, message, details, created_at
            FROM audit_logs
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(i64::from(identity_id))
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(AuditLogRow::from_tuple).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tuple(user_id: Option<i64>) -> AuditTuple {
        (
            1,
            "logout".to_string(),
            user_id,
            "a@example.com".to_string(),
            "203.0.113.1".to_string(),
            "Berlin, Germany".to_string(),
            "curl/8".to_string(),
            "bye".to_string(),
            json!({"endpoint": "/logout"}),
            OffsetDateTime::UNIX_EPOCH,
        )
    }

    #[test]
    fn test_row_from_tuple() {
        let row = AuditLogRow::from_tuple(tuple(Some(9))).unwrap();
        assert_eq!(row.identity_id, Some(9));
        assert_eq!(row.event_type, "logout");
        assert_eq!(row.details["endpoint"], "/logout");

        let anonymous = AuditLogRow::from_tuple(tuple(None)).unwrap();
        assert_eq!(anonymous.identity_id, None);
    }

    #[test]
    fn test_row_rejects_negative_identity() {
        assert!(AuditLogRow::from_tuple(tuple(Some(-1))).is_err());
    }
}
