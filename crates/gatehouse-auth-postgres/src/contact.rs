//! Identity contact lookup.

use sqlx_core::query_as::query_as;

use crate::{PgPool, StorageResult};

/// Reads the e-mail address of non-deleted users.
pub struct ContactStorage<'a> {
    pool: &'a PgPool,
}

impl<'a> ContactStorage<'a> {
    /// Create a new contact storage with a connection pool reference.
    #[must_use]
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Find the contact address of `identity_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find_contact(&self, identity_id: u32) -> StorageResult<Option<String>> {
        let row: Option<(String,)> = query_as(
            r#"
            SELECT email
            FROM users
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(i64::from(identity_id))
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(|(email,)| email).filter(|email| !email.is_empty()))
    }
}
