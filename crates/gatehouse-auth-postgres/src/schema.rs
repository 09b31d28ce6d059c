//! Table definitions used by the storages in this crate.

use sqlx_core::raw_sql::raw_sql;

use crate::{PgPool, StorageResult};

/// Idempotent DDL for roles, users, sessions and audit logs.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS roles (
    id          BIGSERIAL PRIMARY KEY,
    name        TEXT NOT NULL UNIQUE,
    deleted_at  TIMESTAMPTZ
);

CREATE TABLE IF NOT EXISTS users (
    id          BIGSERIAL PRIMARY KEY,
    role_id     BIGINT NOT NULL REFERENCES roles (id),
    email       TEXT NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    deleted_at  TIMESTAMPTZ
);

CREATE TABLE IF NOT EXISTS sessions (
    id          BIGSERIAL PRIMARY KEY,
    user_id     BIGINT NOT NULL REFERENCES users (id),
    token       TEXT NOT NULL,
    expires_at  TIMESTAMPTZ NOT NULL,
    ip_address  TEXT NOT NULL DEFAULT '',
    user_agent  TEXT NOT NULL DEFAULT '',
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    deleted_at  TIMESTAMPTZ
);

CREATE UNIQUE INDEX IF NOT EXISTS sessions_token_live_idx
    ON sessions (token) WHERE deleted_at IS NULL;
CREATE INDEX IF NOT EXISTS sessions_user_live_idx
    ON sessions (user_id) WHERE deleted_at IS NULL;

CREATE TABLE IF NOT EXISTS audit_logs (
    id          BIGSERIAL PRIMARY KEY,
    event_type  TEXT NOT NULL,
    user_id     BIGINT,
    email       TEXT NOT NULL DEFAULT '',
    ip_address  TEXT NOT NULL DEFAULT '',
    location    TEXT NOT NULL DEFAULT '',
    user_agent  TEXT NOT NULL DEFAULT '',
    message     TEXT NOT NULL DEFAULT '',
    details     JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS audit_logs_user_created_idx
    ON audit_logs (user_id, created_at DESC);
"#;

/// Apply [`SCHEMA_SQL`] in one round trip.
///
/// # Errors
///
/// Returns an error if a statement fails.
pub async fn apply(pool: &PgPool) -> StorageResult<()> {
    raw_sql(SCHEMA_SQL).execute(pool).await?;
    tracing::debug!("Gatehouse schema applied");
    Ok(())
}
