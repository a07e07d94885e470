//! Database migrations for api-guard
//!
//! This module contains SQL migrations for the SQLite database schema.

/// SQL statement to create the initial database schema
pub const CREATE_SCHEMA: &str = r#"
-- API identities table
CREATE TABLE IF NOT EXISTS api_identities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    secret_prefix TEXT NOT NULL,
    secret_hash TEXT NOT NULL,
    quota_per_minute INTEGER NOT NULL DEFAULT 0,
    enabled INTEGER NOT NULL DEFAULT 1,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    last_used_at DATETIME,
    deleted_at DATETIME
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_identities_live_name
    ON api_identities(name) WHERE deleted_at IS NULL;
CREATE INDEX IF NOT EXISTS idx_identities_prefix ON api_identities(secret_prefix);

-- Global settings table
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;
