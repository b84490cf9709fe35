//! SQL DDL for the server-side token store.

/// SQLite schema:
/// - `user_id` is the primary key, one credential per user
/// - `refresh_token` is nullable; NULL marks a credential that cannot refresh
/// - `expires_at` is an advisory epoch-millisecond expiry
pub const SQLITE_INIT: &str = r#"
CREATE TABLE IF NOT EXISTS google_tokens (
    user_id TEXT PRIMARY KEY NOT NULL,
    access_token TEXT NOT NULL,
    refresh_token TEXT NULL,
    email TEXT NOT NULL,
    scope TEXT NOT NULL DEFAULT '',
    expires_at INTEGER NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;
