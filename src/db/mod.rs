//! Token store: one Google credential per application user.
//!
//! Layout:
//! - `models.rs`: row struct shared by both backends
//! - `schema.rs`: SQLite DDL
//! - `sqlite.rs`: server-side store (`server` persistence mode)
//! - `postgrest.rs`: Supabase store under row-level security (`client_relay` mode)

pub mod models;
pub mod postgrest;
pub mod schema;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::AtendeError;
use crate::google_oauth::{GoogleCredential, RotatedTokens, TokenGrant};
use crate::identity::UserScope;

pub use models::DbGoogleToken;
pub use postgrest::PostgrestTokenStore;
pub use schema::SQLITE_INIT;
pub use sqlite::{SqlitePool, SqliteTokenStore};

/// Per-user credential persistence. Every operation is confined to the
/// record owned by `scope`; writes are last-write-wins.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn find(&self, scope: &UserScope) -> Result<Option<GoogleCredential>, AtendeError>;

    /// Insert or replace the caller's credential after a successful exchange.
    /// A grant without a refresh token keeps the one already on record.
    async fn save(
        &self,
        scope: &UserScope,
        grant: &TokenGrant,
        email: &str,
    ) -> Result<GoogleCredential, AtendeError>;

    /// Write tokens rotated by a refresh during an API call.
    async fn apply_rotation(
        &self,
        scope: &UserScope,
        rotated: &RotatedTokens,
    ) -> Result<(), AtendeError>;
}
