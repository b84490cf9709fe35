use crate::google_oauth::GoogleCredential;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A `google_tokens` row, as read from SQLite or PostgREST.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct DbGoogleToken {
    pub user_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub email: String,
    #[serde(default)]
    pub scope: String,
    pub expires_at: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl From<DbGoogleToken> for GoogleCredential {
    fn from(d: DbGoogleToken) -> Self {
        GoogleCredential {
            user_id: d.user_id,
            access_token: d.access_token,
            refresh_token: d.refresh_token.filter(|t| !t.is_empty()),
            email: d.email,
            scope: d.scope,
            expires_at: d.expires_at,
            created_at: d.created_at,
        }
    }
}
