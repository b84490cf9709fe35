use crate::db::TokenStore;
use crate::db::models::DbGoogleToken;
use crate::db::schema::SQLITE_INIT;
use crate::error::AtendeError;
use crate::google_oauth::{GoogleCredential, RotatedTokens, TokenGrant};
use crate::identity::UserScope;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use tracing::debug;

pub type SqlitePool = Pool<Sqlite>;

const SELECT_BY_USER: &str = r#"SELECT user_id, access_token, refresh_token, email, scope,
    expires_at, created_at
    FROM google_tokens WHERE user_id = ?"#;

#[derive(Clone)]
pub struct SqliteTokenStore {
    pool: SqlitePool,
}

impl SqliteTokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database and apply the schema.
    pub async fn connect(database_url: &str) -> Result<Self, AtendeError> {
        let connect_opts = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let mut pool_opts = SqlitePoolOptions::new();
        if database_url.contains(":memory:") {
            // Each in-memory connection is its own database.
            pool_opts = pool_opts.max_connections(1);
        }
        let store = Self::new(pool_opts.connect_with(connect_opts).await?);
        store.init_schema().await?;
        Ok(store)
    }

    /// Initialize the schema by executing the bundled DDL.
    pub async fn init_schema(&self) -> Result<(), AtendeError> {
        for stmt in SQLITE_INIT.split(';') {
            let s = stmt.trim();
            if s.is_empty() {
                continue;
            }
            sqlx::query(s).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn fetch(&self, user_id: &str) -> Result<Option<DbGoogleToken>, AtendeError> {
        let row = sqlx::query_as::<_, DbGoogleToken>(SELECT_BY_USER)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }
}

#[async_trait]
impl TokenStore for SqliteTokenStore {
    async fn find(&self, scope: &UserScope) -> Result<Option<GoogleCredential>, AtendeError> {
        Ok(self.fetch(scope.user_id()).await?.map(Into::into))
    }

    /// Upsert by `user_id`. The refresh token on record survives a grant that omits one.
    async fn save(
        &self,
        scope: &UserScope,
        grant: &TokenGrant,
        email: &str,
    ) -> Result<GoogleCredential, AtendeError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO google_tokens (
                user_id, access_token, refresh_token, email, scope,
                expires_at, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                access_token=excluded.access_token,
                refresh_token=COALESCE(excluded.refresh_token, google_tokens.refresh_token),
                email=excluded.email,
                scope=excluded.scope,
                expires_at=excluded.expires_at,
                updated_at=excluded.updated_at
            "#,
        )
        .bind(scope.user_id())
        .bind(&grant.access_token)
        .bind(grant.refresh_token.as_deref())
        .bind(email)
        .bind(&grant.scope)
        .bind(grant.expires_at)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        debug!(user_id = %scope.user_id(), "stored Google credential");
        let row = self
            .fetch(scope.user_id())
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;
        Ok(row.into())
    }

    async fn apply_rotation(
        &self,
        scope: &UserScope,
        rotated: &RotatedTokens,
    ) -> Result<(), AtendeError> {
        sqlx::query(
            r#"UPDATE google_tokens SET
                access_token = ?,
                refresh_token = COALESCE(?, refresh_token),
                expires_at = ?,
                updated_at = ?
              WHERE user_id = ?"#,
        )
        .bind(&rotated.access_token)
        .bind(rotated.refresh_token.as_deref())
        .bind(rotated.expires_at)
        .bind(Utc::now())
        .bind(scope.user_id())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqliteTokenStore {
        SqliteTokenStore::connect("sqlite::memory:").await.unwrap()
    }

    fn grant(access: &str, refresh: Option<&str>) -> TokenGrant {
        TokenGrant {
            access_token: access.to_string(),
            refresh_token: refresh.map(str::to_string),
            scope: "https://www.googleapis.com/auth/calendar".to_string(),
            expires_at: Some(1_700_000_000_000),
        }
    }

    #[tokio::test]
    async fn regrant_without_refresh_token_keeps_previous_one() {
        let store = store().await;
        let user = UserScope::authenticated("user-x", "session");

        store.save(&user, &grant("A1", Some("R1")), "x@example.com").await.unwrap();
        let updated = store.save(&user, &grant("A2", None), "x@example.com").await.unwrap();

        assert_eq!(updated.access_token, "A2");
        assert_eq!(updated.refresh_token.as_deref(), Some("R1"));
    }

    #[tokio::test]
    async fn regrant_with_refresh_token_replaces_it() {
        let store = store().await;
        let user = UserScope::authenticated("user-x", "session");

        store.save(&user, &grant("A1", Some("R1")), "x@example.com").await.unwrap();
        let first = store.find(&user).await.unwrap().unwrap();
        let updated = store.save(&user, &grant("A2", Some("R2")), "x@example.com").await.unwrap();

        assert_eq!(updated.refresh_token.as_deref(), Some("R2"));
        assert_eq!(updated.created_at, first.created_at);
    }

    #[tokio::test]
    async fn first_grant_without_refresh_token_is_degraded() {
        let store = store().await;
        let user = UserScope::authenticated("user-x", "session");

        let saved = store.save(&user, &grant("A1", None), "x@example.com").await.unwrap();
        assert!(!saved.is_refreshable());
    }

    #[tokio::test]
    async fn rotation_touches_only_the_scoped_user() {
        let store = store().await;
        let x = UserScope::authenticated("user-x", "sx");
        let y = UserScope::authenticated("user-y", "sy");
        store.save(&x, &grant("AX", Some("RX")), "x@example.com").await.unwrap();
        store.save(&y, &grant("AY", Some("RY")), "y@example.com").await.unwrap();

        store
            .apply_rotation(
                &x,
                &RotatedTokens {
                    access_token: "AX2".into(),
                    refresh_token: None,
                    expires_at: None,
                },
            )
            .await
            .unwrap();

        let x_row = store.find(&x).await.unwrap().unwrap();
        let y_row = store.find(&y).await.unwrap().unwrap();
        assert_eq!(x_row.access_token, "AX2");
        assert_eq!(x_row.refresh_token.as_deref(), Some("RX"));
        assert_eq!(y_row.access_token, "AY");
    }

    #[tokio::test]
    async fn unknown_user_is_not_connected() {
        let store = store().await;
        let nobody = UserScope::authenticated("nobody", "s");
        assert!(store.find(&nobody).await.unwrap().is_none());
    }
}
