use crate::db::TokenStore;
use crate::db::models::DbGoogleToken;
use crate::error::AtendeError;
use crate::google_oauth::{GoogleCredential, RotatedTokens, TokenGrant};
use crate::identity::UserScope;
use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

/// Token store backed by Supabase PostgREST.
///
/// Requests carry the caller's own session JWT, so the database's row-level
/// security policies decide which rows are visible, independently of the
/// `user_id` filter sent here.
#[derive(Clone)]
pub struct PostgrestTokenStore {
    http: reqwest::Client,
    table_url: String,
    anon_key: String,
}

#[derive(Serialize)]
struct UpsertBody<'a> {
    user_id: &'a str,
    access_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<&'a str>,
    email: &'a str,
    scope: &'a str,
    expires_at: Option<i64>,
}

#[derive(Serialize)]
struct RotationBody<'a> {
    access_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<&'a str>,
    expires_at: Option<i64>,
}

impl PostgrestTokenStore {
    pub fn new(
        http: reqwest::Client,
        supabase_url: &str,
        anon_key: impl Into<String>,
        table: &str,
    ) -> Self {
        Self {
            http,
            table_url: format!("{}/rest/v1/{}", supabase_url.trim_end_matches('/'), table),
            anon_key: anon_key.into(),
        }
    }

    fn session<'a>(&self, scope: &'a UserScope) -> Result<&'a str, AtendeError> {
        scope.session_token().ok_or_else(|| {
            AtendeError::Unauthenticated("row-level token store requires a user session".into())
        })
    }

    fn request(&self, method: reqwest::Method, session: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, &self.table_url)
            .header("apikey", &self.anon_key)
            .bearer_auth(session)
    }
}

fn unavailable(message: impl std::fmt::Display) -> AtendeError {
    AtendeError::Backend {
        service: "token store",
        message: message.to_string(),
    }
}

async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response, AtendeError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(AtendeError::Unauthenticated(format!(
            "token store rejected the session: {message}"
        )));
    }
    Err(unavailable(format!("{status}: {message}")))
}

#[async_trait]
impl TokenStore for PostgrestTokenStore {
    async fn find(&self, scope: &UserScope) -> Result<Option<GoogleCredential>, AtendeError> {
        let session = self.session(scope)?;
        let filter = format!("eq.{}", scope.user_id());
        let resp = self
            .request(reqwest::Method::GET, session)
            .query(&[("select", "*"), ("user_id", filter.as_str()), ("limit", "1")])
            .send()
            .await
            .map_err(unavailable)?;
        let rows: Vec<DbGoogleToken> = ensure_success(resp).await?.json().await.map_err(unavailable)?;
        Ok(rows.into_iter().next().map(Into::into))
    }

    /// Not reached by the callback in `client_relay` mode, where the browser
    /// writes the record under its own session. Kept so the store stays a
    /// complete `TokenStore` for a deployment that lets the server write
    /// with the user's JWT.
    async fn save(
        &self,
        scope: &UserScope,
        grant: &TokenGrant,
        email: &str,
    ) -> Result<GoogleCredential, AtendeError> {
        let session = self.session(scope)?;
        let body = UpsertBody {
            user_id: scope.user_id(),
            access_token: &grant.access_token,
            refresh_token: grant.refresh_token.as_deref(),
            email,
            scope: &grant.scope,
            expires_at: grant.expires_at,
        };
        // merge-duplicates only updates the columns present in the body,
        // so an omitted refresh_token keeps the stored one.
        let resp = self
            .request(reqwest::Method::POST, session)
            .query(&[("on_conflict", "user_id")])
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(&body)
            .send()
            .await
            .map_err(unavailable)?;
        let rows: Vec<DbGoogleToken> = ensure_success(resp).await?.json().await.map_err(unavailable)?;
        debug!(user_id = %scope.user_id(), "stored Google credential via PostgREST");
        rows.into_iter()
            .next()
            .map(Into::into)
            .ok_or_else(|| unavailable("upsert returned no row"))
    }

    async fn apply_rotation(
        &self,
        scope: &UserScope,
        rotated: &RotatedTokens,
    ) -> Result<(), AtendeError> {
        let session = self.session(scope)?;
        let filter = format!("eq.{}", scope.user_id());
        let body = RotationBody {
            access_token: &rotated.access_token,
            refresh_token: rotated.refresh_token.as_deref(),
            expires_at: rotated.expires_at,
        };
        let resp = self
            .request(reqwest::Method::PATCH, session)
            .query(&[("user_id", filter.as_str())])
            .header("Prefer", "return=minimal")
            .json(&body)
            .send()
            .await
            .map_err(unavailable)?;
        ensure_success(resp).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn row() -> serde_json::Value {
        json!([{
            "user_id": "user-x",
            "access_token": "A1",
            "refresh_token": "R1",
            "email": "x@example.com",
            "scope": "https://www.googleapis.com/auth/calendar",
            "expires_at": 1_700_000_000_000_i64,
            "created_at": "2026-01-01T10:00:00+00:00"
        }])
    }

    #[tokio::test]
    async fn find_sends_the_callers_session() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/google_tokens"))
            .and(query_param("user_id", "eq.user-x"))
            .and(header("authorization", "Bearer jwt-x"))
            .and(header("apikey", "anon"))
            .respond_with(ResponseTemplate::new(200).set_body_json(row()))
            .expect(1)
            .mount(&server)
            .await;

        let store =
            PostgrestTokenStore::new(reqwest::Client::new(), &server.uri(), "anon", "google_tokens");
        let cred = store
            .find(&UserScope::authenticated("user-x", "jwt-x"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cred.refresh_token.as_deref(), Some("R1"));
        assert_eq!(cred.email, "x@example.com");
    }

    #[tokio::test]
    async fn rotation_without_refresh_token_omits_the_column() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/google_tokens"))
            .and(query_param("user_id", "eq.user-x"))
            .and(body_json(json!({ "access_token": "A2", "expires_at": null })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let store =
            PostgrestTokenStore::new(reqwest::Client::new(), &server.uri(), "anon", "google_tokens");
        store
            .apply_rotation(
                &UserScope::authenticated("user-x", "jwt-x"),
                &RotatedTokens {
                    access_token: "A2".into(),
                    refresh_token: None,
                    expires_at: None,
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn store_outage_is_a_backend_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/google_tokens"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let store =
            PostgrestTokenStore::new(reqwest::Client::new(), &server.uri(), "anon", "google_tokens");
        let err = store
            .find(&UserScope::authenticated("user-x", "jwt-x"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AtendeError::Backend { service: "token store", ref message } if message.contains("upstream down")
        ));
    }

    #[tokio::test]
    async fn scope_without_session_is_refused() {
        let store =
            PostgrestTokenStore::new(reqwest::Client::new(), "http://127.0.0.1:9", "anon", "t");
        let state = crate::google_oauth::OAuthState::new("user-x");
        let err = store
            .find(&UserScope::from_verified_state(&state))
            .await
            .unwrap_err();
        assert!(matches!(err, AtendeError::Unauthenticated(_)));
    }
}
