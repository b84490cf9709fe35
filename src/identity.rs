//! Resolution of the application's own bearer session to a user identity.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::AtendeError;
use crate::google_oauth::OAuthState;

/// A user identity that has been verified, plus the session it was verified
/// with. Token stores only accept this type, so every read and write is
/// confined to the caller's own record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserScope {
    user_id: String,
    session_token: Option<String>,
}

impl UserScope {
    /// Identity proven by an application session token.
    pub fn authenticated(user_id: impl Into<String>, session_token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_token: Some(session_token.into()),
        }
    }

    /// Identity proven by a state value whose nonce matched the browser cookie.
    pub fn from_verified_state(state: &OAuthState) -> Self {
        Self {
            user_id: state.user_id.clone(),
            session_token: None,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// The caller's session, needed by stores that rely on row-level security.
    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve a bearer session token, failing with `Unauthenticated` when it is not valid.
    async fn resolve(&self, bearer: &str) -> Result<UserScope, AtendeError>;
}

/// Supabase GoTrue: `GET {url}/auth/v1/user`.
pub struct SupabaseIdentity {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
}

#[derive(Debug, Deserialize)]
struct SupabaseUser {
    id: String,
}

impl SupabaseIdentity {
    pub fn new(http: reqwest::Client, base_url: &str, anon_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
        }
    }
}

#[async_trait]
impl IdentityProvider for SupabaseIdentity {
    async fn resolve(&self, bearer: &str) -> Result<UserScope, AtendeError> {
        let resp = self
            .http
            .get(format!("{}/auth/v1/user", self.base_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
            .send()
            .await
            .map_err(|e| AtendeError::Backend {
                service: "session service",
                message: e.to_string(),
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(AtendeError::Unauthenticated(
                "invalid or expired session".to_string(),
            ));
        }
        if !status.is_success() {
            return Err(AtendeError::Backend {
                service: "session service",
                message: format!("answered {status}"),
            });
        }

        let user: SupabaseUser = resp.json().await.map_err(|e| AtendeError::Backend {
            service: "session service",
            message: format!("unreadable user payload: {e}"),
        })?;
        debug!(user_id = %user.id, "resolved session");
        Ok(UserScope::authenticated(user.id, bearer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn resolves_session_to_user_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .and(header("apikey", "anon"))
            .and(header("authorization", "Bearer jwt-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "id": "user-1", "email": "a@b.c" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let identity = SupabaseIdentity::new(reqwest::Client::new(), &server.uri(), "anon");
        let scope = identity.resolve("jwt-1").await.unwrap();
        assert_eq!(scope.user_id(), "user-1");
        assert_eq!(scope.session_token(), Some("jwt-1"));
    }

    #[tokio::test]
    async fn session_service_outage_is_a_backend_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let identity = SupabaseIdentity::new(reqwest::Client::new(), &server.uri(), "anon");
        let err = identity.resolve("jwt-1").await.unwrap_err();
        assert!(matches!(
            err,
            AtendeError::Backend { service: "session service", .. }
        ));
    }

    #[tokio::test]
    async fn rejected_session_is_unauthenticated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let identity = SupabaseIdentity::new(reqwest::Client::new(), &server.uri(), "anon");
        let err = identity.resolve("expired").await.unwrap_err();
        assert!(matches!(err, AtendeError::Unauthenticated(_)));
    }
}
