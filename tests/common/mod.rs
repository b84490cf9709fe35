#![allow(dead_code)]

use async_trait::async_trait;
use atendepsi::config::Config;
use atendepsi::db::{SqliteTokenStore, TokenStore};
use atendepsi::google_oauth::{GoogleOauthService, GoogleOauthSettings, TokenGrant};
use atendepsi::identity::{IdentityProvider, UserScope};
use atendepsi::router::{AppState, atendepsi_router};
use atendepsi::AtendeError;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{HeaderMap, Request, StatusCode, header},
};
use backon::ExponentialBuilder;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// Accepts bearer tokens of the form `session-<user id>`.
pub struct FakeIdentity;

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn resolve(&self, bearer: &str) -> Result<UserScope, AtendeError> {
        bearer
            .strip_prefix("session-")
            .filter(|id| !id.is_empty())
            .map(|id| UserScope::authenticated(id, bearer))
            .ok_or_else(|| AtendeError::Unauthenticated("invalid or expired session".into()))
    }
}

pub fn scope(user_id: &str) -> UserScope {
    UserScope::authenticated(user_id, format!("session-{user_id}"))
}

pub fn google_config(server_uri: &str) -> Config {
    Config {
        google_client_id: Some("client-id".to_string()),
        google_client_secret: Some("client-secret".to_string()),
        google_redirect_uri: Some("http://localhost:5000/api/auth/google/callback".to_string()),
        google_auth_url: format!("{server_uri}/o/oauth2/v2/auth"),
        google_token_url: format!("{server_uri}/token"),
        google_userinfo_url: format!("{server_uri}/oauth2/v2/userinfo"),
        google_calendar_url: format!("{server_uri}/calendar/v3"),
        insecure_cookie: true,
        ..Config::default()
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<SqliteTokenStore>,
}

pub async fn spawn_app(config: Config) -> TestApp {
    let store = Arc::new(
        SqliteTokenStore::connect("sqlite::memory:")
            .await
            .expect("in-memory token store"),
    );
    TestApp {
        router: router_with_store(config, store.clone()),
        store,
    }
}

/// Router over an arbitrary token store, using the same HTTP client the server builds.
pub fn router_with_store(config: Config, store: Arc<dyn TokenStore>) -> Router {
    let http = config.build_http_client().expect("http client");
    let mut state = AppState::new(config.clone(), http.clone(), Arc::new(FakeIdentity), store);
    if let Ok(settings) = GoogleOauthSettings::from_config(&config) {
        let fast_retry = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(5))
            .with_max_delay(Duration::from_millis(10))
            .with_max_times(1);
        state = state.with_google(GoogleOauthService::new(settings, http).with_retry_policy(fast_retry));
    }
    atendepsi_router(state)
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("response body was not JSON")
    }

    pub fn text(&self) -> String {
        String::from_utf8(self.body.clone()).expect("response body was not utf-8")
    }

    pub fn location(&self) -> String {
        self.headers
            .get(header::LOCATION)
            .expect("missing Location header")
            .to_str()
            .expect("Location was not ASCII")
            .to_string()
    }

    /// `name=value` pairs of every Set-Cookie header, joined for a Cookie header.
    pub fn cookie_header(&self) -> String {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| v.split(';').next())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

pub async fn send(router: &Router, request: Request<Body>) -> TestResponse {
    let resp = router
        .clone()
        .oneshot(request)
        .await
        .expect("request failed");
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("failed to read response body")
        .to_vec();
    TestResponse {
        status,
        headers,
        body,
    }
}

pub fn get(uri: &str, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).expect("failed to build request")
}

pub fn token_body(access_token: &str, refresh_token: Option<&str>) -> Value {
    let mut body = json!({
        "access_token": access_token,
        "expires_in": 3599,
        "scope": "https://www.googleapis.com/auth/calendar https://www.googleapis.com/auth/userinfo.email",
        "token_type": "Bearer"
    });
    if let Some(refresh) = refresh_token {
        body["refresh_token"] = json!(refresh);
    }
    body
}

pub fn invalid_grant_body() -> Value {
    json!({ "error": "invalid_grant", "error_description": "Token has been expired or revoked." })
}

pub async fn seed(
    store: &SqliteTokenStore,
    user_id: &str,
    access_token: &str,
    refresh_token: Option<&str>,
    expires_at: Option<i64>,
) {
    store
        .save(
            &scope(user_id),
            &TokenGrant {
                access_token: access_token.to_string(),
                refresh_token: refresh_token.map(str::to_string),
                scope: "https://www.googleapis.com/auth/calendar".to_string(),
                expires_at,
            },
            &format!("{user_id}@example.com"),
        )
        .await
        .expect("seed credential");
}
