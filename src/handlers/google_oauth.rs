use crate::config::PersistenceMode;
use crate::google_oauth::{OAuthState, TokenGrant};
use crate::identity::UserScope;
use crate::middleware::auth::AuthenticatedUser;
use crate::{AtendeError, router::AppState};
use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, PrivateCookieJar, SameSite};
use serde::Deserialize;
use serde_json::json;
use time::Duration;
use tracing::{info, warn};

pub const STATE_COOKIE: &str = "google_oauth_state";
pub const PKCE_COOKIE: &str = "google_oauth_pkce";

#[derive(Debug, Deserialize)]
pub struct AuthStartQuery {
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AuthCallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// GET /api/auth/google -> `{url}` for Google's consent page.
pub async fn google_oauth_start(
    State(state): State<AppState>,
    user: Result<AuthenticatedUser, AtendeError>,
    Query(query): Query<AuthStartQuery>,
    jar: PrivateCookieJar,
) -> Result<impl IntoResponse, AtendeError> {
    let google = state.google()?;
    let AuthenticatedUser(scope) = user?;

    if let Some(requested) = query.user_id.as_deref().filter(|id| !id.is_empty())
        && requested != scope.user_id()
    {
        return Err(AtendeError::BadRequest(
            "userId does not match the authenticated session".to_string(),
        ));
    }

    let oauth_state = OAuthState::new(scope.user_id());
    let redirect = google.build_authorization_url(&oauth_state)?;
    let jar = store_oauth_cookies(
        jar,
        &oauth_state.nonce,
        &redirect.pkce_verifier,
        !state.config.insecure_cookie,
    );

    info!(user_id = %scope.user_id(), "Issued Google authorization URL");
    Ok((jar, Json(json!({ "url": redirect.url.as_str() }))))
}

/// GET /api/auth/google/callback (and /rest/oauth2-credential/callback).
///
/// The provider's browser redirect lands here, so every outcome after the
/// code check is a redirect to the connections page.
pub async fn google_oauth_callback(
    State(state): State<AppState>,
    Query(query): Query<AuthCallbackQuery>,
    jar: PrivateCookieJar,
) -> Response {
    let (session, jar) = take_oauth_session(jar);
    info!(
        code_present = query.code.is_some(),
        state_present = query.state.is_some(),
        "Google callback received"
    );

    let Some(code) = query.code.as_deref().filter(|c| !c.is_empty()) else {
        let body = match query.error.as_deref() {
            Some(provider_error) => format!("No code provided (provider error: {provider_error})"),
            None => "No code provided".to_string(),
        };
        return (jar, (StatusCode::BAD_REQUEST, body)).into_response();
    };

    let connections = state.config.connections_path.as_str();
    match complete_authorization(&state, code, query.state.as_deref(), session).await {
        Ok(outcome) => {
            let location = outcome.location(connections);
            (jar, Redirect::to(&location)).into_response()
        }
        Err(err) => {
            warn!(error = %err, "Google authorization failed");
            (jar, Redirect::to(&failure_location(connections, &err))).into_response()
        }
    }
}

/// What the callback hands back to the browser.
#[derive(Debug)]
enum CallbackOutcome {
    Stored {
        refreshable: bool,
    },
    Relayed {
        user_id: String,
        grant: TokenGrant,
        email: String,
    },
}

impl CallbackOutcome {
    fn location(&self, connections: &str) -> String {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        query.append_pair("google_connected", "true");
        match self {
            CallbackOutcome::Stored { refreshable } => {
                if !refreshable {
                    query.append_pair("refresh_token_missing", "true");
                }
            }
            CallbackOutcome::Relayed {
                user_id,
                grant,
                email,
            } => {
                query
                    .append_pair("user_id", user_id)
                    .append_pair("access_token", &grant.access_token)
                    .append_pair("email", email)
                    .append_pair("scope", &grant.scope);
                match grant.refresh_token.as_deref() {
                    Some(refresh) => {
                        query.append_pair("refresh_token", refresh);
                    }
                    None => {
                        query.append_pair("refresh_token_missing", "true");
                    }
                }
                if let Some(expires_at) = grant.expires_at {
                    query.append_pair("expires_at", &expires_at.to_string());
                }
            }
        }
        format!("{connections}?{}", query.finish())
    }
}

fn failure_location(connections: &str, err: &AtendeError) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("google_connected", "false")
        .append_pair("error", &format!("auth_failed_{err}"))
        .finish();
    format!("{connections}?{query}")
}

/// Exchange, attribute, identify, then persist or relay. Steps run strictly in this order.
async fn complete_authorization(
    state: &AppState,
    code: &str,
    raw_state: Option<&str>,
    session: OAuthSession,
) -> Result<CallbackOutcome, AtendeError> {
    let google = state.google()?;

    let grant = google
        .exchange_code_for_tokens(code, session.pkce_verifier)
        .await?;

    let raw_state =
        raw_state.ok_or_else(|| AtendeError::StateRejected("missing `state` in callback".into()))?;
    let nonce = session
        .nonce
        .ok_or_else(|| AtendeError::StateRejected("missing OAuth session cookie".into()))?;
    let oauth_state = OAuthState::verify(raw_state, &nonce)?;
    let scope = UserScope::from_verified_state(&oauth_state);

    let email = google.fetch_account_email(&grant.access_token).await?;

    if grant.refresh_token.is_none() {
        warn!(
            user_id = %scope.user_id(),
            "Google returned no refresh token; credential cannot refresh itself"
        );
    }

    match state.config.token_persistence_mode {
        PersistenceMode::Server => {
            let saved = state.store.save(&scope, &grant, &email).await?;
            info!(
                user_id = %scope.user_id(),
                has_refresh_token = saved.is_refreshable(),
                "Google credential stored"
            );
            Ok(CallbackOutcome::Stored {
                refreshable: saved.is_refreshable(),
            })
        }
        PersistenceMode::ClientRelay => {
            info!(
                user_id = %scope.user_id(),
                has_refresh_token = grant.refresh_token.is_some(),
                "Relaying Google credential to client"
            );
            Ok(CallbackOutcome::Relayed {
                user_id: scope.user_id().to_string(),
                grant,
                email,
            })
        }
    }
}

#[derive(Debug, Default)]
struct OAuthSession {
    nonce: Option<String>,
    pkce_verifier: Option<String>,
}

fn store_oauth_cookies(
    jar: PrivateCookieJar,
    nonce: &str,
    pkce_verifier: &str,
    secure: bool,
) -> PrivateCookieJar {
    jar.add(build_cookie(STATE_COOKIE, nonce.to_string(), secure))
        .add(build_cookie(PKCE_COOKIE, pkce_verifier.to_string(), secure))
}

/// Read the session cookies and clear them; they are single-use.
fn take_oauth_session(jar: PrivateCookieJar) -> (OAuthSession, PrivateCookieJar) {
    let session = OAuthSession {
        nonce: jar.get(STATE_COOKIE).map(|c| c.value().to_owned()),
        pkce_verifier: jar.get(PKCE_COOKIE).map(|c| c.value().to_owned()),
    };
    let jar = jar
        .remove(clear_cookie(STATE_COOKIE))
        .remove(clear_cookie(PKCE_COOKIE));
    (session, jar)
}

fn build_cookie(name: &str, value: String, secure: bool) -> Cookie<'static> {
    Cookie::build(Cookie::new(name.to_string(), value))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(Duration::minutes(15))
        .build()
}

fn clear_cookie(name: &str) -> Cookie<'static> {
    Cookie::build(Cookie::new(name.to_string(), ""))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query_of(location: &str) -> std::collections::HashMap<String, String> {
        let (_, query) = location.split_once('?').unwrap();
        url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect()
    }

    #[test]
    fn relay_location_carries_tokens_and_flags_missing_refresh() {
        let outcome = CallbackOutcome::Relayed {
            user_id: "user-1".into(),
            grant: TokenGrant {
                access_token: "a&b".into(),
                refresh_token: None,
                scope: "s1 s2".into(),
                expires_at: Some(42),
            },
            email: "x@example.com".into(),
        };
        let location = outcome.location("/connections");
        assert!(location.starts_with("/connections?"));
        let q = query_of(&location);
        assert_eq!(q["google_connected"], "true");
        assert_eq!(q["access_token"], "a&b");
        assert_eq!(q["scope"], "s1 s2");
        assert_eq!(q["expires_at"], "42");
        assert_eq!(q["refresh_token_missing"], "true");
        assert!(!q.contains_key("refresh_token"));
    }

    #[test]
    fn stored_location_has_no_tokens() {
        let location = CallbackOutcome::Stored { refreshable: true }.location("/connections");
        assert_eq!(location, "/connections?google_connected=true");
    }

    #[test]
    fn failure_location_encodes_reason() {
        let err = AtendeError::AuthExchange("invalid_grant: Bad Request".into());
        let q = query_of(&failure_location("/connections", &err));
        assert_eq!(q["google_connected"], "false");
        assert!(q["error"].starts_with("auth_failed_"));
        assert!(q["error"].contains("invalid_grant"));
    }
}
