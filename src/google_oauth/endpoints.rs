use crate::config::{Config, GOOGLE_SCOPES};
use crate::error::AtendeError;

use chrono::Utc;
use oauth2::{
    AuthType, AuthUrl, AuthorizationCode, Client as OAuth2Client, ClientId, ClientSecret,
    CsrfToken, EndpointNotSet, EndpointSet, ExtraTokenFields, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, RefreshToken, Scope, StandardRevocableToken,
    StandardTokenResponse, TokenUrl,
    basic::{
        BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
        BasicTokenType,
    },
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Client registration plus endpoint locations. Holds no per-user state.
#[derive(Debug, Clone)]
pub struct GoogleOauthSettings {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub auth_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    pub calendar_url: String,
    /// Upper bound for one adapter operation, retries included.
    pub operation_timeout: Duration,
}

impl GoogleOauthSettings {
    /// Fails with the full list of missing variables when any credential is absent.
    pub fn from_config(cfg: &Config) -> Result<Self, AtendeError> {
        let missing = cfg.missing_google_vars();
        let (Some(client_id), Some(client_secret), Some(redirect_uri)) = (
            cfg.google_client_id.clone(),
            cfg.google_client_secret.clone(),
            cfg.google_redirect_uri.clone(),
        ) else {
            return Err(AtendeError::Configuration { missing });
        };
        if !missing.is_empty() {
            return Err(AtendeError::Configuration { missing });
        }
        Ok(Self {
            client_id,
            client_secret,
            redirect_uri,
            auth_url: cfg.google_auth_url.clone(),
            token_url: cfg.google_token_url.clone(),
            userinfo_url: cfg.google_userinfo_url.clone(),
            calendar_url: cfg.google_calendar_url.trim_end_matches('/').to_string(),
            operation_timeout: cfg.provider_timeout(),
        })
    }
}

/// Stateless Google OAuth Endpoints.
pub(super) struct GoogleOauthEndpoints;

impl GoogleOauthEndpoints {
    /// Consent URL requesting offline access, always re-prompting so a refresh token is reissued.
    pub(super) fn build_authorize_url(
        settings: &GoogleOauthSettings,
        state: String,
        challenge: PkceCodeChallenge,
    ) -> Result<Url, AtendeError> {
        let client = build_oauth2_client(settings)?;
        let (url, _csrf) = client
            .authorize_url(|| CsrfToken::new(state))
            .add_scopes(GOOGLE_SCOPES.iter().map(|s| Scope::new(s.to_string())))
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent")
            .set_pkce_challenge(challenge)
            .url();
        Ok(url)
    }

    pub(super) async fn exchange_authorization_code(
        settings: &GoogleOauthSettings,
        code: AuthorizationCode,
        verifier: Option<PkceCodeVerifier>,
        http_client: &reqwest::Client,
    ) -> Result<GoogleTokenResponse, AtendeError> {
        let client = build_oauth2_client(settings)?;
        let mut request = client.exchange_code(code);
        if let Some(verifier) = verifier {
            request = request.set_pkce_verifier(verifier);
        }
        let token_result: GoogleTokenResponse = request.request_async(http_client).await?;
        info!("Authorization code exchanged successfully");
        Ok(token_result)
    }

    /// Refresh the access token using a refresh token.
    pub(super) async fn refresh_access_token(
        settings: &GoogleOauthSettings,
        refresh_token: &str,
        http_client: &reqwest::Client,
    ) -> Result<GoogleTokenResponse, AtendeError> {
        let client = build_oauth2_client(settings)?;
        let token_result: GoogleTokenResponse = client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(http_client)
            .await?;
        info!("Access token refreshed successfully");
        Ok(token_result)
    }

    pub(super) async fn fetch_userinfo(
        settings: &GoogleOauthSettings,
        access_token: &str,
        http_client: &reqwest::Client,
    ) -> Result<String, AtendeError> {
        let resp = http_client
            .get(settings.userinfo_url.as_str())
            .bearer_auth(access_token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(transport_error)?;
        let info: UserInfo = check_status(resp).await?.json().await?;
        info.email
            .filter(|e| !e.is_empty())
            .ok_or(AtendeError::MissingEmailInUserinfo)
    }

    /// Upcoming events on the primary calendar, recurring events expanded, earliest first.
    pub(super) async fn list_upcoming_events(
        settings: &GoogleOauthSettings,
        access_token: &str,
        max_results: u32,
        http_client: &reqwest::Client,
    ) -> Result<Vec<Value>, AtendeError> {
        let url = format!("{}/calendars/primary/events", settings.calendar_url);
        let resp = http_client
            .get(&url)
            .bearer_auth(access_token)
            .query(&[
                ("timeMin", Utc::now().to_rfc3339()),
                ("maxResults", max_results.to_string()),
                ("singleEvents", "true".to_string()),
                ("orderBy", "startTime".to_string()),
            ])
            .send()
            .await
            .map_err(transport_error)?;
        let list: EventList = check_status(resp).await?.json().await?;
        debug!(count = list.items.len(), "fetched calendar events");
        Ok(list.items)
    }
}

/// Build the Google OAuth2 client from the registration settings.
fn build_oauth2_client(settings: &GoogleOauthSettings) -> Result<GoogleOauth2Client, AtendeError> {
    let client = OAuth2Client::new(ClientId::new(settings.client_id.clone()))
        .set_client_secret(ClientSecret::new(settings.client_secret.clone()))
        .set_auth_type(AuthType::RequestBody)
        .set_auth_uri(AuthUrl::new(settings.auth_url.clone())?)
        .set_token_uri(TokenUrl::new(settings.token_url.clone())?)
        .set_redirect_uri(RedirectUrl::new(settings.redirect_uri.clone())?);
    Ok(client)
}

pub(super) fn transport_error(e: reqwest::Error) -> AtendeError {
    if e.is_timeout() {
        AtendeError::ProviderTimeout("request timeout".to_string())
    } else if e.is_connect() {
        AtendeError::TransientProvider(format!("connection failed: {e}"))
    } else {
        AtendeError::Reqwest(e)
    }
}

/// Map Google API error statuses onto the error taxonomy.
pub(super) async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, AtendeError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(AtendeError::UpstreamUnauthorized);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = google_error_message(&body).unwrap_or_else(|| status.to_string());
    if status.is_server_error() {
        return Err(AtendeError::TransientProvider(message));
    }
    Err(AtendeError::Provider {
        status: status.as_u16(),
        message,
    })
}

/// Google APIs answer with `{"error": {"message": ..}}` or `{"error": "..", "error_description": ..}`.
fn google_error_message(body: &str) -> Option<String> {
    let json: Value = serde_json::from_str(body).ok()?;
    let error = json.get("error")?;
    if let Some(message) = error.get("message").and_then(Value::as_str) {
        return Some(message.to_string());
    }
    let code = error.as_str()?;
    match json.get("error_description").and_then(Value::as_str) {
        Some(description) => Some(format!("{code}: {description}")),
        None => Some(code.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventList {
    #[serde(default)]
    items: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub(super) struct GoogleTokenField {
    #[serde(rename = "id_token")]
    pub id_token: Option<String>,
}
impl ExtraTokenFields for GoogleTokenField {}

pub(super) type GoogleTokenResponse = StandardTokenResponse<GoogleTokenField, BasicTokenType>;

pub(super) type GoogleOauth2Client = OAuth2Client<
    BasicErrorResponse,
    GoogleTokenResponse,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointSet,
>;
