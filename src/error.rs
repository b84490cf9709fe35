use axum::{Json, http::StatusCode, response::IntoResponse};
use oauth2::basic::BasicErrorResponseType;
use oauth2::reqwest::Error as ReqwestClientError;
use oauth2::{HttpClientError, RequestTokenError, StandardErrorResponse};
use serde::Serialize;
use sqlx::Error as SqlxError;
use thiserror::Error as ThisError;
use tracing::error;

pub const NOT_CONNECTED_MESSAGE: &str = "Google Calendar not connected or session expired";
pub const GOOGLE_AUTH_FAILED_MESSAGE: &str = "Authentication failed with Google";
pub const INVALID_GRANT_MESSAGE: &str = "Invalid Grant / Refresh Token Expired";
pub const BACKEND_UNAVAILABLE_MESSAGE: &str = "Application backend unavailable";

#[derive(Debug, ThisError)]
pub enum AtendeError {
    #[error("Google integration is not configured; missing: {}", missing.join(", "))]
    Configuration { missing: Vec<&'static str> },

    #[error("authorization code exchange failed: {0}")]
    AuthExchange(String),

    #[error("refresh token rejected: {0}")]
    InvalidGrant(String),

    #[error("no usable Google credential on record")]
    NotConnected { detail: Option<String> },

    #[error("Google rejected the stored credential: {0}")]
    GoogleAuthFailed(String),

    #[error("Google API unavailable: {0}")]
    TransientProvider(String),

    /// The provider did not answer within the operation deadline. Not retried.
    #[error("Google API timed out: {0}")]
    ProviderTimeout(String),

    #[error("Google API error ({status}): {message}")]
    Provider { status: u16, message: String },

    #[error("upstream rejected the access token")]
    UpstreamUnauthorized,

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("OAuth state rejected: {0}")]
    StateRejected(String),

    #[error("OAuth2 server error: {error}")]
    Oauth2Server {
        error: String,
        description: Option<String>,
    },

    /// Session lookup or token store (Supabase) failure; never Google's.
    #[error("{service} unavailable: {message}")]
    Backend {
        service: &'static str,
        message: String,
    },

    #[error("missing email in userinfo response")]
    MissingEmailInUserinfo,

    #[error("Database error: {0}")]
    Database(#[from] SqlxError),

    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

/// Whether an operation that failed with this error may be attempted again.
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for AtendeError {
    fn is_retryable(&self) -> bool {
        match self {
            AtendeError::TransientProvider(_) => true,
            AtendeError::Reqwest(e) => e.is_connect(),
            _ => false,
        }
    }
}

impl
    From<
        RequestTokenError<
            HttpClientError<ReqwestClientError>,
            StandardErrorResponse<BasicErrorResponseType>,
        >,
    > for AtendeError
{
    fn from(
        e: RequestTokenError<
            HttpClientError<ReqwestClientError>,
            StandardErrorResponse<BasicErrorResponseType>,
        >,
    ) -> Self {
        match e {
            RequestTokenError::ServerResponse(err) => AtendeError::Oauth2Server {
                error: err.error().to_string(),
                description: err.error_description().cloned(),
            },
            RequestTokenError::Request(HttpClientError::Reqwest(req_e)) if req_e.is_timeout() => {
                AtendeError::ProviderTimeout(format!("token request: {}", req_e))
            }
            RequestTokenError::Request(req_e) => {
                AtendeError::TransientProvider(format!("token request failed: {}", req_e))
            }
            RequestTokenError::Parse(parse_err, _body) => AtendeError::Provider {
                status: 502,
                message: format!("unparseable token response: {}", parse_err),
            },
            RequestTokenError::Other(s) => AtendeError::Provider {
                status: 502,
                message: s,
            },
        }
    }
}

impl IntoResponse for AtendeError {
    fn into_response(self) -> axum::response::Response {
        if let AtendeError::Configuration { missing } = self {
            let body = ConfigurationErrorBody {
                message: "Google integration is not configured".to_string(),
                missing_vars: missing,
            };
            return (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
        }

        let (status, body) = match self {
            AtendeError::NotConnected { detail } => (
                StatusCode::UNAUTHORIZED,
                ApiErrorBody::new(NOT_CONNECTED_MESSAGE, detail),
            ),
            AtendeError::GoogleAuthFailed(detail) => (
                StatusCode::UNAUTHORIZED,
                ApiErrorBody::new(GOOGLE_AUTH_FAILED_MESSAGE, Some(detail)),
            ),
            AtendeError::InvalidGrant(detail) => (
                StatusCode::UNAUTHORIZED,
                ApiErrorBody::new(INVALID_GRANT_MESSAGE, Some(detail)),
            ),
            AtendeError::Unauthenticated(detail) => (
                StatusCode::UNAUTHORIZED,
                ApiErrorBody::new("Unauthorized", Some(detail)),
            ),
            AtendeError::BadRequest(detail)
            | AtendeError::AuthExchange(detail)
            | AtendeError::StateRejected(detail) => (
                StatusCode::BAD_REQUEST,
                ApiErrorBody::new("Bad Request", Some(detail)),
            ),
            AtendeError::TransientProvider(detail) | AtendeError::ProviderTimeout(detail) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiErrorBody::new("Google API unavailable", Some(detail)),
            ),
            AtendeError::Provider { message, .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiErrorBody::new("Google API error", Some(message)),
            ),
            AtendeError::Backend { service, message } => (
                StatusCode::SERVICE_UNAVAILABLE,
                ApiErrorBody::new(BACKEND_UNAVAILABLE_MESSAGE, Some(format!("{service}: {message}"))),
            ),
            AtendeError::Oauth2Server { error, description } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiErrorBody::new(
                    "Google OAuth error",
                    Some(description.map_or(error.clone(), |d| format!("{error}: {d}"))),
                ),
            ),
            AtendeError::UpstreamUnauthorized | AtendeError::MissingEmailInUserinfo => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiErrorBody::new("Google API error", None),
            ),
            other @ (AtendeError::Database(_)
            | AtendeError::Reqwest(_)
            | AtendeError::Json(_)
            | AtendeError::UrlParse(_)
            | AtendeError::Configuration { .. }) => {
                error!(error = %other, "internal error while serving request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiErrorBody::new("Internal Server Error", None),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

/// Standardized API error response body: `{message, detail?}`.
#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ApiErrorBody {
    fn new(message: &str, detail: Option<String>) -> Self {
        Self {
            message: message.to_string(),
            detail,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ConfigurationErrorBody {
    pub message: String,
    pub missing_vars: Vec<&'static str>,
}
