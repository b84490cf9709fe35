use crate::middleware::auth::{AuthenticatedUser, RequireServiceKey};
use crate::{AtendeError, router::AppState};
use axum::{
    Json,
    extract::{Query, State, rejection::JsonRejection},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GoogleStatus {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Milliseconds until the advisory access-token expiry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    /// `false` when no refresh token is on record and the user must reconnect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refreshable: Option<bool>,
}

/// GET /api/integrations/google/status
pub async fn google_status(
    State(state): State<AppState>,
    user: Result<AuthenticatedUser, AtendeError>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<GoogleStatus>, AtendeError> {
    state.google()?;
    let AuthenticatedUser(scope) = user?;
    if let Some(requested) = query.user_id.as_deref().filter(|id| !id.is_empty())
        && requested != scope.user_id()
    {
        return Err(AtendeError::BadRequest(
            "userId does not match the authenticated session".to_string(),
        ));
    }

    let status = match state.store.find(&scope).await? {
        None => GoogleStatus {
            connected: false,
            email: None,
            expires_in: None,
            refreshable: None,
        },
        Some(cred) => GoogleStatus {
            connected: true,
            expires_in: cred.expires_in_ms(),
            refreshable: Some(cred.is_refreshable()),
            email: Some(cred.email),
        },
    };
    Ok(Json(status))
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub success: bool,
    pub access_token: String,
}

/// POST /api/integrations/google/refresh
///
/// Stateless: trades a bare refresh token for a fresh access token without
/// touching the token store.
pub async fn google_force_refresh(
    State(state): State<AppState>,
    key: Result<RequireServiceKey, AtendeError>,
    body: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<RefreshResponse>, AtendeError> {
    let google = state.google()?;
    key?;
    let Json(request) = body.map_err(|e| AtendeError::BadRequest(e.body_text()))?;
    let refresh_token = request
        .refresh_token
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| AtendeError::BadRequest("refresh_token is required".to_string()))?;

    let grant = google
        .refresh_access_token(&refresh_token)
        .await
        .inspect_err(|e| warn!(error = %e, "manual token refresh failed"))?;

    info!("Manual token refresh succeeded");
    Ok(Json(RefreshResponse {
        success: true,
        access_token: grant.access_token,
    }))
}
