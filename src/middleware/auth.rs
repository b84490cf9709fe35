use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use subtle::ConstantTimeEq;

use crate::error::AtendeError;
use crate::identity::UserScope;
use crate::router::AppState;

pub const SERVICE_KEY_HEADER: &str = "x-service-key";

/// The caller resolved from `Authorization: Bearer <app-session-token>`.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub UserScope);

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AtendeError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AtendeError::Unauthenticated("missing bearer token".to_string()))?;
        let token = bearer.token().trim();
        if token.is_empty() {
            return Err(AtendeError::Unauthenticated("missing bearer token".to_string()));
        }
        let scope = state.identity.resolve(token).await?;
        Ok(Self(scope))
    }
}

/// Gate for automation-only endpoints. Passes when no service key is configured.
#[derive(Debug, Clone, Copy)]
pub struct RequireServiceKey;

impl FromRequestParts<AppState> for RequireServiceKey {
    type Rejection = AtendeError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.config.refresh_service_key.as_deref() else {
            return Ok(Self);
        };
        let presented = parts
            .headers
            .get(SERVICE_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
            Ok(Self)
        } else {
            Err(AtendeError::Unauthenticated(
                "invalid or missing service key".to_string(),
            ))
        }
    }
}
