use crate::calendar::CalendarSession;
use crate::db::TokenStore;
use crate::error::AtendeError;
use crate::google_oauth::{RotatedTokens, SessionTokens};
use crate::identity::UserScope;
use crate::middleware::auth::AuthenticatedUser;
use crate::router::AppState;
use axum::{Json, extract::State};
use serde_json::Value;
use tracing::{debug, error, info, warn};

/// GET /api/calendar/events -> upcoming events of the caller's primary calendar.
pub async fn calendar_events(
    State(state): State<AppState>,
    user: Result<AuthenticatedUser, AtendeError>,
) -> Result<Json<Vec<Value>>, AtendeError> {
    let google = state.google()?;
    let AuthenticatedUser(scope) = user?;

    let credential = state
        .store
        .find(&scope)
        .await?
        .ok_or(AtendeError::NotConnected { detail: None })?;
    if !credential.is_refreshable() {
        warn!(user_id = %scope.user_id(), "stored Google credential has no refresh token");
        return Err(AtendeError::NotConnected {
            detail: Some(
                "stored Google credential has no refresh token; reconnect Google Calendar"
                    .to_string(),
            ),
        });
    }

    let store = state.store.clone();
    let owner = scope.clone();
    let mut session =
        CalendarSession::new(google, SessionTokens::from(&credential)).on_tokens(move |rotated| {
            let store = store.clone();
            let owner = owner.clone();
            async move { persist_rotation(store.as_ref(), &owner, &rotated).await }
        });

    let events = session
        .list_upcoming_events(state.config.calendar_max_results)
        .await
        .inspect_err(|e| warn!(user_id = %scope.user_id(), error = %e, "calendar fetch failed"))?;
    debug!(user_id = %scope.user_id(), count = events.len(), "calendar events served");
    Ok(Json(events))
}

/// A lost access token only costs another refresh on the next call. A lost
/// reissued refresh token would silently strand the credential, so that case
/// fails the request instead.
async fn persist_rotation(
    store: &dyn TokenStore,
    owner: &UserScope,
    rotated: &RotatedTokens,
) -> Result<(), AtendeError> {
    match store.apply_rotation(owner, rotated).await {
        Ok(()) => {
            info!(
                user_id = %owner.user_id(),
                refresh_token_rotated = rotated.refresh_token.is_some(),
                "Persisted rotated Google tokens"
            );
            Ok(())
        }
        Err(e) if rotated.refresh_token.is_some() => {
            error!(
                user_id = %owner.user_id(),
                error = %e,
                "Failed to persist a reissued Google refresh token"
            );
            Err(AtendeError::Backend {
                service: "token store",
                message: format!("reissued refresh token could not be saved: {e}"),
            })
        }
        Err(e) => {
            warn!(
                user_id = %owner.user_id(),
                error = %e,
                "Failed to persist rotated Google access token"
            );
            Ok(())
        }
    }
}
