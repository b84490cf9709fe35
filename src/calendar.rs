//! Per-request Google Calendar session.
//!
//! A session is built fresh for every request from the caller's stored
//! tokens and is never shared. When a call forces a refresh, the rotated
//! tokens are handed to the registered listener before the call is retried;
//! a listener error aborts the call.

use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use tracing::{info, warn};

use crate::error::AtendeError;
use crate::google_oauth::{GoogleOauthService, RotatedTokens, SessionTokens};

pub type RotationListener =
    Box<dyn Fn(RotatedTokens) -> BoxFuture<'static, Result<(), AtendeError>> + Send + Sync>;

pub struct CalendarSession {
    oauth: GoogleOauthService,
    tokens: SessionTokens,
    listener: Option<RotationListener>,
}

impl CalendarSession {
    pub fn new(oauth: &GoogleOauthService, tokens: SessionTokens) -> Self {
        Self {
            oauth: oauth.clone(),
            tokens,
            listener: None,
        }
    }

    /// Register the callback that receives tokens minted by an automatic refresh.
    pub fn on_tokens<F, Fut>(mut self, listener: F) -> Self
    where
        F: Fn(RotatedTokens) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), AtendeError>> + Send + 'static,
    {
        self.listener = Some(Box::new(move |rotated| Box::pin(listener(rotated))));
        self
    }

    /// Up to `max_results` upcoming events from the primary calendar, earliest first.
    pub async fn list_upcoming_events(
        &mut self,
        max_results: u32,
    ) -> Result<Vec<Value>, AtendeError> {
        if self.tokens.is_expired() && self.tokens.refresh_token.is_some() {
            info!("stored access token past its expiry; refreshing before the call");
            self.refresh().await?;
        }

        match self
            .oauth
            .list_upcoming_events(&self.tokens.access_token, max_results)
            .await
        {
            Err(AtendeError::UpstreamUnauthorized) => {
                self.refresh().await?;
                self.oauth
                    .list_upcoming_events(&self.tokens.access_token, max_results)
                    .await
                    .map_err(|e| match e {
                        AtendeError::UpstreamUnauthorized => AtendeError::GoogleAuthFailed(
                            "Google rejected a freshly refreshed access token".to_string(),
                        ),
                        other => other,
                    })
            }
            other => other,
        }
    }

    async fn refresh(&mut self) -> Result<(), AtendeError> {
        let Some(refresh_token) = self.tokens.refresh_token.clone() else {
            warn!("access token rejected and no refresh token on record");
            return Err(AtendeError::GoogleAuthFailed(
                "access token rejected and no refresh token on record".to_string(),
            ));
        };

        let grant = self
            .oauth
            .refresh_access_token(&refresh_token)
            .await
            .map_err(|e| match e {
                AtendeError::InvalidGrant(detail) => AtendeError::GoogleAuthFailed(detail),
                other => other,
            })?;

        let rotated = grant.into_rotation();
        self.tokens.apply(&rotated);
        if let Some(listener) = self.listener.as_ref() {
            listener(rotated).await?;
        }
        Ok(())
    }
}
