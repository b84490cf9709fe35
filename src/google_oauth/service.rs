use super::endpoints::{GoogleOauthEndpoints, GoogleOauthSettings, GoogleTokenResponse};
use crate::google_oauth::credentials::TokenGrant;
use crate::google_oauth::state::OAuthState;
use crate::error::{AtendeError, IsRetryable};
use backon::{ExponentialBuilder, Retryable};
use oauth2::{AuthorizationCode, PkceCodeChallenge, PkceCodeVerifier, TokenResponse};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use url::Url;

fn default_retry_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(1))
        .with_max_delay(Duration::from_secs(3))
        .with_max_times(3)
        .with_jitter()
}

/// Authorization URL plus the PKCE verifier the callback must present.
#[derive(Debug, Clone)]
pub struct AuthorizationRedirect {
    pub url: Url,
    pub pkce_verifier: String,
}

/// Stateless adapter over Google's OAuth2 and Calendar endpoints.
///
/// Cloning is cheap and a clone never carries user tokens: every call takes
/// the credential it needs as an argument.
#[derive(Clone)]
pub struct GoogleOauthService {
    settings: Arc<GoogleOauthSettings>,
    http: reqwest::Client,
    retry_policy: ExponentialBuilder,
}

impl GoogleOauthService {
    pub fn new(settings: GoogleOauthSettings, http: reqwest::Client) -> Self {
        Self {
            settings: Arc::new(settings),
            http,
            retry_policy: default_retry_policy(),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: ExponentialBuilder) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Bound a whole operation, backoff and retries included, by the configured deadline.
    async fn within_deadline<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, AtendeError>>,
    ) -> Result<T, AtendeError> {
        let deadline = self.settings.operation_timeout;
        tokio::time::timeout(deadline, fut).await.map_err(|_| {
            warn!(operation, ?deadline, "Google operation exceeded its deadline");
            AtendeError::ProviderTimeout(format!("{operation} exceeded {}s", deadline.as_secs()))
        })?
    }

    pub fn build_authorization_url(
        &self,
        state: &OAuthState,
    ) -> Result<AuthorizationRedirect, AtendeError> {
        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
        let url =
            GoogleOauthEndpoints::build_authorize_url(&self.settings, state.encode()?, challenge)?;
        Ok(AuthorizationRedirect {
            url,
            pkce_verifier: verifier.secret().to_string(),
        })
    }

    /// One-shot: an authorization code is consumed by the first attempt, so no retry.
    pub async fn exchange_code_for_tokens(
        &self,
        code: &str,
        pkce_verifier: Option<String>,
    ) -> Result<TokenGrant, AtendeError> {
        let exchange = GoogleOauthEndpoints::exchange_authorization_code(
            &self.settings,
            AuthorizationCode::new(code.to_string()),
            pkce_verifier.map(PkceCodeVerifier::new),
            &self.http,
        );
        let response = self
            .within_deadline("code exchange", exchange)
            .await
            .map_err(|e| match e {
                AtendeError::Oauth2Server { error, description } => AtendeError::AuthExchange(
                    description.map_or(error.clone(), |d| format!("{error}: {d}")),
                ),
                other => other,
            })?;
        Ok(grant_from_response(&response))
    }

    pub async fn fetch_account_email(&self, access_token: &str) -> Result<String, AtendeError> {
        let fetch = (|| async {
            GoogleOauthEndpoints::fetch_userinfo(&self.settings, access_token, &self.http).await
        })
        .retry(self.retry_policy.clone())
        .when(|e: &AtendeError| e.is_retryable())
        .notify(|err, dur: Duration| {
            warn!("userinfo retrying after error {}, sleeping {:?}", err, dur);
        });
        self.within_deadline("userinfo", fetch).await
    }

    /// Force a refresh-token grant. A revoked or expired refresh token yields `InvalidGrant`.
    pub async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenGrant, AtendeError> {
        let refresh = (|| async {
            GoogleOauthEndpoints::refresh_access_token(&self.settings, refresh_token, &self.http)
                .await
        })
        .retry(self.retry_policy.clone())
        .when(|e: &AtendeError| e.is_retryable())
        .notify(|err, dur: Duration| {
            warn!("Google Oauth2 refresh retrying after error {}, sleeping {:?}", err, dur);
        });
        let response = self
            .within_deadline("token refresh", refresh)
            .await
            .map_err(|e| match e {
                AtendeError::Oauth2Server { error, description }
                    if error == "invalid_grant" || error == "invalid_token" =>
                {
                    AtendeError::InvalidGrant(description.unwrap_or(error))
                }
                other => other,
            })?;
        Ok(grant_from_response(&response))
    }

    pub async fn list_upcoming_events(
        &self,
        access_token: &str,
        max_results: u32,
    ) -> Result<Vec<Value>, AtendeError> {
        let list = (|| async {
            GoogleOauthEndpoints::list_upcoming_events(
                &self.settings,
                access_token,
                max_results,
                &self.http,
            )
            .await
        })
        .retry(self.retry_policy.clone())
        .when(|e: &AtendeError| e.is_retryable())
        .notify(|err, dur: Duration| {
            warn!("calendar list retrying after error {}, sleeping {:?}", err, dur);
        });
        self.within_deadline("calendar list", list).await
    }
}

fn grant_from_response(response: &GoogleTokenResponse) -> TokenGrant {
    let scope = response
        .scopes()
        .map(|scopes| {
            scopes
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default();
    TokenGrant::new(
        response.access_token().secret().clone(),
        response.refresh_token().map(|t| t.secret().clone()),
        scope,
        response.expires_in(),
    )
}
