use crate::config::Config;
use crate::db::TokenStore;
use crate::error::AtendeError;
use crate::google_oauth::{GoogleOauthService, GoogleOauthSettings};
use crate::handlers::calendar::calendar_events;
use crate::handlers::google_oauth::{google_oauth_callback, google_oauth_start};
use crate::handlers::integrations::{google_force_refresh, google_status};
use crate::identity::IdentityProvider;
use axum::{
    Router,
    extract::FromRef,
    routing::{get, post},
};
use axum_extra::extract::cookie::Key;
use std::sync::Arc;
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub identity: Arc<dyn IdentityProvider>,
    pub store: Arc<dyn TokenStore>,
    google: Option<GoogleOauthService>,
    cookie_key: Key,
}

impl AppState {
    /// Builds the Google adapter when its configuration is complete; otherwise
    /// every Google route answers 503 with the missing variable names.
    pub fn new(
        config: Config,
        http: reqwest::Client,
        identity: Arc<dyn IdentityProvider>,
        store: Arc<dyn TokenStore>,
    ) -> Self {
        let google = match GoogleOauthSettings::from_config(&config) {
            Ok(settings) => Some(GoogleOauthService::new(settings, http)),
            Err(e) => {
                warn!(error = %e, "Google routes disabled");
                None
            }
        };
        let cookie_key = cookie_key(&config);
        Self {
            config: Arc::new(config),
            identity,
            store,
            google,
            cookie_key,
        }
    }

    /// Replace the Google adapter, e.g. to tune its retry policy.
    pub fn with_google(mut self, google: GoogleOauthService) -> Self {
        self.google = Some(google);
        self
    }

    pub fn google(&self) -> Result<&GoogleOauthService, AtendeError> {
        self.google.as_ref().ok_or_else(|| AtendeError::Configuration {
            missing: self.config.missing_google_vars(),
        })
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}

fn cookie_key(config: &Config) -> Key {
    match config.cookie_secret.as_deref() {
        Some(secret) => Key::try_from(secret.as_bytes()).unwrap_or_else(|_| {
            warn!("COOKIE_SECRET shorter than 64 bytes; using a random per-process key");
            Key::generate()
        }),
        None => Key::generate(),
    }
}

pub fn atendepsi_router(state: AppState) -> Router {
    Router::new()
        .route("/api/auth/google", get(google_oauth_start))
        .route("/api/auth/google/callback", get(google_oauth_callback))
        .route("/rest/oauth2-credential/callback", get(google_oauth_callback))
        .route("/api/integrations/google/status", get(google_status))
        .route("/api/integrations/google/refresh", post(google_force_refresh))
        .route("/api/calendar/events", get(calendar_events))
        .with_state(state)
}
