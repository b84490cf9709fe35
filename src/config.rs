use figment::{
    Figment,
    providers::{Env, Serialized},
    value::{Dict, Value},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";
pub const GOOGLE_CALENDAR_URL: &str = "https://www.googleapis.com/calendar/v3";

/// Scopes requested on every authorization: calendar access plus the account email.
pub const GOOGLE_SCOPES: [&str; 2] = [
    "https://www.googleapis.com/auth/calendar",
    "https://www.googleapis.com/auth/userinfo.email",
];

/// Free-form string settings. Read verbatim from the environment so a secret
/// such as `0123456` is not coerced into a number.
const VERBATIM_KEYS: [&str; 9] = [
    "database_url",
    "google_client_id",
    "google_client_secret",
    "google_redirect_uri",
    "supabase_url",
    "supabase_anon_key",
    "refresh_service_key",
    "cookie_secret",
    "proxy",
];

/// How the OAuth callback hands the resulting credential over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceMode {
    /// The server writes the credential into its own token store.
    #[default]
    Server,
    /// The credential travels back to the browser in the redirect and the
    /// client writes it under its own session (row-level security).
    ClientRelay,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub loglevel: String,
    pub listen_addr: String,
    pub database_url: String,

    pub google_client_id: Option<String>,
    pub google_client_secret: Option<String>,
    pub google_redirect_uri: Option<String>,
    pub google_auth_url: String,
    pub google_token_url: String,
    pub google_userinfo_url: String,
    pub google_calendar_url: String,

    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
    pub google_tokens_table: String,

    pub token_persistence_mode: PersistenceMode,
    pub refresh_service_key: Option<String>,
    pub cookie_secret: Option<String>,
    pub insecure_cookie: bool,
    pub connections_path: String,

    pub provider_timeout_secs: u64,
    pub calendar_max_results: u32,
    pub proxy: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            loglevel: "info".to_string(),
            listen_addr: "0.0.0.0:5000".to_string(),
            database_url: "sqlite:atendepsi.db".to_string(),
            google_client_id: None,
            google_client_secret: None,
            google_redirect_uri: None,
            google_auth_url: GOOGLE_AUTH_URL.to_string(),
            google_token_url: GOOGLE_TOKEN_URL.to_string(),
            google_userinfo_url: GOOGLE_USERINFO_URL.to_string(),
            google_calendar_url: GOOGLE_CALENDAR_URL.to_string(),
            supabase_url: None,
            supabase_anon_key: None,
            google_tokens_table: "google_tokens".to_string(),
            token_persistence_mode: PersistenceMode::Server,
            refresh_service_key: None,
            cookie_secret: None,
            insecure_cookie: false,
            connections_path: "/connections".to_string(),
            provider_timeout_secs: 15,
            calendar_max_results: 10,
            proxy: None,
        }
    }
}

impl Config {
    /// Defaults overlaid with the process environment (`GOOGLE_CLIENT_ID` -> `google_client_id`).
    pub fn load() -> Result<Self, figment::Error> {
        let verbatim: Dict = Env::raw()
            .only(&VERBATIM_KEYS)
            .iter()
            .map(|(key, value)| (key.as_str().to_ascii_lowercase(), Value::from(value)))
            .collect();
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Env::raw().ignore(&VERBATIM_KEYS))
            .merge(Serialized::defaults(verbatim))
            .extract()
    }

    /// Names of the Google OAuth variables that are absent or blank.
    pub fn missing_google_vars(&self) -> Vec<&'static str> {
        [
            ("GOOGLE_CLIENT_ID", &self.google_client_id),
            ("GOOGLE_CLIENT_SECRET", &self.google_client_secret),
            ("GOOGLE_REDIRECT_URI", &self.google_redirect_uri),
        ]
        .into_iter()
        .filter(|(_, value)| value.as_deref().is_none_or(|v| v.trim().is_empty()))
        .map(|(name, _)| name)
        .collect()
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs.max(1))
    }

    /// Shared outbound HTTP client: bounded connect and total timeouts, optional proxy.
    pub fn build_http_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        let mut builder = reqwest::Client::builder()
            .user_agent("atendepsi-server/0.1")
            .connect_timeout(Duration::from_secs(5))
            .timeout(self.provider_timeout())
            // The token endpoint must never be followed through redirects.
            .redirect(reqwest::redirect::Policy::none());
        if let Some(proxy_url) = self.proxy.as_deref() {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
        }
        builder.build()
    }
}
