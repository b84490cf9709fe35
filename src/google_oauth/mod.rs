//! Google OAuth2 integration: consent URL, code exchange, refresh and the
//! calendar read used by the proxy.

pub mod credentials;
pub mod endpoints;
pub mod service;
pub mod state;

pub use credentials::{GoogleCredential, RotatedTokens, SessionTokens, TokenGrant};
pub use endpoints::GoogleOauthSettings;
pub use service::{AuthorizationRedirect, GoogleOauthService};
pub use state::OAuthState;
