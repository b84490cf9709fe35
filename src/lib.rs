pub mod calendar;
pub mod config;
pub mod db;
pub mod error;
pub mod google_oauth;
pub mod handlers;
pub mod identity;
pub mod middleware;
pub mod router;

pub use error::AtendeError;
pub use google_oauth::credentials::GoogleCredential;
pub use google_oauth::service::GoogleOauthService;
