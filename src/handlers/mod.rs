pub mod calendar;
pub mod google_oauth;
pub mod integrations;
