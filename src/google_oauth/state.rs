//! The `state` parameter carried through Google's authorization redirect.
//!
//! It is `base64url(JSON)` of the initiating user id, a random nonce and the
//! issue time. The nonce is mirrored in a private cookie so the callback can
//! tie the redirect back to the browser that started it.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{Duration, Utc};
use oauth2::CsrfToken;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::error::AtendeError;

/// Maximum age of a state value; matches the session cookie lifetime.
pub const STATE_MAX_AGE_MINUTES: i64 = 15;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthState {
    #[serde(rename = "uid")]
    pub user_id: String,
    pub nonce: String,
    #[serde(rename = "iat")]
    pub issued_at: i64,
}

impl OAuthState {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            nonce: CsrfToken::new_random().secret().to_string(),
            issued_at: Utc::now().timestamp(),
        }
    }

    pub fn encode(&self) -> Result<String, AtendeError> {
        let json = serde_json::to_vec(self)?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    /// Parse a state value without checking freshness or the nonce.
    pub fn decode(raw: &str) -> Result<Self, AtendeError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(raw.trim())
            .map_err(|e| AtendeError::StateRejected(format!("state is not base64url: {e}")))?;
        let state: OAuthState = serde_json::from_slice(&bytes)
            .map_err(|e| AtendeError::StateRejected(format!("state is not valid JSON: {e}")))?;
        if state.user_id.trim().is_empty() {
            return Err(AtendeError::StateRejected("state carries no user id".into()));
        }
        Ok(state)
    }

    /// Decode and check the value against the nonce stored for this browser.
    pub fn verify(raw: &str, expected_nonce: &str) -> Result<Self, AtendeError> {
        let state = Self::decode(raw)?;
        let age = Utc::now().timestamp() - state.issued_at;
        if age > Duration::minutes(STATE_MAX_AGE_MINUTES).num_seconds() || age < -60 {
            return Err(AtendeError::StateRejected("state has expired".into()));
        }
        if !bool::from(state.nonce.as_bytes().ct_eq(expected_nonce.as_bytes())) {
            return Err(AtendeError::StateRejected("state nonce mismatch".into()));
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_state_recovers_user_id() {
        let state = OAuthState::new("user-42");
        let raw = state.encode().unwrap();
        let decoded = OAuthState::decode(&raw).unwrap();
        assert_eq!(decoded, state);
        assert_eq!(decoded.user_id, "user-42");
    }

    #[test]
    fn verify_accepts_matching_nonce() {
        let state = OAuthState::new("user-42");
        let raw = state.encode().unwrap();
        let verified = OAuthState::verify(&raw, &state.nonce).unwrap();
        assert_eq!(verified.user_id, "user-42");
    }

    #[test]
    fn verify_rejects_foreign_nonce() {
        let raw = OAuthState::new("user-42").encode().unwrap();
        let err = OAuthState::verify(&raw, "someone-else").unwrap_err();
        assert!(matches!(err, AtendeError::StateRejected(m) if m.contains("mismatch")));
    }

    #[test]
    fn verify_rejects_stale_state() {
        let mut state = OAuthState::new("user-42");
        state.issued_at -= Duration::minutes(STATE_MAX_AGE_MINUTES + 1).num_seconds();
        let raw = state.encode().unwrap();
        let err = OAuthState::verify(&raw, &state.nonce).unwrap_err();
        assert!(matches!(err, AtendeError::StateRejected(m) if m.contains("expired")));
    }

    #[test]
    fn garbage_is_rejected_not_defaulted() {
        assert!(OAuthState::decode("not-a-state!!").is_err());
        let legacy = URL_SAFE_NO_PAD.encode(br#"{"userId":"x"}"#);
        assert!(OAuthState::decode(&legacy).is_err());
        let blank = URL_SAFE_NO_PAD.encode(br#"{"uid":" ","nonce":"n","iat":0}"#);
        assert!(OAuthState::decode(&blank).is_err());
    }
}
