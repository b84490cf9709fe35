use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Refresh this long before the advisory expiry to absorb clock skew.
const EXPIRY_SKEW_MS: i64 = 60_000;

/// The Google credential on record for one application user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GoogleCredential {
    pub user_id: String,
    pub access_token: String,
    /// `None` marks a degraded credential that cannot refresh itself.
    pub refresh_token: Option<String>,
    pub email: String,
    pub scope: String,
    /// Epoch milliseconds. Advisory only; a 401 from Google is authoritative.
    pub expires_at: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl GoogleCredential {
    pub fn is_refreshable(&self) -> bool {
        self.refresh_token
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty())
    }

    /// Milliseconds until the advisory expiry; negative once it has passed.
    pub fn expires_in_ms(&self) -> Option<i64> {
        self.expires_at.map(|at| at - Utc::now().timestamp_millis())
    }
}

/// Outcome of a code exchange or refresh grant.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenGrant {
    pub access_token: String,
    /// Google only returns this on first consent or a forced re-consent.
    pub refresh_token: Option<String>,
    pub scope: String,
    pub expires_at: Option<i64>,
}

impl TokenGrant {
    pub fn new(
        access_token: String,
        refresh_token: Option<String>,
        scope: String,
        expires_in: Option<std::time::Duration>,
    ) -> Self {
        let expires_at = expires_in
            .and_then(|d| Duration::from_std(d).ok())
            .map(|d| (Utc::now() + d).timestamp_millis());
        Self {
            access_token,
            refresh_token: refresh_token.filter(|t| !t.trim().is_empty()),
            scope,
            expires_at,
        }
    }

    pub fn into_rotation(self) -> RotatedTokens {
        RotatedTokens {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: self.expires_at,
        }
    }
}

/// Tokens issued by a refresh that happened during an API call.
#[derive(Debug, Clone, PartialEq)]
pub struct RotatedTokens {
    pub access_token: String,
    /// Present only when Google reissued the refresh token.
    pub refresh_token: Option<String>,
    pub expires_at: Option<i64>,
}

/// Tokens a per-request session works with.
#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<i64>,
}

impl SessionTokens {
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|at| Utc::now().timestamp_millis() >= at - EXPIRY_SKEW_MS)
    }

    pub fn apply(&mut self, rotated: &RotatedTokens) {
        self.access_token = rotated.access_token.clone();
        if let Some(refresh) = rotated.refresh_token.as_ref() {
            self.refresh_token = Some(refresh.clone());
        }
        self.expires_at = rotated.expires_at;
    }
}

impl From<&GoogleCredential> for SessionTokens {
    fn from(cred: &GoogleCredential) -> Self {
        Self {
            access_token: cred.access_token.clone(),
            refresh_token: cred.refresh_token.clone(),
            expires_at: cred.expires_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(expires_at: Option<i64>) -> SessionTokens {
        SessionTokens {
            access_token: "a1".into(),
            refresh_token: Some("r1".into()),
            expires_at,
        }
    }

    #[test]
    fn rotation_without_refresh_token_keeps_the_old_one() {
        let mut t = tokens(None);
        t.apply(&RotatedTokens {
            access_token: "a2".into(),
            refresh_token: None,
            expires_at: Some(1),
        });
        assert_eq!(t.access_token, "a2");
        assert_eq!(t.refresh_token.as_deref(), Some("r1"));
        assert_eq!(t.expires_at, Some(1));
    }

    #[test]
    fn expiry_is_advisory_and_skewed() {
        let now = Utc::now().timestamp_millis();
        assert!(!tokens(None).is_expired());
        assert!(tokens(Some(now + 30_000)).is_expired());
        assert!(!tokens(Some(now + 600_000)).is_expired());
    }

    #[test]
    fn blank_refresh_token_in_grant_is_dropped() {
        let grant = TokenGrant::new("a".into(), Some(" ".into()), String::new(), None);
        assert_eq!(grant.refresh_token, None);
        assert_eq!(grant.expires_at, None);
    }
}
