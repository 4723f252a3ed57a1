//! One-time action tokens attached to individual steps.
//!
//! A token lets its holder act on a single step (e.g. from an emailed link)
//! without signing in. Issuance and expiry scheduling belong to the caller;
//! this module only answers whether a token may still be used.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiToken {
    /// The bearer secret. Never serialized; the store persists it apart from
    /// the step so that proposal views cannot leak it.
    #[serde(default, skip_serializing)]
    pub access_token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_at: Option<DateTime<Utc>>,
}

impl ApiToken {
    /// Create a token that expires `ttl` after `now`.
    pub fn issue(now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            access_token: Uuid::new_v4().simple().to_string(),
            created_at: now,
            expires_at: now + ttl,
            used_at: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_used(&self) -> bool {
        self.used_at.is_some()
    }

    /// Unused and not yet expired.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_used() && !self.is_expired(now)
    }

    pub fn mark_used(&mut self, now: DateTime<Utc>) {
        self.used_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_is_valid() {
        let now = Utc::now();
        let token = ApiToken::issue(now, Duration::hours(1));
        assert!(token.is_valid_at(now));
        assert_eq!(token.access_token.len(), 32);
    }

    #[test]
    fn used_token_is_invalid() {
        let now = Utc::now();
        let mut token = ApiToken::issue(now, Duration::hours(1));
        token.mark_used(now);
        assert!(!token.is_valid_at(now));
    }

    #[test]
    fn expired_token_is_invalid() {
        let now = Utc::now();
        let token = ApiToken::issue(now - Duration::days(2), Duration::days(1));
        assert!(token.is_expired(now));
        assert!(!token.is_valid_at(now));
    }

    #[test]
    fn secret_is_not_serialized() {
        let token = ApiToken::issue(Utc::now(), Duration::hours(1));
        let json = serde_json::to_string(&token).unwrap();
        assert!(!json.contains(&token.access_token));
        assert!(json.contains("expires_at"));

        let back: ApiToken = serde_json::from_str(&json).unwrap();
        assert!(back.access_token.is_empty());
    }
}
