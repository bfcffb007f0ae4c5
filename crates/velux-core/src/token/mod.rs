// ── OAuth2 token lifecycle ──
//
// `Token` is the only state carried from one poll cycle to the next.
// It is immutable once issued: a refresh produces a new `Token`.

pub mod manager;
pub mod store;

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use secrecy::SecretString;
use velux_api::TokenResponse;

pub use manager::{PROCESSING_OVERHEAD, TokenManager, TokenState};
pub use store::{CredentialStore, PersistenceError};

/// An issued access/refresh token pair with its absolute expiry.
#[derive(Debug, Clone)]
pub struct Token {
    access_token: SecretString,
    refresh_token: SecretString,
    expires_at: DateTime<Utc>,
    token_type: Option<String>,
}

impl Token {
    /// Build a token from a grant response received at `received_at`.
    ///
    /// The wire only carries a relative `expires_in`; the absolute expiry is
    /// always derived from it and the local receive time.
    pub fn issued(response: TokenResponse, received_at: DateTime<Utc>) -> Self {
        let lifetime = i64::try_from(response.expires_in)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX);
        let expires_at = received_at
            .checked_add_signed(lifetime)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at,
            token_type: response.token_type,
        }
    }

    /// Rebuild a token read back from storage.
    pub(crate) fn restored(
        access_token: SecretString,
        refresh_token: SecretString,
        expires_at: DateTime<Utc>,
        token_type: Option<String>,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_at,
            token_type,
        }
    }

    pub fn access_token(&self) -> &SecretString {
        &self.access_token
    }

    pub fn refresh_token(&self) -> &SecretString {
        &self.refresh_token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn token_type(&self) -> Option<&str> {
        self.token_type.as_deref()
    }

    /// Lifetime left at `now`; zero once expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    fn response(expires_in: u64) -> TokenResponse {
        TokenResponse {
            access_token: SecretString::from("access".to_string()),
            refresh_token: SecretString::from("refresh".to_string()),
            expires_in,
            token_type: Some("Bearer".into()),
        }
    }

    #[test]
    fn expiry_is_derived_from_receive_time() {
        let received_at = DateTime::parse_from_rfc3339("2024-06-15T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let token = Token::issued(response(10800), received_at);

        assert_eq!(
            token.expires_at(),
            DateTime::parse_from_rfc3339("2024-06-15T13:00:00Z").unwrap()
        );
        assert_eq!(token.access_token().expose_secret(), "access");
        assert_eq!(token.token_type(), Some("Bearer"));
    }

    #[test]
    fn remaining_saturates_at_zero() {
        let received_at = Utc::now();
        let token = Token::issued(response(60), received_at);

        assert_eq!(
            token.remaining(received_at + TimeDelta::seconds(30)),
            Duration::from_secs(30)
        );
        assert_eq!(
            token.remaining(received_at + TimeDelta::seconds(90)),
            Duration::ZERO
        );
        assert!(token.is_expired(received_at + TimeDelta::seconds(60)));
    }

    #[test]
    fn huge_lifetime_does_not_overflow() {
        let token = Token::issued(response(u64::MAX), Utc::now());
        assert!(!token.is_expired(Utc::now()));
    }
}
