// ── Token manager ──
//
// Owns the authentication state machine:
//
//   NoToken ──password grant──▶ Valid ──lifetime < poll interval──▶ NearExpiry
//                                 ▲                                    │
//                                 └──────────refresh grant─────────────┘
//
// The look-ahead margin is one full poll interval, so a token handed out by
// `ensure_valid` always outlives the cycle that uses it.

use std::time::Duration;

use chrono::Utc;
use secrecy::SecretString;
use strum::Display;
use tracing::{debug, info, warn};
use velux_api::{Identity, VeluxClient};

use super::Token;
use super::store::CredentialStore;
use crate::config::{Account, ExporterConfig};
use crate::error::CoreError;
use crate::retry::RetryPolicy;

/// Fixed per-cycle processing overhead charged against the token lifetime
/// on top of the sleep duration.
pub const PROCESSING_OVERHEAD: Duration = Duration::from_secs(1);

/// Observable authentication state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum TokenState {
    /// No token, or the cached one was expired or rejected.
    NoToken,
    /// Token outlives the next poll interval.
    Valid,
    /// Token would expire before the next cycle gets a chance to refresh it.
    NearExpiry,
}

/// Keeps a usable access token across poll cycles.
pub struct TokenManager {
    client: VeluxClient,
    identity: Identity,
    account: Account,
    store: CredentialStore,
    poll_interval: Duration,
    retry: RetryPolicy,
    token: Option<Token>,
    /// Self-tracked lifetime, decremented by `advance` between cycles.
    remaining: Duration,
    /// Consecutive failed grants.
    failures: u32,
}

impl TokenManager {
    pub fn new(
        client: VeluxClient,
        identity: Identity,
        account: Account,
        store: CredentialStore,
        poll_interval: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            identity,
            account,
            store,
            poll_interval,
            retry,
            token: None,
            remaining: Duration::ZERO,
            failures: 0,
        }
    }

    pub fn from_config(client: VeluxClient, config: &ExporterConfig) -> Self {
        Self::new(
            client,
            config.identity.clone(),
            config.account.clone(),
            CredentialStore::new(&config.token_path),
            config.poll_interval,
            config.retry.clone(),
        )
    }

    // ── State ────────────────────────────────────────────────────────

    pub fn state(&self) -> TokenState {
        match self.token {
            None => TokenState::NoToken,
            Some(_) if self.remaining < self.poll_interval => TokenState::NearExpiry,
            Some(_) => TokenState::Valid,
        }
    }

    /// Lifetime the manager currently attributes to its token.
    pub fn remaining(&self) -> Duration {
        self.remaining
    }

    pub fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Adopt the persisted token if it has not expired yet.
    pub fn restore(&mut self) -> TokenState {
        if let Some(token) = self.store.load() {
            let remaining = token.remaining(Utc::now());
            if remaining.is_zero() {
                info!(expired_at = %token.expires_at(), "cached token expired, discarding");
            } else {
                info!(remaining_secs = remaining.as_secs(), "reusing cached token");
                self.token = Some(token);
                self.remaining = remaining;
            }
        }
        self.state()
    }

    /// Return an access token that stays valid for at least one poll
    /// interval, performing a password or refresh grant if needed.
    ///
    /// A failed grant costs the current cycle. After
    /// [`RetryPolicy::max_attempts`] consecutive failures the error becomes
    /// [`CoreError::AuthRetriesExhausted`].
    pub async fn ensure_valid(&mut self) -> Result<SecretString, CoreError> {
        self.clamp_to_wall_clock();

        let state = self.state();
        let result = match (state, self.token.as_ref()) {
            (TokenState::Valid, Some(token)) => return Ok(token.access_token().clone()),
            (TokenState::NearExpiry, Some(token)) => {
                info!(
                    remaining_secs = self.remaining.as_secs(),
                    poll_interval_secs = self.poll_interval.as_secs(),
                    "token near expiry, refreshing"
                );
                let refresh_token = token.refresh_token().clone();
                self.client
                    .refresh_grant(&refresh_token, &self.identity)
                    .await
            }
            _ => {
                info!(username = %self.account.username, "requesting new token");
                self.client
                    .password_grant(&self.identity, &self.account.username, &self.account.password)
                    .await
            }
        };

        match result {
            Ok(response) => {
                let token = Token::issued(response, Utc::now());
                let access = token.access_token().clone();
                self.install(token);
                Ok(access)
            }
            Err(err) => Err(self.record_failure(state, &err)),
        }
    }

    /// Charge one slept interval plus processing overhead against the token.
    pub fn advance(&mut self, slept: Duration) {
        self.remaining = self
            .remaining
            .saturating_sub(slept.saturating_add(PROCESSING_OVERHEAD));
        debug!(remaining_secs = self.remaining.as_secs(), "token clock advanced");
    }

    /// Force a refresh on the next `ensure_valid`, e.g. after the API
    /// rejected the access token early.
    pub fn force_refresh(&mut self) {
        if self.token.is_some() {
            self.remaining = Duration::ZERO;
        }
    }

    // ── Internals ────────────────────────────────────────────────────

    fn install(&mut self, token: Token) {
        self.remaining = token.remaining(Utc::now());
        info!(
            expires_at = %token.expires_at(),
            remaining_secs = self.remaining.as_secs(),
            "token issued"
        );
        self.store.save(&token);
        self.token = Some(token);
        self.failures = 0;
    }

    /// Never trust the self-tracked clock past the absolute expiry.
    fn clamp_to_wall_clock(&mut self) {
        if let Some(token) = &self.token {
            self.remaining = self.remaining.min(token.remaining(Utc::now()));
        }
    }

    fn record_failure(&mut self, state: TokenState, err: &velux_api::Error) -> CoreError {
        self.failures = self.failures.saturating_add(1);

        if state == TokenState::NearExpiry && err.is_auth_rejected() {
            // The refresh token is dead; only a password grant can recover.
            warn!(error = %err, "refresh token rejected, falling back to password grant");
            self.token = None;
            self.remaining = Duration::ZERO;
        }

        let message = err.to_string();
        if self.retry.is_exhausted(self.failures) {
            return CoreError::AuthRetriesExhausted {
                attempts: self.failures,
                message,
            };
        }

        warn!(
            error = %err,
            attempt = self.failures,
            max_attempts = self.retry.max_attempts,
            %state,
            "token grant failed"
        );
        CoreError::AuthenticationFailed {
            attempt: self.failures,
            message,
        }
    }
}
