// OAuth2 grants
//
// Password grant and refresh grant against `/oauth2/token`. Both are plain
// request/response calls: no retries and no state. Retry policy and token
// bookkeeping belong to the caller.

use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::client::VeluxClient;
use crate::error::Error;
use crate::models::{RawTokenResponse, TokenResponse};

const TOKEN_PATH: &str = "/oauth2/token";

/// The cloud only accepts password grants that name the Velux user pool.
const USER_PREFIX: &str = "velux";

/// OAuth2 client identity issued to the application.
#[derive(Debug, Clone)]
pub struct Identity {
    pub client_id: String,
    pub client_secret: SecretString,
}

impl Identity {
    pub fn new(client_id: impl Into<String>, client_secret: SecretString) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
        }
    }
}

impl VeluxClient {
    /// Obtain a fresh token pair with the account's username and password.
    pub async fn password_grant(
        &self,
        identity: &Identity,
        username: &str,
        password: &SecretString,
    ) -> Result<TokenResponse, Error> {
        debug!(client_id = %identity.client_id, "requesting password grant");

        let form = [
            ("grant_type", "password"),
            ("client_id", identity.client_id.as_str()),
            ("client_secret", identity.client_secret.expose_secret()),
            ("username", username),
            ("password", password.expose_secret()),
            ("user_prefix", USER_PREFIX),
        ];

        self.token_request(&form).await
    }

    /// Exchange a refresh token for a new token pair.
    pub async fn refresh_grant(
        &self,
        refresh_token: &SecretString,
        identity: &Identity,
    ) -> Result<TokenResponse, Error> {
        debug!(client_id = %identity.client_id, "requesting refresh grant");

        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.expose_secret()),
            ("client_id", identity.client_id.as_str()),
            ("client_secret", identity.client_secret.expose_secret()),
        ];

        self.token_request(&form).await
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenResponse, Error> {
        let raw: RawTokenResponse =
            self.post_form(TOKEN_PATH, form)
                .await
                .map_err(|err| match err {
                    // 400 invalid_grant / 401 invalid_client / 403: the service
                    // answered and said no.
                    Error::Api {
                        status: 400 | 401 | 403,
                        message,
                    } => Error::Authentication { message },
                    other => other,
                })?;

        let token = TokenResponse::try_from(raw)?;
        debug!(expires_in = token.expires_in, "token issued");
        Ok(token)
    }
}
