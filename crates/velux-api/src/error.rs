use thiserror::Error;

/// Top-level error type for the `velux-api` crate.
///
/// Covers every failure mode of the remote boundary: OAuth2 grants,
/// transport, HTTP status, and response shape. `velux-core` decides which
/// of these are fatal and which only cost a poll cycle.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The token endpoint rejected the grant (bad credentials, revoked
    /// refresh token, unknown client).
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// A grant response came back without one of the required fields.
    #[error("Token response is missing required field '{field}'")]
    MissingField { field: &'static str },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS or client construction error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Remote API ──────────────────────────────────────────────────
    /// Non-2xx response from a data endpoint.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// The response parsed as JSON but lacks the expected top-level structure.
    #[error("Unexpected response shape: {message}")]
    Envelope { message: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if the remote service refused the credentials,
    /// as opposed to the request never getting an answer.
    pub fn is_auth_rejected(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient() {
        let err = Error::Api {
            status: 503,
            message: "maintenance".into(),
        };
        assert!(err.is_transient());
        assert!(!err.is_auth_rejected());
    }

    #[test]
    fn rejected_grant_is_not_transient() {
        let err = Error::Authentication {
            message: "invalid_grant".into(),
        };
        assert!(err.is_auth_rejected());
        assert!(!err.is_transient());
    }
}
