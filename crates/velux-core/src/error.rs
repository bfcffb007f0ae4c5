// ── Core error types ──
//
// Errors surfaced by the poll loop. Transport-level detail from
// `velux_api::Error` is folded into messages; only the classification
// (auth vs. fetch, fatal vs. per-cycle) is structural.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Authentication ───────────────────────────────────────────────
    /// A password or refresh grant failed. The cycle is skipped and the
    /// grant is retried after a backoff delay.
    #[error("Authentication failed (attempt {attempt}): {message}")]
    AuthenticationFailed { attempt: u32, message: String },

    /// Consecutive grant failures reached the retry budget.
    #[error("Giving up after {attempts} consecutive authentication failures: {message}")]
    AuthRetriesExhausted { attempts: u32, message: String },

    // ── Fetch ────────────────────────────────────────────────────────
    /// Status, topology, or home id retrieval failed. Retried next cycle.
    #[error("Failed to fetch {feed}: {message}")]
    Fetch {
        feed: &'static str,
        message: String,
        /// HTTP status code, if the server answered.
        status: Option<u16>,
    },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CoreError {
    /// Wrap an API error from one of the data feeds.
    pub fn fetch(feed: &'static str, err: &velux_api::Error) -> Self {
        let status = match err {
            velux_api::Error::Api { status, .. } => Some(*status),
            _ => None,
        };
        Self::Fetch {
            feed,
            message: err.to_string(),
            status,
        }
    }

    /// Returns `true` if the process should stop instead of polling again.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AuthRetriesExhausted { .. } | Self::Config { .. })
    }

    /// Returns `true` if the remote service refused the access token.
    pub fn is_token_rejected(&self) -> bool {
        matches!(
            self,
            Self::Fetch {
                status: Some(401 | 403),
                ..
            }
        )
    }
}

impl From<velux_api::Error> for CoreError {
    fn from(err: velux_api::Error) -> Self {
        match err {
            velux_api::Error::InvalidUrl(e) => Self::Config {
                message: format!("Invalid URL: {e}"),
            },
            velux_api::Error::Tls(message) => Self::Config { message },
            other => Self::fetch("cloud API", &other),
        }
    }
}
