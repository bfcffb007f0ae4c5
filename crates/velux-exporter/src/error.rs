//! Exporter error types with miette diagnostics.
//!
//! Maps config and core errors into user-facing errors with help text and
//! process exit codes.

use std::net::SocketAddr;

use miette::Diagnostic;
use thiserror::Error;

use velux_config::ConfigError;
use velux_core::CoreError;

pub mod exit_code {
    pub const CONFIG: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum ExporterError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("No {field} configured")]
    #[diagnostic(
        code(velux::missing_identity),
        help(
            "Set the {env} environment variable, store it in the system keyring \
             (service \"velux-netatmo-exporter\"), or add it to the [identity] table \
             of the config file."
        )
    )]
    MissingIdentity {
        field: &'static str,
        env: &'static str,
    },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(velux::validation))]
    Validation { field: String, reason: String },

    #[error(transparent)]
    #[diagnostic(
        code(velux::config),
        help("Check the config file and VELUX_* environment variables.")
    )]
    Config(Box<figment::Error>),

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed after {attempts} attempt(s): {message}")]
    #[diagnostic(
        code(velux::auth_failed),
        help("Verify the account credentials and the OAuth client id/secret.")
    )]
    AuthFailed { attempts: u32, message: String },

    // ── Network ──────────────────────────────────────────────────────
    #[error("Could not fetch {feed}: {message}")]
    #[diagnostic(
        code(velux::fetch_failed),
        help("Check network access to the Velux ACTIVE cloud.")
    )]
    Fetch { feed: &'static str, message: String },

    #[error("Could not listen on {addr}")]
    #[diagnostic(
        code(velux::bind_failed),
        help("Another process may be using the port. Pick another with --listen.")
    )]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

impl From<ConfigError> for ExporterError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::MissingIdentity { field, env } => Self::MissingIdentity { field, env },
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::Figment(inner) => Self::Config(inner),
        }
    }
}

impl From<CoreError> for ExporterError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::AuthenticationFailed { attempt, message } => Self::AuthFailed {
                attempts: attempt,
                message,
            },
            CoreError::AuthRetriesExhausted { attempts, message } => {
                Self::AuthFailed { attempts, message }
            }
            CoreError::Fetch { feed, message, .. } => Self::Fetch { feed, message },
            CoreError::Config { message } => Self::Validation {
                field: "config".into(),
                reason: message,
            },
        }
    }
}

impl ExporterError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::MissingIdentity { .. } | Self::Validation { .. } | Self::Config(_) => {
                exit_code::CONFIG
            }
            Self::AuthFailed { .. } => exit_code::AUTH,
            Self::Fetch { .. } | Self::Bind { .. } => exit_code::CONNECTION,
        }
    }
}
