//! Configuration for the Velux ACTIVE exporter.
//!
//! Layered loading (defaults → TOML file → `VELUX_` environment), identity
//! resolution (legacy env vars + keyring + plaintext), and translation to
//! `velux_core::ExporterConfig`.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use velux_api::{DEFAULT_BASE_URL, Identity};
use velux_core::config::{DEFAULT_METRIC_PREFIX, DEFAULT_POLL_INTERVAL, DEFAULT_REQUEST_TIMEOUT};
use velux_core::token::store::DEFAULT_TOKEN_PATH;
use velux_core::{Account, ExporterConfig, RetryPolicy};

/// Prefix for environment overrides, e.g. `VELUX_POLL_INTERVAL=30s`.
pub const ENV_PREFIX: &str = "VELUX_";

/// Keyring service under which secrets may be stored.
pub const KEYRING_SERVICE: &str = "velux-netatmo-exporter";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("missing {field}: set {env}, store it in the keyring, or add it to the config file")]
    MissingIdentity {
        field: &'static str,
        env: &'static str,
    },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Cloud API base URL.
    pub base_url: String,

    /// Address the metrics endpoint binds to.
    pub listen: SocketAddr,

    /// Time between poll cycles (e.g. "60s", "2m").
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Per-request timeout.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Where the token is persisted between runs.
    pub token_path: PathBuf,

    /// Prefix for every exported metric.
    pub metric_prefix: String,

    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            listen: SocketAddr::from(([0, 0, 0, 0], 9211)),
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            token_path: PathBuf::from(DEFAULT_TOKEN_PATH),
            metric_prefix: DEFAULT_METRIC_PREFIX.into(),
            identity: IdentityConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// Account and OAuth client identity. Every field can instead come from
/// the environment; secrets also from the keyring.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct IdentityConfig {
    /// Account email.
    pub username: Option<String>,

    /// Account password (plaintext; prefer env var or keyring).
    pub password: Option<String>,

    /// OAuth2 client id.
    pub client_id: Option<String>,

    /// OAuth2 client secret (plaintext; prefer env var or keyring).
    pub client_secret: Option<String>,
}

/// Bounds on consecutive authentication failures.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    pub max_attempts: u32,

    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_delay: policy.initial_delay,
            max_delay: policy.max_delay,
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "velux-netatmo", "velux-netatmo-exporter").map_or_else(
        || PathBuf::from("velux-netatmo-exporter.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Layered provider: defaults, then the TOML file, then `VELUX_` env vars.
///
/// Nested keys use a double underscore: `VELUX_RETRY__MAX_ATTEMPTS=3`.
pub fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Load the config from `path` (or the platform default) plus environment.
/// A missing file is not an error.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);
    let config: Config = figment(&path).extract()?;
    Ok(config)
}

// ── Identity resolution ─────────────────────────────────────────────

/// Environment variables holding the identity, as used by earlier
/// deployments of the exporter.
pub const ENV_USERNAME: &str = "MAIL";
pub const ENV_PASSWORD: &str = "PASSWORD";
pub const ENV_CLIENT_ID: &str = "CLIENTID";
pub const ENV_CLIENT_SECRET: &str = "CLIENTSECRET";

/// Fully resolved account and client identity.
#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    pub identity: Identity,
    pub account: Account,
}

/// Resolve the identity from the process environment, the system keyring,
/// and the config file, in that order.
pub fn resolve_identity(config: &Config) -> Result<ResolvedIdentity, ConfigError> {
    resolve_identity_with(config, |name| std::env::var(name).ok(), keyring_secret)
}

/// Same as [`resolve_identity`] with explicit lookups for the environment
/// and the keyring.
pub fn resolve_identity_with(
    config: &Config,
    env: impl Fn(&str) -> Option<String>,
    keyring: impl Fn(&str) -> Option<String>,
) -> Result<ResolvedIdentity, ConfigError> {
    let ids = &config.identity;

    let username = plain(&env, ENV_USERNAME, ids.username.as_deref())
        .ok_or(ConfigError::MissingIdentity {
            field: "username",
            env: ENV_USERNAME,
        })?;
    let password = secret(&env, &keyring, ENV_PASSWORD, "password", ids.password.as_deref())
        .ok_or(ConfigError::MissingIdentity {
            field: "password",
            env: ENV_PASSWORD,
        })?;
    let client_id = plain(&env, ENV_CLIENT_ID, ids.client_id.as_deref())
        .ok_or(ConfigError::MissingIdentity {
            field: "client_id",
            env: ENV_CLIENT_ID,
        })?;
    let client_secret = secret(
        &env,
        &keyring,
        ENV_CLIENT_SECRET,
        "client-secret",
        ids.client_secret.as_deref(),
    )
    .ok_or(ConfigError::MissingIdentity {
        field: "client_secret",
        env: ENV_CLIENT_SECRET,
    })?;

    Ok(ResolvedIdentity {
        identity: Identity::new(client_id, client_secret),
        account: Account { username, password },
    })
}

/// 1. env var, 2. config file.
fn plain(env: impl Fn(&str) -> Option<String>, var: &str, file: Option<&str>) -> Option<String> {
    env(var)
        .or_else(|| file.map(str::to_owned))
        .filter(|value| !value.trim().is_empty())
}

/// 1. env var, 2. keyring, 3. config file.
fn secret(
    env: impl Fn(&str) -> Option<String>,
    keyring: impl Fn(&str) -> Option<String>,
    var: &str,
    keyring_user: &str,
    file: Option<&str>,
) -> Option<SecretString> {
    env(var)
        .filter(|value| !value.is_empty())
        .or_else(|| keyring(keyring_user))
        .or_else(|| file.map(str::to_owned))
        .filter(|value| !value.is_empty())
        .map(SecretString::from)
}

fn keyring_secret(user: &str) -> Option<String> {
    keyring::Entry::new(KEYRING_SERVICE, user)
        .ok()?
        .get_password()
        .ok()
}

// ── Translation ─────────────────────────────────────────────────────

/// Validate `config` and build the runtime `ExporterConfig`.
pub fn to_exporter_config(
    config: &Config,
    resolved: ResolvedIdentity,
) -> Result<ExporterConfig, ConfigError> {
    let base_url: url::Url = config
        .base_url
        .parse()
        .map_err(|_| ConfigError::Validation {
            field: "base_url".into(),
            reason: format!("invalid URL: {}", config.base_url),
        })?;

    if config.poll_interval.is_zero() {
        return Err(ConfigError::Validation {
            field: "poll_interval".into(),
            reason: "must be greater than zero".into(),
        });
    }
    if config.request_timeout.is_zero() {
        return Err(ConfigError::Validation {
            field: "request_timeout".into(),
            reason: "must be greater than zero".into(),
        });
    }
    if config.retry.max_attempts == 0 {
        return Err(ConfigError::Validation {
            field: "retry.max_attempts".into(),
            reason: "must be at least 1".into(),
        });
    }
    if config.metric_prefix.trim().is_empty() {
        return Err(ConfigError::Validation {
            field: "metric_prefix".into(),
            reason: "must not be empty".into(),
        });
    }

    Ok(ExporterConfig {
        poll_interval: config.poll_interval,
        request_timeout: config.request_timeout,
        token_path: config.token_path.clone(),
        metric_prefix: config.metric_prefix.clone(),
        retry: RetryPolicy {
            max_attempts: config.retry.max_attempts,
            initial_delay: config.retry.initial_delay,
            max_delay: config.retry.max_delay.max(config.retry.initial_delay),
        },
        ..ExporterConfig::new(base_url, resolved.identity, resolved.account)
    })
}

/// Load, resolve, and validate in one go.
pub fn load_exporter_config(path: Option<&Path>) -> Result<(Config, ExporterConfig), ConfigError> {
    let config = load_config(path)?;
    let resolved = resolve_identity(&config)?;
    let exporter = to_exporter_config(&config, resolved)?;
    Ok((config, exporter))
}
