// ── Runtime exporter configuration ──
//
// These types describe *how* to talk to the cloud and how often to poll.
// They carry credential data and tuning, but never touch disk.
// `velux-config` builds an `ExporterConfig` and hands it in.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;
use velux_api::Identity;

use crate::retry::RetryPolicy;
use crate::token::store::DEFAULT_TOKEN_PATH;

/// Default time between two poll cycles.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Default per-request timeout for calls to the cloud.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default metric name prefix.
pub const DEFAULT_METRIC_PREFIX: &str = "velux_netatmo";

/// Account login used for the password grant.
#[derive(Debug, Clone)]
pub struct Account {
    pub username: String,
    pub password: SecretString,
}

/// Everything the poll loop needs.
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    /// Cloud API base URL.
    pub base_url: Url,
    /// OAuth2 client identity.
    pub identity: Identity,
    /// Account credentials for the password grant.
    pub account: Account,
    /// Time between poll cycles. Also the look-ahead margin for token refresh.
    pub poll_interval: Duration,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Location of the persisted token.
    pub token_path: PathBuf,
    /// Prefix for every exported metric name.
    pub metric_prefix: String,
    /// Bound on consecutive authentication failures.
    pub retry: RetryPolicy,
}

impl ExporterConfig {
    /// Config with default tuning for the given credentials.
    pub fn new(base_url: Url, identity: Identity, account: Account) -> Self {
        Self {
            base_url,
            identity,
            account,
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            token_path: PathBuf::from(DEFAULT_TOKEN_PATH),
            metric_prefix: DEFAULT_METRIC_PREFIX.into(),
            retry: RetryPolicy::default(),
        }
    }
}
