// ── Credential store ──
//
// Persists the current token as a small JSON document so a restart does not
// need a fresh password grant. The store is a cache: every failure here is
// reported and swallowed, never allowed to stop the poll loop.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::Token;

/// Documented default location of the token file.
pub const DEFAULT_TOKEN_PATH: &str = "/var/lib/velux-netatmo-exporter/token.json";

/// Why a persisted token could not be used.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("no token file at {}", path.display())]
    NotFound { path: PathBuf },

    #[error("cannot access token file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("token file {} is corrupt: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
}

// ── On-disk record ──────────────────────────────────────────────────

/// JSON layout of the token file.
///
/// `expieres_at` keeps the spelling earlier deployments wrote, so existing
/// token files stay readable in both directions.
#[derive(Debug, Serialize, Deserialize)]
struct TokenRecord {
    access_token: String,
    refresh_token: String,
    /// Seconds left at write time. Informational; `expieres_at` is authoritative.
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(rename = "expieres_at", alias = "expires_at")]
    expires_at: String,
    #[serde(default)]
    token_type: Option<String>,
}

impl TokenRecord {
    fn from_token(token: &Token, now: DateTime<Utc>) -> Self {
        Self {
            access_token: token.access_token().expose_secret().to_owned(),
            refresh_token: token.refresh_token().expose_secret().to_owned(),
            expires_in: Some((token.expires_at() - now).num_seconds()),
            expires_at: token.expires_at().to_rfc3339(),
            token_type: token.token_type().map(str::to_owned),
        }
    }

    fn into_token(self) -> Result<Token, String> {
        if self.access_token.is_empty() || self.refresh_token.is_empty() {
            return Err("empty access or refresh token".into());
        }
        let expires_at = parse_timestamp(&self.expires_at)
            .ok_or_else(|| format!("unparseable expieres_at {:?}", self.expires_at))?;

        Ok(Token::restored(
            SecretString::from(self.access_token),
            SecretString::from(self.refresh_token),
            expires_at,
            self.token_type,
        ))
    }
}

/// Accepts RFC 3339 (what this crate writes) and naive ISO-8601 local time
/// (what earlier deployments wrote).
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

// ── CredentialStore ─────────────────────────────────────────────────

/// File-backed token cache at a fixed path.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_PATH)
    }
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted token, reporting exactly why it is unusable.
    ///
    /// An expired token is still returned; deciding whether it is usable is
    /// the token manager's job.
    pub fn read(&self) -> Result<Token, PersistenceError> {
        let raw = fs::read_to_string(&self.path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                PersistenceError::NotFound {
                    path: self.path.clone(),
                }
            } else {
                PersistenceError::Io {
                    path: self.path.clone(),
                    source,
                }
            }
        })?;

        let record: TokenRecord =
            serde_json::from_str(&raw).map_err(|e| PersistenceError::Corrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        record
            .into_token()
            .map_err(|reason| PersistenceError::Corrupt {
                path: self.path.clone(),
                reason,
            })
    }

    /// Read the persisted token, treating every failure as a cache miss.
    pub fn load(&self) -> Option<Token> {
        match self.read() {
            Ok(token) => {
                debug!(
                    path = %self.path.display(),
                    expires_at = %token.expires_at(),
                    "loaded cached token"
                );
                Some(token)
            }
            Err(e @ PersistenceError::NotFound { .. }) => {
                info!(error = %e, "no cached token");
                None
            }
            Err(e) => {
                warn!(error = %e, "ignoring unreadable token cache");
                None
            }
        }
    }

    /// Persist `token`, replacing any previous value.
    pub fn try_save(&self, token: &Token) -> Result<(), PersistenceError> {
        let io_err = |source: io::Error| PersistenceError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let record = TokenRecord::from_token(token, Utc::now());
        let json = serde_json::to_string_pretty(&record).map_err(|e| io_err(e.into()))?;

        // Write next to the target and rename so a crash never leaves half a file.
        let tmp = self.path.with_extension("json.tmp");
        let mut file = create_private(&tmp).map_err(io_err)?;
        file.write_all(json.as_bytes()).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);
        fs::rename(&tmp, &self.path).map_err(io_err)?;

        debug!(path = %self.path.display(), "token persisted");
        Ok(())
    }

    /// Persist `token`; failures are logged and otherwise ignored.
    pub fn save(&self, token: &Token) {
        if let Err(e) = self.try_save(token) {
            warn!(error = %e, "failed to persist token, continuing with in-memory token");
        }
    }
}

/// Open `path` for writing, readable by the owner only from the moment it
/// exists. A file left over from an earlier run is narrowed as well.
#[cfg(unix)]
fn create_private(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn create_private(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeDelta;
    use velux_api::TokenResponse;

    use super::*;

    fn token(expires_in: u64) -> Token {
        Token::issued(
            TokenResponse {
                access_token: SecretString::from("access".to_string()),
                refresh_token: SecretString::from("refresh".to_string()),
                expires_in,
                token_type: None,
            },
            Utc::now(),
        )
    }

    #[test]
    fn save_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("state").join("token.json"));

        let original = token(10800);
        store.try_save(&original).unwrap();
        let restored = store.read().unwrap();

        assert_eq!(restored.access_token().expose_secret(), "access");
        assert_eq!(restored.refresh_token().expose_secret(), "refresh");
        let drift = (restored.expires_at() - original.expires_at()).num_seconds().abs();
        assert!(drift <= 1, "expiry drifted by {drift}s");
    }

    #[test]
    fn written_file_uses_legacy_field_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("token.json"));
        store.try_save(&token(3600)).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert!(raw.get("expieres_at").is_some());
        assert!(raw.get("expires_in").is_some());
        assert!(raw.get("expires_at").is_none());
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("absent.json"));

        assert!(matches!(store.read(), Err(PersistenceError::NotFound { .. })));
        assert!(store.load().is_none());
    }

    #[test]
    fn corrupt_file_is_a_cache_miss() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        fs::write(&path, "{ not json").unwrap();
        let store = CredentialStore::new(&path);

        assert!(matches!(store.read(), Err(PersistenceError::Corrupt { .. })));
        assert!(store.load().is_none());
    }

    #[test]
    fn bad_timestamp_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        fs::write(
            &path,
            r#"{"access_token":"a","refresh_token":"r","expieres_at":"tomorrow"}"#,
        )
        .unwrap();

        let err = CredentialStore::new(&path).read().unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::Corrupt { ref reason, .. } if reason.contains("tomorrow")
        ));
    }

    #[test]
    fn reads_naive_local_timestamp_from_earlier_deployments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        let expires = (Local::now() + TimeDelta::hours(2)).naive_local();
        let legacy = serde_json::json!({
            "access_token": "a",
            "refresh_token": "r",
            "expires_in": 7200,
            "expire_in": 7200,
            "scope": ["velux_scopes"],
            "expieres_at": expires.format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
        });
        fs::write(&path, legacy.to_string()).unwrap();

        let token = CredentialStore::new(&path).read().unwrap();
        let remaining = token.remaining(Utc::now()).as_secs();
        assert!((7190..=7200).contains(&remaining), "remaining = {remaining}");
    }

    #[test]
    fn save_failure_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "").unwrap();
        let store = CredentialStore::new(blocker.join("token.json"));

        assert!(store.try_save(&token(60)).is_err());
        store.save(&token(60));
    }

    #[cfg(unix)]
    #[test]
    fn token_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        // A stale temp file from an interrupted run, world-readable.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, "{}").unwrap();
        fs::set_permissions(&tmp, fs::Permissions::from_mode(0o644)).unwrap();

        CredentialStore::new(&path).try_save(&token(3600)).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(!tmp.exists());
    }
}
