// Cloud API wire types
//
// Field names mirror the remote JSON exactly. Topology and status feeds keep
// every field they do not model explicitly in a flattened map, because the
// per-device telemetry set differs by device type and firmware.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

// ── Response Envelope ────────────────────────────────────────────────

/// Envelope shared by the `/api/*` endpoints:
/// ```json
/// { "body": { ... }, "status": "ok", "time_server": 1700000000 }
/// ```
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub body: Option<T>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Body of `/api/gethomedata` and `/api/homesdata`.
#[derive(Debug, Deserialize)]
pub(crate) struct HomesBody {
    #[serde(default)]
    pub homes: Vec<RawHome>,
}

/// Body of `/api/homestatus`.
#[derive(Debug, Deserialize)]
pub(crate) struct HomeStatusBody {
    pub home: Option<RawStatus>,
}

// ── OAuth2 ───────────────────────────────────────────────────────────

/// Token endpoint response before validation. Every field is optional so a
/// missing one is reported by name instead of as a generic decode failure.
#[derive(Debug, Deserialize)]
pub(crate) struct RawTokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// A validated grant response.
///
/// `expires_in` is relative to the moment the response was received; the
/// caller turns it into an absolute expiry.
#[derive(Debug, Clone)]
pub struct TokenResponse {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    pub expires_in: u64,
    pub token_type: Option<String>,
}

impl TryFrom<RawTokenResponse> for TokenResponse {
    type Error = Error;

    fn try_from(raw: RawTokenResponse) -> Result<Self, Self::Error> {
        let access_token = raw
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or(Error::MissingField {
                field: "access_token",
            })?;
        let refresh_token = raw
            .refresh_token
            .filter(|t| !t.is_empty())
            .ok_or(Error::MissingField {
                field: "refresh_token",
            })?;
        let expires_in = raw.expires_in.ok_or(Error::MissingField {
            field: "expires_in",
        })?;

        Ok(Self {
            access_token: SecretString::from(access_token),
            refresh_token: SecretString::from(refresh_token),
            expires_in,
            token_type: raw.token_type,
        })
    }
}

// ── Topology feed (/api/homesdata) ───────────────────────────────────

/// One home from the naming/topology feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawHome {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub rooms: Vec<RawRoomName>,
    #[serde(default)]
    pub modules: Vec<RawModuleName>,
}

/// Display name of a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRoomName {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Display name and placement of a module. Ids are only unique per `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawModuleName {
    pub id: String,
    #[serde(rename = "type")]
    pub module_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub room_id: Option<String>,
}

// ── Status feed (/api/homestatus) ────────────────────────────────────

/// Live telemetry for one home.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawStatus {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub rooms: Vec<RawRoomStatus>,
    #[serde(default)]
    pub modules: Vec<RawModuleStatus>,
}

/// Ambient measurements of one room (`temperature`, `co2`, `humidity`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRoomStatus {
    pub id: String,
    #[serde(flatten)]
    pub measurements: Map<String, Value>,
}

/// State and telemetry of one module (`reachable`, `current_position`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawModuleStatus {
    pub id: String,
    #[serde(rename = "type")]
    pub module_type: String,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}
