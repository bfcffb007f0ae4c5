// Cloud API HTTP client
//
// Wraps `reqwest::Client` with URL construction, form-encoded POSTs, and
// status/body handling. Endpoint groups (OAuth2 grants, home feeds) are
// implemented as inherent methods in separate files so this module stays
// focused on transport mechanics.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// Production endpoint of the Velux ACTIVE cloud.
pub const DEFAULT_BASE_URL: &str = "https://app.velux-active.com";

/// Longest slice of a response body quoted in error messages.
const BODY_PREVIEW_LEN: usize = 200;

/// Error body shapes returned by the cloud:
/// `{"error": "invalid_grant"}` from the token endpoint and
/// `{"error": {"code": 2, "message": "Invalid access_token"}}` from `/api/*`.
#[derive(serde::Deserialize)]
struct RemoteError {
    error: Option<RemoteErrorInner>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum RemoteErrorInner {
    Code(String),
    Detailed {
        code: Option<i64>,
        message: Option<String>,
    },
}

impl RemoteError {
    fn describe(self) -> Option<String> {
        let description = self.error_description;
        match self.error? {
            RemoteErrorInner::Code(code) => Some(match description {
                Some(d) => format!("{code}: {d}"),
                None => code,
            }),
            RemoteErrorInner::Detailed { code, message } => Some(format!(
                "code {}: {}",
                code.map_or_else(|| "?".to_owned(), |c| c.to_string()),
                message.unwrap_or_default()
            )),
        }
    }
}

/// Raw HTTP client for the Velux ACTIVE cloud API.
///
/// Stateless: it holds no token. Every call that needs authorization takes
/// the access token as an argument, so credential state lives with the
/// caller.
#[derive(Debug, Clone)]
pub struct VeluxClient {
    http: reqwest::Client,
    base_url: Url,
    timeout_secs: u64,
}

impl VeluxClient {
    /// Create a new client from a `TransportConfig`.
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self {
            http,
            base_url,
            timeout_secs: transport.timeout.as_secs(),
        })
    }

    /// Create a client around a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self {
            http,
            base_url,
            timeout_secs: 0,
        }
    }

    /// The underlying HTTP client.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// The API base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// Build a full URL for an absolute API path such as `/oauth2/token`.
    pub(crate) fn endpoint(&self, path: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}{path}"))?)
    }

    // ── Request helpers ──────────────────────────────────────────────

    /// POST a form-encoded body and decode the JSON response.
    ///
    /// Non-2xx responses become [`Error::Api`]; callers that need a more
    /// specific error (the token endpoint) remap it.
    pub(crate) async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &(impl Serialize + Sync + ?Sized),
    ) -> Result<T, Error> {
        let url = self.endpoint(path)?;
        debug!("POST {}", url.path());

        let resp = self
            .http
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| self.map_transport(e))?;
        trace!(status = status.as_u16(), bytes = body.len(), "response received");

        if !status.is_success() {
            let message = serde_json::from_str::<RemoteError>(&body)
                .ok()
                .and_then(RemoteError::describe)
                .unwrap_or_else(|| preview(&body).to_owned());
            return Err(Error::Api {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: format!("{e} (body preview: {:?})", preview(&body)),
            body,
        })
    }

    fn map_transport(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout {
                timeout_secs: self.timeout_secs,
            }
        } else {
            Error::Transport(err)
        }
    }
}

fn preview(body: &str) -> &str {
    let mut end = body.len().min(BODY_PREVIEW_LEN);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
