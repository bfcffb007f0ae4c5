// Home feeds
//
// `/api/gethomedata` (bootstrap: which home to poll), `/api/homesdata`
// (naming/topology) and `/api/homestatus` (live telemetry). Only the first
// home of an account is ever used.

use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::client::VeluxClient;
use crate::error::Error;
use crate::models::{Envelope, HomeStatusBody, HomesBody, RawHome, RawStatus};

impl VeluxClient {
    /// Resolve the id of the account's first home.
    pub async fn fetch_home_id(&self, access_token: &SecretString) -> Result<String, Error> {
        let home = self.first_home("/api/gethomedata", access_token).await?;
        debug!(home_id = %home.id, "resolved home id");
        Ok(home.id)
    }

    /// Fetch names and room placement of rooms and modules for the first home.
    pub async fn fetch_topology(&self, access_token: &SecretString) -> Result<RawHome, Error> {
        let home = self.first_home("/api/homesdata", access_token).await?;
        debug!(
            home_id = %home.id,
            rooms = home.rooms.len(),
            modules = home.modules.len(),
            "fetched topology"
        );
        Ok(home)
    }

    /// Fetch live room measurements and module state for one home.
    pub async fn fetch_status(
        &self,
        access_token: &SecretString,
        home_id: &str,
    ) -> Result<RawStatus, Error> {
        let form = [
            ("access_token", access_token.expose_secret()),
            ("home_id", home_id),
        ];
        let envelope: Envelope<HomeStatusBody> = self.post_form("/api/homestatus", &form).await?;

        let status = envelope.status;
        let home = envelope
            .body
            .and_then(|body| body.home)
            .ok_or_else(|| Error::Envelope {
                message: format!(
                    "homestatus response has no body.home (status: {})",
                    status.as_deref().unwrap_or("missing")
                ),
            })?;

        debug!(
            home_id,
            rooms = home.rooms.len(),
            modules = home.modules.len(),
            "fetched status"
        );
        Ok(home)
    }

    async fn first_home(&self, path: &str, access_token: &SecretString) -> Result<RawHome, Error> {
        let form = [("access_token", access_token.expose_secret())];
        let envelope: Envelope<HomesBody> = self.post_form(path, &form).await?;

        let status = envelope.status;
        let body = envelope.body.ok_or_else(|| Error::Envelope {
            message: format!(
                "{path} response has no body (status: {})",
                status.as_deref().unwrap_or("missing")
            ),
        })?;

        body.homes.into_iter().next().ok_or_else(|| Error::Envelope {
            message: format!("{path} returned no homes for this account"),
        })
    }
}
