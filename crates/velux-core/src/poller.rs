// ── Poll loop ──
//
// One cycle: token check → home id bootstrap → status + topology fetch →
// reconcile → publish. Cycles run strictly one after another; all mutable
// loop state lives in `ExporterContext` and is threaded through each call.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use velux_api::{TransportConfig, VeluxClient};

use crate::config::ExporterConfig;
use crate::error::CoreError;
use crate::metrics::MetricsState;
use crate::reconcile::{MergeReport, Reconciled, reconcile};
use crate::token::TokenManager;

/// Loop state: the token manager and the home being polled.
pub struct ExporterContext {
    client: VeluxClient,
    tokens: TokenManager,
    home_id: Option<String>,
    metrics: Arc<MetricsState>,
    poll_interval: Duration,
}

impl ExporterContext {
    pub fn new(
        client: VeluxClient,
        tokens: TokenManager,
        metrics: Arc<MetricsState>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            client,
            tokens,
            home_id: None,
            metrics,
            poll_interval,
        }
    }

    /// Build the HTTP client and token manager from config, adopting any
    /// still-valid persisted token.
    pub fn from_config(
        config: &ExporterConfig,
        metrics: Arc<MetricsState>,
    ) -> Result<Self, CoreError> {
        let transport = TransportConfig::with_timeout(config.request_timeout);
        let client = VeluxClient::new(config.base_url.clone(), &transport)?;

        let mut tokens = TokenManager::from_config(client.clone(), config);
        let state = tokens.restore();
        debug!(%state, "token state after restore");

        Ok(Self::new(client, tokens, metrics, config.poll_interval))
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn tokens_mut(&mut self) -> &mut TokenManager {
        &mut self.tokens
    }

    pub fn home_id(&self) -> Option<&str> {
        self.home_id.as_deref()
    }

    pub fn metrics(&self) -> &Arc<MetricsState> {
        &self.metrics
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    // ── Single cycle ─────────────────────────────────────────────────

    /// Run one poll cycle and publish the merged tree.
    ///
    /// On error nothing is published; the previous tree stays served.
    pub async fn run_cycle(&mut self) -> Result<MergeReport, CoreError> {
        let access = self.tokens.ensure_valid().await?;

        let home_id = if let Some(id) = &self.home_id {
            id.clone()
        } else {
            let id = self
                .client
                .fetch_home_id(&access)
                .await
                .map_err(|e| CoreError::fetch("home id", &e))?;
            info!(home_id = %id, "polling home");
            self.home_id = Some(id.clone());
            id
        };

        let status = self
            .client
            .fetch_status(&access, &home_id)
            .await
            .map_err(|e| CoreError::fetch("status", &e))?;
        let topology = self
            .client
            .fetch_topology(&access)
            .await
            .map_err(|e| CoreError::fetch("topology", &e))?;

        let Reconciled { tree, report } = reconcile(&status, &topology);
        if !report.is_clean() {
            debug!(
                unknown_modules = report.unknown_modules.len(),
                orphaned_modules = report.orphaned_modules.len(),
                unnamed_modules = report.unnamed_modules.len(),
                unknown_rooms = report.unknown_rooms.len(),
                duplicate_modules = report.duplicate_modules.len(),
                "status and topology feeds disagree"
            );
        }
        debug!(
            rooms = tree.rooms.len(),
            modules = tree.module_count(),
            "home reconciled"
        );

        self.metrics.publish(tree);
        Ok(report)
    }

    // ── Loop ─────────────────────────────────────────────────────────

    /// Poll until `cancel` fires or an unrecoverable error occurs.
    ///
    /// In-flight requests are dropped as soon as cancellation is requested.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), CoreError> {
        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            "poll loop started"
        );

        loop {
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                result = self.run_cycle() => Some(result),
            };
            let Some(result) = outcome else { break };

            let delay = match result {
                Ok(_) => self.poll_interval,
                Err(err) => self.on_failure(err)?,
            };

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
            self.tokens.advance(delay);
        }

        info!("poll loop stopped");
        Ok(())
    }

    /// Classify a failed cycle and pick the delay before the next one.
    fn on_failure(&mut self, err: CoreError) -> Result<Duration, CoreError> {
        self.metrics.record_failure();

        if err.is_fatal() {
            error!(error = %err, "unrecoverable error, stopping");
            return Err(err);
        }

        if let CoreError::AuthenticationFailed { attempt, .. } = &err {
            let delay = self
                .tokens
                .retry_policy()
                .delay(attempt.saturating_sub(1));
            warn!(
                error = %err,
                retry_in_secs = delay.as_secs(),
                "authentication failed, backing off"
            );
            return Ok(delay);
        }

        if err.is_token_rejected() {
            self.tokens.force_refresh();
        }
        warn!(error = %err, "poll cycle failed, keeping last metrics");
        Ok(self.poll_interval)
    }
}
