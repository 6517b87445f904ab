//! Background renewal of the access token ahead of its expiry.
//!
//! Shares the client's single-flight refresh, so a tick that lands while a
//! 401-triggered refresh is running joins it instead of racing it.

use std::time::Duration;

use dashboard_session::{is_expired, now_unix_ms};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::client::DashboardClient;
use crate::error::RefreshError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalOutcome {
    /// One of the two tokens is missing.
    NoSession,
    StillFresh,
    Renewed,
}

impl DashboardClient {
    /// Refreshes the pair when the access token expires within `threshold_minutes`.
    ///
    /// Never clears the session; the caller decides what a failure means.
    pub async fn renew_if_expiring(
        &self,
        threshold_minutes: i64,
        now_ms: i64,
    ) -> Result<RenewalOutcome, RefreshError> {
        let Some(pair) = self.tokens().credentials() else {
            return Ok(RenewalOutcome::NoSession);
        };
        if !is_expired(&pair.access, threshold_minutes, now_ms) {
            return Ok(RenewalOutcome::StillFresh);
        }
        self.refresh_session().await?;
        Ok(RenewalOutcome::Renewed)
    }
}

/// Handle to the periodic renewal task. Dropping it leaves the task running.
#[derive(Debug)]
pub struct RenewalTimer {
    handle: JoinHandle<()>,
}

impl RenewalTimer {
    /// Starts the timer with the interval and threshold from the client config.
    #[must_use]
    pub fn spawn(client: DashboardClient) -> Self {
        let period = client.config().renewal_interval();
        let threshold = client.config().renewal_threshold_minutes;
        Self::spawn_with(client, period, threshold)
    }

    #[must_use]
    pub fn spawn_with(client: DashboardClient, period: Duration, threshold_minutes: i64) -> Self {
        let period = period.max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match client
                    .renew_if_expiring(threshold_minutes, now_unix_ms())
                    .await
                {
                    Ok(RenewalOutcome::Renewed) => info!("access token renewed ahead of expiry"),
                    Ok(outcome) => debug!(?outcome, "renewal tick"),
                    Err(error) => warn!(%error, "proactive token renewal failed"),
                }
            }
        });
        Self { handle }
    }

    pub fn stop(&self) {
        self.handle.abort();
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}
