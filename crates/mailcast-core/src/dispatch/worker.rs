//! Scheduled Dispatch Worker - Starts campaigns whose send time has come

use chrono::Utc;
use mailcast_common::config::DispatchConfig;
use mailcast_common::types::CampaignId;
use mailcast_common::Result;
use mailcast_storage::models::CampaignStatus;
use mailcast_storage::repository::CampaignRepository;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::dispatcher::{DispatchError, DispatchReport, Dispatcher};

/// Outcome of one background dispatch
pub type DispatchRun = (CampaignId, std::result::Result<DispatchReport, DispatchError>);

/// Polls for due SCHEDULED campaigns and interrupted SENDING campaigns and
/// dispatches each of them
pub struct ScheduledDispatchWorker {
    dispatcher: Arc<Dispatcher>,
    campaigns: Arc<dyn CampaignRepository>,
    /// Interval between polls
    poll_interval: Duration,
    /// Maximum campaigns picked up per status per poll
    batch_size: i64,
}

impl ScheduledDispatchWorker {
    /// Create a new worker driving `dispatcher`
    pub fn new(dispatcher: Arc<Dispatcher>, config: &DispatchConfig) -> Self {
        let campaigns = Arc::clone(&dispatcher.repositories().campaigns);
        Self {
            dispatcher,
            campaigns,
            poll_interval: config.poll_interval(),
            batch_size: config.batch_size,
        }
    }

    /// Set poll interval
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set batch size
    pub fn with_batch_size(mut self, size: i64) -> Self {
        self.batch_size = size;
        self
    }

    /// Run until `shutdown` fires, then wait for in-flight dispatches
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut running: JoinSet<DispatchRun> = JoinSet::new();

        info!(
            "Scheduled dispatch worker started (interval: {:?}, batch: {})",
            self.poll_interval, self.batch_size
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            while let Some(joined) = running.try_join_next() {
                log_run(joined);
            }

            match self.ready_campaigns().await {
                Ok(ids) => {
                    for id in ids {
                        let dispatcher = Arc::clone(&self.dispatcher);
                        running.spawn(async move { (id, dispatcher.dispatch(id).await) });
                    }
                }
                Err(e) => error!("Error polling for due campaigns: {}", e),
            }
        }

        info!(
            in_flight = running.len(),
            "Scheduled dispatch worker stopping"
        );
        while let Some(joined) = running.join_next().await {
            log_run(joined);
        }
        info!("Scheduled dispatch worker stopped");
    }

    /// Campaigns to dispatch now: interrupted sends first, then due
    /// schedules. Campaigns already dispatching in this process are skipped.
    pub async fn ready_campaigns(&self) -> Result<Vec<CampaignId>> {
        let mut ids = Vec::new();

        for campaign in self
            .campaigns
            .list_by_status(CampaignStatus::Sending, self.batch_size)
            .await?
        {
            if !self.dispatcher.is_running(campaign.id) {
                info!(campaign_id = %campaign.id, "Resuming interrupted campaign");
                ids.push(campaign.id);
            }
        }

        for campaign in self
            .campaigns
            .list_due(Utc::now(), self.batch_size)
            .await?
        {
            if !self.dispatcher.is_running(campaign.id) {
                debug!(campaign_id = %campaign.id, "Campaign is due");
                ids.push(campaign.id);
            }
        }

        Ok(ids)
    }

    /// Run a single poll and wait for every dispatch it started
    pub async fn poll_once(&self) -> Result<Vec<DispatchRun>> {
        let mut running = JoinSet::new();
        for id in self.ready_campaigns().await? {
            let dispatcher = Arc::clone(&self.dispatcher);
            running.spawn(async move { (id, dispatcher.dispatch(id).await) });
        }

        let mut runs = Vec::with_capacity(running.len());
        while let Some(joined) = running.join_next().await {
            match joined {
                Ok(run) => runs.push(run),
                Err(e) => error!("Dispatch task failed: {}", e),
            }
        }
        Ok(runs)
    }
}

fn log_run(joined: std::result::Result<DispatchRun, JoinError>) {
    match joined {
        Ok((id, Ok(report))) => info!(
            campaign_id = %id,
            status = %report.status,
            sent = report.sent,
            failed = report.failed,
            "Scheduled dispatch finished"
        ),
        Ok((id, Err(DispatchError::AlreadyRunning(_)))) => {
            debug!(campaign_id = %id, "Campaign already dispatching")
        }
        Ok((id, Err(DispatchError::Configuration(e)))) => {
            warn!(campaign_id = %id, "Campaign cannot be dispatched: {}", e)
        }
        Ok((id, Err(e))) => error!(campaign_id = %id, "Scheduled dispatch failed: {}", e),
        Err(e) => error!("Dispatch task failed: {}", e),
    }
}
