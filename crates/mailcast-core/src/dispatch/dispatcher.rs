//! Campaign Dispatcher - Sends a campaign to its pending recipients
//!
//! One invocation opens a single transport session for the campaign's
//! sender, moves the campaign to SENDING and walks PENDING recipients in
//! insertion order through a bounded pool of concurrent sends. Every
//! attempt ends in exactly one terminal recipient record plus one counter
//! increment, written together. Pause and cancel are honoured between
//! recipients; in-flight sends always finish. Re-invoking on the same
//! campaign only picks up recipients that are still PENDING.

use chrono::Utc;
use mailcast_common::config::DispatchConfig;
use mailcast_common::types::{CampaignId, RecipientId, SenderId};
use mailcast_storage::models::{Campaign, CampaignStatus, RecipientOutcome, Sender};
use mailcast_storage::repository::Repositories;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, instrument, warn};

use super::analytics::AnalyticsAggregator;
use super::transport::{DeliveryError, OutgoingEmail, SessionError, Transport, TransportSession};
use crate::campaign::state::{
    CampaignEvent, CampaignStateMachine, InvalidTransition, TransitionError,
};

/// Recipients fetched per storage round trip
const RECIPIENT_PAGE_SIZE: i64 = 500;

/// A campaign that cannot be started as configured. Nothing is mutated.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("campaign {0} has no sender")]
    NoSender(CampaignId),

    #[error("sender {0} does not exist")]
    SenderNotFound(SenderId),

    #[error("campaign {0} has no recipients")]
    NoRecipients(CampaignId),

    #[error("could not open a session for sender {sender_id}: {source}")]
    Session {
        sender_id: SenderId,
        #[source]
        source: SessionError,
    },
}

/// Dispatch errors
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("campaign {0} not found")]
    NotFound(CampaignId),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("campaign {0} is already being dispatched")]
    AlreadyRunning(CampaignId),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("storage error: {0}")]
    Storage(#[from] mailcast_common::Error),
}

impl From<TransitionError> for DispatchError {
    fn from(e: TransitionError) -> Self {
        match e {
            TransitionError::NotFound(id) => DispatchError::NotFound(id),
            TransitionError::Invalid(e) => DispatchError::InvalidTransition(e),
            TransitionError::Storage(e) => DispatchError::Storage(e),
        }
    }
}

/// Summary of one dispatch invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub campaign_id: CampaignId,
    /// Campaign status when the invocation returned
    pub status: CampaignStatus,
    /// Sends started by this invocation
    pub attempted: usize,
    pub sent: usize,
    pub failed: usize,
    /// Outcomes dropped because the recipient had already been processed
    pub skipped: usize,
    /// Outcomes that could not be stored; those recipients remain PENDING
    pub unrecorded: usize,
}

impl DispatchReport {
    fn empty(campaign_id: CampaignId, status: CampaignStatus) -> Self {
        Self {
            campaign_id,
            status,
            attempted: 0,
            sent: 0,
            failed: 0,
            skipped: 0,
            unrecorded: 0,
        }
    }

    fn absorb(&mut self, joined: Result<SendOutcome, JoinError>) {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(campaign_id = %self.campaign_id, "Send task failed: {}", e);
                self.unrecorded += 1;
                return;
            }
        };

        match outcome.recorded {
            Ok(true) => match &outcome.delivery {
                Ok(()) => {
                    debug!(
                        campaign_id = %self.campaign_id,
                        recipient_id = %outcome.recipient_id,
                        to = %outcome.to,
                        "Message sent"
                    );
                    self.sent += 1;
                }
                Err(e) => {
                    warn!(
                        campaign_id = %self.campaign_id,
                        recipient_id = %outcome.recipient_id,
                        to = %outcome.to,
                        error = %e,
                        "Delivery failed"
                    );
                    self.failed += 1;
                }
            },
            Ok(false) => self.skipped += 1,
            Err(e) => {
                error!(
                    campaign_id = %self.campaign_id,
                    recipient_id = %outcome.recipient_id,
                    "Failed to record delivery outcome: {}", e
                );
                self.unrecorded += 1;
            }
        }
    }
}

struct SendOutcome {
    recipient_id: RecipientId,
    to: String,
    delivery: Result<(), DeliveryError>,
    recorded: mailcast_common::Result<bool>,
}

/// Dispatch tuning
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Maximum concurrent sends
    pub concurrency: usize,
    /// Budget for a single send
    pub send_timeout: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from_config(&DispatchConfig::default())
    }
}

impl DispatchSettings {
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            send_timeout: config.send_timeout(),
        }
    }
}

/// Marks a campaign as being dispatched for as long as it lives
struct ActiveGuard<'a> {
    active: &'a Mutex<HashSet<CampaignId>>,
    id: CampaignId,
}

impl<'a> ActiveGuard<'a> {
    fn acquire(active: &'a Mutex<HashSet<CampaignId>>, id: CampaignId) -> Option<Self> {
        let mut running = active.lock().unwrap_or_else(PoisonError::into_inner);
        running.insert(id).then(|| Self { active, id })
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// Campaign dispatcher
pub struct Dispatcher {
    repos: Repositories,
    analytics: AnalyticsAggregator,
    states: CampaignStateMachine,
    transport: Arc<dyn Transport>,
    settings: DispatchSettings,
    active: Mutex<HashSet<CampaignId>>,
}

impl Dispatcher {
    pub fn new(
        repos: Repositories,
        transport: Arc<dyn Transport>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            analytics: AnalyticsAggregator::new(&repos),
            states: CampaignStateMachine::new(Arc::clone(&repos.campaigns)),
            repos,
            transport,
            settings,
            active: Mutex::new(HashSet::new()),
        }
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repos
    }

    pub fn analytics(&self) -> &AnalyticsAggregator {
        &self.analytics
    }

    /// Whether a dispatch of `id` is in progress in this process
    pub fn is_running(&self, id: CampaignId) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&id)
    }

    /// Dispatch a campaign. Safe to call repeatedly: finished campaigns
    /// yield an empty report and only PENDING recipients are ever sent to.
    #[instrument(skip_all, fields(campaign_id = %campaign_id))]
    pub async fn dispatch(&self, campaign_id: CampaignId) -> Result<DispatchReport, DispatchError> {
        let _guard = ActiveGuard::acquire(&self.active, campaign_id)
            .ok_or(DispatchError::AlreadyRunning(campaign_id))?;

        let campaign = self
            .repos
            .campaigns
            .get(campaign_id)
            .await?
            .ok_or(DispatchError::NotFound(campaign_id))?;

        if campaign.status.is_terminal() {
            debug!(status = %campaign.status, "Campaign already finished, nothing to dispatch");
            return Ok(DispatchReport::empty(campaign_id, campaign.status));
        }

        let sender = self.resolve_sender(&campaign).await?;

        let counts = self.repos.recipients.count_by_status(campaign_id).await?;
        if counts.total() == 0 {
            return Err(ConfigurationError::NoRecipients(campaign_id).into());
        }

        let session = self
            .transport
            .connect(&sender)
            .await
            .map_err(|source| ConfigurationError::Session {
                sender_id: sender.id,
                source,
            })?;

        let result = self.run(campaign, &sender, &session).await;
        session.close().await;
        result
    }

    async fn resolve_sender(&self, campaign: &Campaign) -> Result<Sender, DispatchError> {
        let sender_id = campaign
            .sender_id
            .ok_or(ConfigurationError::NoSender(campaign.id))?;

        self.repos
            .senders
            .get(sender_id)
            .await?
            .ok_or_else(|| ConfigurationError::SenderNotFound(sender_id).into())
    }

    async fn run(
        &self,
        campaign: Campaign,
        sender: &Sender,
        session: &Arc<dyn TransportSession>,
    ) -> Result<DispatchReport, DispatchError> {
        let started = self
            .states
            .apply_from(campaign.id, CampaignEvent::Start, campaign.status)
            .await;
        let campaign = match started {
            Ok(started) => started,
            Err(TransitionError::Invalid(e)) => {
                info!(status = %e.from, "Campaign changed before sending began");
                return Ok(DispatchReport::empty(campaign.id, e.from));
            }
            Err(e) => return Err(e.into()),
        };

        let mut report = DispatchReport::empty(campaign.id, CampaignStatus::Sending);
        let mut tasks = JoinSet::new();

        let fed = self
            .feed(&campaign, sender, session, &mut tasks, &mut report)
            .await;

        // In-flight sends always run to completion
        while let Some(joined) = tasks.join_next().await {
            report.absorb(joined);
        }

        if let Some(status) = fed? {
            info!(
                %status,
                attempted = report.attempted,
                "Dispatch halted between recipients"
            );
            report.status = status;
            return Ok(report);
        }

        self.finish(report).await
    }

    /// Start sends for every PENDING recipient until the list runs out or
    /// the campaign leaves SENDING. Returns the interrupting status, if any.
    async fn feed(
        &self,
        campaign: &Campaign,
        sender: &Sender,
        session: &Arc<dyn TransportSession>,
        tasks: &mut JoinSet<SendOutcome>,
        report: &mut DispatchReport,
    ) -> Result<Option<CampaignStatus>, DispatchError> {
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let mut after_position = -1;

        loop {
            let page = self
                .repos
                .recipients
                .list_pending(campaign.id, after_position, RECIPIENT_PAGE_SIZE)
                .await?;
            if page.is_empty() {
                return Ok(None);
            }

            for recipient in page {
                after_position = recipient.position;

                let permit = Arc::clone(&semaphore)
                    .acquire_owned()
                    .await
                    .map_err(|e| mailcast_common::Error::Internal(format!("send pool closed: {}", e)))?;

                if let Some(status) = self.interrupted(campaign.id).await? {
                    return Ok(Some(status));
                }

                report.attempted += 1;
                let email = OutgoingEmail::new(sender, campaign, &recipient);
                let session = Arc::clone(session);
                let analytics = self.analytics.clone();
                let timeout = self.settings.send_timeout;

                tasks.spawn(async move {
                    let delivery = deliver(session.as_ref(), &email, timeout).await;
                    let outcome = match &delivery {
                        Ok(()) => RecipientOutcome::Sent { at: Utc::now() },
                        Err(e) => RecipientOutcome::Failed {
                            error: e.to_string(),
                        },
                    };
                    let recorded = analytics.record_outcome(&recipient, &outcome).await;
                    drop(permit);

                    SendOutcome {
                        recipient_id: recipient.id,
                        to: email.to,
                        delivery,
                        recorded,
                    }
                });

                while let Some(joined) = tasks.try_join_next() {
                    report.absorb(joined);
                }
            }
        }
    }

    /// Status that should stop the loop, checked between recipients
    async fn interrupted(&self, id: CampaignId) -> Result<Option<CampaignStatus>, DispatchError> {
        let campaign = self
            .repos
            .campaigns
            .get(id)
            .await?
            .ok_or(DispatchError::NotFound(id))?;

        Ok((campaign.status != CampaignStatus::Sending).then_some(campaign.status))
    }

    async fn finish(&self, mut report: DispatchReport) -> Result<DispatchReport, DispatchError> {
        let counts = self.repos.recipients.count_by_status(report.campaign_id).await?;
        if counts.pending > 0 {
            warn!(
                pending = counts.pending,
                "Recipients left pending, campaign stays sending until resumed"
            );
            return Ok(report);
        }

        match self
            .states
            .apply(report.campaign_id, CampaignEvent::Complete)
            .await
        {
            Ok(campaign) => {
                info!(
                    sent = report.sent,
                    failed = report.failed,
                    "Campaign dispatch completed"
                );
                report.status = campaign.status;
            }
            // Paused or cancelled after the last send started
            Err(TransitionError::Invalid(e)) => report.status = e.from,
            Err(e) => return Err(e.into()),
        }

        Ok(report)
    }
}

async fn deliver(
    session: &dyn TransportSession,
    email: &OutgoingEmail,
    timeout: Duration,
) -> Result<(), DeliveryError> {
    match tokio::time::timeout(timeout, session.send(email)).await {
        Ok(result) => result,
        Err(_) => Err(DeliveryError::Timeout(timeout)),
    }
}
