//! Campaign Manager - Handles campaign lifecycle and dispatch triggers

use chrono::Utc;
use mailcast_common::types::{AccountId, CampaignId, EmailAddress, SenderId};
use mailcast_storage::models::{
    Campaign, CampaignStats, CampaignStatus, CreateCampaign, CreateRecipient, ScheduleUpdate,
    UpdateCampaign,
};
use mailcast_storage::repository::Repositories;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::schedule::{ScheduleRequest, ScheduleValidator, SchedulingError};
use super::state::{
    next_status, CampaignEvent, CampaignStateMachine, InvalidTransition, TransitionError,
};
use crate::dispatch::{DispatchError, DispatchReport, Dispatcher};

/// Campaign manager errors
#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("campaign {0} not found")]
    NotFound(CampaignId),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error(transparent)]
    Scheduling(#[from] SchedulingError),

    #[error("campaign has no recipients")]
    NoRecipients,

    #[error("invalid recipient address '{0}'")]
    InvalidRecipient(String),

    #[error("sender {0} does not exist")]
    SenderNotFound(SenderId),

    #[error("campaign {id} cannot be modified while {status}")]
    Locked {
        id: CampaignId,
        status: CampaignStatus,
    },

    #[error("storage error: {0}")]
    Storage(#[from] mailcast_common::Error),
}

impl From<TransitionError> for CampaignError {
    fn from(e: TransitionError) -> Self {
        match e {
            TransitionError::NotFound(id) => CampaignError::NotFound(id),
            TransitionError::Invalid(e) => CampaignError::InvalidTransition(e),
            TransitionError::Storage(e) => CampaignError::Storage(e),
        }
    }
}

/// A campaign to create
#[derive(Debug, Clone)]
pub struct NewCampaign {
    pub account_id: AccountId,
    pub name: String,
    pub subject: String,
    pub content: String,
    pub sender_id: Option<SenderId>,
    pub recipients: Vec<CreateRecipient>,
    pub schedule: ScheduleRequest,
}

/// Changes to an editable campaign
#[derive(Debug, Clone, Default)]
pub struct CampaignEdit {
    pub name: Option<String>,
    pub subject: Option<String>,
    pub content: Option<String>,
    pub sender_id: Option<SenderId>,
    pub schedule: Option<ScheduleRequest>,
}

/// A stored campaign plus the dispatch it triggered, if any
#[derive(Debug)]
pub struct SubmittedCampaign {
    pub campaign: Campaign,
    pub dispatch: Option<JoinHandle<Result<DispatchReport, DispatchError>>>,
}

/// Campaign Manager - Manages campaign lifecycle
pub struct CampaignManager {
    repos: Repositories,
    validator: ScheduleValidator,
    states: CampaignStateMachine,
    dispatcher: Arc<Dispatcher>,
}

impl CampaignManager {
    /// Create a new campaign manager over the dispatcher's repositories
    pub fn new(dispatcher: Arc<Dispatcher>, validator: ScheduleValidator) -> Self {
        let repos = dispatcher.repositories().clone();
        Self {
            states: CampaignStateMachine::new(Arc::clone(&repos.campaigns)),
            repos,
            validator,
            dispatcher,
        }
    }

    /// Validate and store a campaign with its recipients. Immediate
    /// campaigns are dispatched in the background right away.
    pub async fn create(&self, input: NewCampaign) -> Result<SubmittedCampaign, CampaignError> {
        let recipients = normalize_recipients(input.recipients)?;
        if let Some(sender_id) = input.sender_id {
            self.ensure_sender(sender_id).await?;
        }

        let now = Utc::now();
        let decision = self.validator.validate_request(&input.schedule, now)?;
        let (status, scheduled_at) = decision.placement(now);
        let recipient_count = recipients.len();

        let campaign = self
            .repos
            .campaigns
            .create(CreateCampaign {
                account_id: input.account_id,
                name: input.name,
                subject: input.subject,
                content: input.content,
                sender_id: input.sender_id,
                status,
                schedule_type: input.schedule.schedule_type,
                scheduled_at,
                timezone: input.schedule.timezone,
                recipients,
            })
            .await?;

        info!(
            campaign_id = %campaign.id,
            status = %campaign.status,
            recipients = recipient_count,
            "Campaign created"
        );

        let dispatch = decision
            .is_immediate()
            .then(|| self.spawn_dispatch(campaign.id));

        Ok(SubmittedCampaign { campaign, dispatch })
    }

    /// Edit a DRAFT or SCHEDULED campaign. A new schedule is validated like
    /// on creation; `draft` unschedules.
    pub async fn update(
        &self,
        id: CampaignId,
        edit: CampaignEdit,
    ) -> Result<SubmittedCampaign, CampaignError> {
        let current = self.get(id).await?;
        if !current.status.is_editable() {
            return Err(CampaignError::Locked {
                id,
                status: current.status,
            });
        }
        if let Some(sender_id) = edit.sender_id {
            self.ensure_sender(sender_id).await?;
        }

        let now = Utc::now();
        let mut immediate = false;
        let schedule = match edit.schedule {
            Some(request) => {
                let decision = self.validator.validate_request(&request, now)?;
                let (status, scheduled_at) = decision.placement(now);
                if status != current.status {
                    let event = if status == CampaignStatus::Draft {
                        CampaignEvent::Unschedule
                    } else {
                        CampaignEvent::Schedule
                    };
                    next_status(current.status, event)?;
                }
                immediate = decision.is_immediate();

                Some(ScheduleUpdate {
                    status,
                    schedule_type: request.schedule_type,
                    scheduled_at,
                    timezone: request.timezone,
                })
            }
            None => None,
        };

        let updated = self
            .repos
            .campaigns
            .update(
                id,
                UpdateCampaign {
                    name: edit.name,
                    subject: edit.subject,
                    content: edit.content,
                    sender_id: edit.sender_id,
                    schedule,
                },
            )
            .await?;

        let Some(campaign) = updated else {
            // Started or removed since it was read
            let latest = self.get(id).await?;
            return Err(CampaignError::Locked {
                id,
                status: latest.status,
            });
        };

        info!(campaign_id = %id, status = %campaign.status, "Campaign updated");

        let dispatch = immediate.then(|| self.spawn_dispatch(id));
        Ok(SubmittedCampaign { campaign, dispatch })
    }

    /// Dispatch a DRAFT, SCHEDULED, PAUSED or interrupted campaign now
    pub async fn start(&self, id: CampaignId) -> Result<SubmittedCampaign, CampaignError> {
        let campaign = self.get(id).await?;
        next_status(campaign.status, CampaignEvent::Start)?;

        let dispatch = Some(self.spawn_dispatch(id));
        Ok(SubmittedCampaign { campaign, dispatch })
    }

    /// Pause a scheduled or sending campaign. A running dispatch stops
    /// before its next recipient.
    pub async fn pause(&self, id: CampaignId) -> Result<Campaign, CampaignError> {
        Ok(self.states.apply(id, CampaignEvent::Pause).await?)
    }

    /// Resume a paused campaign. One that never started and whose send time
    /// is still ahead goes back to SCHEDULED; otherwise sending continues
    /// with the recipients still pending.
    pub async fn resume(&self, id: CampaignId) -> Result<SubmittedCampaign, CampaignError> {
        let campaign = self.get(id).await?;
        next_status(campaign.status, CampaignEvent::Resume)?;

        let waiting = campaign.started_at.is_none()
            && campaign.scheduled_at.is_some_and(|at| at > Utc::now());

        if waiting {
            let campaign = self.states.apply(id, CampaignEvent::Resume).await?;
            return Ok(SubmittedCampaign {
                campaign,
                dispatch: None,
            });
        }

        let dispatch = Some(self.spawn_dispatch(id));
        Ok(SubmittedCampaign { campaign, dispatch })
    }

    /// Cancel a campaign for good
    pub async fn cancel(&self, id: CampaignId) -> Result<Campaign, CampaignError> {
        Ok(self.states.apply(id, CampaignEvent::Cancel).await?)
    }

    /// Delete a campaign with its recipients and analytics. Refused while
    /// it is sending.
    pub async fn delete(&self, id: CampaignId) -> Result<(), CampaignError> {
        let campaign = self.get(id).await?;
        if campaign.status == CampaignStatus::Sending || !self.repos.campaigns.delete(id).await? {
            let latest = self.get(id).await?;
            return Err(CampaignError::Locked {
                id,
                status: latest.status,
            });
        }

        info!(campaign_id = %id, "Campaign deleted");
        Ok(())
    }

    pub async fn get(&self, id: CampaignId) -> Result<Campaign, CampaignError> {
        self.repos
            .campaigns
            .get(id)
            .await?
            .ok_or(CampaignError::NotFound(id))
    }

    pub async fn list(
        &self,
        account_id: AccountId,
        status: Option<CampaignStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Campaign>, CampaignError> {
        Ok(self
            .repos
            .campaigns
            .list_by_account(account_id, status, limit, offset)
            .await?)
    }

    /// Delivery counters, recipient breakdown and progress
    pub async fn stats(&self, id: CampaignId) -> Result<CampaignStats, CampaignError> {
        let campaign = self.get(id).await?;
        let counts = self.repos.recipients.count_by_status(id).await?;
        let analytics = self.dispatcher.analytics().snapshot(id).await?;

        Ok(CampaignStats::new(&campaign, counts, &analytics))
    }

    async fn ensure_sender(&self, sender_id: SenderId) -> Result<(), CampaignError> {
        match self.repos.senders.get(sender_id).await? {
            Some(_) => Ok(()),
            None => Err(CampaignError::SenderNotFound(sender_id)),
        }
    }

    fn spawn_dispatch(&self, id: CampaignId) -> JoinHandle<Result<DispatchReport, DispatchError>> {
        let dispatcher = Arc::clone(&self.dispatcher);
        tokio::spawn(async move {
            let result = dispatcher.dispatch(id).await;
            if let Err(e) = &result {
                warn!(campaign_id = %id, "Dispatch failed: {}", e);
            }
            result
        })
    }
}

/// Trim addresses, reject malformed ones and drop case-insensitive
/// duplicates, keeping first occurrences in order
fn normalize_recipients(
    recipients: Vec<CreateRecipient>,
) -> Result<Vec<CreateRecipient>, CampaignError> {
    let mut seen = HashSet::new();
    let mut normalized = Vec::with_capacity(recipients.len());

    for mut recipient in recipients {
        let email = recipient.email.trim().to_string();
        if EmailAddress::parse(&email).is_none() {
            return Err(CampaignError::InvalidRecipient(recipient.email));
        }
        if seen.insert(email.to_ascii_lowercase()) {
            recipient.email = email;
            normalized.push(recipient);
        }
    }

    if normalized.is_empty() {
        return Err(CampaignError::NoRecipients);
    }
    Ok(normalized)
}
