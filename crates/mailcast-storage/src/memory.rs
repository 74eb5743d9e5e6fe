//! In-memory storage backend
//!
//! Implements every repository trait over a single lock, so each operation
//! (including the recipient-outcome-plus-counter step) is atomic. Used by
//! tests and for running the engine without a database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailcast_common::types::{AccountId, CampaignId, RecipientId, SenderId};
use mailcast_common::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{
    Analytics, Campaign, CampaignStatus, CreateCampaign, CreateSender, Recipient,
    RecipientCounts, RecipientOutcome, RecipientStatus, Sender, UpdateCampaign,
};
use crate::repository::{
    AnalyticsRepository, CampaignRepository, RecipientRepository, SenderRepository,
};

#[derive(Default)]
struct MemoryState {
    campaigns: HashMap<CampaignId, Campaign>,
    senders: HashMap<SenderId, Sender>,
    recipients: Vec<Recipient>,
    analytics: HashMap<CampaignId, Analytics>,
}

impl MemoryState {
    fn recipients_of(&self, campaign_id: CampaignId) -> impl Iterator<Item = &Recipient> {
        self.recipients
            .iter()
            .filter(move |r| r.campaign_id == campaign_id)
    }
}

/// In-memory store shared by clones
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CampaignRepository for MemoryStore {
    async fn create(&self, input: CreateCampaign) -> Result<Campaign> {
        let now = Utc::now();
        let id = Uuid::now_v7();

        let campaign = Campaign {
            id,
            account_id: input.account_id,
            name: input.name,
            subject: input.subject,
            content: input.content,
            sender_id: input.sender_id,
            status: input.status,
            schedule_type: input.schedule_type,
            scheduled_at: input.scheduled_at,
            timezone: input.timezone,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        };

        let mut state = self.state.write().await;

        if let Some(sender_id) = campaign.sender_id {
            if !state.senders.contains_key(&sender_id) {
                return Err(Error::Database(format!(
                    "sender {} does not exist",
                    sender_id
                )));
            }
        }

        for (position, recipient) in input.recipients.into_iter().enumerate() {
            state.recipients.push(Recipient {
                id: Uuid::now_v7(),
                campaign_id: id,
                position: position as i32,
                email: recipient.email,
                first_name: recipient.first_name,
                last_name: recipient.last_name,
                status: RecipientStatus::Pending,
                sent_at: None,
                last_error: None,
                created_at: now,
                updated_at: now,
            });
        }

        state.analytics.insert(
            id,
            Analytics {
                campaign_id: id,
                total_sent: 0,
                total_bounced: 0,
                updated_at: now,
            },
        );
        state.campaigns.insert(id, campaign.clone());

        Ok(campaign)
    }

    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>> {
        Ok(self.state.read().await.campaigns.get(&id).cloned())
    }

    async fn list_by_account(
        &self,
        account_id: AccountId,
        status: Option<CampaignStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Campaign>> {
        let state = self.state.read().await;
        let mut campaigns: Vec<Campaign> = state
            .campaigns
            .values()
            .filter(|c| c.account_id == account_id)
            .filter(|c| status.map_or(true, |s| c.status == s))
            .cloned()
            .collect();
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        Ok(campaigns
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn update(&self, id: CampaignId, input: UpdateCampaign) -> Result<Option<Campaign>> {
        let mut state = self.state.write().await;

        if let Some(sender_id) = input.sender_id {
            if !state.senders.contains_key(&sender_id) {
                return Err(Error::Database(format!(
                    "sender {} does not exist",
                    sender_id
                )));
            }
        }

        let Some(campaign) = state.campaigns.get_mut(&id) else {
            return Ok(None);
        };
        if !campaign.status.is_editable() {
            return Ok(None);
        }

        if let Some(name) = input.name {
            campaign.name = name;
        }
        if let Some(subject) = input.subject {
            campaign.subject = subject;
        }
        if let Some(content) = input.content {
            campaign.content = content;
        }
        if let Some(sender_id) = input.sender_id {
            campaign.sender_id = Some(sender_id);
        }
        if let Some(schedule) = input.schedule {
            campaign.status = schedule.status;
            campaign.schedule_type = schedule.schedule_type;
            campaign.scheduled_at = schedule.scheduled_at;
            campaign.timezone = schedule.timezone;
        }
        campaign.updated_at = Utc::now();

        Ok(Some(campaign.clone()))
    }

    async fn transition(
        &self,
        id: CampaignId,
        from: &[CampaignStatus],
        to: CampaignStatus,
    ) -> Result<Option<Campaign>> {
        let mut state = self.state.write().await;

        let Some(campaign) = state.campaigns.get_mut(&id) else {
            return Ok(None);
        };
        if !from.contains(&campaign.status) {
            return Ok(None);
        }

        let now = Utc::now();
        campaign.status = to;
        if to == CampaignStatus::Sending && campaign.started_at.is_none() {
            campaign.started_at = Some(now);
        }
        if to.is_terminal() {
            campaign.completed_at = Some(now);
        }
        campaign.updated_at = now;

        Ok(Some(campaign.clone()))
    }

    async fn list_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Campaign>> {
        let state = self.state.read().await;
        let mut due: Vec<Campaign> = state
            .campaigns
            .values()
            .filter(|c| c.status == CampaignStatus::Scheduled)
            .filter(|c| c.scheduled_at.map_or(false, |at| at <= now))
            .cloned()
            .collect();
        due.sort_by_key(|c| c.scheduled_at);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn list_by_status(&self, status: CampaignStatus, limit: i64) -> Result<Vec<Campaign>> {
        let state = self.state.read().await;
        let mut campaigns: Vec<Campaign> = state
            .campaigns
            .values()
            .filter(|c| c.status == status)
            .cloned()
            .collect();
        campaigns.sort_by_key(|c| c.updated_at);
        campaigns.truncate(limit.max(0) as usize);
        Ok(campaigns)
    }

    async fn delete(&self, id: CampaignId) -> Result<bool> {
        let mut state = self.state.write().await;

        match state.campaigns.get(&id) {
            Some(c) if c.status != CampaignStatus::Sending => {}
            _ => return Ok(false),
        }

        state.campaigns.remove(&id);
        state.analytics.remove(&id);
        state.recipients.retain(|r| r.campaign_id != id);
        Ok(true)
    }
}

#[async_trait]
impl SenderRepository for MemoryStore {
    async fn create(&self, input: CreateSender) -> Result<Sender> {
        let now = Utc::now();
        let sender = Sender {
            id: Uuid::now_v7(),
            account_id: input.account_id,
            name: input.name,
            email: input.email,
            host: input.host,
            port: i32::from(input.port),
            secure: input.secure,
            username: input.username,
            password: input.password,
            created_at: now,
            updated_at: now,
        };

        self.state
            .write()
            .await
            .senders
            .insert(sender.id, sender.clone());
        Ok(sender)
    }

    async fn get(&self, id: SenderId) -> Result<Option<Sender>> {
        Ok(self.state.read().await.senders.get(&id).cloned())
    }

    async fn list_by_account(&self, account_id: AccountId) -> Result<Vec<Sender>> {
        let state = self.state.read().await;
        let mut senders: Vec<Sender> = state
            .senders
            .values()
            .filter(|s| s.account_id == account_id)
            .cloned()
            .collect();
        senders.sort_by_key(|s| s.created_at);
        Ok(senders)
    }

    async fn delete(&self, id: SenderId) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.senders.remove(&id).is_none() {
            return Ok(false);
        }
        for campaign in state.campaigns.values_mut() {
            if campaign.sender_id == Some(id) {
                campaign.sender_id = None;
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl RecipientRepository for MemoryStore {
    async fn list_by_campaign(&self, campaign_id: CampaignId) -> Result<Vec<Recipient>> {
        let state = self.state.read().await;
        Ok(state.recipients_of(campaign_id).cloned().collect())
    }

    async fn list_pending(
        &self,
        campaign_id: CampaignId,
        after_position: i32,
        limit: i64,
    ) -> Result<Vec<Recipient>> {
        let state = self.state.read().await;
        Ok(state
            .recipients_of(campaign_id)
            .filter(|r| r.status == RecipientStatus::Pending && r.position > after_position)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn count_by_status(&self, campaign_id: CampaignId) -> Result<RecipientCounts> {
        let state = self.state.read().await;
        let mut counts = RecipientCounts::default();
        for recipient in state.recipients_of(campaign_id) {
            match recipient.status {
                RecipientStatus::Pending => counts.pending += 1,
                RecipientStatus::Sent => counts.sent += 1,
                RecipientStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn record_outcome(
        &self,
        recipient_id: RecipientId,
        outcome: &RecipientOutcome,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let now = Utc::now();

        let Some(recipient) = state
            .recipients
            .iter_mut()
            .find(|r| r.id == recipient_id && r.status == RecipientStatus::Pending)
        else {
            return Ok(false);
        };

        recipient.status = outcome.status();
        recipient.updated_at = now;
        match outcome {
            RecipientOutcome::Sent { at } => recipient.sent_at = Some(*at),
            RecipientOutcome::Failed { error } => recipient.last_error = Some(error.clone()),
        }
        let campaign_id = recipient.campaign_id;

        let analytics = state.analytics.get_mut(&campaign_id).ok_or_else(|| {
            Error::Internal(format!("analytics for campaign {} missing", campaign_id))
        })?;
        match outcome {
            RecipientOutcome::Sent { .. } => analytics.total_sent += 1,
            RecipientOutcome::Failed { .. } => analytics.total_bounced += 1,
        }
        analytics.updated_at = now;

        Ok(true)
    }
}

#[async_trait]
impl AnalyticsRepository for MemoryStore {
    async fn get(&self, campaign_id: CampaignId) -> Result<Option<Analytics>> {
        Ok(self.state.read().await.analytics.get(&campaign_id).cloned())
    }

    async fn increment_sent(&self, campaign_id: CampaignId) -> Result<()> {
        let mut state = self.state.write().await;
        let analytics = state
            .analytics
            .get_mut(&campaign_id)
            .ok_or_else(|| Error::NotFound(format!("analytics for campaign {}", campaign_id)))?;
        analytics.total_sent += 1;
        analytics.updated_at = Utc::now();
        Ok(())
    }

    async fn increment_bounced(&self, campaign_id: CampaignId) -> Result<()> {
        let mut state = self.state.write().await;
        let analytics = state
            .analytics
            .get_mut(&campaign_id)
            .ok_or_else(|| Error::NotFound(format!("analytics for campaign {}", campaign_id)))?;
        analytics.total_bounced += 1;
        analytics.updated_at = Utc::now();
        Ok(())
    }
}
