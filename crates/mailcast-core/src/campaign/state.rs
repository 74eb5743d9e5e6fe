//! Campaign State Machine - Lifecycle events and guarded transitions

use mailcast_common::types::CampaignId;
use mailcast_storage::models::{Campaign, CampaignStatus};
use mailcast_storage::repository::CampaignRepository;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use CampaignStatus::*;

/// Lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignEvent {
    Schedule,
    Unschedule,
    Start,
    Complete,
    Pause,
    Resume,
    Cancel,
}

impl CampaignEvent {
    /// Statuses the event may fire from
    pub fn allowed_from(&self) -> &'static [CampaignStatus] {
        match self {
            CampaignEvent::Schedule => &[Draft, Scheduled],
            CampaignEvent::Unschedule => &[Scheduled],
            CampaignEvent::Start => &[Draft, Scheduled, Paused, Sending],
            CampaignEvent::Complete => &[Sending],
            CampaignEvent::Pause => &[Scheduled, Sending],
            CampaignEvent::Resume => &[Paused],
            CampaignEvent::Cancel => &[Draft, Scheduled, Sending, Paused],
        }
    }

    pub fn target(&self) -> CampaignStatus {
        match self {
            CampaignEvent::Schedule | CampaignEvent::Resume => Scheduled,
            CampaignEvent::Unschedule => Draft,
            CampaignEvent::Start => Sending,
            CampaignEvent::Complete => Sent,
            CampaignEvent::Pause => Paused,
            CampaignEvent::Cancel => Cancelled,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignEvent::Schedule => "schedule",
            CampaignEvent::Unschedule => "unschedule",
            CampaignEvent::Start => "start",
            CampaignEvent::Complete => "complete",
            CampaignEvent::Pause => "pause",
            CampaignEvent::Resume => "resume",
            CampaignEvent::Cancel => "cancel",
        }
    }
}

impl std::fmt::Display for CampaignEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event fired from a status that does not admit it
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("cannot {event} a campaign that is {from}")]
pub struct InvalidTransition {
    pub from: CampaignStatus,
    pub event: CampaignEvent,
}

/// Pure transition function
pub fn next_status(
    from: CampaignStatus,
    event: CampaignEvent,
) -> Result<CampaignStatus, InvalidTransition> {
    if event.allowed_from().contains(&from) {
        Ok(event.target())
    } else {
        Err(InvalidTransition { from, event })
    }
}

/// Errors while applying an event to a stored campaign
#[derive(Error, Debug)]
pub enum TransitionError {
    #[error("campaign {0} not found")]
    NotFound(CampaignId),

    #[error(transparent)]
    Invalid(#[from] InvalidTransition),

    #[error(transparent)]
    Storage(#[from] mailcast_common::Error),
}

/// Applies events to stored campaigns with compare-and-set semantics
#[derive(Clone)]
pub struct CampaignStateMachine {
    campaigns: Arc<dyn CampaignRepository>,
}

impl CampaignStateMachine {
    pub fn new(campaigns: Arc<dyn CampaignRepository>) -> Self {
        Self { campaigns }
    }

    /// Fire `event` on a campaign. The write only lands if the stored status
    /// is still the one just read; a lost race reports the status that won.
    pub async fn apply(
        &self,
        id: CampaignId,
        event: CampaignEvent,
    ) -> Result<Campaign, TransitionError> {
        let current = self
            .campaigns
            .get(id)
            .await?
            .ok_or(TransitionError::NotFound(id))?;
        self.apply_from(id, event, current.status).await
    }

    /// Fire `event` only if the campaign is still in `observed`, the status
    /// the caller last saw.
    pub async fn apply_from(
        &self,
        id: CampaignId,
        event: CampaignEvent,
        observed: CampaignStatus,
    ) -> Result<Campaign, TransitionError> {
        let target = next_status(observed, event)?;

        match self.campaigns.transition(id, &[observed], target).await? {
            Some(updated) => {
                info!(
                    campaign_id = %id,
                    from = %observed,
                    to = %updated.status,
                    "Campaign {}", event
                );
                Ok(updated)
            }
            None => {
                let latest = self
                    .campaigns
                    .get(id)
                    .await?
                    .ok_or(TransitionError::NotFound(id))?;
                debug!(
                    campaign_id = %id,
                    expected = %observed,
                    status = %latest.status,
                    event = %event,
                    "Transition lost a race"
                );
                Err(InvalidTransition {
                    from: latest.status,
                    event,
                }
                .into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailcast_common::types::AccountId;
    use mailcast_storage::models::{CreateCampaign, CreateRecipient, ScheduleType};
    use mailcast_storage::MemoryStore;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    const EVENTS: [CampaignEvent; 7] = [
        CampaignEvent::Schedule,
        CampaignEvent::Unschedule,
        CampaignEvent::Start,
        CampaignEvent::Complete,
        CampaignEvent::Pause,
        CampaignEvent::Resume,
        CampaignEvent::Cancel,
    ];

    #[test]
    fn test_terminal_statuses_have_no_exits() {
        for from in [Sent, Cancelled] {
            for event in EVENTS {
                assert_eq!(
                    next_status(from, event),
                    Err(InvalidTransition { from, event })
                );
            }
        }
    }

    #[test]
    fn test_lifecycle_edges() {
        assert_eq!(next_status(Draft, CampaignEvent::Schedule), Ok(Scheduled));
        assert_eq!(next_status(Scheduled, CampaignEvent::Start), Ok(Sending));
        assert_eq!(next_status(Sending, CampaignEvent::Start), Ok(Sending));
        assert_eq!(next_status(Sending, CampaignEvent::Pause), Ok(Paused));
        assert_eq!(next_status(Paused, CampaignEvent::Start), Ok(Sending));
        assert_eq!(next_status(Paused, CampaignEvent::Resume), Ok(Scheduled));
        assert_eq!(next_status(Sending, CampaignEvent::Complete), Ok(Sent));
        assert_eq!(next_status(Scheduled, CampaignEvent::Unschedule), Ok(Draft));

        assert!(next_status(Draft, CampaignEvent::Complete).is_err());
        assert!(next_status(Paused, CampaignEvent::Complete).is_err());
        assert!(next_status(Draft, CampaignEvent::Pause).is_err());
    }

    #[test]
    fn test_every_non_terminal_status_can_cancel() {
        for from in CampaignStatus::ALL {
            assert_eq!(
                next_status(from, CampaignEvent::Cancel).is_ok(),
                !from.is_terminal()
            );
        }
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = InvalidTransition {
            from: Sent,
            event: CampaignEvent::Pause,
        };
        assert_eq!(err.to_string(), "cannot pause a campaign that is sent");
    }

    async fn stored_campaign(store: &MemoryStore) -> Campaign {
        CampaignRepository::create(
            store,
            CreateCampaign {
                account_id: AccountId::new_v4(),
                name: "Launch".to_string(),
                subject: "Hello".to_string(),
                content: "<p>Hi</p>".to_string(),
                sender_id: None,
                status: Scheduled,
                schedule_type: ScheduleType::Later,
                scheduled_at: None,
                timezone: None,
                recipients: vec![CreateRecipient::new("a@example.com")],
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_apply_rejects_and_leaves_status() {
        let store = MemoryStore::new();
        let campaign = stored_campaign(&store).await;
        let machine = CampaignStateMachine::new(Arc::new(store.clone()));

        let cancelled = machine
            .apply(campaign.id, CampaignEvent::Cancel)
            .await
            .unwrap();
        assert_eq!(cancelled.status, Cancelled);
        assert!(cancelled.completed_at.is_some());

        let err = machine
            .apply(campaign.id, CampaignEvent::Start)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransitionError::Invalid(InvalidTransition {
                from: Cancelled,
                event: CampaignEvent::Start
            })
        ));

        let stored = CampaignRepository::get(&store, campaign.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, Cancelled);
    }

    #[tokio::test]
    async fn test_apply_from_stale_status_loses_to_the_pause() {
        let store = MemoryStore::new();
        let campaign = stored_campaign(&store).await;
        let machine = CampaignStateMachine::new(Arc::new(store.clone()));

        machine
            .apply(campaign.id, CampaignEvent::Pause)
            .await
            .unwrap();

        // Start is allowed from PAUSED, but the caller last saw SCHEDULED
        let err = machine
            .apply_from(campaign.id, CampaignEvent::Start, Scheduled)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransitionError::Invalid(InvalidTransition {
                from: Paused,
                event: CampaignEvent::Start
            })
        ));

        let stored = CampaignRepository::get(&store, campaign.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, Paused);
    }

    #[tokio::test]
    async fn test_apply_unknown_campaign() {
        let machine = CampaignStateMachine::new(Arc::new(MemoryStore::new()));
        let id = Uuid::new_v4();
        assert!(matches!(
            machine.apply(id, CampaignEvent::Pause).await,
            Err(TransitionError::NotFound(missing)) if missing == id
        ));
    }
}
