//! Scripted transport and fixtures for dispatch tests

use async_trait::async_trait;
use mailcast_common::types::{CampaignId, RecipientId};
use mailcast_common::Error;
use mailcast_storage::models::{
    Campaign, CampaignStatus, CreateCampaign, CreateRecipient, CreateSender, Recipient,
    RecipientCounts, RecipientOutcome, ScheduleType, Sender,
};
use mailcast_storage::repository::{
    CampaignRepository, RecipientRepository, Repositories, SenderRepository,
};
use mailcast_storage::MemoryStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use super::transport::{DeliveryError, OutgoingEmail, SessionError, Transport, TransportSession};

#[derive(Default)]
struct Script {
    fail_if: Option<fn(&str) -> bool>,
    hang_if: Option<fn(&str) -> bool>,
    delay: Option<Duration>,
    reject_connect: Option<SessionError>,
    pause_after: Option<(Arc<dyn CampaignRepository>, CampaignId, usize)>,
    pause_on_connect: Option<(Arc<dyn CampaignRepository>, CampaignId)>,
}

/// Transport whose behaviour is fixed up front and which records every send
#[derive(Clone, Default)]
pub(crate) struct ScriptedTransport {
    script: Arc<Script>,
    log: Arc<SendLog>,
}

#[derive(Default)]
pub(crate) struct SendLog {
    sent: Mutex<Vec<OutgoingEmail>>,
    attempts: AtomicUsize,
    connects: AtomicUsize,
    closes: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn edit(mut self, f: impl FnOnce(&mut Script)) -> Self {
        let script = Arc::get_mut(&mut self.script).expect("script edited after sharing");
        f(script);
        self
    }

    /// Fail every send whose recipient matches
    pub(crate) fn failing_if(self, predicate: fn(&str) -> bool) -> Self {
        self.edit(|s| s.fail_if = Some(predicate))
    }

    /// Never complete sends whose recipient matches
    pub(crate) fn hanging_if(self, predicate: fn(&str) -> bool) -> Self {
        self.edit(|s| s.hang_if = Some(predicate))
    }

    pub(crate) fn with_delay(self, delay: Duration) -> Self {
        self.edit(|s| s.delay = Some(delay))
    }

    pub(crate) fn rejecting_connect(self, error: SessionError) -> Self {
        self.edit(|s| s.reject_connect = Some(error))
    }

    /// Pause the campaign from inside the transport once `count` sends ran
    pub(crate) fn pausing_after(
        self,
        campaigns: Arc<dyn CampaignRepository>,
        campaign_id: CampaignId,
        count: usize,
    ) -> Self {
        self.edit(|s| s.pause_after = Some((campaigns, campaign_id, count)))
    }

    /// Pause a SCHEDULED campaign while its session is being opened
    pub(crate) fn pausing_on_connect(
        self,
        campaigns: Arc<dyn CampaignRepository>,
        campaign_id: CampaignId,
    ) -> Self {
        self.edit(|s| s.pause_on_connect = Some((campaigns, campaign_id)))
    }

    /// Recipients of accepted sends, in completion order
    pub(crate) fn delivered_to(&self) -> Vec<String> {
        self.sent().into_iter().map(|e| e.to).collect()
    }

    pub(crate) fn sent(&self) -> Vec<OutgoingEmail> {
        self.log.sent.lock().unwrap().clone()
    }

    pub(crate) fn attempts(&self) -> usize {
        self.log.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn connects(&self) -> usize {
        self.log.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn closes(&self) -> usize {
        self.log.closes.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.log.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&self, _sender: &Sender) -> Result<Arc<dyn TransportSession>, SessionError> {
        self.log.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.script.reject_connect {
            return Err(error.clone());
        }
        if let Some((campaigns, campaign_id)) = &self.script.pause_on_connect {
            campaigns
                .transition(*campaign_id, &[CampaignStatus::Scheduled], CampaignStatus::Paused)
                .await
                .unwrap()
                .unwrap();
        }
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl TransportSession for ScriptedTransport {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), DeliveryError> {
        let attempt = self.log.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let in_flight = self.log.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        if self.script.hang_if.is_some_and(|hang| hang(&email.to)) {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = self.script.delay {
            tokio::time::sleep(delay).await;
        }

        let result = if self.script.fail_if.is_some_and(|fail| fail(&email.to)) {
            Err(DeliveryError::Rejected(format!("550 no such user {}", email.to)))
        } else {
            self.log.sent.lock().unwrap().push(email.clone());
            Ok(())
        };

        if let Some((campaigns, campaign_id, count)) = &self.script.pause_after {
            if attempt == *count {
                campaigns
                    .transition(*campaign_id, &[CampaignStatus::Sending], CampaignStatus::Paused)
                    .await
                    .unwrap();
            }
        }

        self.log.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn close(&self) {
        self.log.closes.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) async fn create_sender(store: &MemoryStore) -> Sender {
    SenderRepository::create(
        store,
        CreateSender {
            account_id: Uuid::new_v4(),
            name: "Acme News".to_string(),
            email: "news@acme.test".to_string(),
            host: "smtp.acme.test".to_string(),
            port: 587,
            secure: true,
            username: Some("news".to_string()),
            password: Some("secret".to_string()),
        },
    )
    .await
    .unwrap()
}

pub(crate) fn addresses(count: usize) -> Vec<CreateRecipient> {
    (0..count)
        .map(|i| CreateRecipient::new(format!("user{:03}@example.com", i)))
        .collect()
}

/// A SCHEDULED campaign due now, optionally with a sender
pub(crate) async fn create_campaign(
    store: &MemoryStore,
    sender: Option<&Sender>,
    recipients: Vec<CreateRecipient>,
) -> Campaign {
    CampaignRepository::create(
        store,
        CreateCampaign {
            account_id: sender.map_or_else(Uuid::new_v4, |s| s.account_id),
            name: "Spring launch".to_string(),
            subject: "Something new".to_string(),
            content: "<h1>It's here</h1>".to_string(),
            sender_id: sender.map(|s| s.id),
            status: CampaignStatus::Scheduled,
            schedule_type: ScheduleType::Later,
            scheduled_at: Some(chrono::Utc::now()),
            timezone: None,
            recipients,
        },
    )
    .await
    .unwrap()
}

pub(crate) fn repositories(store: &MemoryStore) -> Repositories {
    Repositories::memory(store)
}

/// Recipient storage that cannot record the outcome of one recipient
struct OutcomeOutage {
    store: MemoryStore,
    failing: RecipientId,
}

#[async_trait]
impl RecipientRepository for OutcomeOutage {
    async fn list_by_campaign(
        &self,
        campaign_id: CampaignId,
    ) -> mailcast_common::Result<Vec<Recipient>> {
        RecipientRepository::list_by_campaign(&self.store, campaign_id).await
    }

    async fn list_pending(
        &self,
        campaign_id: CampaignId,
        after_position: i32,
        limit: i64,
    ) -> mailcast_common::Result<Vec<Recipient>> {
        RecipientRepository::list_pending(&self.store, campaign_id, after_position, limit).await
    }

    async fn count_by_status(
        &self,
        campaign_id: CampaignId,
    ) -> mailcast_common::Result<RecipientCounts> {
        RecipientRepository::count_by_status(&self.store, campaign_id).await
    }

    async fn record_outcome(
        &self,
        recipient_id: RecipientId,
        outcome: &RecipientOutcome,
    ) -> mailcast_common::Result<bool> {
        if recipient_id == self.failing {
            return Err(Error::Database("connection reset by peer".to_string()));
        }
        RecipientRepository::record_outcome(&self.store, recipient_id, outcome).await
    }
}

/// Repositories over `store` whose outcome writes fail for `failing`
pub(crate) fn repositories_failing_outcome(
    store: &MemoryStore,
    failing: RecipientId,
) -> Repositories {
    Repositories {
        recipients: Arc::new(OutcomeOutage {
            store: store.clone(),
            failing,
        }),
        ..Repositories::memory(store)
    }
}
