//! Database models

use chrono::{DateTime, Utc};
use mailcast_common::types::{AccountId, CampaignId, RecipientId, SenderId};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;

/// Raised when a stored status string is not a known variant
#[derive(Debug, Clone, Error)]
#[error("Invalid {kind} status: {value}")]
pub struct ParseStatusError {
    kind: &'static str,
    value: String,
}

// ============================================================================
// Senders
// ============================================================================

/// Sender model: outbound identity plus SMTP credentials
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Sender {
    pub id: SenderId,
    pub account_id: AccountId,
    pub name: String,
    pub email: String,
    pub host: String,
    pub port: i32,
    pub secure: bool,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Sender {
    /// `From` header value, e.g. `Acme News <news@acme.test>`
    pub fn mailbox(&self) -> String {
        mailcast_common::types::format_mailbox(&self.name, &self.email)
    }
}

/// Create sender input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSender {
    pub account_id: AccountId,
    pub name: String,
    pub email: String,
    pub host: String,
    pub port: u16,
    pub secure: bool,
    pub username: Option<String>,
    pub password: Option<String>,
}

// ============================================================================
// Campaigns
// ============================================================================

/// Campaign status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Sending,
    Sent,
    Paused,
    Cancelled,
}

impl CampaignStatus {
    pub const ALL: [CampaignStatus; 6] = [
        CampaignStatus::Draft,
        CampaignStatus::Scheduled,
        CampaignStatus::Sending,
        CampaignStatus::Sent,
        CampaignStatus::Paused,
        CampaignStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Scheduled => "scheduled",
            CampaignStatus::Sending => "sending",
            CampaignStatus::Sent => "sent",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Cancelled => "cancelled",
        }
    }

    /// SENT and CANCELLED admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, CampaignStatus::Sent | CampaignStatus::Cancelled)
    }

    /// Content and schedule may only change before sending begins
    pub fn is_editable(&self) -> bool {
        matches!(self, CampaignStatus::Draft | CampaignStatus::Scheduled)
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(CampaignStatus::Draft),
            "scheduled" => Ok(CampaignStatus::Scheduled),
            "sending" => Ok(CampaignStatus::Sending),
            "sent" => Ok(CampaignStatus::Sent),
            "paused" => Ok(CampaignStatus::Paused),
            "cancelled" => Ok(CampaignStatus::Cancelled),
            _ => Err(ParseStatusError {
                kind: "campaign",
                value: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for CampaignStatus {
    type Error = ParseStatusError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// How the requester asked for the campaign to go out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    Now,
    Later,
    Draft,
}

impl ScheduleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleType::Now => "now",
            ScheduleType::Later => "later",
            ScheduleType::Draft => "draft",
        }
    }
}

impl std::fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ScheduleType {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "now" => Ok(ScheduleType::Now),
            "later" => Ok(ScheduleType::Later),
            "draft" => Ok(ScheduleType::Draft),
            _ => Err(ParseStatusError {
                kind: "schedule type",
                value: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for ScheduleType {
    type Error = ParseStatusError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Campaign model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub account_id: AccountId,
    pub name: String,
    pub subject: String,
    pub content: String,
    pub sender_id: Option<SenderId>,
    #[sqlx(try_from = "String")]
    pub status: CampaignStatus,
    #[sqlx(try_from = "String")]
    pub schedule_type: ScheduleType,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub timezone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Create campaign input; recipients and the analytics record are created
/// in the same transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCampaign {
    pub account_id: AccountId,
    pub name: String,
    pub subject: String,
    pub content: String,
    pub sender_id: Option<SenderId>,
    pub status: CampaignStatus,
    pub schedule_type: ScheduleType,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub timezone: Option<String>,
    pub recipients: Vec<CreateRecipient>,
}

/// Replacement schedule for an editable campaign
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleUpdate {
    pub status: CampaignStatus,
    pub schedule_type: ScheduleType,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub timezone: Option<String>,
}

/// Update campaign input
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateCampaign {
    pub name: Option<String>,
    pub subject: Option<String>,
    pub content: Option<String>,
    pub sender_id: Option<SenderId>,
    pub schedule: Option<ScheduleUpdate>,
}

// ============================================================================
// Recipients
// ============================================================================

/// Recipient delivery status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientStatus {
    Pending,
    Sent,
    Failed,
}

impl RecipientStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientStatus::Pending => "pending",
            RecipientStatus::Sent => "sent",
            RecipientStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RecipientStatus::Pending)
    }
}

impl std::fmt::Display for RecipientStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecipientStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RecipientStatus::Pending),
            "sent" => Ok(RecipientStatus::Sent),
            "failed" => Ok(RecipientStatus::Failed),
            _ => Err(ParseStatusError {
                kind: "recipient",
                value: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for RecipientStatus {
    type Error = ParseStatusError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Recipient model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Recipient {
    pub id: RecipientId,
    pub campaign_id: CampaignId,
    pub position: i32,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: RecipientStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create recipient input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRecipient {
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl CreateRecipient {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            first_name: None,
            last_name: None,
        }
    }
}

/// Terminal outcome of one delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientOutcome {
    Sent { at: DateTime<Utc> },
    Failed { error: String },
}

impl RecipientOutcome {
    pub fn status(&self) -> RecipientStatus {
        match self {
            RecipientOutcome::Sent { .. } => RecipientStatus::Sent,
            RecipientOutcome::Failed { .. } => RecipientStatus::Failed,
        }
    }
}

/// Recipient counts per status for one campaign
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientCounts {
    pub pending: i64,
    pub sent: i64,
    pub failed: i64,
}

impl RecipientCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.sent + self.failed
    }

    pub fn processed(&self) -> i64 {
        self.sent + self.failed
    }
}

// ============================================================================
// Analytics
// ============================================================================

/// Per-campaign delivery counters
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Analytics {
    pub campaign_id: CampaignId,
    pub total_sent: i64,
    pub total_bounced: i64,
    pub updated_at: DateTime<Utc>,
}

impl Analytics {
    pub fn total(&self) -> i64 {
        self.total_sent + self.total_bounced
    }
}

/// Campaign statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignStats {
    pub campaign_id: CampaignId,
    pub status: CampaignStatus,
    pub total_recipients: i64,
    pub pending: i64,
    pub total_sent: i64,
    pub total_bounced: i64,
    pub progress_percentage: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl CampaignStats {
    pub fn new(campaign: &Campaign, counts: RecipientCounts, analytics: &Analytics) -> Self {
        let total = counts.total();
        let progress_percentage = if total == 0 {
            0.0
        } else {
            (counts.processed() as f64 / total as f64) * 100.0
        };

        Self {
            campaign_id: campaign.id,
            status: campaign.status,
            total_recipients: total,
            pending: counts.pending,
            total_sent: analytics.total_sent,
            total_bounced: analytics.total_bounced,
            progress_percentage,
            started_at: campaign.started_at,
            completed_at: campaign.completed_at,
        }
    }
}
