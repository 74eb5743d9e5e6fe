//! Analytics Aggregator - Per-campaign delivery counters

use mailcast_common::types::CampaignId;
use mailcast_common::{Error, Result};
use mailcast_storage::models::{Analytics, Recipient, RecipientOutcome};
use mailcast_storage::repository::{AnalyticsRepository, RecipientRepository, Repositories};
use std::sync::Arc;
use tracing::debug;

/// Keeps `total_sent` / `total_bounced` in step with recipient outcomes
#[derive(Clone)]
pub struct AnalyticsAggregator {
    analytics: Arc<dyn AnalyticsRepository>,
    recipients: Arc<dyn RecipientRepository>,
}

impl AnalyticsAggregator {
    pub fn new(repos: &Repositories) -> Self {
        Self {
            analytics: Arc::clone(&repos.analytics),
            recipients: Arc::clone(&repos.recipients),
        }
    }

    pub async fn increment_sent(&self, campaign_id: CampaignId) -> Result<()> {
        self.analytics.increment_sent(campaign_id).await
    }

    pub async fn increment_bounced(&self, campaign_id: CampaignId) -> Result<()> {
        self.analytics.increment_bounced(campaign_id).await
    }

    /// Record a recipient's outcome together with its counter. Returns
    /// `false` when the recipient had already left PENDING, in which case
    /// nothing is counted.
    pub async fn record_outcome(
        &self,
        recipient: &Recipient,
        outcome: &RecipientOutcome,
    ) -> Result<bool> {
        let recorded = self.recipients.record_outcome(recipient.id, outcome).await?;
        if !recorded {
            debug!(
                campaign_id = %recipient.campaign_id,
                recipient_id = %recipient.id,
                "Recipient already processed, outcome not counted"
            );
        }
        Ok(recorded)
    }

    pub async fn snapshot(&self, campaign_id: CampaignId) -> Result<Analytics> {
        self.analytics
            .get(campaign_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("analytics for campaign {}", campaign_id)))
    }
}
