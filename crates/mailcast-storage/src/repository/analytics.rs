//! Analytics repository

use async_trait::async_trait;
use mailcast_common::types::CampaignId;
use mailcast_common::{Error, Result};

use crate::db::{db_err, DatabasePool};
use crate::models::Analytics;

/// Analytics repository trait. Increments are single atomic updates so
/// concurrent callers never lose a count.
#[async_trait]
pub trait AnalyticsRepository: Send + Sync {
    async fn get(&self, campaign_id: CampaignId) -> Result<Option<Analytics>>;
    async fn increment_sent(&self, campaign_id: CampaignId) -> Result<()>;
    async fn increment_bounced(&self, campaign_id: CampaignId) -> Result<()>;
}

/// Database analytics repository
#[derive(Clone)]
pub struct DbAnalyticsRepository {
    pool: DatabasePool,
}

impl DbAnalyticsRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    async fn bump(&self, campaign_id: CampaignId, query: &'static str) -> Result<()> {
        let result = sqlx::query(query)
            .bind(campaign_id)
            .execute(self.pool.pool())
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!(
                "analytics for campaign {}",
                campaign_id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl AnalyticsRepository for DbAnalyticsRepository {
    async fn get(&self, campaign_id: CampaignId) -> Result<Option<Analytics>> {
        sqlx::query_as::<_, Analytics>("SELECT * FROM analytics WHERE campaign_id = $1")
            .bind(campaign_id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)
    }

    async fn increment_sent(&self, campaign_id: CampaignId) -> Result<()> {
        self.bump(
            campaign_id,
            "UPDATE analytics SET total_sent = total_sent + 1, updated_at = NOW() WHERE campaign_id = $1",
        )
        .await
    }

    async fn increment_bounced(&self, campaign_id: CampaignId) -> Result<()> {
        self.bump(
            campaign_id,
            "UPDATE analytics SET total_bounced = total_bounced + 1, updated_at = NOW() WHERE campaign_id = $1",
        )
        .await
    }
}
