//! Recipient repository

use async_trait::async_trait;
use mailcast_common::types::{CampaignId, RecipientId};
use mailcast_common::Result;

use crate::db::{db_err, DatabasePool};
use crate::models::{Recipient, RecipientCounts, RecipientOutcome};

/// Recipient repository trait
#[async_trait]
pub trait RecipientRepository: Send + Sync {
    /// All recipients of a campaign in insertion order
    async fn list_by_campaign(&self, campaign_id: CampaignId) -> Result<Vec<Recipient>>;
    /// PENDING recipients positioned after `after_position`, in insertion order
    async fn list_pending(
        &self,
        campaign_id: CampaignId,
        after_position: i32,
        limit: i64,
    ) -> Result<Vec<Recipient>>;
    async fn count_by_status(&self, campaign_id: CampaignId) -> Result<RecipientCounts>;
    /// Move a PENDING recipient to its terminal status and bump the matching
    /// analytics counter in one transaction. Yields `false` without touching
    /// anything when the recipient is missing or already terminal.
    async fn record_outcome(
        &self,
        recipient_id: RecipientId,
        outcome: &RecipientOutcome,
    ) -> Result<bool>;
}

/// Database recipient repository
#[derive(Clone)]
pub struct DbRecipientRepository {
    pool: DatabasePool,
}

impl DbRecipientRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecipientRepository for DbRecipientRepository {
    async fn list_by_campaign(&self, campaign_id: CampaignId) -> Result<Vec<Recipient>> {
        sqlx::query_as::<_, Recipient>(
            "SELECT * FROM recipients WHERE campaign_id = $1 ORDER BY position ASC",
        )
        .bind(campaign_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn list_pending(
        &self,
        campaign_id: CampaignId,
        after_position: i32,
        limit: i64,
    ) -> Result<Vec<Recipient>> {
        sqlx::query_as::<_, Recipient>(
            r#"
            SELECT * FROM recipients
            WHERE campaign_id = $1 AND status = 'pending' AND position > $2
            ORDER BY position ASC
            LIMIT $3
            "#,
        )
        .bind(campaign_id)
        .bind(after_position)
        .bind(limit)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn count_by_status(&self, campaign_id: CampaignId) -> Result<RecipientCounts> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM recipients WHERE campaign_id = $1 GROUP BY status",
        )
        .bind(campaign_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)?;

        let mut counts = RecipientCounts::default();
        for (status, count) in rows {
            match status.as_str() {
                "pending" => counts.pending = count,
                "sent" => counts.sent = count,
                "failed" => counts.failed = count,
                _ => {}
            }
        }
        Ok(counts)
    }

    async fn record_outcome(
        &self,
        recipient_id: RecipientId,
        outcome: &RecipientOutcome,
    ) -> Result<bool> {
        let (sent_at, last_error) = match outcome {
            RecipientOutcome::Sent { at } => (Some(*at), None),
            RecipientOutcome::Failed { error } => (None, Some(error.as_str())),
        };

        let mut tx = self.pool.pool().begin().await.map_err(db_err)?;

        let campaign_id: Option<(CampaignId,)> = sqlx::query_as(
            r#"
            UPDATE recipients SET
                status = $2,
                sent_at = $3,
                last_error = $4,
                updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING campaign_id
            "#,
        )
        .bind(recipient_id)
        .bind(outcome.status().as_str())
        .bind(sent_at)
        .bind(last_error)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let Some((campaign_id,)) = campaign_id else {
            tx.rollback().await.map_err(db_err)?;
            return Ok(false);
        };

        let counter = match outcome {
            RecipientOutcome::Sent { .. } => {
                "UPDATE analytics SET total_sent = total_sent + 1, updated_at = NOW() WHERE campaign_id = $1"
            }
            RecipientOutcome::Failed { .. } => {
                "UPDATE analytics SET total_bounced = total_bounced + 1, updated_at = NOW() WHERE campaign_id = $1"
            }
        };

        sqlx::query(counter)
            .bind(campaign_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(true)
    }
}
