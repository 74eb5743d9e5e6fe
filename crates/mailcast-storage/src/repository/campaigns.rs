//! Campaign repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailcast_common::types::{AccountId, CampaignId};
use mailcast_common::Result;
use uuid::Uuid;

use crate::db::{db_err, DatabasePool};
use crate::models::{Campaign, CampaignStatus, CreateCampaign, UpdateCampaign};

/// Campaign repository trait
#[async_trait]
pub trait CampaignRepository: Send + Sync {
    /// Insert the campaign, its recipients (in list order) and a zeroed
    /// analytics record atomically
    async fn create(&self, input: CreateCampaign) -> Result<Campaign>;
    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>>;
    async fn list_by_account(
        &self,
        account_id: AccountId,
        status: Option<CampaignStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Campaign>>;
    /// Apply edits; only DRAFT and SCHEDULED campaigns are touched, others
    /// yield `None`
    async fn update(&self, id: CampaignId, input: UpdateCampaign) -> Result<Option<Campaign>>;
    /// Compare-and-set the status. Yields `None` when the campaign is
    /// missing or its current status is not in `from`.
    async fn transition(
        &self,
        id: CampaignId,
        from: &[CampaignStatus],
        to: CampaignStatus,
    ) -> Result<Option<Campaign>>;
    /// SCHEDULED campaigns whose instant is at or before `now`
    async fn list_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Campaign>>;
    async fn list_by_status(&self, status: CampaignStatus, limit: i64) -> Result<Vec<Campaign>>;
    /// Delete a campaign that is not currently sending
    async fn delete(&self, id: CampaignId) -> Result<bool>;
}

/// Database campaign repository
#[derive(Clone)]
pub struct DbCampaignRepository {
    pool: DatabasePool,
}

impl DbCampaignRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn status_list(statuses: &[CampaignStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

#[async_trait]
impl CampaignRepository for DbCampaignRepository {
    async fn create(&self, input: CreateCampaign) -> Result<Campaign> {
        let id = Uuid::now_v7();
        let now = Utc::now();

        let mut tx = self.pool.pool().begin().await.map_err(db_err)?;

        let campaign = sqlx::query_as::<_, Campaign>(
            r#"
            INSERT INTO campaigns (
                id, account_id, name, subject, content, sender_id, status,
                schedule_type, scheduled_at, timezone, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.account_id)
        .bind(&input.name)
        .bind(&input.subject)
        .bind(&input.content)
        .bind(input.sender_id)
        .bind(input.status.as_str())
        .bind(input.schedule_type.as_str())
        .bind(input.scheduled_at)
        .bind(&input.timezone)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        for (position, recipient) in input.recipients.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO recipients (
                    id, campaign_id, position, email, first_name, last_name,
                    status, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7, $7)
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(id)
            .bind(position as i32)
            .bind(&recipient.email)
            .bind(&recipient.first_name)
            .bind(&recipient.last_name)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        sqlx::query(
            "INSERT INTO analytics (campaign_id, total_sent, total_bounced, updated_at) VALUES ($1, 0, 0, $2)",
        )
        .bind(id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(campaign)
    }

    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>> {
        sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)
    }

    async fn list_by_account(
        &self,
        account_id: AccountId,
        status: Option<CampaignStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Campaign>> {
        if let Some(status) = status {
            sqlx::query_as::<_, Campaign>(
                r#"
                SELECT * FROM campaigns
                WHERE account_id = $1 AND status = $2
                ORDER BY created_at DESC
                LIMIT $3 OFFSET $4
                "#,
            )
            .bind(account_id)
            .bind(status.as_str())
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool.pool())
            .await
            .map_err(db_err)
        } else {
            sqlx::query_as::<_, Campaign>(
                r#"
                SELECT * FROM campaigns
                WHERE account_id = $1
                ORDER BY created_at DESC
                LIMIT $2 OFFSET $3
                "#,
            )
            .bind(account_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool.pool())
            .await
            .map_err(db_err)
        }
    }

    async fn update(&self, id: CampaignId, input: UpdateCampaign) -> Result<Option<Campaign>> {
        let schedule = input.schedule.as_ref();

        sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns SET
                name = COALESCE($2, name),
                subject = COALESCE($3, subject),
                content = COALESCE($4, content),
                sender_id = COALESCE($5, sender_id),
                status = CASE WHEN $6 THEN $7 ELSE status END,
                schedule_type = CASE WHEN $6 THEN $8 ELSE schedule_type END,
                scheduled_at = CASE WHEN $6 THEN $9 ELSE scheduled_at END,
                timezone = CASE WHEN $6 THEN $10 ELSE timezone END,
                updated_at = NOW()
            WHERE id = $1 AND status IN ('draft', 'scheduled')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&input.name)
        .bind(&input.subject)
        .bind(&input.content)
        .bind(input.sender_id)
        .bind(schedule.is_some())
        .bind(schedule.map(|s| s.status.as_str()))
        .bind(schedule.map(|s| s.schedule_type.as_str()))
        .bind(schedule.and_then(|s| s.scheduled_at))
        .bind(schedule.and_then(|s| s.timezone.clone()))
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn transition(
        &self,
        id: CampaignId,
        from: &[CampaignStatus],
        to: CampaignStatus,
    ) -> Result<Option<Campaign>> {
        let now = Utc::now();
        let started_at = (to == CampaignStatus::Sending).then_some(now);
        let completed_at = to.is_terminal().then_some(now);

        sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns SET
                status = $2,
                started_at = COALESCE(started_at, $4),
                completed_at = COALESCE($5, completed_at),
                updated_at = NOW()
            WHERE id = $1 AND status = ANY($3)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(to.as_str())
        .bind(status_list(from))
        .bind(started_at)
        .bind(completed_at)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn list_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Campaign>> {
        sqlx::query_as::<_, Campaign>(
            r#"
            SELECT * FROM campaigns
            WHERE status = 'scheduled'
              AND scheduled_at IS NOT NULL
              AND scheduled_at <= $1
            ORDER BY scheduled_at ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn list_by_status(&self, status: CampaignStatus, limit: i64) -> Result<Vec<Campaign>> {
        sqlx::query_as::<_, Campaign>(
            "SELECT * FROM campaigns WHERE status = $1 ORDER BY updated_at ASC LIMIT $2",
        )
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn delete(&self, id: CampaignId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM campaigns WHERE id = $1 AND status <> 'sending'")
            .bind(id)
            .execute(self.pool.pool())
            .await
            .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }
}
