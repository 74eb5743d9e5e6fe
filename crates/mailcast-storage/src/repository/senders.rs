//! Sender repository

use async_trait::async_trait;
use chrono::Utc;
use mailcast_common::types::{AccountId, SenderId};
use mailcast_common::Result;
use uuid::Uuid;

use crate::db::{db_err, DatabasePool};
use crate::models::{CreateSender, Sender};

/// Sender repository trait
#[async_trait]
pub trait SenderRepository: Send + Sync {
    async fn create(&self, input: CreateSender) -> Result<Sender>;
    async fn get(&self, id: SenderId) -> Result<Option<Sender>>;
    async fn list_by_account(&self, account_id: AccountId) -> Result<Vec<Sender>>;
    async fn delete(&self, id: SenderId) -> Result<bool>;
}

/// Database sender repository
#[derive(Clone)]
pub struct DbSenderRepository {
    pool: DatabasePool,
}

impl DbSenderRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SenderRepository for DbSenderRepository {
    async fn create(&self, input: CreateSender) -> Result<Sender> {
        let now = Utc::now();

        sqlx::query_as::<_, Sender>(
            r#"
            INSERT INTO senders (
                id, account_id, name, email, host, port, secure,
                username, password, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(input.account_id)
        .bind(&input.name)
        .bind(&input.email)
        .bind(&input.host)
        .bind(i32::from(input.port))
        .bind(input.secure)
        .bind(&input.username)
        .bind(&input.password)
        .bind(now)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn get(&self, id: SenderId) -> Result<Option<Sender>> {
        sqlx::query_as::<_, Sender>("SELECT * FROM senders WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)
    }

    async fn list_by_account(&self, account_id: AccountId) -> Result<Vec<Sender>> {
        sqlx::query_as::<_, Sender>(
            "SELECT * FROM senders WHERE account_id = $1 ORDER BY created_at ASC",
        )
        .bind(account_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn delete(&self, id: SenderId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM senders WHERE id = $1")
            .bind(id)
            .execute(self.pool.pool())
            .await
            .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }
}
