use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "campaign_status", rename_all = "lowercase")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignStatus {
    Active,
    Paused,
    Failed,
}

/// The identifiers of a fully provisioned promotion on the ad platform.
/// Only ever built once all three remote objects exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCampaign {
    pub campaign_id: String,
    pub adset_id: String,
    pub ad_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LocalCampaign {
    pub id: Uuid,
    pub user_id: Uuid,
    pub campaign_id: String,
    pub adset_id: String,
    pub ad_id: String,
    pub budget: Decimal,
    pub status: CampaignStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn insert(
        &self,
        user_id: Uuid,
        remote: &RemoteCampaign,
        budget: Decimal,
        status: CampaignStatus,
    ) -> Result<LocalCampaign, sqlx::Error>;

    async fn get(&self, id: Uuid) -> Result<Option<LocalCampaign>, sqlx::Error>;

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<LocalCampaign>, sqlx::Error>;

    async fn update_status(
        &self,
        id: Uuid,
        status: CampaignStatus,
    ) -> Result<LocalCampaign, sqlx::Error>;
}

pub struct PgCampaignStore {
    pool: PgPool,
}

impl PgCampaignStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const CAMPAIGN_COLUMNS: &str =
    "id, user_id, campaign_id, adset_id, ad_id, budget, status, created_at, updated_at";

#[async_trait]
impl CampaignStore for PgCampaignStore {
    async fn insert(
        &self,
        user_id: Uuid,
        remote: &RemoteCampaign,
        budget: Decimal,
        status: CampaignStatus,
    ) -> Result<LocalCampaign, sqlx::Error> {
        let sql = format!(
            "INSERT INTO campaigns (user_id, campaign_id, adset_id, ad_id, budget, status) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {CAMPAIGN_COLUMNS}"
        );
        sqlx::query_as::<_, LocalCampaign>(&sql)
            .bind(user_id)
            .bind(&remote.campaign_id)
            .bind(&remote.adset_id)
            .bind(&remote.ad_id)
            .bind(budget)
            .bind(status)
            .fetch_one(&self.pool)
            .await
    }

    async fn get(&self, id: Uuid) -> Result<Option<LocalCampaign>, sqlx::Error> {
        let sql = format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = $1");
        sqlx::query_as::<_, LocalCampaign>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<LocalCampaign>, sqlx::Error> {
        let sql = format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE user_id = $1 ORDER BY created_at DESC"
        );
        sqlx::query_as::<_, LocalCampaign>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: CampaignStatus,
    ) -> Result<LocalCampaign, sqlx::Error> {
        let sql = format!(
            "UPDATE campaigns SET status = $1, updated_at = CURRENT_TIMESTAMP \
             WHERE id = $2 RETURNING {CAMPAIGN_COLUMNS}"
        );
        sqlx::query_as::<_, LocalCampaign>(&sql)
            .bind(status)
            .bind(id)
            .fetch_one(&self.pool)
            .await
    }
}
