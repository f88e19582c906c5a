//! Boundary to the external advertising platform.
//!
//! [`PlatformClient`] is the contract the provisioning saga drives; the Graph
//! API implementation lives in [`graph`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::geo::GeoLocations;

pub mod graph;

/// Error raised by any call to the ad platform.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct UpstreamError {
    pub message: String,
    pub code: Option<i64>,
    pub subcode: Option<i64>,
    /// User-facing text the platform attached to the error, if any.
    pub user_message: Option<String>,
    /// Unparsed payload, kept for diagnostics.
    pub raw: String,
}

impl UpstreamError {
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            raw: message.clone(),
            message,
            code: None,
            subcode: None,
            user_message: None,
        }
    }

    pub fn transport(err: reqwest::Error) -> Self {
        Self::new(format!("request to ad platform failed: {err}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteStatus {
    Active,
    Paused,
}

impl RemoteStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RemoteStatus::Active => "ACTIVE",
            RemoteStatus::Paused => "PAUSED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    /// Platform gender code.
    pub fn code(self) -> u8 {
        match self {
            Gender::Male => 1,
            Gender::Female => 2,
        }
    }
}

/// Targeting payload attached to an ad set. Demographic filters are only
/// serialized when present.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Targeting {
    pub geo_locations: GeoLocations,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_min: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_max: Option<u8>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub genders: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct AdSetSpec {
    pub name: String,
    pub campaign_id: String,
    pub page_id: String,
    pub daily_budget: Decimal,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub targeting: Targeting,
}

#[derive(Debug, Clone)]
pub struct CreativeSpec {
    pub page_id: String,
    pub image_hash: String,
    pub primary_text: String,
    pub headline: String,
}

/// Story id of an existing page post.
pub fn object_story_id(page_id: &str, post_id: &str) -> String {
    format!("{page_id}_{post_id}")
}

/// Remote calls used by the provisioning saga. None of them are idempotent.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Creates a paused campaign and returns its remote id.
    async fn create_campaign(&self, name: &str) -> Result<String, UpstreamError>;

    /// Creates a paused ad set under `spec.campaign_id`.
    async fn create_ad_set(&self, spec: &AdSetSpec) -> Result<String, UpstreamError>;

    async fn create_ad_from_post(
        &self,
        adset_id: &str,
        name: &str,
        page_id: &str,
        post_id: &str,
    ) -> Result<String, UpstreamError>;

    /// Builds a creative from an uploaded image, then the ad using it.
    async fn create_ad_from_creative(
        &self,
        adset_id: &str,
        name: &str,
        creative: &CreativeSpec,
    ) -> Result<String, UpstreamError>;

    /// Uploads raw image bytes and returns the platform image hash.
    async fn upload_image(&self, bytes: &[u8]) -> Result<String, UpstreamError>;

    async fn set_ad_set_status(
        &self,
        adset_id: &str,
        status: RemoteStatus,
    ) -> Result<(), UpstreamError>;

    async fn set_campaign_status(
        &self,
        campaign_id: &str,
        status: RemoteStatus,
    ) -> Result<(), UpstreamError>;
}
