use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, Response};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use super::{
    object_story_id, AdSetSpec, CreativeSpec, PlatformClient, RemoteStatus, UpstreamError,
};
use crate::geo::{GeoCandidate, GeoSearch};

/// Credentials and endpoint for one ad account. Passed in explicitly; the
/// client never reads ambient settings.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    pub access_token: String,
    /// Numeric ad account id, without the `act_` prefix.
    pub ad_account_id: String,
    pub base_url: String,
    pub api_version: String,
    pub timeout: Duration,
}

pub struct GraphClient {
    client: Client,
    config: PlatformConfig,
}

#[derive(Deserialize)]
struct CreatedObject {
    id: String,
}

#[derive(Deserialize)]
struct ImageUpload {
    images: HashMap<String, UploadedImage>,
}

#[derive(Deserialize)]
struct UploadedImage {
    hash: String,
}

#[derive(Deserialize)]
struct SearchPage {
    data: Vec<GeoCandidate>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
    code: Option<i64>,
    error_subcode: Option<i64>,
    error_user_title: Option<String>,
    error_user_msg: Option<String>,
}

impl GraphClient {
    pub fn new(config: PlatformConfig) -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(UpstreamError::transport)?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.api_version,
            path
        )
    }

    fn account_path(&self, edge: &str) -> String {
        format!("act_{}/{}", self.config.ad_account_id, edge)
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        mut params: Vec<(&str, String)>,
    ) -> Result<T, UpstreamError> {
        params.push(("access_token", self.config.access_token.clone()));
        let response = self
            .client
            .post(self.endpoint(path))
            .form(&params)
            .send()
            .await
            .map_err(UpstreamError::transport)?;
        decode(response).await
    }

    async fn create(&self, path: &str, params: Vec<(&str, String)>) -> Result<String, UpstreamError> {
        let created: CreatedObject = self.post(path, params).await?;
        Ok(created.id)
    }

    async fn create_ad(
        &self,
        adset_id: &str,
        name: &str,
        creative: serde_json::Value,
    ) -> Result<String, UpstreamError> {
        let ad_id = self
            .create(
                &self.account_path("ads"),
                vec![
                    ("name", name.to_string()),
                    ("adset_id", adset_id.to_string()),
                    ("creative", creative.to_string()),
                    ("status", RemoteStatus::Active.as_str().to_string()),
                ],
            )
            .await?;
        tracing::info!(%adset_id, %ad_id, "Created ad");
        Ok(ad_id)
    }

    // campaigns and ad sets share the `POST /<id>` status update
    async fn set_status(&self, object_id: &str, status: RemoteStatus) -> Result<(), UpstreamError> {
        let _: serde_json::Value = self
            .post(object_id, vec![("status", status.as_str().to_string())])
            .await?;
        Ok(())
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, UpstreamError> {
    let status = response.status();
    let body = response.text().await.map_err(UpstreamError::transport)?;

    if !status.is_success() {
        return Err(parse_error(status.as_u16(), body));
    }

    serde_json::from_str(&body).map_err(|err| UpstreamError {
        message: format!("unexpected response from ad platform: {err}"),
        raw: body,
        ..UpstreamError::new("")
    })
}

fn parse_error(status: u16, body: String) -> UpstreamError {
    match serde_json::from_str::<ErrorEnvelope>(&body) {
        Ok(ErrorEnvelope { error }) => {
            let user_message = match (error.error_user_title, error.error_user_msg) {
                (Some(title), Some(msg)) => Some(format!("{title}: {msg}")),
                (None, Some(msg)) => Some(msg),
                (Some(title), None) => Some(title),
                (None, None) => None,
            };
            UpstreamError {
                message: error.message,
                code: error.code,
                subcode: error.error_subcode,
                user_message,
                raw: body,
            }
        }
        Err(_) => UpstreamError {
            message: format!("ad platform returned HTTP {status}"),
            raw: body,
            ..UpstreamError::new("")
        },
    }
}

/// Minor currency units, as the platform expects budgets.
fn to_minor_units(amount: Decimal) -> Result<i64, UpstreamError> {
    amount
        .checked_mul(Decimal::ONE_HUNDRED)
        .map(|cents| cents.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|cents| cents.to_i64())
        .ok_or_else(|| UpstreamError::new(format!("budget {amount} is out of range")))
}

#[async_trait]
impl PlatformClient for GraphClient {
    async fn create_campaign(&self, name: &str) -> Result<String, UpstreamError> {
        let campaign_id = self
            .create(
                &self.account_path("campaigns"),
                vec![
                    ("name", name.to_string()),
                    ("objective", "OUTCOME_ENGAGEMENT".to_string()),
                    ("status", RemoteStatus::Paused.as_str().to_string()),
                    ("special_ad_categories", "[]".to_string()),
                ],
            )
            .await?;
        tracing::info!(%campaign_id, "Created campaign");
        Ok(campaign_id)
    }

    async fn create_ad_set(&self, spec: &AdSetSpec) -> Result<String, UpstreamError> {
        let targeting = serde_json::to_string(&spec.targeting)
            .map_err(|err| UpstreamError::new(format!("failed to encode targeting: {err}")))?;
        let promoted_object = json!({ "page_id": spec.page_id }).to_string();

        let adset_id = self
            .create(
                &self.account_path("adsets"),
                vec![
                    ("name", spec.name.clone()),
                    ("campaign_id", spec.campaign_id.clone()),
                    ("daily_budget", to_minor_units(spec.daily_budget)?.to_string()),
                    ("billing_event", "IMPRESSIONS".to_string()),
                    ("optimization_goal", "POST_ENGAGEMENT".to_string()),
                    ("bid_strategy", "LOWEST_COST_WITHOUT_CAP".to_string()),
                    ("start_time", spec.start_time.to_rfc3339()),
                    ("end_time", spec.end_time.to_rfc3339()),
                    ("targeting", targeting),
                    ("promoted_object", promoted_object),
                    ("status", RemoteStatus::Paused.as_str().to_string()),
                ],
            )
            .await?;
        tracing::info!(campaign_id = %spec.campaign_id, %adset_id, "Created ad set");
        Ok(adset_id)
    }

    async fn create_ad_from_post(
        &self,
        adset_id: &str,
        name: &str,
        page_id: &str,
        post_id: &str,
    ) -> Result<String, UpstreamError> {
        let creative = json!({ "object_story_id": object_story_id(page_id, post_id) });
        self.create_ad(adset_id, name, creative).await
    }

    async fn create_ad_from_creative(
        &self,
        adset_id: &str,
        name: &str,
        creative: &CreativeSpec,
    ) -> Result<String, UpstreamError> {
        let story = json!({
            "page_id": creative.page_id,
            "link_data": {
                "image_hash": creative.image_hash,
                "message": creative.primary_text,
                "name": creative.headline,
                "link": format!("https://www.facebook.com/{}", creative.page_id),
            }
        });
        let creative_id = self
            .create(
                &self.account_path("adcreatives"),
                vec![
                    ("name", format!("{name} creative")),
                    ("object_story_spec", story.to_string()),
                ],
            )
            .await?;
        tracing::info!(%creative_id, "Created ad creative");

        self.create_ad(adset_id, name, json!({ "creative_id": creative_id }))
            .await
    }

    async fn set_ad_set_status(
        &self,
        adset_id: &str,
        status: RemoteStatus,
    ) -> Result<(), UpstreamError> {
        self.set_status(adset_id, status).await?;
        tracing::info!(%adset_id, status = status.as_str(), "Updated ad set status");
        Ok(())
    }

    async fn upload_image(&self, bytes: &[u8]) -> Result<String, UpstreamError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        let upload: ImageUpload = self
            .post(&self.account_path("adimages"), vec![("bytes", encoded)])
            .await?;
        let hash = upload
            .images
            .into_values()
            .next()
            .map(|image| image.hash)
            .ok_or_else(|| UpstreamError::new("image upload returned no image hash"))?;
        tracing::info!(image_hash = %hash, size = bytes.len(), "Uploaded creative image");
        Ok(hash)
    }

    async fn set_campaign_status(
        &self,
        campaign_id: &str,
        status: RemoteStatus,
    ) -> Result<(), UpstreamError> {
        self.set_status(campaign_id, status).await?;
        tracing::info!(%campaign_id, status = status.as_str(), "Updated campaign status");
        Ok(())
    }
}

#[async_trait]
impl GeoSearch for GraphClient {
    async fn search(&self, query: &str) -> Result<Vec<GeoCandidate>, UpstreamError> {
        let response = self
            .client
            .get(self.endpoint("search"))
            .query(&[
                ("type", "adgeolocation"),
                ("q", query),
                ("location_types", r#"["city","region"]"#),
                ("access_token", self.config.access_token.as_str()),
            ])
            .send()
            .await
            .map_err(UpstreamError::transport)?;
        let page: SearchPage = decode(response).await?;
        Ok(page.data)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration as ChronoDuration, Utc};
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::geo::{GeoKind, GeoLocations};
    use crate::platform::Targeting;

    fn client(server: &MockServer) -> GraphClient {
        GraphClient::new(PlatformConfig {
            access_token: "token-123".into(),
            ad_account_id: "42".into(),
            base_url: server.uri(),
            api_version: "v19.0".into(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn create_campaign_returns_remote_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v19.0/act_42/campaigns"))
            .and(body_string_contains("status=PAUSED"))
            .and(body_string_contains("access_token=token-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "c-1" })))
            .expect(1)
            .mount(&server)
            .await;

        let id = client(&server).create_campaign("Promotion").await.unwrap();
        assert_eq!(id, "c-1");
    }

    #[tokio::test]
    async fn ad_set_budget_is_sent_in_minor_units() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v19.0/act_42/adsets"))
            .and(body_string_contains("daily_budget=1000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "as-1" })))
            .expect(1)
            .mount(&server)
            .await;

        let now = Utc::now();
        let spec = AdSetSpec {
            name: "Promotion ad set".into(),
            campaign_id: "c-1".into(),
            page_id: "p-1".into(),
            daily_budget: Decimal::new(1000, 2),
            start_time: now,
            end_time: now + ChronoDuration::days(5),
            targeting: Targeting {
                geo_locations: GeoLocations {
                    countries: vec!["LY".into()],
                    ..Default::default()
                },
                age_min: None,
                age_max: None,
                genders: Vec::new(),
            },
        };

        let id = client(&server).create_ad_set(&spec).await.unwrap();
        assert_eq!(id, "as-1");
    }

    #[tokio::test]
    async fn error_payload_keeps_code_subcode_and_raw_body() {
        let server = MockServer::start().await;
        let body = json!({
            "error": {
                "message": "Invalid parameter",
                "type": "OAuthException",
                "code": 100,
                "error_subcode": 1487007,
                "error_user_title": "Schedule Too Short",
                "error_user_msg": "The end time must be later."
            }
        });
        Mock::given(method("POST"))
            .and(path("/v19.0/act_42/adsets"))
            .respond_with(ResponseTemplate::new(400).set_body_json(body))
            .mount(&server)
            .await;

        let now = Utc::now();
        let spec = AdSetSpec {
            name: "n".into(),
            campaign_id: "c".into(),
            page_id: "p".into(),
            daily_budget: Decimal::ONE,
            start_time: now,
            end_time: now,
            targeting: Targeting {
                geo_locations: GeoLocations::default(),
                age_min: None,
                age_max: None,
                genders: Vec::new(),
            },
        };

        let err = client(&server).create_ad_set(&spec).await.unwrap_err();
        assert_eq!(err.message, "Invalid parameter");
        assert_eq!(err.code, Some(100));
        assert_eq!(err.subcode, Some(1487007));
        assert_eq!(
            err.user_message.as_deref(),
            Some("Schedule Too Short: The end time must be later.")
        );
        assert!(err.raw.contains("OAuthException"));
    }

    #[tokio::test]
    async fn non_json_error_is_reported_with_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v19.0/c-1"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let err = client(&server)
            .set_campaign_status("c-1", RemoteStatus::Active)
            .await
            .unwrap_err();
        assert_eq!(err.message, "ad platform returned HTTP 502");
        assert_eq!(err.raw, "bad gateway");
    }

    #[tokio::test]
    async fn upload_image_returns_hash() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v19.0/act_42/adimages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "images": { "bytes": { "hash": "abc123", "url": "https://cdn/img.png" } }
            })))
            .mount(&server)
            .await;

        let hash = client(&server).upload_image(b"\x89PNG").await.unwrap();
        assert_eq!(hash, "abc123");
    }

    #[tokio::test]
    async fn creative_path_creates_creative_then_ad() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v19.0/act_42/adcreatives"))
            .and(body_string_contains("abc123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "cr-1" })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v19.0/act_42/ads"))
            .and(body_string_contains("cr-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "ad-1" })))
            .expect(1)
            .mount(&server)
            .await;

        let creative = CreativeSpec {
            page_id: "p-1".into(),
            image_hash: "abc123".into(),
            primary_text: "Fresh bread daily".into(),
            headline: "Bakery".into(),
        };
        let id = client(&server)
            .create_ad_from_creative("as-1", "Promotion ad", &creative)
            .await
            .unwrap();
        assert_eq!(id, "ad-1");
    }

    #[tokio::test]
    async fn geo_search_parses_candidates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v19.0/search"))
            .and(query_param("type", "adgeolocation"))
            .and(query_param("q", "Benghazi"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    { "key": "1", "name": "Benghazi", "type": "city", "country_code": "LY" },
                    { "key": "LY", "name": "Libya", "type": "country", "country_code": "LY" }
                ]
            })))
            .mount(&server)
            .await;

        let candidates = client(&server).search("Benghazi").await.unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].kind, GeoKind::City);
        assert_eq!(candidates[0].country, "LY");
        assert_eq!(candidates[1].kind, GeoKind::Other);
    }

    #[test]
    fn minor_units_round_to_cents() {
        assert_eq!(to_minor_units(Decimal::new(1000, 2)).unwrap(), 1000);
        assert_eq!(to_minor_units(Decimal::new(3335, 3)).unwrap(), 334);
        assert_eq!(to_minor_units(Decimal::new(33334, 4)).unwrap(), 333);
    }

    #[test]
    fn oversized_budget_is_an_error_not_a_panic() {
        let err = to_minor_units(Decimal::MAX).unwrap_err();
        assert!(err.message.contains("out of range"));
    }

    #[tokio::test]
    async fn ad_set_status_is_posted_to_the_ad_set() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v19.0/as-1"))
            .and(body_string_contains("status=ACTIVE"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .set_ad_set_status("as-1", RemoteStatus::Active)
            .await
            .unwrap();
    }
}
