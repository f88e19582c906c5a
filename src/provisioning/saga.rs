use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::FutureExt;
use uuid::Uuid;

use super::classify::{classify, UpstreamFailure};
use super::request::{daily_budget, AdSource, CampaignRequest, ValidatedRequest};
use super::{OrphanedObject, ProvisioningError, Requester};
use crate::db::campaign::{CampaignStatus, CampaignStore, LocalCampaign, RemoteCampaign};
use crate::db::ledger::LedgerError;
use crate::geo::GeoResolver;
use crate::platform::{AdSetSpec, CreativeSpec, PlatformClient, RemoteStatus, Targeting, UpstreamError};
use crate::wallet::WalletService;

/// Extra time past the requested duration so the platform never sees a
/// schedule shorter than the minimum it accepts.
const SCHEDULE_BUFFER_HOURS: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaState {
    Initiated,
    BalanceChecked,
    FundsDeducted,
    CampaignCreated,
    AdSetCreated,
    AdCreated,
    Activated,
    Committed,
    Compensating,
    RefundedFailed,
}

/// Remote steps run after funds are deducted. Any failure among them is
/// compensated by the single handler in [`CampaignProvisioner::compensate`].
#[derive(Debug, Clone, Copy)]
enum ProtectedStep {
    CreateCampaign,
    CreateAdSet,
    CreateAd,
    Activate,
}

const PROTECTED_STEPS: [ProtectedStep; 4] = [
    ProtectedStep::CreateCampaign,
    ProtectedStep::CreateAdSet,
    ProtectedStep::CreateAd,
    ProtectedStep::Activate,
];

impl ProtectedStep {
    fn completes(self) -> SagaState {
        match self {
            ProtectedStep::CreateCampaign => SagaState::CampaignCreated,
            ProtectedStep::CreateAdSet => SagaState::AdSetCreated,
            ProtectedStep::CreateAd => SagaState::AdCreated,
            ProtectedStep::Activate => SagaState::Activated,
        }
    }
}

struct SagaRun {
    user_id: Uuid,
    state: SagaState,
    name: String,
    campaign_id: Option<String>,
    adset_id: Option<String>,
    ad_id: Option<String>,
}

impl SagaRun {
    fn new(user_id: Uuid, name: String) -> Self {
        Self {
            user_id,
            state: SagaState::Initiated,
            name,
            campaign_id: None,
            adset_id: None,
            ad_id: None,
        }
    }

    fn advance(&mut self, next: SagaState) {
        tracing::info!(
            user_id = %self.user_id,
            from = ?self.state,
            to = ?next,
            "Provisioning state changed"
        );
        self.state = next;
    }

    fn created_objects(&self) -> Vec<OrphanedObject> {
        [
            ("campaign", &self.campaign_id),
            ("adset", &self.adset_id),
            ("ad", &self.ad_id),
        ]
        .into_iter()
        .filter_map(|(kind, id)| {
            id.as_ref().map(|id| OrphanedObject {
                kind,
                id: id.clone(),
            })
        })
        .collect()
    }

    fn remote(&self) -> Option<RemoteCampaign> {
        Some(RemoteCampaign {
            campaign_id: self.campaign_id.clone()?,
            adset_id: self.adset_id.clone()?,
            ad_id: self.ad_id.clone()?,
        })
    }
}

fn missing(object: &str) -> UpstreamError {
    UpstreamError::new(format!("no {object} id available for this step"))
}

fn campaign_name(page_id: &str, now: DateTime<Utc>) -> String {
    format!("Promotion {} {}", page_id, now.format("%Y-%m-%d %H:%M"))
}

/// Start and end of the ad set, padded by [`SCHEDULE_BUFFER_HOURS`].
pub fn schedule(
    now: DateTime<Utc>,
    duration_days: u32,
) -> Result<(DateTime<Utc>, DateTime<Utc>), UpstreamError> {
    let end = Duration::try_days(i64::from(duration_days))
        .and_then(|days| days.checked_add(&Duration::hours(SCHEDULE_BUFFER_HOURS)))
        .and_then(|span| now.checked_add_signed(span))
        .ok_or_else(|| {
            UpstreamError::new(format!("schedule of {duration_days} days is out of range"))
        })?;
    Ok((now, end))
}

pub struct CampaignProvisioner {
    wallet: Arc<WalletService>,
    platform: Arc<dyn PlatformClient>,
    geo: Arc<GeoResolver>,
    campaigns: Arc<dyn CampaignStore>,
}

impl CampaignProvisioner {
    pub fn new(
        wallet: Arc<WalletService>,
        platform: Arc<dyn PlatformClient>,
        geo: Arc<GeoResolver>,
        campaigns: Arc<dyn CampaignStore>,
    ) -> Self {
        Self {
            wallet,
            platform,
            geo,
            campaigns,
        }
    }

    /// Runs one provisioning saga. Each remote object is created at most once;
    /// a failed run is never retried and leaves no local record.
    pub async fn submit_campaign(
        &self,
        request: CampaignRequest,
        user_id: Uuid,
    ) -> Result<LocalCampaign, ProvisioningError> {
        let request = request.validate().map_err(|reason| {
            tracing::warn!(%user_id, "Rejected promotion request: {reason}");
            ProvisioningError::Validation(reason)
        })?;

        let mut run = SagaRun::new(user_id, campaign_name(&request.page_id, Utc::now()));
        tracing::info!(
            %user_id,
            page_id = %request.page_id,
            budget = %request.budget,
            duration_days = request.duration_days,
            "Starting promotion provisioning"
        );

        let affordable = self
            .wallet
            .check_balance(user_id, request.budget)
            .await
            .map_err(ProvisioningError::DeductionFailed)?;
        if !affordable {
            tracing::warn!(%user_id, budget = %request.budget, "Insufficient funds for promotion");
            return Err(ProvisioningError::InsufficientFunds {
                required: request.budget,
            });
        }
        run.advance(SagaState::BalanceChecked);

        let reference = format!("{} ({} days)", run.name, request.duration_days);
        self.wallet
            .deduct(user_id, request.budget, &reference)
            .await
            .map_err(|err| match err {
                LedgerError::InsufficientFunds { .. } => ProvisioningError::InsufficientFunds {
                    required: request.budget,
                },
                err => {
                    tracing::error!(%user_id, "Failed to deduct promotion budget: {err}");
                    ProvisioningError::DeductionFailed(err)
                }
            })?;
        run.advance(SagaState::FundsDeducted);

        // funds are committed from here on: every exit goes through compensate,
        // including a panic inside one of the steps
        let protected = AssertUnwindSafe(self.run_protected(&mut run, &request))
            .catch_unwind()
            .await;
        let outcome = protected.unwrap_or_else(|_| {
            Err(UpstreamError::new(format!(
                "provisioning step panicked after {:?}",
                run.state
            )))
        });
        let remote = match outcome {
            Ok(remote) => remote,
            Err(error) => return Err(self.compensate(&mut run, &request, classify(error)).await),
        };

        self.commit(&mut run, &request, remote).await
    }

    async fn run_protected(
        &self,
        run: &mut SagaRun,
        request: &ValidatedRequest,
    ) -> Result<RemoteCampaign, UpstreamError> {
        for step in PROTECTED_STEPS {
            self.execute(step, run, request).await?;
            run.advance(step.completes());
        }
        run.remote()
            .ok_or_else(|| UpstreamError::new("provisioning finished without all remote identifiers"))
    }

    async fn execute(
        &self,
        step: ProtectedStep,
        run: &mut SagaRun,
        request: &ValidatedRequest,
    ) -> Result<(), UpstreamError> {
        match step {
            ProtectedStep::CreateCampaign => {
                let campaign_id = self.platform.create_campaign(&run.name).await?;
                run.campaign_id = Some(campaign_id);
            }
            ProtectedStep::CreateAdSet => {
                let campaign_id = run.campaign_id.clone().ok_or_else(|| missing("campaign"))?;
                let geo_locations = self.geo.resolve(&request.targeting.locations).await;
                let (start_time, end_time) = schedule(Utc::now(), request.duration_days)?;
                let spec = AdSetSpec {
                    name: format!("{} ad set", run.name),
                    campaign_id,
                    page_id: request.page_id.clone(),
                    daily_budget: daily_budget(request.budget, request.duration_days),
                    start_time,
                    end_time,
                    targeting: Targeting {
                        geo_locations,
                        age_min: request.targeting.min_age,
                        age_max: request.targeting.max_age,
                        genders: request.targeting.genders.iter().map(|g| g.code()).collect(),
                    },
                };
                run.adset_id = Some(self.platform.create_ad_set(&spec).await?);
            }
            ProtectedStep::CreateAd => {
                let adset_id = run.adset_id.clone().ok_or_else(|| missing("ad set"))?;
                let name = format!("{} ad", run.name);
                let ad_id = match &request.source {
                    AdSource::Post { post_id } => {
                        self.platform
                            .create_ad_from_post(&adset_id, &name, &request.page_id, post_id)
                            .await?
                    }
                    AdSource::Creative {
                        image,
                        primary_text,
                        headline,
                    } => {
                        let image_hash = self.platform.upload_image(image).await?;
                        let creative = CreativeSpec {
                            page_id: request.page_id.clone(),
                            image_hash,
                            primary_text: primary_text.clone(),
                            headline: headline.clone(),
                        };
                        self.platform
                            .create_ad_from_creative(&adset_id, &name, &creative)
                            .await?
                    }
                };
                run.ad_id = Some(ad_id);
            }
            ProtectedStep::Activate => {
                // the ad set goes live first; the campaign switch is the last remote call
                let adset_id = run.adset_id.as_deref().ok_or_else(|| missing("ad set"))?;
                self.platform
                    .set_ad_set_status(adset_id, RemoteStatus::Active)
                    .await?;
                let campaign_id = run.campaign_id.as_deref().ok_or_else(|| missing("campaign"))?;
                self.platform
                    .set_campaign_status(campaign_id, RemoteStatus::Active)
                    .await?;
            }
        }
        Ok(())
    }

    /// The only compensation path: refund the budget and report what was left behind.
    async fn compensate(
        &self,
        run: &mut SagaRun,
        request: &ValidatedRequest,
        failure: UpstreamFailure,
    ) -> ProvisioningError {
        let failed_at = run.state;
        run.advance(SagaState::Compensating);

        let orphans = run.created_objects();
        if !orphans.is_empty() {
            tracing::warn!(
                user_id = %run.user_id,
                ?orphans,
                "Remote objects left paused after failed provisioning"
            );
        }

        let reason = failure.to_string();
        match self.wallet.refund(run.user_id, request.budget, &reason).await {
            Ok(_) => {
                run.advance(SagaState::RefundedFailed);
                tracing::warn!(
                    user_id = %run.user_id,
                    ?failed_at,
                    amount = %request.budget,
                    "Promotion provisioning failed and was refunded: {reason}"
                );
                ProvisioningError::UpstreamCreationFailed {
                    failure,
                    amount: request.budget,
                    orphans,
                }
            }
            Err(refund_error) => {
                tracing::error!(
                    target: "provisioning::critical",
                    alert = "compensation_failed",
                    user_id = %run.user_id,
                    ?failed_at,
                    amount = %request.budget,
                    reason = %reason,
                    "Refund failed after provisioning failure, funds remain debited: {refund_error}"
                );
                ProvisioningError::CompensationFailed {
                    failure,
                    amount: request.budget,
                    refund_error,
                    orphans,
                }
            }
        }
    }

    async fn commit(
        &self,
        run: &mut SagaRun,
        request: &ValidatedRequest,
        remote: RemoteCampaign,
    ) -> Result<LocalCampaign, ProvisioningError> {
        match self
            .campaigns
            .insert(run.user_id, &remote, request.budget, CampaignStatus::Active)
            .await
        {
            Ok(campaign) => {
                run.advance(SagaState::Committed);
                tracing::info!(
                    user_id = %run.user_id,
                    id = %campaign.id,
                    campaign_id = %remote.campaign_id,
                    "Promotion provisioned"
                );
                Ok(campaign)
            }
            Err(source) => {
                tracing::error!(
                    target: "provisioning::critical",
                    alert = "persistence_failed",
                    user_id = %run.user_id,
                    campaign_id = %remote.campaign_id,
                    adset_id = %remote.adset_id,
                    ad_id = %remote.ad_id,
                    "Promotion is live but its local record could not be written: {source}"
                );
                Err(ProvisioningError::PersistenceFailed { remote, source })
            }
        }
    }

    pub async fn list_campaigns(&self, user_id: Uuid) -> Result<Vec<LocalCampaign>, ProvisioningError> {
        Ok(self.campaigns.list_for_user(user_id).await?)
    }

    /// Pauses or resumes a provisioned campaign. Only the owner or an admin may do so.
    pub async fn toggle_status(
        &self,
        id: Uuid,
        status: CampaignStatus,
        requester: &Requester,
    ) -> Result<LocalCampaign, ProvisioningError> {
        let remote_status = match status {
            CampaignStatus::Active => RemoteStatus::Active,
            CampaignStatus::Paused => RemoteStatus::Paused,
            CampaignStatus::Failed => {
                return Err(ProvisioningError::Validation(
                    "status must be ACTIVE or PAUSED".to_string(),
                ))
            }
        };

        let campaign = self
            .campaigns
            .get(id)
            .await?
            .ok_or(ProvisioningError::NotFound(id))?;

        if campaign.user_id != requester.user_id && !requester.is_admin {
            tracing::warn!(
                %id,
                requester = %requester.user_id,
                "Unauthorized campaign status change attempt"
            );
            return Err(ProvisioningError::PermissionDenied(id));
        }

        self.platform
            .set_campaign_status(&campaign.campaign_id, remote_status)
            .await
            .map_err(|err| {
                let failure = classify(err);
                tracing::warn!(%id, "Status change rejected by ad platform: {failure}");
                ProvisioningError::StatusChangeFailed(failure)
            })?;

        let updated = self.campaigns.update_status(id, status).await?;
        tracing::info!(%id, status = ?status, requester = %requester.user_id, "Campaign status changed");
        Ok(updated)
    }
}
