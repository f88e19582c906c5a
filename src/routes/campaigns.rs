use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use super::{
    auth::AuthService,
    utils::{self, ApiError, ErrorBody},
};
use crate::db::campaign::CampaignStatus;
use crate::provisioning::{CampaignProvisioner, CampaignRequest};

type CampaignState = (Arc<AuthService>, Arc<CampaignProvisioner>);

fn unauthorized(status: StatusCode) -> ApiError {
    (status, Json(ErrorBody::simple("unauthorized", "Invalid token")))
}

async fn submit_campaign(
    headers: HeaderMap,
    State((service, provisioner)): State<CampaignState>,
    Json(request): Json<CampaignRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let requester = match utils::validate_auth_token(&headers, &service) {
        Ok(val) => val,
        Err(err) => {
            tracing::error!("Token validation failed: {:?}", err);
            return Err(unauthorized(err));
        }
    };

    tracing::info!("Starting campaign provisioning for user: {}", requester.user_id);

    // the saga runs on its own task so a dropped connection cannot stop it
    // between the deduction and the refund
    let user_id = requester.user_id;
    let saga = tokio::spawn(async move { provisioner.submit_campaign(request, user_id).await });

    match saga.await {
        Ok(Ok(campaign)) => Ok((StatusCode::CREATED, Json(campaign))),
        Ok(Err(err)) => {
            tracing::warn!("Campaign provisioning failed for user {user_id}: {err}");
            Err(utils::provisioning_error_response(&err))
        }
        Err(err) => {
            tracing::error!(
                target: "provisioning::critical",
                alert = "saga_aborted",
                %user_id,
                "Provisioning task aborted: {err}"
            );
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody::simple("internal_error", "Provisioning was interrupted")),
            ))
        }
    }
}

async fn list_campaigns(
    headers: HeaderMap,
    State((service, provisioner)): State<CampaignState>,
) -> Result<impl IntoResponse, ApiError> {
    let requester = match utils::validate_auth_token(&headers, &service) {
        Ok(val) => val,
        Err(err) => {
            return Err(unauthorized(err));
        }
    };

    match provisioner.list_campaigns(requester.user_id).await {
        Ok(campaigns) => Ok((StatusCode::OK, Json(campaigns))),
        Err(err) => {
            tracing::error!("Failed to list campaigns: {err}");
            Err(utils::provisioning_error_response(&err))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusChange {
    pub status: CampaignStatus,
}

async fn change_status(
    headers: HeaderMap,
    State((service, provisioner)): State<CampaignState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<StatusChange>,
) -> Result<impl IntoResponse, ApiError> {
    let requester = match utils::validate_auth_token(&headers, &service) {
        Ok(val) => val,
        Err(err) => {
            return Err(unauthorized(err));
        }
    };

    match provisioner.toggle_status(id, payload.status, &requester).await {
        Ok(campaign) => Ok((StatusCode::OK, Json(campaign))),
        Err(err) => Err(utils::provisioning_error_response(&err)),
    }
}

pub fn campaign_routes(service: Arc<AuthService>, provisioner: Arc<CampaignProvisioner>) -> Router {
    Router::new()
        .route("/campaigns", post(submit_campaign).get(list_campaigns))
        .route("/campaigns/:id/status", post(change_status))
        .with_state((service, provisioner))
}
