use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{sse::Event, IntoResponse, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use super::{auth::AuthService, utils};
use crate::wallet::WalletService;

type WalletState = (Arc<AuthService>, Arc<WalletService>);

#[derive(Debug, Deserialize)]
pub struct Credit {
    pub amount: Decimal,
    pub reference: Option<String>,
}

async fn get_wallet(
    headers: HeaderMap,
    State((service, wallet)): State<WalletState>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let requester = match utils::validate_auth_token(&headers, &service) {
        Ok(val) => val,
        Err(err) => {
            tracing::error!("Token validation failed: {:?}", err);
            return Err((err, "Invalid token".to_string()));
        }
    };

    match wallet.balance(requester.user_id).await {
        Ok(wallet) => Ok((StatusCode::OK, Json(wallet))),
        Err(err) => {
            tracing::warn!("Failed to load wallet for {}: {err}", requester.user_id);
            Err(utils::ledger_error_response(&err))
        }
    }
}

// streams the caller's ledger, newest entry first
async fn list_transactions(
    headers: HeaderMap,
    State((service, wallet)): State<WalletState>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let requester = match utils::validate_auth_token(&headers, &service) {
        Ok(val) => val,
        Err(err) => {
            return Err((err, "Invalid token".to_string()));
        }
    };

    let entries = match wallet.history(requester.user_id).await {
        Ok(entries) => entries,
        Err(err) => {
            tracing::error!("Failed to retrieve wallet transactions: {err}");
            return Err(utils::ledger_error_response(&err));
        }
    };

    let stream = futures::stream::iter(entries).map(|entry| Event::default().json_data(entry));

    let sse = Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(std::time::Duration::from_secs(2))
            .text("keep-alive-text"),
    );

    Ok(sse)
}

async fn deposit(
    headers: HeaderMap,
    State((service, wallet)): State<WalletState>,
    Json(payload): Json<Credit>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let requester = match utils::validate_auth_token(&headers, &service) {
        Ok(val) => val,
        Err(err) => {
            return Err((err, "Invalid token".to_string()));
        }
    };

    match wallet
        .deposit(requester.user_id, payload.amount, payload.reference.as_deref())
        .await
    {
        Ok(receipt) => Ok((StatusCode::OK, Json(receipt))),
        Err(err) => {
            tracing::warn!("Deposit rejected for {}: {err}", requester.user_id);
            Err(utils::ledger_error_response(&err))
        }
    }
}

async fn top_up(
    headers: HeaderMap,
    State((service, wallet)): State<WalletState>,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<Credit>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let requester = match utils::validate_auth_token(&headers, &service) {
        Ok(val) => val,
        Err(err) => {
            return Err((err, "Invalid token".to_string()));
        }
    };

    if !requester.is_admin {
        tracing::warn!("Unauthorized top-up attempt by user: {}", requester.user_id);
        return Err((StatusCode::FORBIDDEN, "Admin privileges required".to_string()));
    }

    match wallet
        .add_funds(user_id, payload.amount, requester.user_id, payload.reference.as_deref())
        .await
    {
        Ok(receipt) => Ok((StatusCode::OK, Json(receipt))),
        Err(err) => {
            tracing::error!("Admin top-up for {user_id} failed: {err}");
            Err(utils::ledger_error_response(&err))
        }
    }
}

async fn reconcile(
    headers: HeaderMap,
    State((service, wallet)): State<WalletState>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let requester = match utils::validate_auth_token(&headers, &service) {
        Ok(val) => val,
        Err(err) => {
            return Err((err, "Invalid token".to_string()));
        }
    };

    if !requester.is_admin {
        return Err((StatusCode::FORBIDDEN, "Admin privileges required".to_string()));
    }

    match wallet.reconcile(user_id).await {
        Ok(report) => Ok((StatusCode::OK, Json(report))),
        Err(err) => Err(utils::ledger_error_response(&err)),
    }
}

pub fn wallet_routes(service: Arc<AuthService>, wallet: Arc<WalletService>) -> Router {
    Router::new()
        .route("/wallet", get(get_wallet))
        .route("/wallet/transactions", get(list_transactions))
        .route("/wallet/deposit", post(deposit))
        .route("/admin/wallets/:user_id/topup", post(top_up))
        .route("/admin/wallets/:user_id/reconcile", get(reconcile))
        .with_state((service, wallet))
}
