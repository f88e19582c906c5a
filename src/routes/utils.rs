use axum::{
    body::Body,
    http::{header::AUTHORIZATION, HeaderMap, Request, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use super::auth::AuthService;
use crate::db::ledger::LedgerError;
use crate::provisioning::{OrphanedObject, ProvisioningError, Requester};

#[inline]
pub fn validate_auth_token(headers: &HeaderMap, service: &AuthService) -> Result<Requester, StatusCode> {
    let jwt_header_token = match headers.get(AUTHORIZATION).map(|token| token.to_str()) {
        Some(Ok(token)) => token.strip_prefix("Bearer ").unwrap_or(token),
        _ => {
            return Err(StatusCode::UNAUTHORIZED);
        }
    };
    //validate our token
    match service.verify_token(jwt_header_token) {
        Ok(requester) => Ok(requester),
        Err(_) => Err(StatusCode::UNAUTHORIZED),
    }
}

// rejects requests that carry no Authorization header before they reach a handler
pub fn require_authorization(request: &mut Request<Body>) -> Result<(), Response> {
    if request.headers().contains_key(AUTHORIZATION) {
        Ok(())
    } else {
        Err(StatusCode::UNAUTHORIZED.into_response())
    }
}

#[inline]
pub fn ledger_error_response(err: &LedgerError) -> (StatusCode, String) {
    let status = match err {
        LedgerError::WalletNotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
        LedgerError::InvalidAmount(_) => StatusCode::BAD_REQUEST,
        LedgerError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let message = match err {
        LedgerError::Database(_) => "Wallet storage is unavailable".to_string(),
        other => other.to_string(),
    };
    (status, message)
}

/// Error body returned by the campaign endpoints. For submissions it always
/// says whether money was taken and whether the promotion exists.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charged: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promotion_created: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refunded: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub orphans: Vec<OrphanedObject>,
}

impl ErrorBody {
    pub fn simple(error: &'static str, message: impl Into<String>) -> Self {
        Self {
            error,
            message: message.into(),
            charged: None,
            promotion_created: None,
            refunded: None,
            reason: None,
            explanation: None,
            detail: None,
            orphans: Vec::new(),
        }
    }
}

pub type ApiError = (StatusCode, Json<ErrorBody>);

pub fn provisioning_status(err: &ProvisioningError) -> StatusCode {
    match err {
        ProvisioningError::Validation(_) => StatusCode::BAD_REQUEST,
        ProvisioningError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
        ProvisioningError::DeductionFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        ProvisioningError::UpstreamCreationFailed { .. } => StatusCode::BAD_GATEWAY,
        ProvisioningError::CompensationFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        ProvisioningError::PersistenceFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        ProvisioningError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        ProvisioningError::NotFound(_) => StatusCode::NOT_FOUND,
        ProvisioningError::StatusChangeFailed(_) => StatusCode::BAD_GATEWAY,
        ProvisioningError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn provisioning_error_response(err: &ProvisioningError) -> ApiError {
    let submission = !matches!(
        err,
        ProvisioningError::PermissionDenied(_)
            | ProvisioningError::NotFound(_)
            | ProvisioningError::StatusChangeFailed(_)
            | ProvisioningError::Storage(_)
    );

    let mut body = ErrorBody::simple(err.kind(), err.to_string());
    if submission {
        body.charged = Some(err.charged());
        body.promotion_created = Some(err.promotion_created());
        body.refunded = err.refunded();
    }
    if let Some(failure) = err.upstream() {
        body.reason = Some(failure.reason());
        body.explanation = Some(failure.explanation());
        body.detail = failure.detail().map(str::to_string);
    }
    body.orphans = err.orphans().to_vec();

    (provisioning_status(err), Json(body))
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::platform::UpstreamError;
    use crate::provisioning::classify::classify;

    #[test]
    fn refunded_failure_reports_money_returned() {
        let err = ProvisioningError::UpstreamCreationFailed {
            failure: classify(UpstreamError::new("No payment method on this ad account")),
            amount: Decimal::from(50),
            orphans: vec![OrphanedObject {
                kind: "campaign",
                id: "c-1".into(),
            }],
        };

        let (status, Json(body)) = provisioning_error_response(&err);

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body.error, "upstream_creation_failed");
        assert_eq!(body.charged, Some(false));
        assert_eq!(body.promotion_created, Some(false));
        assert_eq!(body.refunded, Some(true));
        assert_eq!(body.reason, Some("payment_method"));
        assert!(body.detail.is_none());
        assert_eq!(body.orphans.len(), 1);
    }

    #[test]
    fn insufficient_funds_maps_to_payment_required() {
        let err = ProvisioningError::InsufficientFunds {
            required: Decimal::from(100),
        };
        let (status, Json(body)) = provisioning_error_response(&err);
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body.charged, Some(false));
        assert!(body.refunded.is_none());
    }

    #[test]
    fn permission_errors_carry_no_money_fields() {
        let err = ProvisioningError::PermissionDenied(uuid::Uuid::new_v4());
        let (status, Json(body)) = provisioning_error_response(&err);
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body.charged.is_none());
    }

    #[test]
    fn bearer_prefix_is_optional() {
        let service = AuthService::new("secret".into());
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer not-a-jwt".parse().unwrap());
        assert_eq!(
            validate_auth_token(&headers, &service).unwrap_err(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            validate_auth_token(&HeaderMap::new(), &service).unwrap_err(),
            StatusCode::UNAUTHORIZED
        );
    }
}
