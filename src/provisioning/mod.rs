//! Campaign provisioning: charge the wallet, create the promotion on the ad
//! platform, and refund if any remote step fails.

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::db::campaign::RemoteCampaign;
use crate::db::ledger::LedgerError;

pub mod classify;
pub mod request;
pub mod saga;

pub use classify::UpstreamFailure;
pub use request::CampaignRequest;
pub use saga::CampaignProvisioner;

/// Authenticated caller of a provisioning operation.
#[derive(Debug, Clone, Copy)]
pub struct Requester {
    pub user_id: Uuid,
    pub is_admin: bool,
}

/// A remote object created before the saga failed. It stays paused on the
/// platform and is reported so an operator can remove it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanedObject {
    pub kind: &'static str,
    pub id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ProvisioningError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("insufficient funds: {required} required")]
    InsufficientFunds { required: Decimal },

    #[error("could not reserve funds: {0}")]
    DeductionFailed(LedgerError),

    #[error("promotion could not be created: {failure}. {amount} was returned to your wallet")]
    UpstreamCreationFailed {
        failure: UpstreamFailure,
        amount: Decimal,
        orphans: Vec<OrphanedObject>,
    },

    #[error(
        "promotion could not be created: {failure}. Refunding {amount} failed ({refund_error}); \
         the amount is still debited"
    )]
    CompensationFailed {
        failure: UpstreamFailure,
        amount: Decimal,
        refund_error: LedgerError,
        orphans: Vec<OrphanedObject>,
    },

    #[error("promotion was created and charged but could not be recorded: {source}")]
    PersistenceFailed {
        remote: RemoteCampaign,
        source: sqlx::Error,
    },

    #[error("not allowed to manage campaign {0}")]
    PermissionDenied(Uuid),

    #[error("campaign {0} not found")]
    NotFound(Uuid),

    #[error("ad platform rejected the status change: {0}")]
    StatusChangeFailed(UpstreamFailure),

    #[error("campaign storage failure: {0}")]
    Storage(#[from] sqlx::Error),
}

impl ProvisioningError {
    /// Machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ProvisioningError::Validation(_) => "validation_error",
            ProvisioningError::InsufficientFunds { .. } => "insufficient_funds",
            ProvisioningError::DeductionFailed(_) => "deduction_failed",
            ProvisioningError::UpstreamCreationFailed { .. } => "upstream_creation_failed",
            ProvisioningError::CompensationFailed { .. } => "compensation_failed",
            ProvisioningError::PersistenceFailed { .. } => "persistence_failed",
            ProvisioningError::PermissionDenied(_) => "permission_denied",
            ProvisioningError::NotFound(_) => "not_found",
            ProvisioningError::StatusChangeFailed(_) => "status_change_failed",
            ProvisioningError::Storage(_) => "storage_error",
        }
    }

    /// Whether the user's money is still taken after this error.
    pub fn charged(&self) -> bool {
        matches!(
            self,
            ProvisioningError::CompensationFailed { .. } | ProvisioningError::PersistenceFailed { .. }
        )
    }

    /// Whether the promotion exists on the ad platform.
    pub fn promotion_created(&self) -> bool {
        matches!(self, ProvisioningError::PersistenceFailed { .. })
    }

    /// Outcome of the refund, for errors raised after funds were deducted.
    pub fn refunded(&self) -> Option<bool> {
        match self {
            ProvisioningError::UpstreamCreationFailed { .. } => Some(true),
            ProvisioningError::CompensationFailed { .. } => Some(false),
            _ => None,
        }
    }

    pub fn upstream(&self) -> Option<&UpstreamFailure> {
        match self {
            ProvisioningError::UpstreamCreationFailed { failure, .. }
            | ProvisioningError::CompensationFailed { failure, .. }
            | ProvisioningError::StatusChangeFailed(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn orphans(&self) -> &[OrphanedObject] {
        match self {
            ProvisioningError::UpstreamCreationFailed { orphans, .. }
            | ProvisioningError::CompensationFailed { orphans, .. } => orphans,
            _ => &[],
        }
    }
}
