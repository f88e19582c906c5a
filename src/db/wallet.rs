use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Wallet {
    pub user_id: Uuid,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only ledger entry. `amount` is always a positive magnitude, the sign
/// comes from `transaction_type`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub transaction_type: TransactionType,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl WalletTransaction {
    pub fn signed_amount(&self) -> Decimal {
        if self.transaction_type.is_credit() {
            self.amount
        } else {
            -self.amount
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "wallet_transaction_type", rename_all = "lowercase")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Deposit,
    Deduction,
    Refund,
    Topup,
}

impl TransactionType {
    pub fn is_credit(self) -> bool {
        !matches!(self, TransactionType::Deduction)
    }
}

/// Result of a committed wallet mutation: the ledger entry plus the balance it produced.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerReceipt {
    pub transaction: WalletTransaction,
    pub balance: Decimal,
}

/// Decimal places stored by the money columns.
pub const MONEY_SCALE: u32 = 2;

/// Whether `amount` is a positive value that Postgres stores without rounding.
pub fn is_money_amount(amount: Decimal) -> bool {
    amount > Decimal::ZERO && amount.normalize().scale() <= MONEY_SCALE
}

/// Sum of the signed ledger entries; equals the stored balance for a consistent wallet.
pub fn reconstruct_balance<'a>(entries: impl IntoIterator<Item = &'a WalletTransaction>) -> Decimal {
    entries
        .into_iter()
        .map(WalletTransaction::signed_amount)
        .sum()
}
