use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::wallet::{is_money_amount, LedgerReceipt, TransactionType, Wallet, WalletTransaction};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("no wallet exists for user {0}")]
    WalletNotFound(Uuid),

    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: Decimal, requested: Decimal },

    #[error("amount must be positive with at most two decimal places, got {0}")]
    InvalidAmount(Decimal),

    #[error("ledger storage failure: {0}")]
    Database(#[from] sqlx::Error),
}

/// Durable wallet balances plus their transaction log.
///
/// Every mutation updates the balance and appends exactly one
/// [`WalletTransaction`] in the same atomic unit. Mutations of one wallet are
/// serialized by the store.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn wallet(&self, user_id: Uuid) -> Result<Option<Wallet>, LedgerError>;

    /// Increments the balance, creating the wallet if it does not exist yet.
    async fn credit(
        &self,
        user_id: Uuid,
        amount: Decimal,
        transaction_type: TransactionType,
        description: &str,
    ) -> Result<LedgerReceipt, LedgerError>;

    /// Re-reads the balance under lock and decrements it, failing with
    /// `InsufficientFunds` instead of going below zero.
    async fn debit(
        &self,
        user_id: Uuid,
        amount: Decimal,
        description: &str,
    ) -> Result<LedgerReceipt, LedgerError>;

    /// Ledger entries for the user, newest first.
    async fn transactions(&self, user_id: Uuid) -> Result<Vec<WalletTransaction>, LedgerError>;
}

pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const TRANSACTION_COLUMNS: &str = "id, user_id, amount, transaction_type, description, created_at";

async fn append_transaction(
    conn: &mut PgConnection,
    user_id: Uuid,
    amount: Decimal,
    transaction_type: TransactionType,
    description: &str,
) -> Result<WalletTransaction, sqlx::Error> {
    let sql = format!(
        "INSERT INTO wallet_transactions (user_id, amount, transaction_type, description) \
         VALUES ($1, $2, $3, $4) RETURNING {TRANSACTION_COLUMNS}"
    );
    sqlx::query_as::<_, WalletTransaction>(&sql)
        .bind(user_id)
        .bind(amount)
        .bind(transaction_type)
        .bind(description)
        .fetch_one(conn)
        .await
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn wallet(&self, user_id: Uuid) -> Result<Option<Wallet>, LedgerError> {
        let wallet = sqlx::query_as::<_, Wallet>(
            "SELECT user_id, balance, created_at, updated_at FROM wallets WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(wallet)
    }

    async fn credit(
        &self,
        user_id: Uuid,
        amount: Decimal,
        transaction_type: TransactionType,
        description: &str,
    ) -> Result<LedgerReceipt, LedgerError> {
        if !is_money_amount(amount) {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let mut tx = self.pool.begin().await?;

        // the upsert takes the row lock for the rest of the transaction
        let balance: Decimal = sqlx::query_scalar(
            r#"
            INSERT INTO wallets (user_id, balance)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE
                SET balance = wallets.balance + EXCLUDED.balance,
                    updated_at = CURRENT_TIMESTAMP
            RETURNING balance
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .fetch_one(&mut *tx)
        .await?;

        let transaction =
            append_transaction(&mut *tx, user_id, amount, transaction_type, description).await?;

        tx.commit().await?;
        Ok(LedgerReceipt {
            transaction,
            balance,
        })
    }

    async fn debit(
        &self,
        user_id: Uuid,
        amount: Decimal,
        description: &str,
    ) -> Result<LedgerReceipt, LedgerError> {
        if !is_money_amount(amount) {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let mut tx = self.pool.begin().await?;

        let current: Option<Decimal> =
            sqlx::query_scalar("SELECT balance FROM wallets WHERE user_id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;

        // dropping `tx` on the early returns rolls back and releases the lock
        let current = current.ok_or(LedgerError::WalletNotFound(user_id))?;
        if current < amount {
            return Err(LedgerError::InsufficientFunds {
                balance: current,
                requested: amount,
            });
        }

        let balance: Decimal = sqlx::query_scalar(
            r#"
            UPDATE wallets
            SET balance = balance - $1, updated_at = CURRENT_TIMESTAMP
            WHERE user_id = $2
            RETURNING balance
            "#,
        )
        .bind(amount)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        let transaction =
            append_transaction(&mut *tx, user_id, amount, TransactionType::Deduction, description)
                .await?;

        tx.commit().await?;
        Ok(LedgerReceipt {
            transaction,
            balance,
        })
    }

    async fn transactions(&self, user_id: Uuid) -> Result<Vec<WalletTransaction>, LedgerError> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM wallet_transactions \
             WHERE user_id = $1 ORDER BY created_at DESC"
        );
        let entries = sqlx::query_as::<_, WalletTransaction>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(entries)
    }
}
