use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::db::ledger::{LedgerError, LedgerStore};
use crate::db::wallet::{
    is_money_amount, reconstruct_balance, LedgerReceipt, TransactionType, Wallet, WalletTransaction,
};

/// Stored balance compared against the balance replayed from the ledger.
#[derive(Debug, Serialize)]
pub struct Reconciliation {
    pub user_id: Uuid,
    pub stored_balance: Decimal,
    pub ledger_balance: Decimal,
    pub entries: usize,
    pub consistent: bool,
}

pub struct WalletService {
    store: Arc<dyn LedgerStore>,
}

impl WalletService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Advisory only: `deduct` re-validates under the wallet lock.
    /// A user without a wallet has nothing to spend.
    pub async fn check_balance(&self, user_id: Uuid, amount: Decimal) -> Result<bool, LedgerError> {
        if !is_money_amount(amount) {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let balance = self
            .store
            .wallet(user_id)
            .await?
            .map(|wallet| wallet.balance)
            .unwrap_or(Decimal::ZERO);
        Ok(balance >= amount)
    }

    pub async fn deduct(
        &self,
        user_id: Uuid,
        amount: Decimal,
        reference: &str,
    ) -> Result<LedgerReceipt, LedgerError> {
        let receipt = self.store.debit(user_id, amount, reference).await?;
        tracing::info!(
            %user_id,
            %amount,
            balance = %receipt.balance,
            "Deducted funds: {reference}"
        );
        Ok(receipt)
    }

    pub async fn refund(
        &self,
        user_id: Uuid,
        amount: Decimal,
        reason: &str,
    ) -> Result<LedgerReceipt, LedgerError> {
        let description = format!("Refund: {reason}");
        let receipt = self
            .store
            .credit(user_id, amount, TransactionType::Refund, &description)
            .await?;
        tracing::info!(%user_id, %amount, balance = %receipt.balance, "Refunded funds");
        Ok(receipt)
    }

    /// User-initiated credit. Creates the wallet if needed.
    pub async fn deposit(
        &self,
        user_id: Uuid,
        amount: Decimal,
        reference: Option<&str>,
    ) -> Result<LedgerReceipt, LedgerError> {
        let description = match reference {
            Some(reference) => format!("Deposit: {reference}"),
            None => "Deposit".to_string(),
        };
        let receipt = self
            .store
            .credit(user_id, amount, TransactionType::Deposit, &description)
            .await?;
        tracing::info!(%user_id, %amount, balance = %receipt.balance, "Deposit recorded");
        Ok(receipt)
    }

    /// Administrative credit, attributed to the acting admin.
    pub async fn add_funds(
        &self,
        user_id: Uuid,
        amount: Decimal,
        admin_id: Uuid,
        reference: Option<&str>,
    ) -> Result<LedgerReceipt, LedgerError> {
        let mut description = format!("Top-up by admin {admin_id}");
        if let Some(reference) = reference {
            description.push_str(": ");
            description.push_str(reference);
        }
        let receipt = self
            .store
            .credit(user_id, amount, TransactionType::Topup, &description)
            .await?;
        tracing::info!(%user_id, %admin_id, %amount, balance = %receipt.balance, "Admin top-up recorded");
        Ok(receipt)
    }

    pub async fn balance(&self, user_id: Uuid) -> Result<Wallet, LedgerError> {
        self.store
            .wallet(user_id)
            .await?
            .ok_or(LedgerError::WalletNotFound(user_id))
    }

    pub async fn history(&self, user_id: Uuid) -> Result<Vec<WalletTransaction>, LedgerError> {
        self.store.transactions(user_id).await
    }

    pub async fn reconcile(&self, user_id: Uuid) -> Result<Reconciliation, LedgerError> {
        let wallet = self.balance(user_id).await?;
        let entries = self.store.transactions(user_id).await?;
        let ledger_balance = reconstruct_balance(&entries);
        let consistent = ledger_balance == wallet.balance;
        if !consistent {
            tracing::error!(
                %user_id,
                stored = %wallet.balance,
                ledger = %ledger_balance,
                "Wallet balance does not match its ledger"
            );
        }
        Ok(Reconciliation {
            user_id,
            stored_balance: wallet.balance,
            ledger_balance,
            entries: entries.len(),
            consistent,
        })
    }
}
