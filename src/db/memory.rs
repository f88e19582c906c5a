//! In-memory stores used by the unit tests in place of Postgres.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::campaign::{CampaignStatus, CampaignStore, LocalCampaign, RemoteCampaign};
use super::ledger::{LedgerError, LedgerStore};
use super::wallet::{is_money_amount, LedgerReceipt, TransactionType, Wallet, WalletTransaction};

#[derive(Default)]
struct LedgerState {
    wallets: HashMap<Uuid, Wallet>,
    log: Vec<WalletTransaction>,
}

/// A single mutex around all wallets gives the same per-wallet
/// serialization the row lock provides in Postgres.
#[derive(Default)]
pub struct MemoryLedgerStore {
    state: Mutex<LedgerState>,
    fail_credits: AtomicBool,
    fail_debits: AtomicBool,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent credit fail with a storage error.
    pub fn fail_credits(&self, fail: bool) {
        self.fail_credits.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent debit fail with a storage error.
    pub fn fail_debits(&self, fail: bool) {
        self.fail_debits.store(fail, Ordering::SeqCst);
    }

    pub async fn mutation_count(&self) -> usize {
        self.state.lock().await.log.len()
    }

    fn entry(
        user_id: Uuid,
        amount: Decimal,
        transaction_type: TransactionType,
        description: &str,
    ) -> WalletTransaction {
        WalletTransaction {
            id: Uuid::new_v4(),
            user_id,
            amount,
            transaction_type,
            description: description.to_string(),
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn wallet(&self, user_id: Uuid) -> Result<Option<Wallet>, LedgerError> {
        Ok(self.state.lock().await.wallets.get(&user_id).cloned())
    }

    async fn credit(
        &self,
        user_id: Uuid,
        amount: Decimal,
        transaction_type: TransactionType,
        description: &str,
    ) -> Result<LedgerReceipt, LedgerError> {
        if self.fail_credits.load(Ordering::SeqCst) {
            return Err(LedgerError::Database(sqlx::Error::PoolTimedOut));
        }
        if !is_money_amount(amount) {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let mut state = self.state.lock().await;
        let now = Utc::now();
        let wallet = state.wallets.entry(user_id).or_insert_with(|| Wallet {
            user_id,
            balance: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        });
        wallet.balance += amount;
        wallet.updated_at = now;
        let balance = wallet.balance;

        let transaction = Self::entry(user_id, amount, transaction_type, description);
        state.log.push(transaction.clone());
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
        if self.fail_debits.load(Ordering::SeqCst) {
            return Err(LedgerError::Database(sqlx::Error::PoolTimedOut));
        }
        if !is_money_amount(amount) {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let mut state = self.state.lock().await;
        let wallet = state
            .wallets
            .get_mut(&user_id)
            .ok_or(LedgerError::WalletNotFound(user_id))?;
        if wallet.balance < amount {
            return Err(LedgerError::InsufficientFunds {
                balance: wallet.balance,
                requested: amount,
            });
        }
        wallet.balance -= amount;
        wallet.updated_at = Utc::now();
        let balance = wallet.balance;

        let transaction = Self::entry(user_id, amount, TransactionType::Deduction, description);
        state.log.push(transaction.clone());
        Ok(LedgerReceipt {
            transaction,
            balance,
        })
    }

    async fn transactions(&self, user_id: Uuid) -> Result<Vec<WalletTransaction>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .log
            .iter()
            .rev()
            .filter(|entry| entry.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryCampaignStore {
    campaigns: Mutex<Vec<LocalCampaign>>,
}

impl MemoryCampaignStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.campaigns.lock().await.len()
    }
}

#[async_trait]
impl CampaignStore for MemoryCampaignStore {
    async fn insert(
        &self,
        user_id: Uuid,
        remote: &RemoteCampaign,
        budget: Decimal,
        status: CampaignStatus,
    ) -> Result<LocalCampaign, sqlx::Error> {
        let now = Utc::now();
        let campaign = LocalCampaign {
            id: Uuid::new_v4(),
            user_id,
            campaign_id: remote.campaign_id.clone(),
            adset_id: remote.adset_id.clone(),
            ad_id: remote.ad_id.clone(),
            budget,
            status,
            created_at: now,
            updated_at: now,
        };
        self.campaigns.lock().await.push(campaign.clone());
        Ok(campaign)
    }

    async fn get(&self, id: Uuid) -> Result<Option<LocalCampaign>, sqlx::Error> {
        let campaigns = self.campaigns.lock().await;
        Ok(campaigns.iter().find(|c| c.id == id).cloned())
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<LocalCampaign>, sqlx::Error> {
        let campaigns = self.campaigns.lock().await;
        Ok(campaigns
            .iter()
            .rev()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: CampaignStatus,
    ) -> Result<LocalCampaign, sqlx::Error> {
        let mut campaigns = self.campaigns.lock().await;
        let campaign = campaigns
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(sqlx::Error::RowNotFound)?;
        campaign.status = status;
        campaign.updated_at = Utc::now();
        Ok(campaign.clone())
    }
}
