//! In-memory storage implementation.
//!
//! Every operation takes the write lock for its whole read-modify-write, so
//! each call is atomic in the same way as the SQL statement it stands in for.
//! A few switches let tests force the failure paths the Postgres backend can
//! hit: a missing `deduct_credits` function, lost compare-and-set races,
//! failing credit grants and failing transaction-log writes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use cvmatch_core::{
    CreditAccount, CreditTransaction, SubscriptionTier, UsageMonth, UsageRecord, UserId,
    WebhookEvent, WebhookStatus,
};

use crate::error::{Result, StoreError};
use crate::{AtomicDeduction, Store};

#[derive(Default)]
struct Tables {
    accounts: HashMap<UserId, CreditAccount>,
    usage: HashMap<(UserId, UsageMonth), UsageRecord>,
    transactions: Vec<CreditTransaction>,
    webhook_events: HashMap<String, WebhookEvent>,
}

/// Process-local storage backend.
pub struct MemoryStore {
    tables: RwLock<Tables>,
    procedure_available: AtomicBool,
    pending_cas_conflicts: AtomicU32,
    fail_transaction_writes: AtomicBool,
    fail_credit_grants: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            procedure_available: AtomicBool::new(true),
            pending_cas_conflicts: AtomicU32::new(0),
            fail_transaction_writes: AtomicBool::new(false),
            fail_credit_grants: AtomicBool::new(false),
        }
    }

    /// Make `deduct_credits_atomic` report the procedure as missing.
    pub fn set_procedure_available(&self, available: bool) {
        self.procedure_available.store(available, Ordering::SeqCst);
    }

    /// Make the next `count` compare-and-set calls miss.
    pub fn inject_cas_conflicts(&self, count: u32) {
        self.pending_cas_conflicts.store(count, Ordering::SeqCst);
    }

    /// Make `append_transaction` fail.
    pub fn set_fail_transaction_writes(&self, fail: bool) {
        self.fail_transaction_writes.store(fail, Ordering::SeqCst);
    }

    /// Make `add_credits` fail.
    pub fn set_fail_credit_grants(&self, fail: bool) {
        self.fail_credit_grants.store(fail, Ordering::SeqCst);
    }

    /// Overwrite an account's balance. Used to seed fixtures.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the account doesn't exist.
    pub async fn set_balance(&self, user_id: &UserId, balance: i64) -> Result<()> {
        let mut tables = self.tables.write().await;
        let account = tables
            .accounts
            .get_mut(user_id)
            .ok_or_else(|| StoreError::account_not_found(user_id))?;
        account.credits_remaining = balance;
        account.updated_at = Utc::now();
        Ok(())
    }

    fn take_cas_conflict(&self) -> bool {
        self.pending_cas_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn webhook_not_found(id: &str) -> StoreError {
    StoreError::NotFound {
        entity: "webhook event",
        id: id.to_string(),
    }
}

fn transition_error(event: &WebhookEvent, next: WebhookStatus) -> StoreError {
    StoreError::Database(format!(
        "webhook event {} cannot move from {} to {next}",
        event.external_event_id, event.status
    ))
}

#[async_trait]
impl Store for MemoryStore {
    // =========================================================================
    // Account Operations
    // =========================================================================

    async fn get_account(&self, user_id: &UserId) -> Result<Option<CreditAccount>> {
        Ok(self.tables.read().await.accounts.get(user_id).cloned())
    }

    async fn get_or_create_account(
        &self,
        user_id: &UserId,
        initial_credits: i64,
    ) -> Result<CreditAccount> {
        let mut tables = self.tables.write().await;
        let account = tables
            .accounts
            .entry(*user_id)
            .or_insert_with(|| CreditAccount::new(*user_id, initial_credits));
        Ok(account.clone())
    }

    async fn deduct_credits_atomic(
        &self,
        user_id: &UserId,
        amount: i64,
    ) -> Result<AtomicDeduction> {
        if !self.procedure_available.load(Ordering::SeqCst) {
            return Err(StoreError::ProcedureUnavailable(
                "function deduct_credits(uuid, bigint) does not exist".to_string(),
            ));
        }

        let mut tables = self.tables.write().await;
        let Some(account) = tables.accounts.get_mut(user_id) else {
            return Ok(AtomicDeduction::AccountMissing);
        };
        if account.credits_remaining < amount {
            return Ok(AtomicDeduction::Insufficient {
                balance: account.credits_remaining,
            });
        }
        account.credits_remaining -= amount;
        account.updated_at = Utc::now();
        Ok(AtomicDeduction::Applied {
            balance_after: account.credits_remaining,
        })
    }

    async fn compare_and_set_credits(
        &self,
        user_id: &UserId,
        expected: i64,
        new_balance: i64,
    ) -> Result<bool> {
        if new_balance < 0 {
            return Err(StoreError::Database(
                "credits_remaining violates check constraint".to_string(),
            ));
        }
        if self.take_cas_conflict() {
            return Ok(false);
        }

        let mut tables = self.tables.write().await;
        match tables.accounts.get_mut(user_id) {
            Some(account) if account.credits_remaining == expected => {
                account.credits_remaining = new_balance;
                account.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn add_credits(
        &self,
        user_id: &UserId,
        amount: i64,
        increase_total: bool,
    ) -> Result<i64> {
        if self.fail_credit_grants.load(Ordering::SeqCst) {
            return Err(StoreError::Database(
                "credit_accounts is unavailable".to_string(),
            ));
        }
        let mut tables = self.tables.write().await;
        let account = tables
            .accounts
            .get_mut(user_id)
            .ok_or_else(|| StoreError::account_not_found(user_id))?;
        account.credits_remaining += amount;
        if increase_total {
            account.total_credits += amount;
        }
        account.updated_at = Utc::now();
        Ok(account.credits_remaining)
    }

    async fn set_subscription(
        &self,
        user_id: &UserId,
        tier: SubscriptionTier,
    ) -> Result<CreditAccount> {
        let mut tables = self.tables.write().await;
        let account = tables
            .accounts
            .get_mut(user_id)
            .ok_or_else(|| StoreError::account_not_found(user_id))?;
        account.set_tier(tier);
        Ok(account.clone())
    }

    // =========================================================================
    // Usage Operations
    // =========================================================================

    async fn get_usage(&self, user_id: &UserId, month: UsageMonth) -> Result<UsageRecord> {
        Ok(self
            .tables
            .read()
            .await
            .usage
            .get(&(*user_id, month))
            .cloned()
            .unwrap_or_else(|| UsageRecord::empty(*user_id, month)))
    }

    async fn try_consume_free_optimization(
        &self,
        user_id: &UserId,
        month: UsageMonth,
        limit: u32,
    ) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let record = tables
            .usage
            .entry((*user_id, month))
            .or_insert_with(|| UsageRecord::empty(*user_id, month));
        if record.free_optimizations_used >= limit {
            return Ok(false);
        }
        record.free_optimizations_used += 1;
        Ok(true)
    }

    async fn record_paid_optimization(
        &self,
        user_id: &UserId,
        month: UsageMonth,
    ) -> Result<UsageRecord> {
        let mut tables = self.tables.write().await;
        let record = tables
            .usage
            .entry((*user_id, month))
            .or_insert_with(|| UsageRecord::empty(*user_id, month));
        record.paid_optimizations_used += 1;
        Ok(record.clone())
    }

    // =========================================================================
    // Transaction Operations
    // =========================================================================

    async fn append_transaction(&self, transaction: &CreditTransaction) -> Result<()> {
        if self.fail_transaction_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Database(
                "credit_transactions is unavailable".to_string(),
            ));
        }
        self.tables
            .write()
            .await
            .transactions
            .push(transaction.clone());
        Ok(())
    }

    async fn list_transactions(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>> {
        let tables = self.tables.read().await;
        Ok(tables
            .transactions
            .iter()
            .rev()
            .filter(|tx| tx.user_id == *user_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    // =========================================================================
    // Webhook Journal Operations
    // =========================================================================

    async fn get_webhook_event(&self, external_event_id: &str) -> Result<Option<WebhookEvent>> {
        Ok(self
            .tables
            .read()
            .await
            .webhook_events
            .get(external_event_id)
            .cloned())
    }

    async fn insert_webhook_event(&self, event: &WebhookEvent) -> Result<bool> {
        let mut tables = self.tables.write().await;
        if tables
            .webhook_events
            .contains_key(&event.external_event_id)
        {
            return Ok(false);
        }
        tables
            .webhook_events
            .insert(event.external_event_id.clone(), event.clone());
        Ok(true)
    }

    async fn claim_webhook_event(
        &self,
        external_event_id: &str,
        stale_before: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .webhook_events
            .get_mut(external_event_id)
            .is_some_and(|event| event.reclaim(stale_before)))
    }

    async fn mark_webhook_processed(
        &self,
        external_event_id: &str,
        processing_time_ms: i64,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        let event = tables
            .webhook_events
            .get_mut(external_event_id)
            .ok_or_else(|| webhook_not_found(external_event_id))?;
        if !event.mark_processed(processing_time_ms) {
            return Err(transition_error(event, WebhookStatus::Processed));
        }
        Ok(())
    }

    async fn mark_webhook_failed(
        &self,
        external_event_id: &str,
        error: &str,
        processing_time_ms: i64,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        let event = tables
            .webhook_events
            .get_mut(external_event_id)
            .ok_or_else(|| webhook_not_found(external_event_id))?;
        if !event.mark_failed(error, processing_time_ms) {
            return Err(transition_error(event, WebhookStatus::Failed));
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
