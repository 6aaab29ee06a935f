//! Credit ledger orchestration.
//!
//! Balance changes go through the store as single conditional statements.
//! Deductions try the `deduct_credits` database function first and fall
//! back to read + compare-and-set when it is not installed. Transaction log
//! appends are best effort: a failed append is logged and the balance change
//! stands.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use cvmatch_core::{
    check_usage_limit, BillingError, CreditAccount, CreditTransaction, Result, TransactionId,
    TransactionSource, TransactionType, UsageCharge, UsageDecision, UsageMonth, UsagePolicy,
    UsageReason, UsageRecord, UserId,
};
use cvmatch_store::{AtomicDeduction, Store, StoreError};

/// Extra compare-and-set attempts after the first miss.
pub const OPTIMISTIC_RETRY_LIMIT: u32 = 1;

/// Which mechanism applied a deduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeductionPath {
    /// The `deduct_credits` database function.
    Atomic,
    /// Read + compare-and-set fallback.
    Optimistic,
}

/// A completed deduction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Deduction {
    /// Credits removed.
    pub amount: i64,
    /// Balance after the deduction.
    pub balance_after: i64,
    /// Caller's operation id.
    pub operation_id: String,
    /// Log entry, absent if the append failed.
    pub transaction_id: Option<TransactionId>,
    /// How the balance was changed.
    pub path: DeductionPath,
}

/// Credits to add to an account.
#[derive(Debug, Clone)]
pub struct CreditGrant {
    user_id: UserId,
    amount: i64,
    transaction_type: TransactionType,
    source: TransactionSource,
    operation_id: Option<String>,
    description: String,
    metadata: serde_json::Value,
}

impl CreditGrant {
    /// Credits bought through Stripe.
    #[must_use]
    pub fn purchase(
        user_id: UserId,
        amount: i64,
        operation_id: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            amount,
            transaction_type: TransactionType::Purchase,
            source: TransactionSource::Stripe,
            operation_id: Some(operation_id.into()),
            description: description.into(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Credits returned after a failed operation.
    #[must_use]
    pub fn refund(
        user_id: UserId,
        amount: i64,
        source: TransactionSource,
        operation_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            amount,
            transaction_type: TransactionType::Refund,
            source,
            operation_id: Some(operation_id.into()),
            description: reason.into(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Credits granted by an administrator.
    #[must_use]
    pub fn bonus(user_id: UserId, amount: i64, reason: impl Into<String>) -> Self {
        Self {
            user_id,
            amount,
            transaction_type: TransactionType::Bonus,
            source: TransactionSource::Admin,
            operation_id: None,
            description: reason.into(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Attach metadata to the transaction record.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    fn into_transaction(self, balance_after: i64) -> CreditTransaction {
        let tx = match self.transaction_type {
            TransactionType::Refund => CreditTransaction::refund(
                self.user_id,
                self.amount,
                balance_after,
                self.source,
                self.operation_id.unwrap_or_default(),
                self.description,
            ),
            TransactionType::Purchase => CreditTransaction::purchase(
                self.user_id,
                self.amount,
                balance_after,
                self.operation_id.unwrap_or_default(),
                self.description,
            ),
            TransactionType::Bonus | TransactionType::Deduction => {
                CreditTransaction::bonus(self.user_id, self.amount, balance_after, self.description)
            }
        };
        tx.with_metadata(self.metadata)
    }
}

/// A completed credit addition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreditAddition {
    /// Credits added.
    pub amount: i64,
    /// Balance after the addition.
    pub balance_after: i64,
    /// Log entry, absent if the append failed.
    pub transaction_id: Option<TransactionId>,
}

/// The inputs and result of a usage decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageSnapshot {
    /// The account (created if missing).
    pub account: CreditAccount,
    /// This month's counters.
    pub usage: UsageRecord,
    /// The decision.
    pub decision: UsageDecision,
}

/// A consumed optimization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Consumption {
    /// How it was paid for.
    pub reason: UsageReason,
    /// Credits deducted (0 unless paid with credits).
    pub credits_charged: i64,
    /// Balance after the charge.
    pub credits_remaining: i64,
    /// The deduction, when paid with credits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deduction: Option<Deduction>,
}

/// Credit and usage operations over a [`Store`].
#[derive(Clone)]
pub struct CreditLedger {
    store: Arc<dyn Store>,
    policy: UsagePolicy,
}

impl CreditLedger {
    /// Create a ledger.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, policy: UsagePolicy) -> Self {
        Self { store, policy }
    }

    /// The allowances in force.
    #[must_use]
    pub const fn policy(&self) -> &UsagePolicy {
        &self.policy
    }

    /// Get the user's account, creating it with the initial allotment.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn account(&self, user_id: &UserId) -> Result<CreditAccount> {
        Ok(self
            .store
            .get_or_create_account(user_id, self.policy.initial_credits)
            .await?)
    }

    // =========================================================================
    // Deduction
    // =========================================================================

    /// Deduct `amount` credits.
    ///
    /// # Errors
    ///
    /// - `BillingError::InvalidAmount` if `amount <= 0`.
    /// - `BillingError::InsufficientCredits` if the balance cannot cover it.
    /// - `BillingError::ConcurrentModification` if the fallback path loses
    ///   every compare-and-set attempt.
    pub async fn deduct(
        &self,
        user_id: &UserId,
        amount: i64,
        source: TransactionSource,
        operation_id: &str,
    ) -> Result<Deduction> {
        if amount <= 0 {
            return Err(BillingError::InvalidAmount(format!(
                "deduction must be positive, got {amount}"
            )));
        }

        self.account(user_id).await?;

        let (balance_after, path) = match self.store.deduct_credits_atomic(user_id, amount).await {
            Ok(AtomicDeduction::Applied { balance_after }) => {
                (balance_after, DeductionPath::Atomic)
            }
            Ok(AtomicDeduction::Insufficient { balance }) => {
                return Err(BillingError::InsufficientCredits {
                    balance,
                    required: amount,
                });
            }
            Ok(AtomicDeduction::AccountMissing) => {
                return Err(BillingError::AccountNotFound {
                    user_id: user_id.to_string(),
                });
            }
            Err(StoreError::ProcedureUnavailable(reason)) => {
                warn!(
                    user_id = %user_id,
                    reason = %reason,
                    "deduct_credits unavailable, using optimistic fallback"
                );
                (
                    self.deduct_optimistic(user_id, amount).await?,
                    DeductionPath::Optimistic,
                )
            }
            Err(e) => return Err(e.into()),
        };

        let tx =
            CreditTransaction::deduction(*user_id, amount, balance_after, source, operation_id);
        let transaction_id = self.record(&tx).await;

        info!(
            user_id = %user_id,
            amount,
            balance_after,
            operation_id = %operation_id,
            path = ?path,
            "Credits deducted"
        );

        Ok(Deduction {
            amount,
            balance_after,
            operation_id: operation_id.to_string(),
            transaction_id,
            path,
        })
    }

    async fn deduct_optimistic(&self, user_id: &UserId, amount: i64) -> Result<i64> {
        for attempt in 0..=OPTIMISTIC_RETRY_LIMIT {
            let balance = self
                .store
                .get_account(user_id)
                .await?
                .ok_or_else(|| BillingError::AccountNotFound {
                    user_id: user_id.to_string(),
                })?
                .credits_remaining;

            if balance < amount {
                return Err(BillingError::InsufficientCredits {
                    balance,
                    required: amount,
                });
            }

            let new_balance = balance - amount;
            if self
                .store
                .compare_and_set_credits(user_id, balance, new_balance)
                .await?
            {
                return Ok(new_balance);
            }
            debug!(user_id = %user_id, attempt, "Balance changed during deduction");
        }

        warn!(user_id = %user_id, amount, "Optimistic deduction exhausted retries");
        Err(BillingError::ConcurrentModification {
            user_id: user_id.to_string(),
        })
    }

    // =========================================================================
    // Addition
    // =========================================================================

    /// Add credits. Purchases and bonuses also raise `total_credits`.
    ///
    /// # Errors
    ///
    /// - `BillingError::InvalidAmount` if the amount is not positive.
    /// - `BillingError::AccountNotFound` if the account doesn't exist.
    pub async fn add_credits(&self, grant: CreditGrant) -> Result<CreditAddition> {
        if grant.amount <= 0 {
            return Err(BillingError::InvalidAmount(format!(
                "credit amount must be positive, got {}",
                grant.amount
            )));
        }

        let user_id = grant.user_id;
        let amount = grant.amount;
        let transaction_type = grant.transaction_type;

        let balance_after = self
            .store
            .add_credits(&user_id, amount, transaction_type.counts_toward_total())
            .await?;

        let tx = grant.into_transaction(balance_after);
        let transaction_id = self.record(&tx).await;

        info!(
            user_id = %user_id,
            amount,
            balance_after,
            transaction_type = transaction_type.as_str(),
            "Credits added"
        );

        Ok(CreditAddition {
            amount,
            balance_after,
            transaction_id,
        })
    }

    /// Append to the transaction log, logging instead of failing.
    async fn record(&self, tx: &CreditTransaction) -> Option<TransactionId> {
        match self.store.append_transaction(tx).await {
            Ok(()) => Some(tx.id),
            Err(e) => {
                warn!(
                    user_id = %tx.user_id,
                    amount = tx.amount,
                    error = %e,
                    "Failed to record credit transaction; balance change kept"
                );
                None
            }
        }
    }

    // =========================================================================
    // Usage
    // =========================================================================

    /// Decide whether the user may run another optimization this month.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn check_usage(&self, user_id: &UserId) -> Result<UsageSnapshot> {
        self.check_usage_in(user_id, UsageMonth::current()).await
    }

    async fn check_usage_in(&self, user_id: &UserId, month: UsageMonth) -> Result<UsageSnapshot> {
        let account = self.account(user_id).await?;
        let usage = self.store.get_usage(user_id, month).await?;
        let decision = check_usage_limit(&account, &usage, &self.policy);
        Ok(UsageSnapshot {
            account,
            usage,
            decision,
        })
    }

    /// Charge one optimization to the user.
    ///
    /// # Errors
    ///
    /// - `BillingError::UsageLimitReached` when nothing is left to pay with.
    /// - Deduction errors on the credit path.
    pub async fn consume_optimization(
        &self,
        user_id: &UserId,
        source: TransactionSource,
        operation_id: &str,
    ) -> Result<Consumption> {
        let month = UsageMonth::current();
        let snapshot = self.check_usage_in(user_id, month).await?;
        let decision = snapshot.decision;

        let cost = match decision.charge() {
            None => {
                return Err(BillingError::UsageLimitReached {
                    reason: decision.message(),
                    upgrade_suggestion: decision.upgrade_suggestion,
                });
            }
            Some(UsageCharge::Unlimited) => {
                self.store.record_paid_optimization(user_id, month).await?;
                return Ok(Consumption {
                    reason: UsageReason::ProUnlimited,
                    credits_charged: 0,
                    credits_remaining: snapshot.account.credits_remaining,
                    deduction: None,
                });
            }
            Some(UsageCharge::FreeAllowance) => {
                if self
                    .store
                    .try_consume_free_optimization(
                        user_id,
                        month,
                        self.policy.free_monthly_optimizations,
                    )
                    .await?
                {
                    return Ok(Consumption {
                        reason: UsageReason::FreeAllowance,
                        credits_charged: 0,
                        credits_remaining: snapshot.account.credits_remaining,
                        deduction: None,
                    });
                }
                debug!(user_id = %user_id, "Free allowance taken concurrently, charging credits");
                self.policy.optimization_cost
            }
            Some(UsageCharge::Credits(cost)) => cost,
        };

        let deduction = match self.deduct(user_id, cost, source, operation_id).await {
            Ok(deduction) => deduction,
            Err(BillingError::InsufficientCredits { .. }) => {
                return Err(BillingError::UsageLimitReached {
                    reason: "Monthly free optimizations used and no credits remaining".into(),
                    upgrade_suggestion: decision.upgrade_suggestion.or_else(|| {
                        Some("Buy a credit pack or subscribe to Pro".to_string())
                    }),
                });
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = self.store.record_paid_optimization(user_id, month).await {
            warn!(user_id = %user_id, error = %e, "Failed to record paid optimization");
        }

        Ok(Consumption {
            reason: UsageReason::Credits,
            credits_charged: deduction.amount,
            credits_remaining: deduction.balance_after,
            deduction: Some(deduction),
        })
    }
}
