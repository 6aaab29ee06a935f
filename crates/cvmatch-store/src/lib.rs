//! Storage layer for CV-Match billing.
//!
//! This crate persists credit accounts, monthly usage counters, the credit
//! transaction log and the webhook dedup journal.
//!
//! # Backends
//!
//! - [`PgStore`]: PostgreSQL through `sqlx`. Balance changes are single
//!   conditional statements; the schema and the `deduct_credits` function
//!   ship as migrations.
//! - [`MemoryStore`]: process-local maps behind a `tokio` lock, used for
//!   development and tests. Each operation runs in one write-locked critical
//!   section so it has the same atomicity as the SQL statement it mirrors.
//!
//! # Example
//!
//! ```no_run
//! use cvmatch_core::{UserId, DEFAULT_INITIAL_CREDITS};
//! use cvmatch_store::{MemoryStore, Store};
//!
//! # async fn run() -> cvmatch_store::Result<()> {
//! let store = MemoryStore::new();
//! let user_id = UserId::generate();
//! let account = store
//!     .get_or_create_account(&user_id, DEFAULT_INITIAL_CREDITS)
//!     .await?;
//! assert_eq!(account.credits_remaining, 3);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;
pub mod postgres;
pub mod schema;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cvmatch_core::{
    CreditAccount, CreditTransaction, SubscriptionTier, UsageMonth, UsageRecord, UserId,
    WebhookEvent,
};

/// Result of the single-statement conditional decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicDeduction {
    /// The balance was decremented.
    Applied {
        /// Balance after the decrement.
        balance_after: i64,
    },
    /// The balance could not cover the amount; nothing changed.
    Insufficient {
        /// Current balance.
        balance: i64,
    },
    /// No account row exists for the user.
    AccountMissing,
}

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (`PostgreSQL`, in-memory for testing).
#[async_trait]
pub trait Store: Send + Sync {
    // =========================================================================
    // Account Operations
    // =========================================================================

    /// Get an account by user ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_account(&self, user_id: &UserId) -> Result<Option<CreditAccount>>;

    /// Get an account, creating a free-tier one holding `initial_credits`
    /// if none exists. Concurrent first calls create exactly one row.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_or_create_account(
        &self,
        user_id: &UserId,
        initial_credits: i64,
    ) -> Result<CreditAccount>;

    /// Decrement the balance by `amount` in one conditional statement
    /// (`... WHERE credits_remaining >= amount`).
    ///
    /// # Errors
    ///
    /// - `StoreError::ProcedureUnavailable` if the database function is missing.
    /// - Other errors if the database operation fails.
    async fn deduct_credits_atomic(&self, user_id: &UserId, amount: i64)
        -> Result<AtomicDeduction>;

    /// Set the balance to `new_balance` only if it still equals `expected`.
    ///
    /// Returns `false` when zero rows matched.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn compare_and_set_credits(
        &self,
        user_id: &UserId,
        expected: i64,
        new_balance: i64,
    ) -> Result<bool>;

    /// Add `amount` to the balance, and to `total_credits` when
    /// `increase_total` is set. Returns the new balance.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the account doesn't exist.
    async fn add_credits(&self, user_id: &UserId, amount: i64, increase_total: bool)
        -> Result<i64>;

    /// Move the account to `tier`, keeping `is_pro` in step.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the account doesn't exist.
    async fn set_subscription(
        &self,
        user_id: &UserId,
        tier: SubscriptionTier,
    ) -> Result<CreditAccount>;

    // =========================================================================
    // Usage Operations
    // =========================================================================

    /// Get the counters for `month`, or an empty record if none exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_usage(&self, user_id: &UserId, month: UsageMonth) -> Result<UsageRecord>;

    /// Increment the free counter for `month` only while it is below `limit`.
    ///
    /// Returns `false` when the allowance was already spent.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn try_consume_free_optimization(
        &self,
        user_id: &UserId,
        month: UsageMonth,
        limit: u32,
    ) -> Result<bool>;

    /// Increment the paid counter for `month`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn record_paid_optimization(
        &self,
        user_id: &UserId,
        month: UsageMonth,
    ) -> Result<UsageRecord>;

    // =========================================================================
    // Transaction Operations
    // =========================================================================

    /// Append a credit transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn append_transaction(&self, transaction: &CreditTransaction) -> Result<()>;

    /// List transactions for a user, ordered by time (newest first).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_transactions(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>>;

    // =========================================================================
    // Webhook Journal Operations
    // =========================================================================

    /// Get a journaled webhook event.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_webhook_event(&self, external_event_id: &str) -> Result<Option<WebhookEvent>>;

    /// Journal a webhook event. Returns `false` if the id is already journaled.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn insert_webhook_event(&self, event: &WebhookEvent) -> Result<bool>;

    /// Take over a journaled event for reprocessing: a `failed` row, or a
    /// `logged` row claimed before `stale_before` whose owner never
    /// finished. Refreshes the claim time. Returns `false` if the row is not
    /// reclaimable (another delivery took it first, or it is processed).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn claim_webhook_event(
        &self,
        external_event_id: &str,
        stale_before: DateTime<Utc>,
    ) -> Result<bool>;

    /// Mark a `logged` event processed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the event is not journaled.
    async fn mark_webhook_processed(
        &self,
        external_event_id: &str,
        processing_time_ms: i64,
    ) -> Result<()>;

    /// Mark a `logged` event failed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the event is not journaled.
    async fn mark_webhook_failed(
        &self,
        external_event_id: &str,
        error: &str,
        processing_time_ms: i64,
    ) -> Result<()>;

    // =========================================================================
    // Health
    // =========================================================================

    /// Check the backend is reachable.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be reached.
    async fn ping(&self) -> Result<()>;
}
