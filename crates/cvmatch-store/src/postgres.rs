//! `PostgreSQL` storage implementation.
//!
//! Every balance and counter change is one conditional statement, so the
//! database row lock is the only synchronisation. Row structs mirror the
//! schema in `migrations/` and are converted to domain types at the edge.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use tracing::{debug, info};
use uuid::Uuid;

use cvmatch_core::{
    CreditAccount, CreditTransaction, SubscriptionTier, TransactionSource, UsageMonth,
    UsageRecord, UserId, WebhookEvent, WebhookStatus,
};

use crate::error::{Result, StoreError};
use crate::schema::{all_tables, UNDEFINED_FUNCTION};
use crate::{AtomicDeduction, Store};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

const ACCOUNT_COLUMNS: &str = "user_id, credits_remaining, total_credits, subscription_tier, \
                               is_pro, created_at, updated_at";

const WEBHOOK_COLUMNS: &str = "external_event_id, event_type, status, processed, \
                               processing_time_ms, error, payload, received_at, claimed_at, \
                               processed_at";

/// PostgreSQL-backed storage implementation.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect a pool to `database_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if no connection can be established.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(database_url)
            .await?;
        info!(max_connections, "Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply pending migrations, including the `deduct_credits` function.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("migration failed: {e}")))?;
        info!("Database migrations applied");
        Ok(())
    }

    /// Tables the service expects that are absent from the current schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog query fails.
    pub async fn missing_tables(&self) -> Result<Vec<&'static str>> {
        let present: Vec<String> = sqlx::query_scalar(
            "SELECT table_name::text FROM information_schema.tables \
             WHERE table_schema = current_schema()",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(all_tables()
            .into_iter()
            .filter(|table| !present.iter().any(|p| p == table))
            .collect())
    }

    async fn fetch_webhook(&self, external_event_id: &str) -> Result<Option<WebhookEvent>> {
        sqlx::query_as::<_, WebhookRow>(&format!(
            "SELECT {WEBHOOK_COLUMNS} FROM webhook_events WHERE external_event_id = $1"
        ))
        .bind(external_event_id)
        .fetch_optional(&self.pool)
        .await?
        .map(WebhookEvent::try_from)
        .transpose()
    }

    /// Explain why a guarded webhook update matched no rows.
    async fn webhook_update_missed(
        &self,
        external_event_id: &str,
        next: WebhookStatus,
    ) -> StoreError {
        match self.fetch_webhook(external_event_id).await {
            Ok(Some(event)) => StoreError::Database(format!(
                "webhook event {external_event_id} cannot move from {} to {next}",
                event.status
            )),
            Ok(None) => StoreError::NotFound {
                entity: "webhook event",
                id: external_event_id.to_string(),
            },
            Err(e) => e,
        }
    }
}

// =============================================================================
// Row types
// =============================================================================

fn decode<T>(value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| StoreError::Serialization(e.to_string()))
}

#[derive(Debug, FromRow)]
struct AccountRow {
    user_id: Uuid,
    credits_remaining: i64,
    total_credits: i64,
    subscription_tier: String,
    is_pro: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for CreditAccount {
    type Error = StoreError;

    fn try_from(row: AccountRow) -> Result<Self> {
        Ok(Self {
            user_id: UserId::from_uuid(row.user_id),
            credits_remaining: row.credits_remaining,
            total_credits: row.total_credits,
            subscription_tier: decode(&row.subscription_tier)?,
            is_pro: row.is_pro,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct UsageRow {
    user_id: Uuid,
    month: String,
    free_optimizations_used: i32,
    paid_optimizations_used: i32,
}

impl TryFrom<UsageRow> for UsageRecord {
    type Error = StoreError;

    fn try_from(row: UsageRow) -> Result<Self> {
        let counter = |value: i32| {
            u32::try_from(value)
                .map_err(|_| StoreError::Serialization(format!("negative usage counter: {value}")))
        };
        Ok(Self {
            user_id: UserId::from_uuid(row.user_id),
            month: decode(&row.month)?,
            free_optimizations_used: counter(row.free_optimizations_used)?,
            paid_optimizations_used: counter(row.paid_optimizations_used)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct TransactionRow {
    id: String,
    user_id: Uuid,
    amount: i64,
    balance_after: i64,
    transaction_type: String,
    source: String,
    operation_id: Option<String>,
    description: String,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for CreditTransaction {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> Result<Self> {
        Ok(Self {
            id: decode(&row.id)?,
            user_id: UserId::from_uuid(row.user_id),
            amount: row.amount,
            balance_after: row.balance_after,
            transaction_type: decode(&row.transaction_type)?,
            source: TransactionSource::parse(&row.source),
            operation_id: row.operation_id,
            description: row.description,
            metadata: row.metadata,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct WebhookRow {
    external_event_id: String,
    event_type: String,
    status: String,
    processed: bool,
    processing_time_ms: Option<i64>,
    error: Option<String>,
    payload: serde_json::Value,
    received_at: DateTime<Utc>,
    claimed_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl TryFrom<WebhookRow> for WebhookEvent {
    type Error = StoreError;

    fn try_from(row: WebhookRow) -> Result<Self> {
        Ok(Self {
            external_event_id: row.external_event_id,
            event_type: row.event_type,
            status: decode(&row.status)?,
            processed: row.processed,
            processing_time_ms: row.processing_time_ms,
            error: row.error,
            payload: row.payload,
            received_at: row.received_at,
            claimed_at: row.claimed_at,
            processed_at: row.processed_at,
        })
    }
}

#[async_trait]
impl Store for PgStore {
    // =========================================================================
    // Account Operations
    // =========================================================================

    async fn get_account(&self, user_id: &UserId) -> Result<Option<CreditAccount>> {
        sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM credit_accounts WHERE user_id = $1"
        ))
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .map(CreditAccount::try_from)
        .transpose()
    }

    async fn get_or_create_account(
        &self,
        user_id: &UserId,
        initial_credits: i64,
    ) -> Result<CreditAccount> {
        let created = sqlx::query(
            "INSERT INTO credit_accounts (user_id, credits_remaining, total_credits) \
             VALUES ($1, $2, $2) \
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id.as_uuid())
        .bind(initial_credits)
        .execute(&self.pool)
        .await?
        .rows_affected()
            == 1;

        if created {
            debug!(user_id = %user_id, initial_credits, "Created credit account");
        }

        self.get_account(user_id)
            .await?
            .ok_or_else(|| StoreError::account_not_found(user_id))
    }

    async fn deduct_credits_atomic(
        &self,
        user_id: &UserId,
        amount: i64,
    ) -> Result<AtomicDeduction> {
        let result = sqlx::query_scalar::<_, Option<i64>>("SELECT deduct_credits($1, $2)")
            .bind(user_id.as_uuid())
            .bind(amount)
            .fetch_one(&self.pool)
            .await;

        match result {
            Ok(Some(balance_after)) => Ok(AtomicDeduction::Applied { balance_after }),
            Ok(None) => Ok(match self.get_account(user_id).await? {
                Some(account) => AtomicDeduction::Insufficient {
                    balance: account.credits_remaining,
                },
                None => AtomicDeduction::AccountMissing,
            }),
            Err(sqlx::Error::Database(db)) if db.code().as_deref() == Some(UNDEFINED_FUNCTION) => {
                Err(StoreError::ProcedureUnavailable(db.message().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn compare_and_set_credits(
        &self,
        user_id: &UserId,
        expected: i64,
        new_balance: i64,
    ) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE credit_accounts \
             SET credits_remaining = $3, updated_at = NOW() \
             WHERE user_id = $1 AND credits_remaining = $2",
        )
        .bind(user_id.as_uuid())
        .bind(expected)
        .bind(new_balance)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(updated == 1)
    }

    async fn add_credits(
        &self,
        user_id: &UserId,
        amount: i64,
        increase_total: bool,
    ) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            "UPDATE credit_accounts \
             SET credits_remaining = credits_remaining + $2, \
                 total_credits = total_credits + CASE WHEN $3 THEN $2 ELSE 0 END, \
                 updated_at = NOW() \
             WHERE user_id = $1 \
             RETURNING credits_remaining",
        )
        .bind(user_id.as_uuid())
        .bind(amount)
        .bind(increase_total)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::account_not_found(user_id))
    }

    async fn set_subscription(
        &self,
        user_id: &UserId,
        tier: SubscriptionTier,
    ) -> Result<CreditAccount> {
        sqlx::query_as::<_, AccountRow>(&format!(
            "UPDATE credit_accounts \
             SET subscription_tier = $2, is_pro = $3, updated_at = NOW() \
             WHERE user_id = $1 \
             RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(user_id.as_uuid())
        .bind(tier.as_str())
        .bind(tier.is_pro())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::account_not_found(user_id))
        .and_then(CreditAccount::try_from)
    }

    // =========================================================================
    // Usage Operations
    // =========================================================================

    async fn get_usage(&self, user_id: &UserId, month: UsageMonth) -> Result<UsageRecord> {
        let row = sqlx::query_as::<_, UsageRow>(
            "SELECT user_id, month, free_optimizations_used, paid_optimizations_used \
             FROM usage_records WHERE user_id = $1 AND month = $2",
        )
        .bind(user_id.as_uuid())
        .bind(month.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => Ok(UsageRecord::empty(*user_id, month)),
        }
    }

    async fn try_consume_free_optimization(
        &self,
        user_id: &UserId,
        month: UsageMonth,
        limit: u32,
    ) -> Result<bool> {
        if limit == 0 {
            return Ok(false);
        }
        let limit = i32::try_from(limit).unwrap_or(i32::MAX);

        let updated = sqlx::query(
            "INSERT INTO usage_records (user_id, month, free_optimizations_used) \
             VALUES ($1, $2, 1) \
             ON CONFLICT (user_id, month) DO UPDATE \
             SET free_optimizations_used = usage_records.free_optimizations_used + 1, \
                 updated_at = NOW() \
             WHERE usage_records.free_optimizations_used < $3",
        )
        .bind(user_id.as_uuid())
        .bind(month.to_string())
        .bind(limit)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(updated == 1)
    }

    async fn record_paid_optimization(
        &self,
        user_id: &UserId,
        month: UsageMonth,
    ) -> Result<UsageRecord> {
        sqlx::query_as::<_, UsageRow>(
            "INSERT INTO usage_records (user_id, month, paid_optimizations_used) \
             VALUES ($1, $2, 1) \
             ON CONFLICT (user_id, month) DO UPDATE \
             SET paid_optimizations_used = usage_records.paid_optimizations_used + 1, \
                 updated_at = NOW() \
             RETURNING user_id, month, free_optimizations_used, paid_optimizations_used",
        )
        .bind(user_id.as_uuid())
        .bind(month.to_string())
        .fetch_one(&self.pool)
        .await?
        .try_into()
    }

    // =========================================================================
    // Transaction Operations
    // =========================================================================

    async fn append_transaction(&self, transaction: &CreditTransaction) -> Result<()> {
        sqlx::query(
            "INSERT INTO credit_transactions \
             (id, user_id, amount, balance_after, transaction_type, source, \
              operation_id, description, metadata, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(transaction.id.to_string())
        .bind(transaction.user_id.as_uuid())
        .bind(transaction.amount)
        .bind(transaction.balance_after)
        .bind(transaction.transaction_type.as_str())
        .bind(transaction.source.as_str())
        .bind(transaction.operation_id.as_deref())
        .bind(&transaction.description)
        .bind(&transaction.metadata)
        .bind(transaction.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_transactions(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);

        sqlx::query_as::<_, TransactionRow>(
            "SELECT id, user_id, amount, balance_after, transaction_type, source, \
                    operation_id, description, metadata, created_at \
             FROM credit_transactions \
             WHERE user_id = $1 \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2 OFFSET $3",
        )
        .bind(user_id.as_uuid())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(CreditTransaction::try_from)
        .collect()
    }

    // =========================================================================
    // Webhook Journal Operations
    // =========================================================================

    async fn get_webhook_event(&self, external_event_id: &str) -> Result<Option<WebhookEvent>> {
        self.fetch_webhook(external_event_id).await
    }

    async fn insert_webhook_event(&self, event: &WebhookEvent) -> Result<bool> {
        let inserted = sqlx::query(
            "INSERT INTO webhook_events \
             (external_event_id, event_type, status, processed, payload, received_at, \
              claimed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (external_event_id) DO NOTHING",
        )
        .bind(&event.external_event_id)
        .bind(&event.event_type)
        .bind(event.status.as_str())
        .bind(event.processed)
        .bind(&event.payload)
        .bind(event.received_at)
        .bind(event.claimed_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(inserted == 1)
    }

    async fn claim_webhook_event(
        &self,
        external_event_id: &str,
        stale_before: DateTime<Utc>,
    ) -> Result<bool> {
        let claimed = sqlx::query(
            "UPDATE webhook_events SET status = $2, processed = FALSE, claimed_at = NOW() \
             WHERE external_event_id = $1 \
               AND (status = $3 OR (status = $2 AND claimed_at < $4))",
        )
        .bind(external_event_id)
        .bind(WebhookStatus::Logged.as_str())
        .bind(WebhookStatus::Failed.as_str())
        .bind(stale_before)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(claimed == 1)
    }

    async fn mark_webhook_processed(
        &self,
        external_event_id: &str,
        processing_time_ms: i64,
    ) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE webhook_events \
             SET status = $2, processed = TRUE, processing_time_ms = $3, \
                 error = NULL, processed_at = NOW() \
             WHERE external_event_id = $1 AND status = $4",
        )
        .bind(external_event_id)
        .bind(WebhookStatus::Processed.as_str())
        .bind(processing_time_ms)
        .bind(WebhookStatus::Logged.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 1 {
            Ok(())
        } else {
            Err(self
                .webhook_update_missed(external_event_id, WebhookStatus::Processed)
                .await)
        }
    }

    async fn mark_webhook_failed(
        &self,
        external_event_id: &str,
        error: &str,
        processing_time_ms: i64,
    ) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE webhook_events \
             SET status = $2, processed = FALSE, processing_time_ms = $3, error = $4 \
             WHERE external_event_id = $1 AND status = $5",
        )
        .bind(external_event_id)
        .bind(WebhookStatus::Failed.as_str())
        .bind(processing_time_ms)
        .bind(error)
        .bind(WebhookStatus::Logged.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 1 {
            Ok(())
        } else {
            Err(self
                .webhook_update_missed(external_event_id, WebhookStatus::Failed)
                .await)
        }
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
