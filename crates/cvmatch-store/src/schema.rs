//! Database schema definitions.
//!
//! The schema itself lives in `migrations/`. This module holds the names the
//! Postgres backend refers to from code.

/// Table names.
pub mod tables {
    /// Per-user balance records, keyed by `user_id`.
    pub const CREDIT_ACCOUNTS: &str = "credit_accounts";

    /// Monthly optimization counters, keyed by `(user_id, month)`.
    pub const USAGE_RECORDS: &str = "usage_records";

    /// Append-only credit transaction log.
    pub const CREDIT_TRANSACTIONS: &str = "credit_transactions";

    /// Webhook dedup journal, unique on `external_event_id`.
    pub const WEBHOOK_EVENTS: &str = "webhook_events";
}

/// Returns all table names, in creation order.
#[must_use]
pub fn all_tables() -> Vec<&'static str> {
    vec![
        tables::CREDIT_ACCOUNTS,
        tables::USAGE_RECORDS,
        tables::CREDIT_TRANSACTIONS,
        tables::WEBHOOK_EVENTS,
    ]
}

/// SQLSTATE raised when a called function does not exist (`undefined_function`).
pub const UNDEFINED_FUNCTION: &str = "42883";
