//! Credit transaction types.
//!
//! Every balance mutation appends one transaction. The log is write-once and
//! is not transactional with the balance: a failed append never rolls the
//! balance back.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ParseEnumError;
use crate::{TransactionId, UserId};

/// A ledger row recording one balance change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditTransaction {
    /// Unique transaction ID (ULID for time-ordering).
    pub id: TransactionId,

    /// The user whose balance was affected.
    pub user_id: UserId,

    /// Amount in credits. Positive = credit, negative = debit.
    pub amount: i64,

    /// Balance after this transaction.
    pub balance_after: i64,

    /// Type of transaction.
    pub transaction_type: TransactionType,

    /// Who caused the change.
    pub source: TransactionSource,

    /// Caller-supplied operation identifier (optimization id, Stripe session, ...).
    pub operation_id: Option<String>,

    /// Human-readable description.
    pub description: String,

    /// Additional metadata.
    pub metadata: serde_json::Value,

    /// When the transaction was created.
    pub created_at: DateTime<Utc>,
}

impl CreditTransaction {
    fn build(
        user_id: UserId,
        amount: i64,
        balance_after: i64,
        transaction_type: TransactionType,
        source: TransactionSource,
        operation_id: Option<String>,
        description: String,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            user_id,
            amount,
            balance_after,
            transaction_type,
            source,
            operation_id,
            description,
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    /// A deduction. The stored amount is always negative.
    #[must_use]
    pub fn deduction(
        user_id: UserId,
        amount: i64,
        balance_after: i64,
        source: TransactionSource,
        operation_id: impl Into<String>,
    ) -> Self {
        let amount = amount.abs();
        Self::build(
            user_id,
            -amount,
            balance_after,
            TransactionType::Deduction,
            source,
            Some(operation_id.into()),
            format!("Deducted {amount} credit(s)"),
        )
    }

    /// A credit purchase settled by the payment provider.
    #[must_use]
    pub fn purchase(
        user_id: UserId,
        amount: i64,
        balance_after: i64,
        operation_id: impl Into<String>,
        description: String,
    ) -> Self {
        Self::build(
            user_id,
            amount,
            balance_after,
            TransactionType::Purchase,
            TransactionSource::Stripe,
            Some(operation_id.into()),
            description,
        )
    }

    /// A refund of previously deducted credits.
    #[must_use]
    pub fn refund(
        user_id: UserId,
        amount: i64,
        balance_after: i64,
        source: TransactionSource,
        operation_id: impl Into<String>,
        reason: String,
    ) -> Self {
        Self::build(
            user_id,
            amount.abs(),
            balance_after,
            TransactionType::Refund,
            source,
            Some(operation_id.into()),
            reason,
        )
    }

    /// Promotional or support-granted credits.
    #[must_use]
    pub fn bonus(user_id: UserId, amount: i64, balance_after: i64, reason: String) -> Self {
        Self::build(
            user_id,
            amount,
            balance_after,
            TransactionType::Bonus,
            TransactionSource::Admin,
            None,
            reason,
        )
    }

    /// Attach metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Type of credit transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Credits bought through the payment provider.
    Purchase,

    /// Credits consumed by an operation.
    Deduction,

    /// Consumed credits returned.
    Refund,

    /// Promotional credits.
    Bonus,
}

impl TransactionType {
    /// Whether this type adds to the account's lifetime `total_credits`.
    #[must_use]
    pub const fn counts_toward_total(self) -> bool {
        matches!(self, Self::Purchase | Self::Bonus)
    }

    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Deduction => "deduction",
            Self::Refund => "refund",
            Self::Bonus => "bonus",
        }
    }
}

impl FromStr for TransactionType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purchase" => Ok(Self::Purchase),
            "deduction" => Ok(Self::Deduction),
            "refund" => Ok(Self::Refund),
            "bonus" => Ok(Self::Bonus),
            _ => Err(ParseEnumError::new("transaction type", s)),
        }
    }
}

/// Origin of a balance change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionSource {
    /// Resume optimization consumed through the usage tracker.
    Optimization,

    /// Stripe webhook.
    Stripe,

    /// Administrator action.
    Admin,

    /// Another backend service, by name.
    Service(String),
}

impl TransactionSource {
    /// Get the source name as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Optimization => "optimization",
            Self::Stripe => "stripe",
            Self::Admin => "admin",
            Self::Service(name) => name,
        }
    }

    /// Parse a stored source; unknown names become `Service`.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "optimization" => Self::Optimization,
            "stripe" => Self::Stripe,
            "admin" => Self::Admin,
            other => Self::Service(other.to_string()),
        }
    }
}

impl fmt::Display for TransactionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deduction_is_negative() {
        let user_id = UserId::generate();
        let tx = CreditTransaction::deduction(
            user_id,
            2,
            1,
            TransactionSource::Optimization,
            "opt_123",
        );

        assert_eq!(tx.amount, -2);
        assert_eq!(tx.balance_after, 1);
        assert_eq!(tx.transaction_type, TransactionType::Deduction);
        assert_eq!(tx.operation_id.as_deref(), Some("opt_123"));
    }

    #[test]
    fn refund_is_positive_even_for_negative_input() {
        let tx = CreditTransaction::refund(
            UserId::generate(),
            -1,
            4,
            TransactionSource::Service("resume-scorer".into()),
            "opt_9",
            "LLM provider timeout".into(),
        );
        assert_eq!(tx.amount, 1);
        assert_eq!(tx.source.as_str(), "resume-scorer");
    }

    #[test]
    fn only_purchases_and_bonuses_count_toward_total() {
        assert!(TransactionType::Purchase.counts_toward_total());
        assert!(TransactionType::Bonus.counts_toward_total());
        assert!(!TransactionType::Refund.counts_toward_total());
        assert!(!TransactionType::Deduction.counts_toward_total());
    }

    #[test]
    fn source_parse_falls_back_to_service() {
        assert_eq!(TransactionSource::parse("stripe"), TransactionSource::Stripe);
        assert_eq!(
            TransactionSource::parse("resume-scorer"),
            TransactionSource::Service("resume-scorer".into())
        );
    }
}
