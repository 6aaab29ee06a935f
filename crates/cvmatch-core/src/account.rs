//! Credit account types.
//!
//! An account is created lazily the first time a user touches billing and
//! starts with the free-tier allotment.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ParseEnumError;
use crate::UserId;

/// Credits granted to a new free-tier account.
pub const DEFAULT_INITIAL_CREDITS: i64 = 3;

/// A user's credit balance record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditAccount {
    /// The user ID (Supabase auth UUID).
    pub user_id: UserId,

    /// Credits currently available. Never negative.
    pub credits_remaining: i64,

    /// Lifetime credits granted or purchased.
    pub total_credits: i64,

    /// Current subscription tier.
    pub subscription_tier: SubscriptionTier,

    /// Whether the account has unlimited optimizations.
    pub is_pro: bool,

    /// When the account was created.
    pub created_at: DateTime<Utc>,

    /// When the account was last updated.
    pub updated_at: DateTime<Utc>,
}

impl CreditAccount {
    /// Create a free-tier account holding `initial_credits`.
    #[must_use]
    pub fn new(user_id: UserId, initial_credits: i64) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            credits_remaining: initial_credits,
            total_credits: initial_credits,
            subscription_tier: SubscriptionTier::Free,
            is_pro: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the account can cover a deduction.
    #[must_use]
    pub fn has_sufficient_credits(&self, amount: i64) -> bool {
        self.credits_remaining >= amount
    }

    /// Move the account to `tier`, keeping `is_pro` in step.
    pub fn set_tier(&mut self, tier: SubscriptionTier) {
        self.is_pro = tier.is_pro();
        self.subscription_tier = tier;
        self.updated_at = Utc::now();
    }
}

/// Subscription tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTier {
    /// Monthly free allowance plus purchased credit packs.
    Free,

    /// Paid monthly plan with unlimited optimizations.
    Pro,

    /// Contracted plan with unlimited optimizations.
    Enterprise,
}

impl SubscriptionTier {
    /// Whether this tier grants unlimited optimizations.
    #[must_use]
    pub const fn is_pro(self) -> bool {
        matches!(self, Self::Pro | Self::Enterprise)
    }

    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionTier {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "pro" => Ok(Self::Pro),
            "enterprise" => Ok(Self::Enterprise),
            _ => Err(ParseEnumError::new("subscription tier", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_account_gets_free_allotment() {
        let account = CreditAccount::new(UserId::generate(), DEFAULT_INITIAL_CREDITS);
        assert_eq!(account.credits_remaining, 3);
        assert_eq!(account.total_credits, 3);
        assert_eq!(account.subscription_tier, SubscriptionTier::Free);
        assert!(!account.is_pro);
    }

    #[test]
    fn sufficient_credits_boundary() {
        let account = CreditAccount::new(UserId::generate(), 3);
        assert!(account.has_sufficient_credits(3));
        assert!(!account.has_sufficient_credits(4));
    }

    #[test]
    fn set_tier_tracks_pro_flag() {
        let mut account = CreditAccount::new(UserId::generate(), 0);
        account.set_tier(SubscriptionTier::Enterprise);
        assert!(account.is_pro);
        account.set_tier(SubscriptionTier::Free);
        assert!(!account.is_pro);
    }

    #[test]
    fn tier_parses_case_insensitively() {
        assert_eq!("PRO".parse::<SubscriptionTier>(), Ok(SubscriptionTier::Pro));
        assert!("gold".parse::<SubscriptionTier>().is_err());
    }
}
