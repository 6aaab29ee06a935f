//! Monthly usage tracking and the optimization limit decision.
//!
//! `check_usage_limit` is a pure function over two read models, the account
//! and the current month's usage record. It never mutates anything; the
//! caller decides how to apply the resulting charge.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ParseEnumError;
use crate::{CreditAccount, UserId, DEFAULT_INITIAL_CREDITS};

/// Free optimizations per calendar month for free-tier accounts.
pub const DEFAULT_FREE_MONTHLY_OPTIMIZATIONS: u32 = 1;

/// Credits charged for one optimization once the free allowance is spent.
pub const OPTIMIZATION_CREDIT_COST: i64 = 1;

/// A calendar month (UTC), rendered as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UsageMonth {
    year: i32,
    month: u32,
}

impl UsageMonth {
    /// The month containing `at`.
    #[must_use]
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self {
            year: at.year(),
            month: at.month(),
        }
    }

    /// The current month.
    #[must_use]
    pub fn current() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Calendar year.
    #[must_use]
    pub const fn year(self) -> i32 {
        self.year
    }

    /// Month number, 1-12.
    #[must_use]
    pub const fn month(self) -> u32 {
        self.month
    }
}

impl fmt::Display for UsageMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for UsageMonth {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseEnumError::new("usage month", s);
        let (year, month) = s.split_once('-').ok_or_else(invalid)?;
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        if !(1..=12).contains(&month) {
            return Err(invalid());
        }
        Ok(Self { year, month })
    }
}

impl TryFrom<String> for UsageMonth {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<UsageMonth> for String {
    fn from(month: UsageMonth) -> Self {
        month.to_string()
    }
}

/// Per-user, per-month optimization counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// The user.
    pub user_id: UserId,
    /// The month these counters cover.
    pub month: UsageMonth,
    /// Optimizations paid for by the free allowance.
    pub free_optimizations_used: u32,
    /// Optimizations paid for by credits or a pro plan.
    pub paid_optimizations_used: u32,
}

impl UsageRecord {
    /// An empty record, used when the user has no row for `month` yet.
    #[must_use]
    pub const fn empty(user_id: UserId, month: UsageMonth) -> Self {
        Self {
            user_id,
            month,
            free_optimizations_used: 0,
            paid_optimizations_used: 0,
        }
    }

    /// Total optimizations this month.
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.free_optimizations_used + self.paid_optimizations_used
    }
}

/// Allowances applied by the limit decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsagePolicy {
    /// Free optimizations per month for non-pro accounts.
    pub free_monthly_optimizations: u32,
    /// Credits charged per optimization beyond the free allowance.
    pub optimization_cost: i64,
    /// Credits granted to a lazily created account.
    pub initial_credits: i64,
}

impl Default for UsagePolicy {
    fn default() -> Self {
        Self {
            free_monthly_optimizations: DEFAULT_FREE_MONTHLY_OPTIMIZATIONS,
            optimization_cost: OPTIMIZATION_CREDIT_COST,
            initial_credits: DEFAULT_INITIAL_CREDITS,
        }
    }
}

/// Why an optimization may or may not proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageReason {
    /// Pro accounts are unlimited.
    ProUnlimited,
    /// The monthly free allowance covers it.
    FreeAllowance,
    /// Credits will be deducted.
    Credits,
    /// Nothing left to pay with.
    LimitReached,
}

/// How an allowed optimization is paid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageCharge {
    /// No charge, pro plan.
    Unlimited,
    /// One unit of the monthly free allowance.
    FreeAllowance,
    /// This many credits.
    Credits(i64),
}

/// Outcome of the usage limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageDecision {
    /// Whether the optimization may proceed.
    pub can_optimize: bool,
    /// Why.
    pub reason: UsageReason,
    /// Credits that will be deducted (0 unless `reason` is `credits`).
    pub credits_required: i64,
    /// Current credit balance.
    pub credits_remaining: i64,
    /// Free optimizations left this month (0 for pro accounts).
    pub free_optimizations_remaining: u32,
    /// Suggested upgrade, set when the user is out of (or nearly out of) allowance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgrade_suggestion: Option<String>,
}

impl UsageDecision {
    /// The charge to apply, or `None` when denied.
    #[must_use]
    pub const fn charge(&self) -> Option<UsageCharge> {
        match self.reason {
            UsageReason::ProUnlimited => Some(UsageCharge::Unlimited),
            UsageReason::FreeAllowance => Some(UsageCharge::FreeAllowance),
            UsageReason::Credits => Some(UsageCharge::Credits(self.credits_required)),
            UsageReason::LimitReached => None,
        }
    }

    /// Human-readable explanation, used in error responses.
    #[must_use]
    pub fn message(&self) -> String {
        match self.reason {
            UsageReason::ProUnlimited => "Pro plan: unlimited optimizations".to_string(),
            UsageReason::FreeAllowance => format!(
                "{} free optimization(s) left this month",
                self.free_optimizations_remaining
            ),
            UsageReason::Credits => format!(
                "{} credit(s) will be deducted, {} available",
                self.credits_required, self.credits_remaining
            ),
            UsageReason::LimitReached => {
                "Monthly free optimizations used and no credits remaining".to_string()
            }
        }
    }
}

const UPGRADE_SUGGESTION: &str =
    "Buy a credit pack or subscribe to Pro for unlimited optimizations";

/// Decide whether `account` may run another optimization this month.
#[must_use]
pub fn check_usage_limit(
    account: &CreditAccount,
    usage: &UsageRecord,
    policy: &UsagePolicy,
) -> UsageDecision {
    if account.is_pro {
        return UsageDecision {
            can_optimize: true,
            reason: UsageReason::ProUnlimited,
            credits_required: 0,
            credits_remaining: account.credits_remaining,
            free_optimizations_remaining: 0,
            upgrade_suggestion: None,
        };
    }

    let free_remaining = policy
        .free_monthly_optimizations
        .saturating_sub(usage.free_optimizations_used);

    if free_remaining > 0 {
        return UsageDecision {
            can_optimize: true,
            reason: UsageReason::FreeAllowance,
            credits_required: 0,
            credits_remaining: account.credits_remaining,
            free_optimizations_remaining: free_remaining,
            upgrade_suggestion: None,
        };
    }

    if account.has_sufficient_credits(policy.optimization_cost) {
        let running_low = account.credits_remaining - policy.optimization_cost
            < policy.optimization_cost;
        return UsageDecision {
            can_optimize: true,
            reason: UsageReason::Credits,
            credits_required: policy.optimization_cost,
            credits_remaining: account.credits_remaining,
            free_optimizations_remaining: 0,
            upgrade_suggestion: running_low.then(|| UPGRADE_SUGGESTION.to_string()),
        };
    }

    UsageDecision {
        can_optimize: false,
        reason: UsageReason::LimitReached,
        credits_required: policy.optimization_cost,
        credits_remaining: account.credits_remaining,
        free_optimizations_remaining: 0,
        upgrade_suggestion: Some(UPGRADE_SUGGESTION.to_string()),
    }
}
