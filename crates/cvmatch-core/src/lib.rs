//! Core types and decisions for CV-Match billing.
//!
//! This crate provides the domain types shared by the store, the HTTP service
//! and the client SDK:
//!
//! - **Identifiers**: `UserId`, `TransactionId`
//! - **Accounts**: `CreditAccount`, `SubscriptionTier`
//! - **Ledger**: `CreditTransaction`, `TransactionType`, `TransactionSource`
//! - **Usage**: `UsageRecord`, `UsageMonth`, `UsagePolicy`, `UsageDecision`
//! - **Webhooks**: `WebhookEvent`, `WebhookStatus`
//! - **Pricing**: `CreditPack`, `PricingConfig`
//!
//! # Credits
//!
//! One credit pays for one resume optimization. Balances are whole credits
//! stored as `i64` and never go below zero.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod credits;
pub mod error;
pub mod ids;
pub mod pricing;
pub mod usage;
pub mod webhook;

pub use account::{CreditAccount, SubscriptionTier, DEFAULT_INITIAL_CREDITS};
pub use credits::{CreditTransaction, TransactionSource, TransactionType};
pub use error::{BillingError, ParseEnumError, Result};
pub use ids::{IdError, TransactionId, UserId};
pub use pricing::{format_brl, CreditPack, PackOffer, PricingConfig, PRO_MONTHLY_PRICE_CENTS};
pub use usage::{
    check_usage_limit, UsageCharge, UsageDecision, UsageMonth, UsagePolicy, UsageReason,
    UsageRecord, DEFAULT_FREE_MONTHLY_OPTIMIZATIONS, OPTIMIZATION_CREDIT_COST,
};
pub use webhook::{WebhookEvent, WebhookStatus};
