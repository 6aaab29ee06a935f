//! CV-Match billing HTTP API service.
//!
//! This crate provides the HTTP API for CV-Match credits and usage:
//!
//! - Credit balances, deductions, refunds and history
//! - Monthly usage limits for resume optimizations
//! - Stripe Checkout, payment intents and idempotent webhooks
//!
//! # Authentication
//!
//! 1. **Supabase JWT tokens** - for end-user requests from the web app
//! 2. **Service API keys** - for the optimization pipeline
//! 3. **Admin keys** - for support tooling

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // The catalog handler has nothing to await

pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod routes;
pub mod state;
pub mod stripe;

pub use config::ServiceConfig;
pub use error::ApiError;
pub use ledger::{CreditGrant, CreditLedger, Deduction, DeductionPath};
pub use routes::create_router;
pub use state::AppState;
pub use stripe::{StripeClient, StripeError};
