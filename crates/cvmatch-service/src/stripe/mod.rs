//! Stripe integration: API client, webhook signatures and event processing.

mod client;
pub mod events;
pub mod signature;
pub mod types;

pub use client::{CheckoutItem, CheckoutRequest, StripeClient, StripeError};
pub use events::{
    StripeEventProcessor, WebhookEffect, WebhookOutcome, DEFAULT_CLAIM_LEASE_SECONDS,
};
pub use signature::{sign_payload, verify_signature};
pub use types::{CheckoutSession, PaymentIntent, StripeEvent};
