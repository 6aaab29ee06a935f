//! API handlers.

pub mod accounts;
pub mod credits;
pub mod health;
pub mod payments;
pub mod usage;
pub mod webhooks;
