//! CV-Match billing client SDK.
//!
//! Used by the optimization pipeline and other internal services to charge
//! and refund credits and to ask whether a user may run an optimization.
//!
//! # Example
//!
//! ```no_run
//! use cvmatch_client::{BillingClient, ClientError};
//! use cvmatch_core::UserId;
//!
//! # async fn example(user_id: UserId) -> Result<(), ClientError> {
//! let client = BillingClient::new("http://billing:8080", "your-service-api-key")?;
//!
//! let decision = client.check_usage(&user_id).await?;
//! if decision.can_optimize {
//!     let consumed = client.consume_optimization(&user_id, "opt_123").await?;
//!     println!("Credits left: {}", consumed.credits_remaining);
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod client;
mod error;
mod types;

pub use client::{BillingClient, ClientOptions};
pub use error::ClientError;
pub use types::*;
