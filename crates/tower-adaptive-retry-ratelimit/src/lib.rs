//! Shared token pools for retrying clients.
//!
//! This crate holds the two pieces of client-wide state a retry loop consults
//! before making an attempt:
//!
//! - [`RetryQuota`]: a cost-based pool that bounds the total number of
//!   retries. Retries pay into it, successes slowly pay it back.
//! - [`AdaptiveRateController`]: an AIMD estimate of the send rate the
//!   service tolerates. Throttles cut the rate, everything else grows it back
//!   along a cubic curve.
//!
//! Both hand out a [`Reservation`], settled once with the attempt's
//! [`Outcome`].
//!
//! # Examples
//!
//! ```
//! use tower_adaptive_retry_ratelimit::{AdaptiveRateController, Outcome, RetryQuota};
//! use tower_adaptive_retry_ratelimit::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let quota = RetryQuota::default();
//! let controller = AdaptiveRateController::default();
//! let cancel = CancellationToken::new();
//!
//! // Pay for a retry and for the right to send it.
//! let retry = quota.get_token(5)?;
//! let send = controller.reserve(1, &cancel, false).await?;
//!
//! // ... make the attempt ...
//!
//! retry.settle(Outcome::Succeeded);
//! send.settle(Outcome::Succeeded);
//! # Ok(())
//! # }
//! ```

mod adaptive;
mod quota;
mod reservation;
mod token_bucket;

pub use adaptive::{AcquireError, AdaptiveRateConfig, AdaptiveRateController};
pub use quota::{QuotaExceeded, RetryQuota, DEFAULT_RETRY_QUOTA_TOKENS};
pub use reservation::{Outcome, Reservation};
pub use token_bucket::TokenBucket;

pub use tower_adaptive_retry_core::CancellationToken;
