//! Retry quota.
//!
//! The quota bounds how many retries a client may make in total, independent
//! of how long each retry waits. Every retry pays a cost out of a shared pool;
//! successful attempts slowly pay it back. When the pool runs dry the next
//! retry fails immediately, which keeps a burst of zero-delay retries from
//! piling onto a struggling service.

use crate::reservation::Reservation;
use crate::token_bucket::TokenBucket;
use std::sync::Arc;

/// Default size of the retry quota pool.
pub const DEFAULT_RETRY_QUOTA_TOKENS: usize = 500;

/// The quota could not cover the requested retry cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("retry quota exceeded, {available} available, {cost} requested")]
pub struct QuotaExceeded {
    /// Tokens left in the pool.
    pub available: usize,
    /// Tokens the retry asked for.
    pub cost: usize,
}

/// A shared, cost-based pool of retry tokens.
///
/// Cloning is cheap; clones share the same pool.
///
/// # Example
///
/// ```rust
/// use tower_adaptive_retry_ratelimit::{Outcome, RetryQuota};
///
/// let quota = RetryQuota::new(10);
/// let first = quota.get_token(5).unwrap();
/// let _second = quota.get_token(5).unwrap();
/// assert!(quota.get_token(5).is_err());
///
/// // A successful retry gives its cost back.
/// first.settle(Outcome::Succeeded);
/// assert_eq!(quota.balance(), 5);
/// ```
#[derive(Debug, Clone)]
pub struct RetryQuota {
    bucket: Arc<TokenBucket>,
}

impl RetryQuota {
    /// Creates a full quota of `max_tokens`.
    pub fn new(max_tokens: usize) -> Self {
        Self {
            bucket: Arc::new(TokenBucket::new(max_tokens)),
        }
    }

    /// Deducts `cost` tokens. The returned reservation gives the full cost
    /// back if the attempt it paid for succeeds.
    pub fn get_token(&self, cost: usize) -> Result<Reservation, QuotaExceeded> {
        self.reserve(cost, cost)
    }

    /// Deducts `cost` tokens. The returned reservation gives back
    /// `refund_on_success` tokens if the attempt it paid for succeeds.
    pub fn reserve(
        &self,
        cost: usize,
        refund_on_success: usize,
    ) -> Result<Reservation, QuotaExceeded> {
        let (available, ok) = self.bucket.retrieve(cost);
        if !ok {
            #[cfg(feature = "tracing")]
            tracing::debug!(available, cost, "retry quota exhausted");
            return Err(QuotaExceeded { available, cost });
        }
        Ok(Reservation::quota(self.clone(), refund_on_success))
    }

    /// A reservation that costs nothing now and adds `increment` tokens if
    /// the attempt succeeds. Used for first attempts.
    pub fn on_success_increment(&self, increment: usize) -> Reservation {
        Reservation::quota(self.clone(), increment)
    }

    /// Puts `amount` tokens back, clamped to the pool size.
    pub fn add_tokens(&self, amount: usize) {
        self.bucket.refund(amount);
    }

    /// Tokens currently available.
    pub fn balance(&self) -> usize {
        self.bucket.capacity()
    }

    /// Size of the pool.
    pub fn max_tokens(&self) -> usize {
        self.bucket.max_capacity()
    }
}

impl Default for RetryQuota {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_QUOTA_TOKENS)
    }
}
