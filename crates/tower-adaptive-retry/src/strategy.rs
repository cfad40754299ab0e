//! Retry strategies.
//!
//! A [`Retryer`] answers every question the retry loop asks between
//! attempts: is this error worth retrying, how long to wait, may we spend
//! quota on another try, and may we send right now. [`Standard`] covers the
//! first three; [`Adaptive`] adds client-side send rate limiting on top.
//!
//! [`Standard`]: crate::Standard
//! [`Adaptive`]: crate::Adaptive

use crate::backoff::BackoffError;
use crate::classify::AttemptError;
use futures::future::BoxFuture;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tower_adaptive_retry_core::{CancellationToken, Ternary};
use tower_adaptive_retry_ratelimit::{AcquireError, Outcome, QuotaExceeded, Reservation};

/// The decisions a retry loop delegates.
pub trait Retryer<E>: Send + Sync {
    /// Verdict of the retryability chain.
    fn classify(&self, error: &E) -> Ternary;

    /// Whether `error` may be retried. Only an explicit `True` verdict counts.
    fn is_error_retryable(&self, error: &E) -> bool {
        self.classify(error).bool()
    }

    /// Maximum attempts per operation, 0 for no limit.
    fn max_attempts(&self) -> usize;

    /// Delay before the retry that follows failed attempt `attempt`.
    fn retry_delay(&self, attempt: usize, error: &E) -> Result<Duration, BackoffError>;

    /// Pays for a retry out of the retry quota.
    fn get_retry_token(&self, error: &E) -> Result<Reservation, QuotaExceeded>;

    /// Reservation held by the first attempt of an operation.
    fn get_initial_token(&self) -> Reservation;

    /// Waits for permission to send an attempt.
    fn get_attempt_token<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Reservation, AcquireError>>;

    /// How an attempt's result should settle its send reservation.
    fn outcome_of(&self, error: Option<&E>) -> Outcome {
        match error {
            None => Outcome::Succeeded,
            Some(_) => Outcome::Failed,
        }
    }
}

impl<E, R> Retryer<E> for Arc<R>
where
    R: Retryer<E> + ?Sized,
{
    fn classify(&self, error: &E) -> Ternary {
        (**self).classify(error)
    }

    fn is_error_retryable(&self, error: &E) -> bool {
        (**self).is_error_retryable(error)
    }

    fn max_attempts(&self) -> usize {
        (**self).max_attempts()
    }

    fn retry_delay(&self, attempt: usize, error: &E) -> Result<Duration, BackoffError> {
        (**self).retry_delay(attempt, error)
    }

    fn get_retry_token(&self, error: &E) -> Result<Reservation, QuotaExceeded> {
        (**self).get_retry_token(error)
    }

    fn get_initial_token(&self) -> Reservation {
        (**self).get_initial_token()
    }

    fn get_attempt_token<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Reservation, AcquireError>> {
        (**self).get_attempt_token(cancel)
    }

    fn outcome_of(&self, error: Option<&E>) -> Outcome {
        (**self).outcome_of(error)
    }
}

/// Which retry strategy to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum RetryMode {
    /// Backoff and retry quota.
    #[default]
    Standard,
    /// Standard, plus client-side send rate limiting driven by throttles.
    Adaptive,
}

impl RetryMode {
    /// Builds a strategy of this mode with default settings.
    pub fn retryer<E: AttemptError>(self) -> Arc<dyn Retryer<E>> {
        match self {
            RetryMode::Standard => Arc::new(crate::Standard::<E>::default()),
            RetryMode::Adaptive => Arc::new(crate::Adaptive::<E>::default()),
        }
    }
}

impl fmt::Display for RetryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryMode::Standard => write!(f, "standard"),
            RetryMode::Adaptive => write!(f, "adaptive"),
        }
    }
}

/// An unrecognized retry mode name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown retry mode {0:?}, expected \"standard\" or \"adaptive\"")]
pub struct ParseRetryModeError(String);

impl FromStr for RetryMode {
    type Err = ParseRetryModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(RetryMode::Standard),
            "adaptive" => Ok(RetryMode::Adaptive),
            _ => Err(ParseRetryModeError(s.to_string())),
        }
    }
}
