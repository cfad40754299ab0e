//! The error an operation surfaces to its caller.
//!
//! An operation is made of one or more attempts. Whatever happens across those
//! attempts, the caller sees exactly one [`RetryError`], and whenever an attempt
//! actually ran, the last attempt's error is preserved inside it and reachable
//! through [`std::error::Error::source`].
//!
//! # Pattern Matching
//!
//! ```rust
//! use tower_adaptive_retry_core::RetryError;
//!
//! # #[derive(Debug)]
//! # struct AppError;
//! # impl std::fmt::Display for AppError {
//! #     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "app") }
//! # }
//! # impl std::error::Error for AppError {}
//! fn report(error: RetryError<AppError>) {
//!     match error {
//!         RetryError::QuotaExceeded { attempts, .. } => {
//!             eprintln!("backpressure: gave up after {} attempts", attempts);
//!         }
//!         RetryError::Canceled { .. } => eprintln!("caller gave up"),
//!         other => eprintln!("service said no: {}", other),
//!     }
//! }
//! ```

/// Terminal outcome of a retried operation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RetryError<E> {
    /// A classifier explicitly marked the error as not retryable.
    #[error("attempt {attempts} failed with a non-retryable error: {source}")]
    NotRetryable {
        /// Number of attempts made.
        attempts: usize,
        /// Error returned by the last attempt.
        #[source]
        source: E,
    },

    /// No classifier had an opinion about the error; treated as not retryable.
    #[error("attempt {attempts} failed with an unclassified error: {source}")]
    Unclassified {
        /// Number of attempts made.
        attempts: usize,
        /// Error returned by the last attempt.
        #[source]
        source: E,
    },

    /// The configured maximum number of attempts was reached.
    #[error("exceeded maximum number of attempts, {attempts}, {source}")]
    MaxAttemptsExceeded {
        /// Number of attempts made.
        attempts: usize,
        /// Error returned by the last attempt.
        #[source]
        source: E,
    },

    /// The retry quota could not cover the cost of another retry.
    #[error("retry quota exceeded, {available} available, {cost} requested, after {attempts} attempts: {source}")]
    QuotaExceeded {
        /// Number of attempts made.
        attempts: usize,
        /// Tokens left in the quota when the retry was refused.
        available: usize,
        /// Cost the retry would have consumed.
        cost: usize,
        /// Error returned by the last attempt.
        #[source]
        source: E,
    },

    /// The caller canceled the operation while it was waiting.
    #[error("request canceled after {attempts} attempts")]
    Canceled {
        /// Number of attempts made before the cancellation was observed.
        attempts: usize,
        /// Error returned by the last attempt, if one ran.
        #[source]
        source: Option<E>,
    },

    /// No send token was available and the strategy is configured not to wait.
    #[error("unable to get attempt token, and fail on no attempt tokens is enabled")]
    AttemptTokenDenied {
        /// Number of attempts made before the denial.
        attempts: usize,
        /// Error returned by the last attempt, if one ran.
        #[source]
        source: Option<E>,
    },

    /// The backoff strategy could not compute a delay.
    #[error("failed to compute retry delay after {attempts} attempts, {reason}")]
    InvalidDelay {
        /// Number of attempts made.
        attempts: usize,
        /// Why the delay could not be computed.
        reason: String,
        /// Error returned by the last attempt.
        #[source]
        source: E,
    },
}

impl<E> RetryError<E> {
    /// Number of attempts that were made.
    pub fn attempts(&self) -> usize {
        match self {
            RetryError::NotRetryable { attempts, .. }
            | RetryError::Unclassified { attempts, .. }
            | RetryError::MaxAttemptsExceeded { attempts, .. }
            | RetryError::QuotaExceeded { attempts, .. }
            | RetryError::Canceled { attempts, .. }
            | RetryError::AttemptTokenDenied { attempts, .. }
            | RetryError::InvalidDelay { attempts, .. } => *attempts,
        }
    }

    /// Borrows the last attempt's error, if an attempt ran.
    pub fn attempt_error(&self) -> Option<&E> {
        match self {
            RetryError::NotRetryable { source, .. }
            | RetryError::Unclassified { source, .. }
            | RetryError::MaxAttemptsExceeded { source, .. }
            | RetryError::QuotaExceeded { source, .. }
            | RetryError::InvalidDelay { source, .. } => Some(source),
            RetryError::Canceled { source, .. } | RetryError::AttemptTokenDenied { source, .. } => {
                source.as_ref()
            }
        }
    }

    /// Takes the last attempt's error, if an attempt ran.
    pub fn into_attempt_error(self) -> Option<E> {
        match self {
            RetryError::NotRetryable { source, .. }
            | RetryError::Unclassified { source, .. }
            | RetryError::MaxAttemptsExceeded { source, .. }
            | RetryError::QuotaExceeded { source, .. }
            | RetryError::InvalidDelay { source, .. } => Some(source),
            RetryError::Canceled { source, .. } | RetryError::AttemptTokenDenied { source, .. } => {
                source
            }
        }
    }

    /// Returns `true` if the caller canceled the operation.
    pub fn is_canceled(&self) -> bool {
        matches!(self, RetryError::Canceled { .. })
    }

    /// Returns `true` if the retry quota ran dry.
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, RetryError::QuotaExceeded { .. })
    }

    /// Returns `true` if the attempt limit was reached.
    pub fn is_max_attempts(&self) -> bool {
        matches!(self, RetryError::MaxAttemptsExceeded { .. })
    }

    /// Returns `true` if a send token was refused.
    pub fn is_attempt_token_denied(&self) -> bool {
        matches!(self, RetryError::AttemptTokenDenied { .. })
    }

    /// Returns `true` if the operation stopped because the error was
    /// classified as not retryable (or could not be classified at all).
    pub fn is_terminal_classification(&self) -> bool {
        matches!(
            self,
            RetryError::NotRetryable { .. } | RetryError::Unclassified { .. }
        )
    }

    /// Maps the attempt error, keeping the retry context.
    ///
    /// ```
    /// use tower_adaptive_retry_core::RetryError;
    ///
    /// let err: RetryError<String> = RetryError::MaxAttemptsExceeded {
    ///     attempts: 3,
    ///     source: "boom".to_string(),
    /// };
    /// let mapped = err.map_attempt_error(|s| s.len());
    /// assert_eq!(mapped.attempt_error(), Some(&4));
    /// assert_eq!(mapped.attempts(), 3);
    /// ```
    pub fn map_attempt_error<F, T>(self, f: F) -> RetryError<T>
    where
        F: FnOnce(E) -> T,
    {
        match self {
            RetryError::NotRetryable { attempts, source } => RetryError::NotRetryable {
                attempts,
                source: f(source),
            },
            RetryError::Unclassified { attempts, source } => RetryError::Unclassified {
                attempts,
                source: f(source),
            },
            RetryError::MaxAttemptsExceeded { attempts, source } => {
                RetryError::MaxAttemptsExceeded {
                    attempts,
                    source: f(source),
                }
            }
            RetryError::QuotaExceeded {
                attempts,
                available,
                cost,
                source,
            } => RetryError::QuotaExceeded {
                attempts,
                available,
                cost,
                source: f(source),
            },
            RetryError::Canceled { attempts, source } => RetryError::Canceled {
                attempts,
                source: source.map(f),
            },
            RetryError::AttemptTokenDenied { attempts, source } => {
                RetryError::AttemptTokenDenied {
                    attempts,
                    source: source.map(f),
                }
            }
            RetryError::InvalidDelay {
                attempts,
                reason,
                source,
            } => RetryError::InvalidDelay {
                attempts,
                reason,
                source: f(source),
            },
        }
    }
}
