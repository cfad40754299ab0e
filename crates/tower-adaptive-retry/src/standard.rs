use crate::backoff::{BackoffDelayer, BackoffError, ExponentialJitterBackoff, DEFAULT_MAX_BACKOFF};
use crate::classify::{
    AttemptError, Classifier, ClassifierChain, ErrorCode, HttpStatusCode, RetryableCodes,
    ThrottleCodes,
};
use crate::strategy::Retryer;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tower_adaptive_retry_core::{CancellationToken, Ternary};
use tower_adaptive_retry_ratelimit::{AcquireError, QuotaExceeded, Reservation, RetryQuota};

/// Default maximum attempts per operation, including the first.
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Default quota cost of a retry.
pub const DEFAULT_RETRY_COST: usize = 5;

/// Default quota cost of a retry after a timeout.
pub const DEFAULT_RETRY_TIMEOUT_COST: usize = 10;

/// Default quota tokens returned by a successful attempt.
pub const DEFAULT_NO_RETRY_INCREMENT: usize = 1;

/// Settings for [`Standard`].
///
/// # Example
///
/// ```rust
/// use tower_adaptive_retry::{Retryer, Standard, StandardConfig};
/// use std::time::Duration;
///
/// let retryer = Standard::<std::io::Error>::new(
///     StandardConfig::default()
///         .with_max_attempts(5)
///         .with_max_backoff(Duration::from_secs(2)),
/// );
/// assert_eq!(retryer.max_attempts(), 5);
/// ```
pub struct StandardConfig<E> {
    /// Maximum attempts per operation, 0 for no limit.
    pub max_attempts: usize,
    /// Cap on the default backoff's delay.
    pub max_backoff: Duration,
    /// Backoff strategy. Defaults to exponential jitter capped at `max_backoff`.
    pub backoff: Option<Arc<dyn BackoffDelayer>>,
    /// Decides whether an error is retryable.
    pub retryables: ClassifierChain<E>,
    /// Decides whether an error was a timeout, which makes the retry cost more.
    pub timeouts: ClassifierChain<E>,
    /// Shared pool retries are paid from.
    pub retry_quota: RetryQuota,
    /// Quota cost of a retry.
    pub retry_cost: usize,
    /// Quota cost of a retry after a timeout.
    pub retry_timeout_cost: usize,
    /// Quota tokens returned when an attempt succeeds.
    pub no_retry_increment: usize,
}

impl<E: AttemptError> Default for StandardConfig<E> {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_backoff: DEFAULT_MAX_BACKOFF,
            backoff: None,
            retryables: ClassifierChain::retryables(
                &RetryableCodes::default(),
                &ThrottleCodes::default(),
            ),
            timeouts: ClassifierChain::timeouts(),
            retry_quota: RetryQuota::default(),
            retry_cost: DEFAULT_RETRY_COST,
            retry_timeout_cost: DEFAULT_RETRY_TIMEOUT_COST,
            no_retry_increment: DEFAULT_NO_RETRY_INCREMENT,
        }
    }
}

impl<E> StandardConfig<E> {
    /// Sets the maximum attempts, 0 for no limit.
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the cap on the default backoff's delay.
    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    /// Replaces the backoff strategy.
    pub fn with_backoff<B>(mut self, backoff: B) -> Self
    where
        B: BackoffDelayer + 'static,
    {
        self.backoff = Some(Arc::new(backoff));
        self
    }

    /// Replaces the retryability chain.
    pub fn with_retryables(mut self, retryables: ClassifierChain<E>) -> Self {
        self.retryables = retryables;
        self
    }

    /// Appends a classifier to the retryability chain.
    pub fn with_retryable<C>(mut self, classifier: C) -> Self
    where
        C: Classifier<E> + 'static,
    {
        self.retryables.push(classifier);
        self
    }

    /// Replaces the timeout chain.
    pub fn with_timeouts(mut self, timeouts: ClassifierChain<E>) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Uses a shared retry quota.
    pub fn with_retry_quota(mut self, quota: RetryQuota) -> Self {
        self.retry_quota = quota;
        self
    }

    /// Sets the quota cost of a retry.
    pub fn with_retry_cost(mut self, cost: usize) -> Self {
        self.retry_cost = cost;
        self
    }

    /// Sets the quota cost of a retry after a timeout.
    pub fn with_retry_timeout_cost(mut self, cost: usize) -> Self {
        self.retry_timeout_cost = cost;
        self
    }

    /// Sets the quota tokens returned when an attempt succeeds.
    pub fn with_no_retry_increment(mut self, increment: usize) -> Self {
        self.no_retry_increment = increment;
        self
    }
}

impl<E: AttemptError> StandardConfig<E> {
    /// Also retries errors carrying any of `codes`.
    pub fn with_retryable_codes(self, codes: &RetryableCodes) -> Self {
        self.with_retryable(HttpStatusCode::new(codes.status_codes.iter().copied()))
            .with_retryable(ErrorCode::new(codes.error_codes.iter().cloned()))
    }
}

impl<E> fmt::Debug for StandardConfig<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StandardConfig")
            .field("max_attempts", &self.max_attempts)
            .field("max_backoff", &self.max_backoff)
            .field("retryables", &self.retryables)
            .field("timeouts", &self.timeouts)
            .field("retry_quota", &self.retry_quota)
            .field("retry_cost", &self.retry_cost)
            .field("retry_timeout_cost", &self.retry_timeout_cost)
            .field("no_retry_increment", &self.no_retry_increment)
            .finish_non_exhaustive()
    }
}

/// Backoff plus a shared retry quota.
///
/// Every retry costs `retry_cost` quota tokens (`retry_timeout_cost` after a
/// timeout). A successful attempt returns `no_retry_increment` tokens. When
/// the quota cannot cover a retry, the operation stops retrying.
pub struct Standard<E> {
    max_attempts: usize,
    backoff: Arc<dyn BackoffDelayer>,
    retryables: ClassifierChain<E>,
    timeouts: ClassifierChain<E>,
    retry_quota: RetryQuota,
    retry_cost: usize,
    retry_timeout_cost: usize,
    no_retry_increment: usize,
}

impl<E> Standard<E> {
    /// Builds the strategy.
    pub fn new(config: StandardConfig<E>) -> Self {
        let backoff = config
            .backoff
            .unwrap_or_else(|| Arc::new(ExponentialJitterBackoff::new(config.max_backoff)));

        Self {
            max_attempts: config.max_attempts,
            backoff,
            retryables: config.retryables,
            timeouts: config.timeouts,
            retry_quota: config.retry_quota,
            retry_cost: config.retry_cost,
            retry_timeout_cost: config.retry_timeout_cost,
            no_retry_increment: config.no_retry_increment,
        }
    }

    /// The retry quota this strategy pays from.
    pub fn retry_quota(&self) -> &RetryQuota {
        &self.retry_quota
    }

    /// Quota cost of retrying after `error`.
    pub fn retry_cost_for(&self, error: &E) -> usize {
        if self.timeouts.classify(error).bool() {
            self.retry_timeout_cost
        } else {
            self.retry_cost
        }
    }
}

impl<E: AttemptError> Default for Standard<E> {
    fn default() -> Self {
        Self::new(StandardConfig::default())
    }
}

impl<E> Clone for Standard<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            backoff: Arc::clone(&self.backoff),
            retryables: self.retryables.clone(),
            timeouts: self.timeouts.clone(),
            retry_quota: self.retry_quota.clone(),
            retry_cost: self.retry_cost,
            retry_timeout_cost: self.retry_timeout_cost,
            no_retry_increment: self.no_retry_increment,
        }
    }
}

impl<E> fmt::Debug for Standard<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Standard")
            .field("max_attempts", &self.max_attempts)
            .field("retry_quota", &self.retry_quota)
            .field("retry_cost", &self.retry_cost)
            .field("retry_timeout_cost", &self.retry_timeout_cost)
            .field("no_retry_increment", &self.no_retry_increment)
            .finish_non_exhaustive()
    }
}

impl<E: AttemptError> Retryer<E> for Standard<E> {
    fn classify(&self, error: &E) -> Ternary {
        self.retryables.classify(error)
    }

    fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    fn retry_delay(&self, attempt: usize, error: &E) -> Result<Duration, BackoffError> {
        self.backoff.delay(attempt, error)
    }

    fn get_retry_token(&self, error: &E) -> Result<Reservation, QuotaExceeded> {
        let cost = self.retry_cost_for(error);
        self.retry_quota.reserve(cost, self.no_retry_increment)
    }

    fn get_initial_token(&self) -> Reservation {
        self.retry_quota
            .on_success_increment(self.no_retry_increment)
    }

    fn get_attempt_token<'a>(
        &'a self,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Reservation, AcquireError>> {
        futures::future::ready(Ok(Reservation::noop())).boxed()
    }
}
