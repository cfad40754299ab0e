use crate::backoff::{BackoffDelayer, BackoffError};
use crate::classify::{AttemptError, Classifier, ClassifierChain, ThrottleCodes};
use crate::standard::{Standard, StandardConfig};
use crate::strategy::Retryer;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::time::Duration;
use tower_adaptive_retry_core::{CancellationToken, Ternary};
use tower_adaptive_retry_ratelimit::{
    AcquireError, AdaptiveRateConfig, AdaptiveRateController, Outcome, QuotaExceeded, Reservation,
    RetryQuota,
};

/// Default send-token cost of one attempt.
pub const DEFAULT_REQUEST_COST: usize = 1;

/// Settings for [`Adaptive`].
///
/// Everything [`StandardConfig`] has, plus the throttle chain and the send
/// rate controller.
pub struct AdaptiveConfig<E> {
    /// Backoff, quota and retryability settings.
    pub standard: StandardConfig<E>,
    /// Decides whether an error means the service is throttling the client.
    pub throttles: ClassifierChain<E>,
    /// Fail the attempt instead of waiting when no send token is available.
    pub fail_on_no_attempt_tokens: bool,
    /// Send tokens consumed by one attempt.
    pub request_cost: usize,
    /// Tunables for a controller created by [`Adaptive::new`].
    pub rate: AdaptiveRateConfig,
    /// A controller to share instead of creating one.
    pub controller: Option<AdaptiveRateController>,
}

impl<E: AttemptError> Default for AdaptiveConfig<E> {
    fn default() -> Self {
        Self {
            standard: StandardConfig::default(),
            throttles: ClassifierChain::throttles(&ThrottleCodes::default()),
            fail_on_no_attempt_tokens: false,
            request_cost: DEFAULT_REQUEST_COST,
            rate: AdaptiveRateConfig::default(),
            controller: None,
        }
    }
}

impl<E> AdaptiveConfig<E> {
    /// Sets the maximum attempts, 0 for no limit.
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.standard = self.standard.with_max_attempts(max_attempts);
        self
    }

    /// Sets the cap on the default backoff's delay.
    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.standard = self.standard.with_max_backoff(max_backoff);
        self
    }

    /// Replaces the backoff strategy.
    pub fn with_backoff<B>(mut self, backoff: B) -> Self
    where
        B: BackoffDelayer + 'static,
    {
        self.standard = self.standard.with_backoff(backoff);
        self
    }

    /// Appends a classifier to the retryability chain.
    pub fn with_retryable<C>(mut self, classifier: C) -> Self
    where
        C: Classifier<E> + 'static,
    {
        self.standard = self.standard.with_retryable(classifier);
        self
    }

    /// Replaces the throttle chain.
    pub fn with_throttles(mut self, throttles: ClassifierChain<E>) -> Self {
        self.throttles = throttles;
        self
    }

    /// Uses a shared retry quota.
    pub fn with_retry_quota(mut self, quota: RetryQuota) -> Self {
        self.standard = self.standard.with_retry_quota(quota);
        self
    }

    /// Sets the quota cost of a retry.
    pub fn with_retry_cost(mut self, cost: usize) -> Self {
        self.standard = self.standard.with_retry_cost(cost);
        self
    }

    /// Sets the quota cost of a retry after a timeout.
    pub fn with_retry_timeout_cost(mut self, cost: usize) -> Self {
        self.standard = self.standard.with_retry_timeout_cost(cost);
        self
    }

    /// Sets the quota tokens returned when an attempt succeeds.
    pub fn with_no_retry_increment(mut self, increment: usize) -> Self {
        self.standard = self.standard.with_no_retry_increment(increment);
        self
    }

    /// Fail instead of waiting when no send token is available.
    pub fn with_fail_on_no_attempt_tokens(mut self, fail: bool) -> Self {
        self.fail_on_no_attempt_tokens = fail;
        self
    }

    /// Sets the send tokens consumed by one attempt.
    pub fn with_request_cost(mut self, cost: usize) -> Self {
        self.request_cost = cost;
        self
    }

    /// Sets the tunables of the send rate controller.
    pub fn with_rate_config(mut self, rate: AdaptiveRateConfig) -> Self {
        self.rate = rate;
        self
    }

    /// Shares an existing send rate controller.
    pub fn with_controller(mut self, controller: AdaptiveRateController) -> Self {
        self.controller = Some(controller);
        self
    }
}

impl<E> fmt::Debug for AdaptiveConfig<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdaptiveConfig")
            .field("standard", &self.standard)
            .field("throttles", &self.throttles)
            .field("fail_on_no_attempt_tokens", &self.fail_on_no_attempt_tokens)
            .field("request_cost", &self.request_cost)
            .field("rate", &self.rate)
            .finish_non_exhaustive()
    }
}

/// [`Standard`] plus client-side send rate limiting.
///
/// Before every attempt the strategy takes `request_cost` tokens from an
/// [`AdaptiveRateController`], waiting for them unless
/// `fail_on_no_attempt_tokens` is set. After the attempt, whether it was
/// throttled is fed back to the controller, which lowers or raises the send
/// rate accordingly. Clones share the controller.
pub struct Adaptive<E> {
    standard: Standard<E>,
    throttles: ClassifierChain<E>,
    fail_on_no_attempt_tokens: bool,
    request_cost: usize,
    controller: AdaptiveRateController,
}

impl<E> Adaptive<E> {
    /// Builds the strategy.
    pub fn new(config: AdaptiveConfig<E>) -> Self {
        let controller = config
            .controller
            .unwrap_or_else(|| AdaptiveRateController::new(config.rate));

        Self {
            standard: Standard::new(config.standard),
            throttles: config.throttles,
            fail_on_no_attempt_tokens: config.fail_on_no_attempt_tokens,
            request_cost: config.request_cost,
            controller,
        }
    }

    /// The send rate controller.
    pub fn controller(&self) -> &AdaptiveRateController {
        &self.controller
    }

    /// The retry quota this strategy pays from.
    pub fn retry_quota(&self) -> &RetryQuota {
        self.standard.retry_quota()
    }

    /// Verdict of the throttle chain.
    pub fn is_throttle(&self, error: &E) -> Ternary {
        self.throttles.classify(error)
    }
}

impl<E: AttemptError> Default for Adaptive<E> {
    fn default() -> Self {
        Self::new(AdaptiveConfig::default())
    }
}

impl<E> Clone for Adaptive<E> {
    fn clone(&self) -> Self {
        Self {
            standard: self.standard.clone(),
            throttles: self.throttles.clone(),
            fail_on_no_attempt_tokens: self.fail_on_no_attempt_tokens,
            request_cost: self.request_cost,
            controller: self.controller.clone(),
        }
    }
}

impl<E> fmt::Debug for Adaptive<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adaptive")
            .field("standard", &self.standard)
            .field("fail_on_no_attempt_tokens", &self.fail_on_no_attempt_tokens)
            .field("request_cost", &self.request_cost)
            .field("controller", &self.controller)
            .finish_non_exhaustive()
    }
}

impl<E: AttemptError> Retryer<E> for Adaptive<E> {
    fn classify(&self, error: &E) -> Ternary {
        self.standard.classify(error)
    }

    fn max_attempts(&self) -> usize {
        self.standard.max_attempts()
    }

    fn retry_delay(&self, attempt: usize, error: &E) -> Result<Duration, BackoffError> {
        self.standard.retry_delay(attempt, error)
    }

    fn get_retry_token(&self, error: &E) -> Result<Reservation, QuotaExceeded> {
        self.standard.get_retry_token(error)
    }

    fn get_initial_token(&self) -> Reservation {
        self.standard.get_initial_token()
    }

    fn get_attempt_token<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Reservation, AcquireError>> {
        self.controller
            .reserve(self.request_cost, cancel, self.fail_on_no_attempt_tokens)
            .boxed()
    }

    fn outcome_of(&self, error: Option<&E>) -> Outcome {
        match error {
            None => Outcome::Succeeded,
            Some(err) if self.throttles.classify(err).bool() => Outcome::Throttled,
            Some(_) => Outcome::Failed,
        }
    }
}
