//! Retry middleware for Tower services with retry quotas and adaptive
//! client-side rate limiting.
//!
//! The middleware turns one logical [`Operation`] into as many [`Attempt`]s
//! as it takes, deciding between attempts:
//!
//! - **whether to retry**: ordered classifier chains with three-valued
//!   verdicts ([`classify`])
//! - **how long to wait**: exponential backoff with full jitter ([`backoff`])
//! - **whether retrying is affordable**: a shared, cost-based [`RetryQuota`]
//!   that successes slowly refill
//! - **whether to send at all** (adaptive mode): an AIMD send rate that
//!   drops sharply when the service throttles and recovers along a cubic
//!   curve when it stops
//!
//! Every wait observes the operation's [`CancellationToken`] and deadline.
//! Whatever happens, the caller gets exactly one result; a failure is a
//! [`RetryError`] that keeps the last attempt's error as its source.
//!
//! # Examples
//!
//! ```
//! use tower_adaptive_retry::{
//!     AdaptiveConfig, Attempt, AttemptError, Operation, RetryLayer,
//! };
//! use tower::{Service, ServiceBuilder, ServiceExt};
//!
//! #[derive(Debug)]
//! struct HttpError(u16);
//!
//! impl std::fmt::Display for HttpError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "status {}", self.0)
//!     }
//! }
//! impl std::error::Error for HttpError {}
//! impl AttemptError for HttpError {
//!     fn status_code(&self) -> Option<u16> {
//!         Some(self.0)
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let retry = RetryLayer::<HttpError>::builder()
//!     .adaptive(AdaptiveConfig::default().with_max_attempts(5))
//!     .name("orders")
//!     .on_retry(|attempt, delay| {
//!         println!("attempt {} failed, retrying in {:?}", attempt, delay);
//!     })
//!     .build();
//!
//! let mut service = ServiceBuilder::new()
//!     .layer(retry)
//!     .service(tower::service_fn(|attempt: Attempt<String>| async move {
//!         // Send `attempt.request` with the `attempt.header()` header.
//!         Ok::<_, HttpError>(format!("{} -> ok", attempt.header_value()))
//!     }));
//!
//! let response = service
//!     .ready()
//!     .await?
//!     .call(Operation::new("GET /orders".to_string()))
//!     .await?;
//! assert_eq!(response, "attempt=1; max=5 -> ok");
//! # Ok(())
//! # }
//! ```

mod adaptive;
pub mod backoff;
pub mod classify;
mod config;
mod events;
mod layer;
mod metadata;
mod standard;
mod strategy;

pub use adaptive::{Adaptive, AdaptiveConfig, DEFAULT_REQUEST_COST};
pub use backoff::{BackoffDelayer, BackoffError, ExponentialJitterBackoff};
pub use classify::{AttemptError, Classifier, ClassifierChain, RetryableCodes, ThrottleCodes};
pub use config::{RetryConfig, RetryConfigBuilder};
pub use events::RetryEvent;
pub use layer::RetryLayer;
pub use metadata::{Attempt, AttemptMetadata, ClockSkewRecorder, REQUEST_METADATA_HEADER};
pub use standard::{
    Standard, StandardConfig, DEFAULT_MAX_ATTEMPTS, DEFAULT_NO_RETRY_INCREMENT,
    DEFAULT_RETRY_COST, DEFAULT_RETRY_TIMEOUT_COST,
};
pub use strategy::{ParseRetryModeError, RetryMode, Retryer};

pub use tower_adaptive_retry_core::{CancellationToken, RetryError, Ternary};
pub use tower_adaptive_retry_ratelimit::{
    AcquireError, AdaptiveRateConfig, AdaptiveRateController, Outcome, QuotaExceeded,
    Reservation, RetryQuota,
};

use chrono::{DateTime, TimeDelta, Utc};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tower::{Service, ServiceExt};
use tower_adaptive_retry_core::sleep_or_cancel;

#[cfg(feature = "metrics")]
use metrics::{counter, describe_counter, describe_histogram, histogram};

#[cfg(feature = "tracing")]
use tracing::{debug, warn};

/// One logical request, retried as a whole.
#[derive(Debug, Clone)]
pub struct Operation<Req> {
    /// The request, cloned for every attempt.
    pub request: Req,
    /// Cancel to abandon the operation; waits end promptly.
    pub cancel: CancellationToken,
    /// Wall-clock time after which no attempt starts and no wait continues.
    pub deadline: Option<DateTime<Utc>>,
}

impl<Req> Operation<Req> {
    /// An operation with no deadline and its own cancellation token.
    pub fn new(request: Req) -> Self {
        Self {
            request,
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Uses `cancel` to abandon the operation.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Sets the deadline.
    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sets the deadline `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        let delta = TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX);
        let deadline = Utc::now()
            .checked_add_signed(delta)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.with_deadline(deadline)
    }
}

impl<Req> From<Req> for Operation<Req> {
    fn from(request: Req) -> Self {
        Self::new(request)
    }
}

/// A Tower [`Service`] that retries failed attempts of an operation.
///
/// The inner service sends one [`Attempt`]; this service drives the attempt
/// loop around it according to the configured [`Retryer`].
pub struct Retry<S, E> {
    inner: S,
    config: Arc<RetryConfig<E>>,
}

impl<S, E> Retry<S, E> {
    /// Creates a new `Retry` service wrapping the given service.
    pub fn new(inner: S, config: Arc<RetryConfig<E>>) -> Self {
        #[cfg(feature = "metrics")]
        {
            describe_counter!(
                "retry_calls_total",
                "Total number of retried operations (success or error)"
            );
            describe_counter!(
                "retry_attempts_total",
                "Total number of attempts sent, including first attempts"
            );
            describe_counter!(
                "retry_quota_exhausted_total",
                "Total number of retries refused by the retry quota"
            );
            describe_histogram!(
                "retry_attempts",
                "Number of attempts an operation took"
            );
        }

        Self { inner, config }
    }
}

impl<S, E> Clone for Retry<S, E>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

/// Runs `future`, giving up at `deadline`.
async fn within_deadline<F: Future>(
    deadline: Option<DateTime<Utc>>,
    future: F,
) -> Option<F::Output> {
    let Some(deadline) = deadline else {
        return Some(future.await);
    };
    let remaining = deadline
        .signed_duration_since(Utc::now())
        .to_std()
        .unwrap_or(Duration::ZERO);
    tokio::time::timeout(remaining, future).await.ok()
}

fn is_expired(deadline: Option<DateTime<Utc>>) -> bool {
    deadline.is_some_and(|deadline| deadline <= Utc::now())
}

fn record_completion<E>(config: &RetryConfig<E>, attempts: usize, result: &'static str) {
    #[cfg(feature = "metrics")]
    {
        counter!("retry_calls_total", "retry" => config.name.clone(), "result" => result)
            .increment(1);
        histogram!("retry_attempts", "retry" => config.name.clone()).record(attempts as f64);
    }

    #[cfg(not(feature = "metrics"))]
    let _ = (config, attempts, result);
}

impl<S, Req, E> Service<Operation<Req>> for Retry<S, E>
where
    S: Service<Attempt<Req>, Error = E> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    Req: Clone + Send + 'static,
    E: Send + 'static,
{
    type Response = S::Response;
    type Error = RetryError<E>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner
            .poll_ready(cx)
            .map_err(|source| RetryError::NotRetryable {
                attempts: 0,
                source,
            })
    }

    fn call(&mut self, operation: Operation<Req>) -> Self::Future {
        let service = self.inner.clone();
        let config = Arc::clone(&self.config);

        Box::pin(async move {
            let Operation {
                request,
                cancel,
                deadline,
            } = operation;
            let mut service = service;
            let retryer = Arc::clone(&config.retryer);
            let max_attempts = retryer.max_attempts();
            let skew = ClockSkewRecorder::new();

            let mut attempt = 0;
            let mut clock_skew = TimeDelta::zero();
            let mut held = retryer.get_initial_token();
            let mut last_error: Option<E> = None;

            loop {
                attempt += 1;

                if cancel.is_cancelled() || is_expired(deadline) {
                    config.event_listeners.emit(&RetryEvent::Canceled {
                        source_name: config.name.clone(),
                        timestamp: Instant::now(),
                        attempts: attempt - 1,
                    });
                    record_completion(&config, attempt - 1, "canceled");

                    return Err(RetryError::Canceled {
                        attempts: attempt - 1,
                        source: last_error,
                    });
                }

                let send = match within_deadline(deadline, retryer.get_attempt_token(&cancel)).await
                {
                    Some(Ok(reservation)) => reservation,
                    Some(Err(AcquireError::Denied)) => {
                        config.event_listeners.emit(&RetryEvent::Error {
                            source_name: config.name.clone(),
                            timestamp: Instant::now(),
                            attempts: attempt - 1,
                        });
                        record_completion(&config, attempt - 1, "token_denied");

                        #[cfg(feature = "tracing")]
                        warn!(retry = %config.name, attempt, "no send token available");

                        return Err(RetryError::AttemptTokenDenied {
                            attempts: attempt - 1,
                            source: last_error,
                        });
                    }
                    Some(Err(AcquireError::Canceled)) | None => {
                        config.event_listeners.emit(&RetryEvent::Canceled {
                            source_name: config.name.clone(),
                            timestamp: Instant::now(),
                            attempts: attempt - 1,
                        });
                        record_completion(&config, attempt - 1, "canceled");

                        #[cfg(feature = "tracing")]
                        debug!(retry = %config.name, attempt, "canceled waiting for send token");

                        return Err(RetryError::Canceled {
                            attempts: attempt - 1,
                            source: last_error,
                        });
                    }
                };

                let metadata = AttemptMetadata {
                    attempt,
                    attempt_time: Utc::now(),
                    max_attempts,
                    clock_skew,
                };
                config.event_listeners.emit(&RetryEvent::Attempt {
                    source_name: config.name.clone(),
                    timestamp: Instant::now(),
                    attempt,
                    max_attempts,
                });

                #[cfg(feature = "metrics")]
                counter!("retry_attempts_total", "retry" => config.name.clone()).increment(1);

                let input = Attempt::new(
                    request.clone(),
                    metadata,
                    deadline,
                    cancel.clone(),
                    skew.clone(),
                );
                let result = match service.ready().await {
                    Ok(ready) => ready.call(input).await,
                    Err(err) => Err(err),
                };

                let outcome = retryer.outcome_of(result.as_ref().err());
                send.settle(outcome);
                clock_skew = skew.take().unwrap_or_else(TimeDelta::zero);

                let err = match result {
                    Ok(response) => {
                        held.settle(Outcome::Succeeded);
                        config.event_listeners.emit(&RetryEvent::Success {
                            source_name: config.name.clone(),
                            timestamp: Instant::now(),
                            attempts: attempt,
                        });
                        record_completion(&config, attempt, "success");

                        #[cfg(feature = "tracing")]
                        if attempt > 1 {
                            debug!(retry = %config.name, attempts = attempt, "succeeded after retries");
                        }

                        return Ok(response);
                    }
                    Err(err) => err,
                };
                held.settle(Outcome::Failed);

                if outcome == Outcome::Throttled {
                    config.event_listeners.emit(&RetryEvent::Throttled {
                        source_name: config.name.clone(),
                        timestamp: Instant::now(),
                        attempt,
                    });

                    #[cfg(feature = "tracing")]
                    debug!(retry = %config.name, attempt, "attempt throttled");
                }

                let verdict = retryer.classify(&err);
                if verdict != Ternary::True {
                    config.event_listeners.emit(&RetryEvent::IgnoredError {
                        source_name: config.name.clone(),
                        timestamp: Instant::now(),
                        attempts: attempt,
                        verdict,
                    });
                    record_completion(
                        &config,
                        attempt,
                        if verdict == Ternary::False {
                            "not_retryable"
                        } else {
                            "unclassified"
                        },
                    );

                    #[cfg(feature = "tracing")]
                    debug!(retry = %config.name, attempt, %verdict, "error not retried");

                    return Err(if verdict == Ternary::False {
                        RetryError::NotRetryable {
                            attempts: attempt,
                            source: err,
                        }
                    } else {
                        RetryError::Unclassified {
                            attempts: attempt,
                            source: err,
                        }
                    });
                }

                if max_attempts > 0 && attempt >= max_attempts {
                    config.event_listeners.emit(&RetryEvent::Error {
                        source_name: config.name.clone(),
                        timestamp: Instant::now(),
                        attempts: attempt,
                    });
                    record_completion(&config, attempt, "exhausted");

                    #[cfg(feature = "tracing")]
                    warn!(retry = %config.name, attempts = attempt, "retry attempts exhausted");

                    return Err(RetryError::MaxAttemptsExceeded {
                        attempts: attempt,
                        source: err,
                    });
                }

                let delay = match retryer.retry_delay(attempt, &err) {
                    Ok(delay) => delay,
                    Err(reason) => {
                        record_completion(&config, attempt, "invalid_delay");
                        return Err(RetryError::InvalidDelay {
                            attempts: attempt,
                            reason: reason.to_string(),
                            source: err,
                        });
                    }
                };

                held = match retryer.get_retry_token(&err) {
                    Ok(reservation) => reservation,
                    Err(exceeded) => {
                        config.event_listeners.emit(&RetryEvent::QuotaExhausted {
                            source_name: config.name.clone(),
                            timestamp: Instant::now(),
                            attempt,
                            available: exceeded.available,
                            cost: exceeded.cost,
                        });
                        record_completion(&config, attempt, "quota_exceeded");

                        #[cfg(feature = "metrics")]
                        counter!("retry_quota_exhausted_total", "retry" => config.name.clone())
                            .increment(1);

                        #[cfg(feature = "tracing")]
                        warn!(
                            retry = %config.name,
                            attempt,
                            available = exceeded.available,
                            cost = exceeded.cost,
                            "retry quota exhausted"
                        );

                        return Err(RetryError::QuotaExceeded {
                            attempts: attempt,
                            available: exceeded.available,
                            cost: exceeded.cost,
                            source: err,
                        });
                    }
                };

                config.event_listeners.emit(&RetryEvent::Retry {
                    source_name: config.name.clone(),
                    timestamp: Instant::now(),
                    attempt,
                    delay,
                });

                #[cfg(feature = "tracing")]
                debug!(
                    retry = %config.name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after backoff"
                );

                let slept = within_deadline(deadline, sleep_or_cancel(delay, &cancel)).await;
                if !matches!(slept, Some(Ok(()))) {
                    config.event_listeners.emit(&RetryEvent::Canceled {
                        source_name: config.name.clone(),
                        timestamp: Instant::now(),
                        attempts: attempt,
                    });
                    record_completion(&config, attempt, "canceled");

                    #[cfg(feature = "tracing")]
                    debug!(retry = %config.name, attempt, "canceled during backoff");

                    return Err(RetryError::Canceled {
                        attempts: attempt,
                        source: Some(err),
                    });
                }

                last_error = Some(err);
            }
        })
    }
}
