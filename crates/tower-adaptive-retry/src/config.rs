use crate::adaptive::{Adaptive, AdaptiveConfig};
use crate::classify::AttemptError;
use crate::events::RetryEvent;
use crate::standard::{Standard, StandardConfig};
use crate::strategy::{RetryMode, Retryer};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tower_adaptive_retry_core::events::{EventListeners, FnListener};
use tower_adaptive_retry_core::Ternary;

/// Configuration for the retry middleware.
pub struct RetryConfig<E> {
    pub(crate) retryer: Arc<dyn Retryer<E>>,
    pub(crate) event_listeners: EventListeners<RetryEvent>,
    pub(crate) name: String,
}

impl<E> RetryConfig<E> {
    /// The strategy making retry decisions.
    pub fn retryer(&self) -> &Arc<dyn Retryer<E>> {
        &self.retryer
    }

    /// Name used in events, logs and metrics.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<E> fmt::Debug for RetryConfig<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("name", &self.name)
            .field("max_attempts", &self.retryer.max_attempts())
            .field("event_listeners", &self.event_listeners)
            .finish_non_exhaustive()
    }
}

/// Builder for [`RetryConfig`].
pub struct RetryConfigBuilder<E> {
    retryer: Option<Arc<dyn Retryer<E>>>,
    mode: RetryMode,
    event_listeners: EventListeners<RetryEvent>,
    name: String,
}

impl<E> Default for RetryConfigBuilder<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> RetryConfigBuilder<E> {
    /// Creates a new builder with defaults.
    ///
    /// Defaults:
    /// - mode: [`RetryMode::Standard`] with default settings
    /// - name: `"<unnamed>"`
    pub fn new() -> Self {
        Self {
            retryer: None,
            mode: RetryMode::Standard,
            event_listeners: EventListeners::new(),
            name: "<unnamed>".to_string(),
        }
    }

    /// Uses a strategy of `mode` with default settings.
    pub fn mode(mut self, mode: RetryMode) -> Self {
        self.mode = mode;
        self.retryer = None;
        self
    }

    /// Uses a [`Standard`] strategy.
    pub fn standard(mut self, config: StandardConfig<E>) -> Self
    where
        E: AttemptError,
    {
        self.retryer = Some(Arc::new(Standard::new(config)));
        self
    }

    /// Uses an [`Adaptive`] strategy.
    pub fn adaptive(mut self, config: AdaptiveConfig<E>) -> Self
    where
        E: AttemptError,
    {
        self.retryer = Some(Arc::new(Adaptive::new(config)));
        self
    }

    /// Uses a custom strategy.
    pub fn retryer<R>(mut self, retryer: R) -> Self
    where
        R: Retryer<E> + 'static,
    {
        self.retryer = Some(Arc::new(retryer));
        self
    }

    /// Sets the name for this retry instance (used in events, logs and metrics).
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Registers a callback run before every attempt.
    ///
    /// # Callback Signature
    /// `Fn(usize, usize)` - the attempt number (1-indexed) and the attempt
    /// limit (0 for none).
    pub fn on_attempt<F>(mut self, f: F) -> Self
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let RetryEvent::Attempt {
                attempt,
                max_attempts,
                ..
            } = event
            {
                f(*attempt, *max_attempts);
            }
        }));
        self
    }

    /// Registers a callback when a failed attempt is about to be retried.
    ///
    /// Invoked after the retry has been paid for and before the delay starts.
    ///
    /// # Callback Signature
    /// `Fn(usize, Duration)` - the number of the attempt that failed and the
    /// delay before the next one.
    ///
    /// # Example
    /// ```rust,no_run
    /// use tower_adaptive_retry::RetryLayer;
    ///
    /// let layer = RetryLayer::<std::io::Error>::builder()
    ///     .on_retry(|attempt, delay| {
    ///         println!("attempt {} failed, retrying in {:?}", attempt, delay);
    ///     })
    ///     .build();
    /// ```
    pub fn on_retry<F>(mut self, f: F) -> Self
    where
        F: Fn(usize, Duration) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let RetryEvent::Retry { attempt, delay, .. } = event {
                f(*attempt, *delay);
            }
        }));
        self
    }

    /// Registers a callback when an operation succeeds.
    ///
    /// # Callback Signature
    /// `Fn(usize)` - total attempts made, 1 meaning no retries were needed.
    pub fn on_success<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let RetryEvent::Success { attempts, .. } = event {
                f(*attempts);
            }
        }));
        self
    }

    /// Registers a callback when an operation runs out of attempts.
    ///
    /// # Callback Signature
    /// `Fn(usize)` - total attempts made.
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let RetryEvent::Error { attempts, .. } = event {
                f(*attempts);
            }
        }));
        self
    }

    /// Registers a callback when an error is not retried.
    ///
    /// # Callback Signature
    /// `Fn(usize, Ternary)` - attempts made and the classifier verdict
    /// (`False` when explicitly not retryable, `Unknown` when unclassified).
    ///
    /// # Example
    /// ```rust,no_run
    /// use tower_adaptive_retry::{RetryLayer, Ternary};
    ///
    /// let layer = RetryLayer::<std::io::Error>::builder()
    ///     .on_ignored_error(|attempts, verdict| {
    ///         if verdict == Ternary::Unknown {
    ///             println!("unclassified error after {} attempts", attempts);
    ///         }
    ///     })
    ///     .build();
    /// ```
    pub fn on_ignored_error<F>(mut self, f: F) -> Self
    where
        F: Fn(usize, Ternary) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let RetryEvent::IgnoredError {
                attempts, verdict, ..
            } = event
            {
                f(*attempts, *verdict);
            }
        }));
        self
    }

    /// Registers a callback when the retry quota refuses a retry.
    ///
    /// # Callback Signature
    /// `Fn(usize, usize)` - tokens available and the cost that was asked for.
    pub fn on_quota_exhausted<F>(mut self, f: F) -> Self
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let RetryEvent::QuotaExhausted {
                available, cost, ..
            } = event
            {
                f(*available, *cost);
            }
        }));
        self
    }

    /// Registers a callback when the caller cancels a waiting operation.
    ///
    /// # Callback Signature
    /// `Fn(usize)` - attempts made before the cancellation.
    pub fn on_canceled<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let RetryEvent::Canceled { attempts, .. } = event {
                f(*attempts);
            }
        }));
        self
    }

    /// Registers a callback when an attempt is throttled.
    ///
    /// # Callback Signature
    /// `Fn(usize)` - the throttled attempt's number.
    pub fn on_throttled<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let RetryEvent::Throttled { attempt, .. } = event {
                f(*attempt);
            }
        }));
        self
    }
}

impl<E: AttemptError> RetryConfigBuilder<E> {
    /// Builds the retry layer.
    pub fn build(self) -> crate::RetryLayer<E> {
        let retryer = self.retryer.unwrap_or_else(|| self.mode.retryer());

        let config = RetryConfig {
            retryer,
            event_listeners: self.event_listeners,
            name: self.name,
        };

        crate::RetryLayer::new(config)
    }
}
