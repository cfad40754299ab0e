use crate::{Retry, RetryConfig};
use std::sync::Arc;
use tower::Layer;

/// A Tower [`Layer`] that applies retry logic to a service.
///
/// The wrapped service handles single [`Attempt`](crate::Attempt)s; the
/// resulting service handles whole [`Operation`](crate::Operation)s.
///
/// # Examples
///
/// ```
/// use tower_adaptive_retry::{Attempt, RetryLayer, StandardConfig};
/// use tower::ServiceBuilder;
///
/// # async fn example() {
/// let retry_layer = RetryLayer::<std::io::Error>::builder()
///     .standard(StandardConfig::default().with_max_attempts(5))
///     .name("storage")
///     .build();
///
/// let service = ServiceBuilder::new()
///     .layer(retry_layer)
///     .service(tower::service_fn(|attempt: Attempt<String>| async move {
///         Ok::<_, std::io::Error>(format!("sent {}", attempt.request))
///     }));
/// # }
/// ```
pub struct RetryLayer<E> {
    config: Arc<RetryConfig<E>>,
}

impl<E> RetryLayer<E> {
    /// Creates a new `RetryLayer` with the given configuration.
    pub fn new(config: RetryConfig<E>) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Creates a new builder for configuring a retry layer.
    pub fn builder() -> crate::RetryConfigBuilder<E> {
        crate::RetryConfigBuilder::new()
    }

    /// The configuration shared by every service this layer produces.
    pub fn config(&self) -> &RetryConfig<E> {
        &self.config
    }
}

impl<E> Clone for RetryLayer<E> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
        }
    }
}

impl<S, E> Layer<S> for RetryLayer<E> {
    type Service = Retry<S, E>;

    fn layer(&self, service: S) -> Self::Service {
        Retry::new(service, Arc::clone(&self.config))
    }
}
