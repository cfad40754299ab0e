//! Configuration and builder tests.

use super::{scripted, ApiError};
use futures::future::{BoxFuture, FutureExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::{Layer, Service, ServiceExt};
use tower_adaptive_retry::backoff::BackoffError;
use tower_adaptive_retry::{
    AcquireError, Adaptive, AdaptiveConfig, CancellationToken, DEFAULT_MAX_ATTEMPTS, Operation,
    QuotaExceeded, Reservation, RetryLayer, RetryMode, Retryer, Standard, StandardConfig, Ternary,
};

#[test]
fn defaults() {
    let layer = RetryLayer::<ApiError>::builder().build();
    assert_eq!(layer.config().name(), "<unnamed>");
    assert_eq!(layer.config().retryer().max_attempts(), DEFAULT_MAX_ATTEMPTS);
}

#[test]
fn mode_parses_from_configuration_strings() {
    assert_eq!("standard".parse::<RetryMode>().unwrap(), RetryMode::Standard);
    assert_eq!(" Adaptive ".parse::<RetryMode>().unwrap(), RetryMode::Adaptive);
    assert!("legacy".parse::<RetryMode>().is_err());
    assert_eq!(RetryMode::default(), RetryMode::Standard);
}

#[test]
fn adaptive_config_carries_standard_settings() {
    let retryer = Adaptive::<ApiError>::new(
        AdaptiveConfig::default()
            .with_max_attempts(6)
            .with_max_backoff(Duration::from_secs(1)),
    );
    assert_eq!(retryer.max_attempts(), 6);
    assert!(retryer.retry_delay(3, &ApiError::status(503)).unwrap() <= Duration::from_secs(1));
    assert_eq!(retryer.is_throttle(&ApiError::status(429)), Ternary::True);
    assert_eq!(retryer.is_throttle(&ApiError::status(503)), Ternary::Unknown);
}

#[test]
fn standard_retryer_is_usable_directly() {
    let retryer = Standard::<ApiError>::new(StandardConfig::default());
    assert!(retryer.is_error_retryable(&ApiError::status(503)));
    assert!(!retryer.is_error_retryable(&ApiError::status(404)));
    assert_eq!(retryer.retry_cost_for(&ApiError::status(503)), 5);
    assert_eq!(retryer.retry_cost_for(&ApiError::timeout()), 10);
}

/// Retries everything, immediately, at most twice.
struct Eager;

impl Retryer<ApiError> for Eager {
    fn classify(&self, _error: &ApiError) -> Ternary {
        Ternary::True
    }

    fn max_attempts(&self) -> usize {
        3
    }

    fn retry_delay(&self, _attempt: usize, _error: &ApiError) -> Result<Duration, BackoffError> {
        Ok(Duration::ZERO)
    }

    fn get_retry_token(&self, _error: &ApiError) -> Result<Reservation, QuotaExceeded> {
        Ok(Reservation::noop())
    }

    fn get_initial_token(&self) -> Reservation {
        Reservation::noop()
    }

    fn get_attempt_token<'a>(
        &'a self,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Reservation, AcquireError>> {
        futures::future::ready(Ok(Reservation::noop())).boxed()
    }
}

#[tokio::test]
async fn custom_retryer_drives_the_loop() {
    let calls = Arc::new(AtomicUsize::new(0));
    let layer = RetryLayer::<ApiError>::builder()
        .name("eager")
        .retryer(Eager)
        .build();
    let mut service = layer.layer(scripted(
        vec![ApiError::status(400), ApiError::status(404)],
        Arc::clone(&calls),
    ));

    let response = service
        .ready()
        .await
        .unwrap()
        .call(Operation::new("GET /".to_string()))
        .await
        .unwrap();

    assert_eq!(response, "GET / ok");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(layer.config().name(), "eager");
}

#[test]
fn config_debug_is_readable() {
    let layer = RetryLayer::<ApiError>::builder()
        .name("orders")
        .mode(RetryMode::Adaptive)
        .on_success(|_| {})
        .build();
    let debug = format!("{:?}", layer.config());
    assert!(debug.contains("orders"));
    assert!(debug.contains("max_attempts: 3"));
}
