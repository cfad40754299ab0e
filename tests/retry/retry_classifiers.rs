//! Classifier chain tests.
//!
//! Tests the retryability decision:
//! - Default status and error codes
//! - Throttle codes are retryable
//! - Connection errors anywhere in the source chain
//! - Ordering and short-circuiting of custom chains

use super::{scripted, ApiError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::{fmt, io};
use tower::{Layer, Service, ServiceExt};
use tower_adaptive_retry::backoff::NoBackoff;
use tower_adaptive_retry::classify::FnClassifier;
use tower_adaptive_retry::{
    AttemptError, ClassifierChain, Operation, RetryLayer, RetryableCodes, StandardConfig, Ternary,
    ThrottleCodes,
};

async fn attempts_for(config: StandardConfig<ApiError>, error: ApiError) -> usize {
    let calls = Arc::new(AtomicUsize::new(0));
    let layer = RetryLayer::builder()
        .standard(config.with_backoff(NoBackoff))
        .build();
    let mut service = layer.layer(scripted(vec![error], Arc::clone(&calls)));
    let _ = service
        .ready()
        .await
        .unwrap()
        .call(Operation::new("GET /".to_string()))
        .await;
    calls.load(Ordering::SeqCst)
}

#[tokio::test]
async fn default_codes_are_retried() {
    for error in [
        ApiError::status(500),
        ApiError::status(502),
        ApiError::status(503),
        ApiError::status(504),
        ApiError::code("RequestTimeout"),
        ApiError::code("RequestTimeoutException"),
    ] {
        assert_eq!(
            attempts_for(StandardConfig::default(), error.clone()).await,
            2,
            "{} should be retried",
            error
        );
    }
}

#[tokio::test]
async fn throttles_are_retried() {
    for error in [
        ApiError::status(429),
        ApiError::code("Throttling"),
        ApiError::code("SlowDown"),
        ApiError::code("ProvisionedThroughputExceededException"),
    ] {
        assert_eq!(
            attempts_for(StandardConfig::default(), error.clone()).await,
            2,
            "{} should be retried",
            error
        );
    }
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    for error in [
        ApiError::status(400),
        ApiError::status(403),
        ApiError::code("AccessDenied"),
    ] {
        assert_eq!(attempts_for(StandardConfig::default(), error).await, 1);
    }
}

#[tokio::test]
async fn extra_retryable_codes_extend_defaults() {
    let codes = RetryableCodes::empty()
        .with_status_code(409)
        .with_error_code("Conflict");
    let config = || StandardConfig::default().with_retryable_codes(&codes);

    assert_eq!(attempts_for(config(), ApiError::status(409)).await, 2);
    assert_eq!(attempts_for(config(), ApiError::code("Conflict")).await, 2);
    assert_eq!(attempts_for(config(), ApiError::status(503)).await, 2);
    assert_eq!(attempts_for(config(), ApiError::status(410)).await, 1);
}

#[derive(Debug)]
struct Wrapped {
    context: &'static str,
    inner: io::Error,
}

impl fmt::Display for Wrapped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.context)
    }
}

impl std::error::Error for Wrapped {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.inner)
    }
}

impl AttemptError for Wrapped {}

#[test]
fn connection_errors_found_through_source_chain() {
    let chain = ClassifierChain::<Wrapped>::retryables(&RetryableCodes::default(), &ThrottleCodes::default());

    let refused = Wrapped {
        context: "dispatch failed",
        inner: io::Error::from(io::ErrorKind::ConnectionRefused),
    };
    let reset = Wrapped {
        context: "read failed",
        inner: io::Error::other("connection reset by peer"),
    };
    let unrelated = Wrapped {
        context: "decode failed",
        inner: io::Error::from(io::ErrorKind::InvalidData),
    };

    assert_eq!(chain.classify(&refused), Ternary::True);
    assert_eq!(chain.classify(&reset), Ternary::True);
    assert_eq!(chain.classify(&unrelated), Ternary::Unknown);
}

#[test]
fn io_errors_classify_by_kind() {
    let chain = ClassifierChain::<io::Error>::retryables(
        &RetryableCodes::default(),
        &ThrottleCodes::default(),
    );
    assert_eq!(
        chain.classify(&io::Error::from(io::ErrorKind::ConnectionAborted)),
        Ternary::True
    );
    assert_eq!(
        chain.classify(&io::Error::from(io::ErrorKind::NotFound)),
        Ternary::Unknown
    );
}

#[test]
fn timeouts_chain_matches_timeout_errors() {
    let chain = ClassifierChain::<ApiError>::timeouts();
    assert_eq!(chain.classify(&ApiError::timeout()), Ternary::True);
    assert_eq!(chain.classify(&ApiError::status(503)), Ternary::Unknown);
}

#[test]
fn first_known_verdict_wins() {
    let later_calls = Arc::new(AtomicUsize::new(0));
    let lc = Arc::clone(&later_calls);

    let chain = ClassifierChain::<ApiError>::new()
        .with_fn(|_| Ternary::Unknown)
        .with_fn(|e| {
            if e.status == Some(503) {
                Ternary::False
            } else {
                Ternary::Unknown
            }
        })
        .with(FnClassifier::new(move |_: &ApiError| {
            lc.fetch_add(1, Ordering::SeqCst);
            Ternary::True
        }));

    assert_eq!(chain.classify(&ApiError::status(503)), Ternary::False);
    assert_eq!(later_calls.load(Ordering::SeqCst), 0);

    assert_eq!(chain.classify(&ApiError::status(500)), Ternary::True);
    assert_eq!(later_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn empty_chain_is_unknown() {
    let chain = ClassifierChain::<ApiError>::new();
    assert!(chain.is_empty());
    assert_eq!(chain.classify(&ApiError::status(503)), Ternary::Unknown);
}

#[tokio::test]
async fn custom_chain_replaces_defaults() {
    let config = StandardConfig::default().with_retryables(
        ClassifierChain::new().with_fn(|e: &ApiError| Ternary::from(e.status == Some(418))),
    );

    assert_eq!(attempts_for(config, ApiError::status(418)).await, 2);

    let config = StandardConfig::default().with_retryables(
        ClassifierChain::new().with_fn(|e: &ApiError| Ternary::from(e.status == Some(418))),
    );
    assert_eq!(attempts_for(config, ApiError::status(503)).await, 1);
}

#[tokio::test]
async fn timeout_errors_retry_at_timeout_cost() {
    let quota = tower_adaptive_retry::RetryQuota::new(100);
    let config = StandardConfig::default()
        .with_retry_quota(quota.clone())
        .with_retryable(FnClassifier::new(|e: &ApiError| {
            if e.timeout {
                Ternary::True
            } else {
                Ternary::Unknown
            }
        }));

    let calls = Arc::new(AtomicUsize::new(0));
    let layer = RetryLayer::builder()
        .standard(config.with_backoff(NoBackoff))
        .build();
    let mut service = layer.layer(scripted(
        vec![ApiError::timeout(), ApiError::timeout()],
        Arc::clone(&calls),
    ));

    let _ = service
        .ready()
        .await
        .unwrap()
        .call(Operation::new("GET /".to_string()))
        .await
        .unwrap();

    // two timeout retries at 10 each; the successful retry refunds 1
    assert_eq!(quota.balance(), 81);
}

#[tokio::test]
async fn io_timeouts_are_retried_by_default_chain() {
    let quota = tower_adaptive_retry::RetryQuota::new(500);
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);

    let layer = RetryLayer::<io::Error>::builder()
        .standard(
            StandardConfig::default()
                .with_retry_quota(quota.clone())
                .with_backoff(NoBackoff),
        )
        .build();
    let mut service = layer.layer(tower::service_fn(
        move |attempt: tower_adaptive_retry::Attempt<String>| {
            let n = c.fetch_add(1, Ordering::SeqCst);
            async move {
                match n {
                    0 => Err(io::Error::from(io::ErrorKind::TimedOut)),
                    1 => Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out")),
                    _ => Ok(format!("{} ok", attempt.request)),
                }
            }
        },
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
    // two timeout retries at 10 each; the successful retry refunds 1
    assert_eq!(quota.balance(), 481);
}
