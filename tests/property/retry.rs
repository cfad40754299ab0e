//! Property tests for the retry loop.
//!
//! Invariants tested:
//! - Never exceeds max_attempts
//! - Stops at the first success
//! - Never spends more quota than it has

use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tower::{Layer, Service, ServiceExt};
use tower_adaptive_retry::backoff::NoBackoff;
use tower_adaptive_retry::{Attempt, Operation, RetryLayer, RetryQuota, StandardConfig};

fn failing_until(
    successes_at: usize,
    calls: Arc<AtomicUsize>,
) -> impl tower::Service<
    Attempt<()>,
    Response = usize,
    Error = std::io::Error,
    Future = futures::future::Ready<Result<usize, std::io::Error>>,
> + Clone {
    tower::service_fn(move |_attempt: Attempt<()>| {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        futures::future::ready(if n >= successes_at {
            Ok(n)
        } else {
            Err(std::io::Error::from(std::io::ErrorKind::ConnectionReset))
        })
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Property: attempts never exceed max_attempts and stop at first success
    #[test]
    fn attempts_bounded(max_attempts in 1usize..=10, succeeds_at in 1usize..=15) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let calls = Arc::new(AtomicUsize::new(0));
            let layer = RetryLayer::<std::io::Error>::builder()
                .standard(
                    StandardConfig::default()
                        .with_max_attempts(max_attempts)
                        .with_backoff(NoBackoff),
                )
                .build();
            let mut service = layer.layer(failing_until(succeeds_at, Arc::clone(&calls)));

            let result = service.ready().await.unwrap().call(Operation::new(())).await;
            let total = calls.load(Ordering::SeqCst);

            if succeeds_at <= max_attempts {
                prop_assert_eq!(result.unwrap(), succeeds_at);
                prop_assert_eq!(total, succeeds_at);
            } else {
                let err = result.unwrap_err();
                prop_assert!(err.is_max_attempts());
                prop_assert_eq!(total, max_attempts);
            }
            Ok(())
        })?;
    }

    /// Property: retries stop once the quota cannot pay
    #[test]
    fn quota_limits_retries(pool in 0usize..30, cost in 1usize..10) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let calls = Arc::new(AtomicUsize::new(0));
            let quota = RetryQuota::new(pool);
            let layer = RetryLayer::<std::io::Error>::builder()
                .standard(
                    StandardConfig::default()
                        .with_max_attempts(0)
                        .with_backoff(NoBackoff)
                        .with_retry_quota(quota.clone())
                        .with_retry_cost(cost),
                )
                .build();
            let mut service = layer.layer(failing_until(usize::MAX, Arc::clone(&calls)));

            let err = service.ready().await.unwrap().call(Operation::new(())).await.unwrap_err();

            prop_assert!(err.is_quota_exceeded());
            prop_assert_eq!(calls.load(Ordering::SeqCst), pool / cost + 1);
            prop_assert_eq!(quota.balance(), pool % cost);
            Ok(())
        })?;
    }
}
