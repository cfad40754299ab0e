//! Backoff tests.
//!
//! Delays are observed through the `on_retry` callback and a paused tokio
//! clock, so no test sleeps in real time.

use super::{scripted, ApiError};
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tower::{Layer, Service, ServiceExt};
use tower_adaptive_retry::backoff::{FixedBackoff, FnBackoff};
use tower_adaptive_retry::{
    BackoffDelayer, ExponentialJitterBackoff, Operation, RetryLayer, StandardConfig,
};

async fn delays_for(config: StandardConfig<ApiError>, failures: usize) -> (Vec<Duration>, Duration) {
    let delays = Arc::new(Mutex::new(Vec::new()));
    let d = Arc::clone(&delays);

    let layer = RetryLayer::builder()
        .standard(config)
        .on_retry(move |_, delay| d.lock().unwrap().push(delay))
        .build();
    let mut service = layer.layer(scripted(
        vec![ApiError::status(503); failures],
        Arc::new(AtomicUsize::new(0)),
    ));

    let start = Instant::now();
    let _ = service
        .ready()
        .await
        .unwrap()
        .call(Operation::new("GET /".to_string()))
        .await;
    let elapsed = start.elapsed();

    let delays = delays.lock().unwrap().clone();
    (delays, elapsed)
}

#[tokio::test(start_paused = true)]
async fn fixed_backoff_waits_between_attempts() {
    let config = StandardConfig::default()
        .with_max_attempts(4)
        .with_backoff(FixedBackoff::new(Duration::from_millis(250)));

    let (delays, elapsed) = delays_for(config, 3).await;

    assert_eq!(delays, vec![Duration::from_millis(250); 3]);
    assert!(elapsed >= Duration::from_millis(750));
    assert!(elapsed < Duration::from_millis(800));
}

#[tokio::test(start_paused = true)]
async fn function_backoff_sees_attempt_numbers() {
    let config = StandardConfig::default()
        .with_max_attempts(4)
        .with_backoff(FnBackoff::new(|attempt| {
            Duration::from_millis(100 * attempt as u64)
        }));

    let (delays, elapsed) = delays_for(config, 3).await;

    assert_eq!(
        delays,
        vec![
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(300),
        ]
    );
    assert!(elapsed >= Duration::from_millis(600));
}

#[tokio::test(start_paused = true)]
async fn default_backoff_stays_under_ceiling() {
    let config = StandardConfig::default()
        .with_max_attempts(6)
        .with_backoff(ExponentialJitterBackoff::new(Duration::from_secs(20)).with_seed(7));

    let (delays, _) = delays_for(config, 5).await;

    assert_eq!(delays.len(), 5);
    for (i, delay) in delays.iter().enumerate() {
        let ceiling = Duration::from_secs(1 << i).min(Duration::from_secs(20));
        assert!(
            *delay <= ceiling,
            "delay {:?} after attempt {} above {:?}",
            delay,
            i + 1,
            ceiling
        );
    }
}

#[tokio::test(start_paused = true)]
async fn max_backoff_caps_default_delay() {
    let config = StandardConfig::default()
        .with_max_attempts(8)
        .with_max_backoff(Duration::from_millis(500));

    let (delays, _) = delays_for(config, 7).await;

    assert_eq!(delays.len(), 7);
    assert!(delays.iter().all(|d| *d <= Duration::from_millis(500)));
}

#[test]
fn seeded_backoff_is_reproducible() {
    let err = ApiError::status(503);
    let a = ExponentialJitterBackoff::new(Duration::from_secs(20)).with_seed(42);
    let b = ExponentialJitterBackoff::new(Duration::from_secs(20)).with_seed(42);

    let first: Vec<_> = (1..=10).map(|n| a.delay(n, &err).unwrap()).collect();
    let second: Vec<_> = (1..=10).map(|n| b.delay(n, &err).unwrap()).collect();
    assert_eq!(first, second);
}

#[test]
fn zero_base_delay_never_waits() {
    let err = ApiError::status(503);
    let backoff = ExponentialJitterBackoff::new(Duration::from_secs(20))
        .with_base_delay(Duration::ZERO);

    for attempt in 1..=10 {
        assert_eq!(backoff.delay(attempt, &err).unwrap(), Duration::ZERO);
    }
}

#[test]
fn attempt_zero_is_rejected() {
    let err = ApiError::status(503);
    assert!(ExponentialJitterBackoff::default().delay(0, &err).is_err());
    assert!(FixedBackoff::new(Duration::from_millis(5)).delay(0, &err).is_err());
}
