//! Adaptive mode tests.
//!
//! Covers:
//! - Throttled attempts reduce the send rate
//! - Waiting for send tokens after a throttle
//! - Failing fast when configured
//! - Convergence of the send rate over a burst of throttles

use super::{scripted, ApiError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tower::{Layer, Service, ServiceExt};
use tower_adaptive_retry::backoff::NoBackoff;
use tower_adaptive_retry::{
    AdaptiveConfig, AdaptiveRateConfig, AdaptiveRateController, CancellationToken, Operation,
    RetryError, RetryLayer,
};

fn adaptive(controller: &AdaptiveRateController) -> AdaptiveConfig<ApiError> {
    AdaptiveConfig::default()
        .with_max_attempts(3)
        .with_backoff(NoBackoff)
        .with_controller(controller.clone())
}

#[tokio::test(start_paused = true)]
async fn healthy_traffic_is_not_gated() {
    let controller = AdaptiveRateController::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let layer = RetryLayer::builder().adaptive(adaptive(&controller)).build();
    let mut service = layer.layer(scripted(vec![], Arc::clone(&calls)));

    let start = Instant::now();
    for _ in 0..50 {
        service
            .ready()
            .await
            .unwrap()
            .call(Operation::new("GET /".to_string()))
            .await
            .unwrap();
    }

    assert_eq!(start.elapsed(), Duration::ZERO);
    assert!(!controller.is_enabled());
    assert_eq!(calls.load(Ordering::SeqCst), 50);
}

#[tokio::test(start_paused = true)]
async fn throttle_enables_rate_limiting_and_waits() {
    let controller = AdaptiveRateController::default();
    let throttled = Arc::new(AtomicUsize::new(0));
    let t = Arc::clone(&throttled);

    let layer = RetryLayer::builder()
        .adaptive(adaptive(&controller))
        .on_throttled(move |_| {
            t.fetch_add(1, Ordering::SeqCst);
        })
        .build();
    let mut service = layer.layer(scripted(
        vec![ApiError::status(429)],
        Arc::new(AtomicUsize::new(0)),
    ));

    let start = Instant::now();
    let response = service
        .ready()
        .await
        .unwrap()
        .call(Operation::new("GET /".to_string()))
        .await
        .unwrap();

    assert_eq!(response, "GET / ok");
    assert!(controller.is_enabled());
    assert_eq!(throttled.load(Ordering::SeqCst), 1);
    // One token at the minimum fill rate of 0.5/s.
    assert!(start.elapsed() >= Duration::from_secs(2));
    assert!(start.elapsed() < Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn fail_fast_when_no_send_token() {
    let controller = AdaptiveRateController::default();
    let calls = Arc::new(AtomicUsize::new(0));

    let layer = RetryLayer::builder()
        .adaptive(adaptive(&controller).with_fail_on_no_attempt_tokens(true))
        .build();
    let mut service = layer.layer(scripted(
        vec![ApiError::code("ThrottlingException")],
        Arc::clone(&calls),
    ));

    let err = service
        .ready()
        .await
        .unwrap()
        .call(Operation::new("GET /".to_string()))
        .await
        .unwrap_err();

    match err {
        RetryError::AttemptTokenDenied { attempts, source } => {
            assert_eq!(attempts, 1);
            assert_eq!(source, Some(ApiError::code("ThrottlingException")));
        }
        other => panic!("expected AttemptTokenDenied, got {:?}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_while_waiting_for_send_token() {
    let controller = AdaptiveRateController::default();
    controller.update(true);
    assert!(controller.is_enabled());

    let calls = Arc::new(AtomicUsize::new(0));
    let layer = RetryLayer::builder().adaptive(adaptive(&controller)).build();
    let mut service = layer.layer(scripted(vec![], Arc::clone(&calls)));

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = service
        .ready()
        .await
        .unwrap()
        .call(Operation::new("GET /".to_string()).with_cancel(token))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RetryError::Canceled {
            attempts: 0,
            source: None
        }
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn non_throttle_failures_do_not_enable_limiting() {
    let controller = AdaptiveRateController::default();
    let layer = RetryLayer::builder().adaptive(adaptive(&controller)).build();
    let mut service = layer.layer(scripted(
        vec![ApiError::status(503), ApiError::status(500)],
        Arc::new(AtomicUsize::new(0)),
    ));

    service
        .ready()
        .await
        .unwrap()
        .call(Operation::new("GET /".to_string()))
        .await
        .unwrap();

    assert!(!controller.is_enabled());
}

#[tokio::test(start_paused = true)]
async fn send_rate_drops_on_throttles_and_recovers() {
    let controller = AdaptiveRateController::new(AdaptiveRateConfig::default().with_name("s3"));
    let cancel = CancellationToken::new();

    let mut rate_after_first_throttle = 0.0;
    let mut fill_after_burst = 0.0;
    let mut calculated_after_burst = 0.0;
    let mut rates = vec![0.0];

    for attempt in 1..=100 {
        controller
            .acquire(1, &cancel, false)
            .await
            .expect("send token");

        let throttled = (10..=15).contains(&attempt);
        controller.update(throttled);
        rates.push(controller.calculated_rate());

        if attempt == 9 {
            assert!(!controller.is_enabled(), "gated before any throttle");
        }
        if attempt == 10 {
            assert!(controller.is_enabled());
            rate_after_first_throttle = controller.calculated_rate();
        }
        if attempt == 15 {
            fill_after_burst = controller.fill_rate();
            calculated_after_burst = controller.calculated_rate();
        }

        tokio::time::advance(Duration::from_millis(100)).await;
    }

    // Each throttle in the burst multiplies the rate down.
    for attempt in 11..=15 {
        assert!(
            rates[attempt] < rates[attempt - 1],
            "rate did not drop at attempt {}: {:?}",
            attempt,
            &rates[10..=15]
        );
    }
    // Once throttling stops the rate never moves down again.
    for attempt in 16..=36 {
        assert!(
            rates[attempt] >= rates[attempt - 1],
            "rate dropped at attempt {}: {} -> {}",
            attempt,
            rates[attempt - 1],
            rates[attempt]
        );
    }
    assert!(calculated_after_burst < rate_after_first_throttle);
    assert!(fill_after_burst < 2.0, "fill rate after burst: {}", fill_after_burst);
    assert!(fill_after_burst >= 0.5);

    // Without throttles the rate climbs back, bounded by twice the measured rate.
    let final_fill = controller.fill_rate();
    let measured = controller.measured_tx_rate();
    assert!(final_fill > 10.0 * fill_after_burst, "final fill rate: {}", final_fill);
    assert!(final_fill <= 2.0 * measured + 1e-9);
    assert!((9.0..=11.0).contains(&measured), "measured rate: {}", measured);
    assert!(controller.calculated_rate() > rate_after_first_throttle);
}

#[tokio::test(start_paused = true)]
async fn controller_is_shared_between_layers() {
    let controller = AdaptiveRateController::default();
    let throttling = RetryLayer::builder().adaptive(adaptive(&controller)).build();
    let healthy = RetryLayer::builder().adaptive(adaptive(&controller)).build();

    let mut first = throttling.layer(scripted(
        vec![ApiError::status(429), ApiError::status(429), ApiError::status(429)],
        Arc::new(AtomicUsize::new(0)),
    ));
    let _ = first
        .ready()
        .await
        .unwrap()
        .call(Operation::new("a".to_string()))
        .await;
    assert!(controller.is_enabled());

    // The other layer now has to wait for send tokens too.
    let mut second = healthy.layer(scripted(vec![], Arc::new(AtomicUsize::new(0))));
    let start = Instant::now();
    second
        .ready()
        .await
        .unwrap()
        .call(Operation::new("b".to_string()))
        .await
        .unwrap();
    assert!(start.elapsed() > Duration::ZERO);
}
