//! Adaptive retry against a flaky, throttling backend
//! Run with: cargo run --example adaptive_retry
//! With logs: RUST_LOG=debug cargo run --example adaptive_retry

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::{Layer, Service, ServiceExt, service_fn};
use tower_adaptive_retry::backoff::ExponentialJitterBackoff;
use tower_adaptive_retry::{
    AdaptiveConfig, AdaptiveRateController, Attempt, AttemptError, Operation, RetryLayer,
};

#[derive(Debug)]
enum BackendError {
    Throttled,
    Unavailable,
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Throttled => write!(f, "429 Too Many Requests"),
            BackendError::Unavailable => write!(f, "503 Service Unavailable"),
        }
    }
}

impl std::error::Error for BackendError {}

impl AttemptError for BackendError {
    fn status_code(&self) -> Option<u16> {
        match self {
            BackendError::Throttled => Some(429),
            BackendError::Unavailable => Some(503),
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    // Every third call is throttled, every fifth is a server error.
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let backend = service_fn(move |attempt: Attempt<String>| {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            println!("  sending {:?} with [{}]", attempt.request, attempt.header_value());
            if n % 3 == 0 {
                Err(BackendError::Throttled)
            } else if n % 5 == 0 {
                Err(BackendError::Unavailable)
            } else {
                Ok(format!("{} -> 200 OK", attempt.request))
            }
        }
    });

    // One controller shared by every operation of this client.
    let controller = AdaptiveRateController::default();
    let layer = RetryLayer::<BackendError>::builder()
        .adaptive(
            AdaptiveConfig::default()
                .with_max_attempts(4)
                .with_backoff(
                    ExponentialJitterBackoff::new(Duration::from_millis(400))
                        .with_base_delay(Duration::from_millis(50)),
                )
                .with_controller(controller.clone()),
        )
        .name("demo-client")
        .on_retry(|attempt, delay| println!("  attempt {} failed, retrying in {:?}", attempt, delay))
        .on_throttled(|attempt| println!("  attempt {} was throttled", attempt))
        .build();
    let mut client = layer.layer(backend);

    let shutdown = CancellationToken::new();
    for i in 1..=6 {
        let operation = Operation::new(format!("GET /items/{}", i))
            .with_cancel(shutdown.child_token())
            .with_timeout(Duration::from_secs(10));

        let result = client.ready().await.map(|svc| svc.call(operation));
        match result {
            Ok(future) => match future.await {
                Ok(response) => println!("{}", response),
                Err(err) => println!("request {} failed: {}", i, err),
            },
            Err(err) => println!("client not ready: {}", err),
        }
        println!(
            "  send rate: {:.2} tokens/s (gated: {})",
            controller.fill_rate(),
            controller.is_enabled()
        );
    }

    shutdown.cancel();
    println!("backend saw {} attempts", calls.load(Ordering::SeqCst));
}
