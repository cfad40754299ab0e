//! Retry middleware tests.
//!
//! Test organization:
//! - retry_behavior.rs: Core attempt loop (success, exhaustion, classification)
//! - retry_backoff.rs: Backoff delays observed by the loop
//! - retry_classifiers.rs: Classifier chains and default code sets
//! - retry_quota.rs: Retry quota spending and refunds
//! - retry_cancellation.rs: Cancellation and deadlines
//! - retry_adaptive.rs: Adaptive mode and send-rate convergence
//! - retry_events.rs: Event system tests
//! - retry_config.rs: Configuration and builder tests

mod retry_adaptive;
mod retry_backoff;
mod retry_classifiers;
mod retry_config;

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::util::BoxCloneService;
use tower_adaptive_retry::{Attempt, AttemptError};

/// An error shaped like an HTTP API failure.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    pub status: Option<u16>,
    pub code: Option<&'static str>,
    pub timeout: bool,
}

impl ApiError {
    pub fn status(status: u16) -> Self {
        Self {
            status: Some(status),
            code: None,
            timeout: false,
        }
    }

    pub fn code(code: &'static str) -> Self {
        Self {
            status: None,
            code: Some(code),
            timeout: false,
        }
    }

    pub fn timeout() -> Self {
        Self {
            status: None,
            code: None,
            timeout: true,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.status, self.code) {
            (Some(status), _) => write!(f, "api error: status {}", status),
            (None, Some(code)) => write!(f, "api error: {}", code),
            (None, None) if self.timeout => write!(f, "api error: timed out"),
            (None, None) => write!(f, "api error"),
        }
    }
}

impl std::error::Error for ApiError {}

impl AttemptError for ApiError {
    fn is_timeout(&self) -> bool {
        self.timeout
    }

    fn status_code(&self) -> Option<u16> {
        self.status
    }

    fn error_code(&self) -> Option<&str> {
        self.code
    }
}

/// A service that fails with the given errors in order, then succeeds.
pub fn scripted(
    errors: Vec<ApiError>,
    calls: Arc<AtomicUsize>,
) -> BoxCloneService<Attempt<String>, String, ApiError> {
    let errors = Arc::new(errors);
    BoxCloneService::new(tower::service_fn(move |attempt: Attempt<String>| {
        let errors = Arc::clone(&errors);
        let n = calls.fetch_add(1, Ordering::SeqCst);
        async move {
            match errors.get(n) {
                Some(err) => Err(err.clone()),
                None => Ok(format!("{} ok", attempt.request)),
            }
        }
    }))
}
