use std::time::{Duration, Instant};
use tower_adaptive_retry_core::events::EngineEvent;
use tower_adaptive_retry_core::Ternary;

/// Events emitted by the retry middleware.
#[derive(Debug, Clone)]
pub enum RetryEvent {
    /// An attempt is about to be sent.
    Attempt {
        source_name: String,
        timestamp: Instant,
        attempt: usize,
        max_attempts: usize,
    },
    /// A failed attempt will be retried after `delay`.
    Retry {
        source_name: String,
        timestamp: Instant,
        attempt: usize,
        delay: Duration,
    },
    /// The operation succeeded.
    Success {
        source_name: String,
        timestamp: Instant,
        attempts: usize,
    },
    /// The operation failed after exhausting its attempts.
    Error {
        source_name: String,
        timestamp: Instant,
        attempts: usize,
    },
    /// An attempt failed with an error that is not retried.
    IgnoredError {
        source_name: String,
        timestamp: Instant,
        attempts: usize,
        verdict: Ternary,
    },
    /// The retry quota could not pay for another retry.
    QuotaExhausted {
        source_name: String,
        timestamp: Instant,
        attempt: usize,
        available: usize,
        cost: usize,
    },
    /// The caller canceled while the operation was waiting.
    Canceled {
        source_name: String,
        timestamp: Instant,
        attempts: usize,
    },
    /// An attempt was throttled by the service.
    Throttled {
        source_name: String,
        timestamp: Instant,
        attempt: usize,
    },
}

impl EngineEvent for RetryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RetryEvent::Attempt { .. } => "Attempt",
            RetryEvent::Retry { .. } => "Retry",
            RetryEvent::Success { .. } => "Success",
            RetryEvent::Error { .. } => "Error",
            RetryEvent::IgnoredError { .. } => "IgnoredError",
            RetryEvent::QuotaExhausted { .. } => "QuotaExhausted",
            RetryEvent::Canceled { .. } => "Canceled",
            RetryEvent::Throttled { .. } => "Throttled",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            RetryEvent::Attempt { timestamp, .. }
            | RetryEvent::Retry { timestamp, .. }
            | RetryEvent::Success { timestamp, .. }
            | RetryEvent::Error { timestamp, .. }
            | RetryEvent::IgnoredError { timestamp, .. }
            | RetryEvent::QuotaExhausted { timestamp, .. }
            | RetryEvent::Canceled { timestamp, .. }
            | RetryEvent::Throttled { timestamp, .. } => *timestamp,
        }
    }

    fn source_name(&self) -> &str {
        match self {
            RetryEvent::Attempt { source_name, .. }
            | RetryEvent::Retry { source_name, .. }
            | RetryEvent::Success { source_name, .. }
            | RetryEvent::Error { source_name, .. }
            | RetryEvent::IgnoredError { source_name, .. }
            | RetryEvent::QuotaExhausted { source_name, .. }
            | RetryEvent::Canceled { source_name, .. }
            | RetryEvent::Throttled { source_name, .. } => source_name,
        }
    }
}
