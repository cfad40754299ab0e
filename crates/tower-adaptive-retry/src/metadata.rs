//! Per-attempt metadata.
//!
//! Each attempt carries its number, when it started, the attempt limit and
//! the clock skew observed on the previous response. The same information is
//! rendered into a single request header so the service can reason about the
//! client's retries:
//!
//! ```text
//! amz-sdk-request: attempt=2; max=5; ttl=20250102T030506Z
//! ```

use chrono::{DateTime, TimeDelta, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use tower_adaptive_retry_core::CancellationToken;

/// Name of the header carrying [`AttemptMetadata::header_value`].
pub const REQUEST_METADATA_HEADER: &str = "amz-sdk-request";

const TTL_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// What the retry loop knows about the attempt being made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptMetadata {
    /// 1-indexed attempt number.
    pub attempt: usize,
    /// When the attempt was started.
    pub attempt_time: DateTime<Utc>,
    /// Attempt limit, 0 for no limit.
    pub max_attempts: usize,
    /// Server clock minus local clock, as seen on the previous response.
    pub clock_skew: TimeDelta,
}

impl AttemptMetadata {
    /// Renders the request metadata header value.
    ///
    /// `max` is left out when there is no attempt limit. `ttl` (the deadline
    /// shifted into the server's clock) is only present when there is a
    /// deadline and a positive skew has been observed.
    ///
    /// ```rust
    /// use chrono::{TimeDelta, TimeZone, Utc};
    /// use tower_adaptive_retry::AttemptMetadata;
    ///
    /// let metadata = AttemptMetadata {
    ///     attempt: 2,
    ///     attempt_time: Utc::now(),
    ///     max_attempts: 5,
    ///     clock_skew: TimeDelta::seconds(5),
    /// };
    /// let deadline = Utc.with_ymd_and_hms(2025, 1, 2, 3, 5, 1).unwrap();
    /// assert_eq!(
    ///     metadata.header_value(Some(deadline)),
    ///     "attempt=2; max=5; ttl=20250102T030506Z"
    /// );
    /// ```
    pub fn header_value(&self, deadline: Option<DateTime<Utc>>) -> String {
        let mut parts = vec![format!("attempt={}", self.attempt)];
        if self.max_attempts != 0 {
            parts.push(format!("max={}", self.max_attempts));
        }

        let ttl = deadline
            .filter(|_| self.clock_skew > TimeDelta::zero())
            .and_then(|deadline| deadline.checked_add_signed(self.clock_skew));
        if let Some(ttl) = ttl {
            parts.push(format!("ttl={}", ttl.format(TTL_FORMAT)));
        }

        parts.join("; ")
    }
}

/// Where the attempt executor reports the clock skew it observed.
///
/// The retry loop reads it after each attempt and stamps it on the next
/// attempt's metadata. Clones share the recorded value.
#[derive(Debug, Clone, Default)]
pub struct ClockSkewRecorder {
    skew: Arc<Mutex<Option<TimeDelta>>>,
}

impl ClockSkewRecorder {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the skew between the server's `Date` and when the response
    /// arrived locally.
    pub fn record(&self, server_time: DateTime<Utc>, received_at: DateTime<Utc>) {
        self.record_skew(server_time.signed_duration_since(received_at));
    }

    /// Records an already computed skew.
    pub fn record_skew(&self, skew: TimeDelta) {
        *self.skew.lock().unwrap_or_else(PoisonError::into_inner) = Some(skew);
    }

    /// The last recorded skew.
    pub fn get(&self) -> Option<TimeDelta> {
        *self.skew.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn take(&self) -> Option<TimeDelta> {
        self.skew.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// One attempt of an operation, as handed to the inner service.
#[derive(Debug, Clone)]
pub struct Attempt<Req> {
    /// The request to send.
    pub request: Req,
    /// Retry metadata for this attempt.
    pub metadata: AttemptMetadata,
    /// The operation's deadline, if any.
    pub deadline: Option<DateTime<Utc>>,
    /// Canceled when the caller gives up on the operation.
    pub cancel: CancellationToken,
    skew: ClockSkewRecorder,
}

impl<Req> Attempt<Req> {
    /// Creates an attempt.
    pub fn new(
        request: Req,
        metadata: AttemptMetadata,
        deadline: Option<DateTime<Utc>>,
        cancel: CancellationToken,
        skew: ClockSkewRecorder,
    ) -> Self {
        Self {
            request,
            metadata,
            deadline,
            cancel,
            skew,
        }
    }

    /// Value for the [`REQUEST_METADATA_HEADER`] header.
    pub fn header_value(&self) -> String {
        self.metadata.header_value(self.deadline)
    }

    /// Name and value of the request metadata header.
    pub fn header(&self) -> (&'static str, String) {
        (REQUEST_METADATA_HEADER, self.header_value())
    }

    /// Reports the server time seen on this attempt's response.
    pub fn record_clock_skew(&self, server_time: DateTime<Utc>, received_at: DateTime<Utc>) {
        self.skew.record(server_time, received_at);
    }

    /// The recorder shared with the retry loop.
    pub fn skew_recorder(&self) -> &ClockSkewRecorder {
        &self.skew
    }

    /// Discards the metadata.
    pub fn into_request(self) -> Req {
        self.request
    }
}
