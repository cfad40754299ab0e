//! Error classification.
//!
//! Whether a failed attempt is worth retrying, whether it was a throttle and
//! whether it was a timeout are each decided by a [`ClassifierChain`]: an
//! ordered list of [`Classifier`]s where the first one with an opinion wins.
//! Classifiers return a [`Ternary`], so "no opinion" ([`Ternary::Unknown`]) is
//! distinct from "no" ([`Ternary::False`]).
//!
//! Classifiers read what they need from the error through [`AttemptError`],
//! a set of optional capabilities the caller's error type opts into.
//!
//! # Example
//!
//! ```rust
//! use tower_adaptive_retry::classify::{AttemptError, ClassifierChain, RetryableCodes, ThrottleCodes};
//! use tower_adaptive_retry::Ternary;
//!
//! #[derive(Debug)]
//! struct HttpError(u16);
//!
//! impl std::fmt::Display for HttpError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "http status {}", self.0)
//!     }
//! }
//! impl std::error::Error for HttpError {}
//! impl AttemptError for HttpError {
//!     fn status_code(&self) -> Option<u16> {
//!         Some(self.0)
//!     }
//! }
//!
//! let chain = ClassifierChain::retryables(&RetryableCodes::default(), &ThrottleCodes::default());
//! assert_eq!(chain.classify(&HttpError(503)), Ternary::True);
//! assert_eq!(chain.classify(&HttpError(404)), Ternary::Unknown);
//! ```

use std::collections::HashSet;
use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::sync::Arc;
use tower_adaptive_retry_core::Ternary;

/// Optional capabilities an attempt error can expose to classifiers.
///
/// Every method has an abstaining default, so an error type only implements
/// what it knows about itself.
pub trait AttemptError: StdError + Send + Sync + 'static {
    /// The error's own statement about whether it may be retried.
    fn retryable(&self) -> Option<bool> {
        None
    }

    /// Whether the attempt failed because the caller canceled it.
    fn is_canceled(&self) -> bool {
        false
    }

    /// Whether the error is a transport connection failure.
    fn connection_error(&self) -> Option<bool> {
        None
    }

    /// Whether the error is a transient transport failure that may clear
    /// up on its own.
    fn is_temporary(&self) -> Option<bool> {
        None
    }

    /// Whether the attempt timed out.
    fn is_timeout(&self) -> bool {
        false
    }

    /// HTTP status code of the response, if one was received.
    fn status_code(&self) -> Option<u16> {
        None
    }

    /// Symbolic error code reported by the service.
    fn error_code(&self) -> Option<&str> {
        None
    }
}

impl AttemptError for io::Error {
    fn connection_error(&self) -> Option<bool> {
        is_connection_kind(self.kind()).then_some(true)
    }

    fn is_temporary(&self) -> Option<bool> {
        is_temporary_kind(self.kind()).then_some(true)
    }

    fn is_timeout(&self) -> bool {
        self.kind() == io::ErrorKind::TimedOut
    }
}

fn is_temporary_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::TimedOut | io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}

fn is_connection_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
    )
}

/// Gives a verdict on an error.
pub trait Classifier<E>: Send + Sync {
    /// Returns [`Ternary::Unknown`] to let the next classifier decide.
    fn classify(&self, error: &E) -> Ternary;
}

/// Closure-backed classifier.
pub struct FnClassifier<F> {
    f: F,
}

impl<F> FnClassifier<F> {
    /// Wraps `f`.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<E, F> Classifier<E> for FnClassifier<F>
where
    F: Fn(&E) -> Ternary + Send + Sync,
{
    fn classify(&self, error: &E) -> Ternary {
        (self.f)(error)
    }
}

/// Ordered classifiers; the first verdict other than `Unknown` wins.
pub struct ClassifierChain<E> {
    classifiers: Vec<Arc<dyn Classifier<E>>>,
}

impl<E> ClassifierChain<E> {
    /// An empty chain. It classifies everything as `Unknown`.
    pub fn new() -> Self {
        Self {
            classifiers: Vec::new(),
        }
    }

    /// Appends a classifier.
    pub fn push<C>(&mut self, classifier: C)
    where
        C: Classifier<E> + 'static,
    {
        self.classifiers.push(Arc::new(classifier));
    }

    /// Appends a classifier, builder style.
    pub fn with<C>(mut self, classifier: C) -> Self
    where
        C: Classifier<E> + 'static,
    {
        self.push(classifier);
        self
    }

    /// Appends a closure as a classifier.
    pub fn with_fn<F>(self, f: F) -> Self
    where
        E: 'static,
        F: Fn(&E) -> Ternary + Send + Sync + 'static,
    {
        self.with(FnClassifier::new(f))
    }

    /// Runs the chain.
    pub fn classify(&self, error: &E) -> Ternary {
        self.classifiers
            .iter()
            .map(|c| c.classify(error))
            .find(|verdict| verdict.is_known())
            .unwrap_or_default()
    }

    /// Number of classifiers.
    pub fn len(&self) -> usize {
        self.classifiers.len()
    }

    /// Returns true if the chain holds no classifiers.
    pub fn is_empty(&self) -> bool {
        self.classifiers.is_empty()
    }
}

impl<E: AttemptError> ClassifierChain<E> {
    /// The usual retryability chain: the error's own opinion, then
    /// cancellation, connection failures, retryable status codes, retryable
    /// error codes and throttle codes.
    pub fn retryables(codes: &RetryableCodes, throttles: &ThrottleCodes) -> Self {
        Self::new()
            .with(ExplicitRetryable)
            .with(NotRetryableIfCanceled)
            .with(ConnectionError)
            .with(HttpStatusCode::new(codes.status_codes.iter().copied()))
            .with(ErrorCode::new(codes.error_codes.iter().cloned()))
            .with(ThrottleErrorCode::new(throttles.error_codes.iter().cloned()))
            .with(ThrottleStatusCode::new(throttles.status_codes.iter().copied()))
    }

    /// The usual throttle chain.
    pub fn throttles(codes: &ThrottleCodes) -> Self {
        Self::new()
            .with(ThrottleErrorCode::new(codes.error_codes.iter().cloned()))
            .with(ThrottleStatusCode::new(codes.status_codes.iter().copied()))
    }

    /// The usual timeout chain.
    pub fn timeouts() -> Self {
        Self::new().with(TimeoutError)
    }
}

impl<E> Classifier<E> for ClassifierChain<E> {
    fn classify(&self, error: &E) -> Ternary {
        ClassifierChain::classify(self, error)
    }
}

impl<E> Clone for ClassifierChain<E> {
    fn clone(&self) -> Self {
        Self {
            classifiers: self.classifiers.clone(),
        }
    }
}

impl<E> Default for ClassifierChain<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for ClassifierChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassifierChain")
            .field("len", &self.classifiers.len())
            .finish()
    }
}

/// Defers to [`AttemptError::retryable`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ExplicitRetryable;

impl<E: AttemptError> Classifier<E> for ExplicitRetryable {
    fn classify(&self, error: &E) -> Ternary {
        error.retryable().into()
    }
}

/// Never retries a caller-initiated cancel.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotRetryableIfCanceled;

impl<E: AttemptError> Classifier<E> for NotRetryableIfCanceled {
    fn classify(&self, error: &E) -> Ternary {
        if error.is_canceled() {
            Ternary::False
        } else {
            Ternary::Unknown
        }
    }
}

/// Retries transport connection failures and temporary transport errors.
///
/// Asks [`AttemptError::connection_error`] and then
/// [`AttemptError::is_temporary`] first. Failing those, looks for an
/// [`io::Error`] of a connection or temporary kind anywhere in the `source()`
/// chain, then for "connection reset" in any message along the chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionError;

impl<E: AttemptError> Classifier<E> for ConnectionError {
    fn classify(&self, error: &E) -> Ternary {
        if let Some(verdict) = error.connection_error() {
            return verdict.into();
        }
        if error.is_temporary() == Some(true) {
            return Ternary::True;
        }

        let root: &(dyn StdError + 'static) = error;
        let mut current = Some(root);
        while let Some(err) = current {
            if let Some(io_err) = err.downcast_ref::<io::Error>() {
                if is_connection_kind(io_err.kind()) || is_temporary_kind(io_err.kind()) {
                    return Ternary::True;
                }
            }
            if err.to_string().contains("connection reset") {
                return Ternary::True;
            }
            current = err.source();
        }
        Ternary::Unknown
    }
}

/// Retries responses with one of the given HTTP status codes.
#[derive(Debug, Clone, Default)]
pub struct HttpStatusCode {
    codes: HashSet<u16>,
}

impl HttpStatusCode {
    /// Creates the classifier from a set of status codes.
    pub fn new<I: IntoIterator<Item = u16>>(codes: I) -> Self {
        Self {
            codes: codes.into_iter().collect(),
        }
    }
}

impl<E: AttemptError> Classifier<E> for HttpStatusCode {
    fn classify(&self, error: &E) -> Ternary {
        match error.status_code() {
            Some(code) if self.codes.contains(&code) => Ternary::True,
            _ => Ternary::Unknown,
        }
    }
}

/// Retries errors carrying one of the given service error codes.
#[derive(Debug, Clone, Default)]
pub struct ErrorCode {
    codes: HashSet<String>,
}

impl ErrorCode {
    /// Creates the classifier from a set of error codes.
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            codes: codes.into_iter().map(Into::into).collect(),
        }
    }
}

impl<E: AttemptError> Classifier<E> for ErrorCode {
    fn classify(&self, error: &E) -> Ternary {
        match error.error_code() {
            Some(code) if self.codes.contains(code) => Ternary::True,
            _ => Ternary::Unknown,
        }
    }
}

/// Flags errors carrying a throttling error code.
#[derive(Debug, Clone, Default)]
pub struct ThrottleErrorCode {
    inner: ErrorCode,
}

impl ThrottleErrorCode {
    /// Creates the classifier from a set of throttling error codes.
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: ErrorCode::new(codes),
        }
    }
}

impl<E: AttemptError> Classifier<E> for ThrottleErrorCode {
    fn classify(&self, error: &E) -> Ternary {
        self.inner.classify(error)
    }
}

/// Flags responses with a throttling HTTP status code.
#[derive(Debug, Clone, Default)]
pub struct ThrottleStatusCode {
    inner: HttpStatusCode,
}

impl ThrottleStatusCode {
    /// Creates the classifier from a set of throttling status codes.
    pub fn new<I: IntoIterator<Item = u16>>(codes: I) -> Self {
        Self {
            inner: HttpStatusCode::new(codes),
        }
    }
}

impl<E: AttemptError> Classifier<E> for ThrottleStatusCode {
    fn classify(&self, error: &E) -> Ternary {
        self.inner.classify(error)
    }
}

/// Flags attempts that timed out.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeoutError;

impl<E: AttemptError> Classifier<E> for TimeoutError {
    fn classify(&self, error: &E) -> Ternary {
        if error.is_timeout() {
            Ternary::True
        } else {
            Ternary::Unknown
        }
    }
}

/// Status and error codes treated as retryable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryableCodes {
    /// HTTP status codes.
    pub status_codes: HashSet<u16>,
    /// Service error codes.
    pub error_codes: HashSet<String>,
}

impl Default for RetryableCodes {
    fn default() -> Self {
        Self {
            status_codes: [500, 502, 503, 504].into_iter().collect(),
            error_codes: ["RequestTimeout", "RequestTimeoutException"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl RetryableCodes {
    /// No codes at all.
    pub fn empty() -> Self {
        Self {
            status_codes: HashSet::new(),
            error_codes: HashSet::new(),
        }
    }

    /// Adds a status code.
    pub fn with_status_code(mut self, code: u16) -> Self {
        self.status_codes.insert(code);
        self
    }

    /// Adds an error code.
    pub fn with_error_code<S: Into<String>>(mut self, code: S) -> Self {
        self.error_codes.insert(code.into());
        self
    }
}

/// Status and error codes that mean "slow down".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleCodes {
    /// HTTP status codes.
    pub status_codes: HashSet<u16>,
    /// Service error codes.
    pub error_codes: HashSet<String>,
}

impl Default for ThrottleCodes {
    fn default() -> Self {
        Self {
            status_codes: [429].into_iter().collect(),
            error_codes: [
                "Throttling",
                "ThrottlingException",
                "ThrottledException",
                "RequestThrottledException",
                "TooManyRequestsException",
                "ProvisionedThroughputExceededException",
                "TransactionInProgressException",
                "RequestLimitExceeded",
                "BandwidthLimitExceeded",
                "LimitExceededException",
                "RequestThrottled",
                "SlowDown",
                "PriorRequestNotComplete",
                "EC2ThrottledException",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

impl ThrottleCodes {
    /// No codes at all.
    pub fn empty() -> Self {
        Self {
            status_codes: HashSet::new(),
            error_codes: HashSet::new(),
        }
    }

    /// Adds a status code.
    pub fn with_status_code(mut self, code: u16) -> Self {
        self.status_codes.insert(code);
        self
    }

    /// Adds an error code.
    pub fn with_error_code<S: Into<String>>(mut self, code: S) -> Self {
        self.error_codes.insert(code.into());
        self
    }
}
