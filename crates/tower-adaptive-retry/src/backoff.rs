use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::error::Error as StdError;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Default upper bound on a single retry delay.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(20);

/// Default delay the exponential curve starts from.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// A delay could not be computed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackoffError {
    /// Attempts are numbered from 1.
    #[error("invalid attempt number {0}, attempts are numbered from 1")]
    InvalidAttempt(usize),
}

/// Computes how long to wait before retrying.
pub trait BackoffDelayer: Send + Sync {
    /// Delay before retrying after attempt `attempt` (1-indexed) failed with
    /// `error`.
    fn delay(
        &self,
        attempt: usize,
        error: &(dyn StdError + 'static),
    ) -> Result<Duration, BackoffError>;
}

/// Exponential backoff with full jitter.
///
/// The delay after attempt `n` is uniform in `[0, min(max_backoff, base * 2^(n-1))]`.
///
/// Jitter comes from the calling thread's generator, so concurrent
/// operations never contend on a shared one. A seeded instance
/// ([`with_seed`](Self::with_seed)) keeps its own generator behind a lock.
///
/// # Example
///
/// ```rust
/// use tower_adaptive_retry::backoff::{BackoffDelayer, ExponentialJitterBackoff};
/// use std::time::Duration;
///
/// let backoff = ExponentialJitterBackoff::new(Duration::from_secs(5));
/// let err = std::io::Error::other("boom");
/// for attempt in 1..=10 {
///     let delay = backoff.delay(attempt, &err).unwrap();
///     assert!(delay <= Duration::from_secs(5));
/// }
/// ```
#[derive(Debug)]
pub struct ExponentialJitterBackoff {
    base_delay: Duration,
    max_backoff: Duration,
    seeded: Option<Mutex<StdRng>>,
}

impl ExponentialJitterBackoff {
    /// Creates a backoff capped at `max_backoff`, starting from one second.
    pub fn new(max_backoff: Duration) -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_backoff,
            seeded: None,
        }
    }

    /// Sets the delay the curve starts from.
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Seeds the jitter source, for reproducible delays.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seeded = Some(Mutex::new(StdRng::seed_from_u64(seed)));
        self
    }

    /// The cap on a single delay.
    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// The delay the curve starts from.
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Upper bound of the jitter window after `attempt`.
    pub fn ceiling(&self, attempt: usize) -> Result<Duration, BackoffError> {
        if attempt == 0 {
            return Err(BackoffError::InvalidAttempt(attempt));
        }

        let exponent = (attempt - 1).min(64) as u32;
        let grown = self.base_delay.as_nanos().saturating_mul(1u128 << exponent);
        let capped = grown.min(self.max_backoff.as_nanos());
        Ok(Duration::from_nanos(u64::try_from(capped).unwrap_or(u64::MAX)))
    }
}

impl Default for ExponentialJitterBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BACKOFF)
    }
}

impl BackoffDelayer for ExponentialJitterBackoff {
    fn delay(
        &self,
        attempt: usize,
        _error: &(dyn StdError + 'static),
    ) -> Result<Duration, BackoffError> {
        let ceiling = u64::try_from(self.ceiling(attempt)?.as_nanos()).unwrap_or(u64::MAX);
        if ceiling == 0 {
            return Ok(Duration::ZERO);
        }

        let nanos = match &self.seeded {
            Some(rng) => rng
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .random_range(0..=ceiling),
            None => rand::rng().random_range(0..=ceiling),
        };
        Ok(Duration::from_nanos(nanos))
    }
}

/// The same delay for every retry.
#[derive(Debug, Clone, Copy)]
pub struct FixedBackoff {
    delay: Duration,
}

impl FixedBackoff {
    /// Creates a fixed backoff.
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl BackoffDelayer for FixedBackoff {
    fn delay(
        &self,
        attempt: usize,
        _error: &(dyn StdError + 'static),
    ) -> Result<Duration, BackoffError> {
        if attempt == 0 {
            return Err(BackoffError::InvalidAttempt(attempt));
        }
        Ok(self.delay)
    }
}

/// Retries immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBackoff;

impl BackoffDelayer for NoBackoff {
    fn delay(
        &self,
        attempt: usize,
        _error: &(dyn StdError + 'static),
    ) -> Result<Duration, BackoffError> {
        if attempt == 0 {
            return Err(BackoffError::InvalidAttempt(attempt));
        }
        Ok(Duration::ZERO)
    }
}

/// Function-based backoff.
pub struct FnBackoff<F> {
    f: F,
}

impl<F> FnBackoff<F>
where
    F: Fn(usize) -> Duration + Send + Sync,
{
    /// Creates a backoff from a function of the attempt number.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> BackoffDelayer for FnBackoff<F>
where
    F: Fn(usize) -> Duration + Send + Sync,
{
    fn delay(
        &self,
        attempt: usize,
        _error: &(dyn StdError + 'static),
    ) -> Result<Duration, BackoffError> {
        if attempt == 0 {
            return Err(BackoffError::InvalidAttempt(attempt));
        }
        Ok((self.f)(attempt))
    }
}
