//! Adaptive client-side send rate.
//!
//! The controller estimates how fast the client may send attempts without
//! being throttled. It is a CUBIC-flavoured AIMD loop over send events:
//!
//! - **Multiplicative decrease**: a throttled attempt cuts the allowed rate to
//!   `beta` (0.7) times the rate the client was actually sending at.
//! - **Cubic increase**: every other attempt moves the rate along
//!   `scale * (t - W)^3 + last_max_rate`, where `t` is the time since the last
//!   throttle and `W` the time the curve takes to climb back to
//!   `last_max_rate`. Growth is fast right after the cut, flattens out near
//!   the rate that triggered throttling, then accelerates again once that
//!   rate has been held without complaint.
//!
//! Until the first throttle is observed, sending is not gated at all.
//! Afterwards attempts draw tokens from a bucket that refills continuously at
//! the current fill rate.
//!
//! # Example
//!
//! ```rust
//! use tower_adaptive_retry_ratelimit::AdaptiveRateController;
//!
//! let controller = AdaptiveRateController::default();
//!
//! // Nothing is gated before the first throttle.
//! let (acquired, _) = controller.acquire_token(1);
//! assert!(acquired);
//!
//! controller.update(true);
//! assert!(controller.is_enabled());
//! assert!(controller.calculated_rate() > 0.0);
//! ```

use crate::reservation::Reservation;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tower_adaptive_retry_core::{sleep_or_cancel, CancellationToken};

#[cfg(feature = "metrics")]
use metrics::gauge;

/// Tunables for [`AdaptiveRateController`].
///
/// Only the qualitative behaviour matters to callers (smooth increase without
/// throttling, multiplicative decrease on throttling, a rate that never
/// reaches zero); these knobs shape the curve.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct AdaptiveRateConfig {
    /// Name used in logs and metrics.
    pub name: String,
    /// Weight of the newest sample in the measured send rate (0.0 - 1.0).
    pub smooth: f64,
    /// Multiplicative decrease factor applied on throttle (0.0 - 1.0).
    pub beta: f64,
    /// Scale of the cubic growth curve.
    pub scale_constant: f64,
    /// Floor for the fill rate, in tokens per second.
    pub min_fill_rate: f64,
    /// Width of the buckets the measured send rate is sampled over.
    pub measurement_window: Duration,
}

impl Default for AdaptiveRateConfig {
    fn default() -> Self {
        Self {
            name: "<unnamed>".to_string(),
            smooth: 0.8,
            beta: 0.7,
            scale_constant: 0.4,
            min_fill_rate: 0.5,
            measurement_window: Duration::from_millis(500),
        }
    }
}

impl AdaptiveRateConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the name.
    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Set the smoothing factor of the measured send rate.
    pub fn with_smooth(mut self, smooth: f64) -> Self {
        self.smooth = smooth.clamp(0.0, 1.0);
        self
    }

    /// Set the multiplicative decrease factor.
    pub fn with_beta(mut self, beta: f64) -> Self {
        self.beta = beta.clamp(0.0, 1.0);
        self
    }

    /// Set the cubic scale constant. Values at or below zero are ignored.
    pub fn with_scale_constant(mut self, scale: f64) -> Self {
        if scale > 0.0 && scale.is_finite() {
            self.scale_constant = scale;
        }
        self
    }

    /// Set the minimum fill rate. Values at or below zero are ignored.
    pub fn with_min_fill_rate(mut self, rate: f64) -> Self {
        if rate > 0.0 && rate.is_finite() {
            self.min_fill_rate = rate;
        }
        self
    }

    /// Set the measurement window of the send rate.
    pub fn with_measurement_window(mut self, window: Duration) -> Self {
        if !window.is_zero() {
            self.measurement_window = window;
        }
        self
    }

    /// Replaces out-of-range tunables, which public fields and
    /// deserialization can produce, with their defaults.
    fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if !(self.min_fill_rate > 0.0 && self.min_fill_rate.is_finite()) {
            self.min_fill_rate = defaults.min_fill_rate;
        }
        if !(self.scale_constant > 0.0 && self.scale_constant.is_finite()) {
            self.scale_constant = defaults.scale_constant;
        }
        if !(0.0..=1.0).contains(&self.beta) {
            self.beta = defaults.beta;
        }
        if !(0.0..=1.0).contains(&self.smooth) {
            self.smooth = defaults.smooth;
        }
        if self.measurement_window.is_zero() {
            self.measurement_window = defaults.measurement_window;
        }
        self
    }
}

/// Why a send token could not be acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AcquireError {
    /// No token was available and the caller refused to wait.
    #[error("unable to get attempt token, and fail on no attempt tokens is enabled")]
    Denied,
    /// The caller canceled while waiting for a token.
    #[error("failed to wait for token to be available, wait canceled")]
    Canceled,
}

// Refill arithmetic can leave a bucket a rounding error short of a whole
// token; that still counts as full.
const TOKEN_EPSILON: f64 = 1e-9;

// Shortest wait between acquisition tries.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Token bucket over fractional tokens, refilled continuously.
#[derive(Debug, Clone, Copy)]
struct RateBucket {
    capacity: f64,
    max_capacity: f64,
}

impl RateBucket {
    fn retrieve(&mut self, amount: f64) -> (f64, bool) {
        if amount > self.capacity + TOKEN_EPSILON {
            return (self.capacity, false);
        }
        self.capacity = (self.capacity - amount).max(0.0);
        (self.capacity, true)
    }

    fn refund(&mut self, amount: f64) {
        self.capacity = (self.capacity + amount).min(self.max_capacity);
    }

    fn resize(&mut self, max_capacity: f64) {
        self.max_capacity = max_capacity;
        self.capacity = self.capacity.min(max_capacity);
    }
}

#[derive(Debug)]
struct RateState {
    enabled: bool,
    bucket: RateBucket,
    fill_rate: f64,
    calculated_rate: f64,
    last_refilled: Option<f64>,
    measured_tx_rate: f64,
    last_tx_rate_bucket: f64,
    request_count: u64,
    last_max_rate: f64,
    last_throttle_time: f64,
    time_window: f64,
}

impl RateState {
    fn new(config: &AdaptiveRateConfig) -> Self {
        Self {
            enabled: false,
            bucket: RateBucket {
                capacity: 0.0,
                max_capacity: 0.0,
            },
            fill_rate: config.min_fill_rate,
            calculated_rate: config.min_fill_rate,
            last_refilled: None,
            measured_tx_rate: 0.0,
            last_tx_rate_bucket: 0.0,
            request_count: 0,
            last_max_rate: 0.0,
            last_throttle_time: 0.0,
            time_window: 0.0,
        }
    }

    fn acquire(&mut self, config: &AdaptiveRateConfig, cost: f64, now: f64) -> (bool, Duration) {
        if !self.enabled {
            return (true, Duration::ZERO);
        }

        self.refill(now);
        // The bucket must be able to hold one request's worth of tokens.
        if self.bucket.max_capacity < cost {
            self.bucket.resize(cost);
        }

        let (available, ok) = self.bucket.retrieve(cost);
        if ok {
            return (true, Duration::ZERO);
        }

        let fill_rate = self.fill_rate.max(config.min_fill_rate);
        let wait = Duration::try_from_secs_f64((cost - available) / fill_rate)
            .unwrap_or(Duration::MAX);
        (false, wait.max(MIN_WAIT))
    }

    fn update(&mut self, config: &AdaptiveRateConfig, throttled: bool, now: f64) {
        self.update_measured_rate(config, now);

        if throttled {
            let rate_to_use = if self.enabled {
                self.measured_tx_rate.min(self.fill_rate)
            } else {
                self.measured_tx_rate
            };
            self.last_max_rate = rate_to_use;
            self.calculate_time_window(config);
            self.last_throttle_time = now;
            self.calculated_rate = (rate_to_use * config.beta).max(config.min_fill_rate);
            self.enabled = true;
        } else {
            self.calculate_time_window(config);
            self.calculated_rate = self.cubic_success(config, now);
        }

        let new_rate = self.calculated_rate.min(2.0 * self.measured_tx_rate);
        self.update_fill_rate(config, new_rate, now);
    }

    fn cubic_success(&self, config: &AdaptiveRateConfig, now: f64) -> f64 {
        let dt = now - self.last_throttle_time;
        let rate = config.scale_constant * (dt - self.time_window).powi(3) + self.last_max_rate;
        rate.max(config.min_fill_rate)
    }

    fn calculate_time_window(&mut self, config: &AdaptiveRateConfig) {
        let span = self.last_max_rate * (1.0 - config.beta) / config.scale_constant;
        self.time_window = span.max(0.0).cbrt();
    }

    fn update_measured_rate(&mut self, config: &AdaptiveRateConfig, now: f64) {
        let window = config.measurement_window.as_secs_f64();
        let time_bucket = (now / window).floor() * window;
        self.request_count += 1;

        if time_bucket > self.last_tx_rate_bucket {
            let current_rate = self.request_count as f64 / (time_bucket - self.last_tx_rate_bucket);
            self.measured_tx_rate =
                current_rate * config.smooth + self.measured_tx_rate * (1.0 - config.smooth);
            self.request_count = 0;
            self.last_tx_rate_bucket = time_bucket;
        }
    }

    fn update_fill_rate(&mut self, config: &AdaptiveRateConfig, new_rate: f64, now: f64) {
        self.refill(now);
        self.fill_rate = new_rate.max(config.min_fill_rate);
        self.bucket.resize(self.fill_rate.max(1.0));
    }

    fn refill(&mut self, now: f64) {
        if let Some(last) = self.last_refilled {
            let elapsed = (now - last).max(0.0);
            self.bucket.refund(elapsed * self.fill_rate);
        }
        self.last_refilled = Some(now);
    }
}

/// Process-wide estimate of a safe send rate, shared across operations.
///
/// Cloning is cheap; clones share state. All state changes happen under one
/// mutex held only for the arithmetic.
#[derive(Debug, Clone)]
pub struct AdaptiveRateController {
    state: Arc<Mutex<RateState>>,
    config: Arc<AdaptiveRateConfig>,
    epoch: Instant,
}

impl AdaptiveRateController {
    /// Create a controller with the given tunables.
    ///
    /// A non-positive `min_fill_rate` or `scale_constant`, a `beta` or
    /// `smooth` outside `0.0..=1.0`, and a zero measurement window fall back
    /// to their defaults.
    pub fn new(config: AdaptiveRateConfig) -> Self {
        let config = config.sanitized();
        #[cfg(feature = "metrics")]
        metrics::describe_gauge!(
            "adaptive_send_rate",
            "Current send rate allowed by the adaptive rate controller (tokens per second)"
        );

        Self {
            state: Arc::new(Mutex::new(RateState::new(&config))),
            config: Arc::new(config),
            epoch: Instant::now(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now(&self) -> f64 {
        Instant::now().duration_since(self.epoch).as_secs_f64()
    }

    /// Tunables in use.
    pub fn config(&self) -> &AdaptiveRateConfig {
        &self.config
    }

    /// Tries to take `cost` send tokens without waiting.
    ///
    /// Returns whether the tokens were taken and, if not, how long until
    /// enough tokens will have accrued.
    pub fn acquire_token(&self, cost: usize) -> (bool, Duration) {
        let now = self.now();
        self.lock().acquire(&self.config, cost as f64, now)
    }

    /// Takes `cost` send tokens, sleeping between tries until they are
    /// available.
    ///
    /// With `fail_fast` set, returns [`AcquireError::Denied`] instead of
    /// waiting. Returns the total time spent waiting.
    pub async fn acquire(
        &self,
        cost: usize,
        cancel: &CancellationToken,
        fail_fast: bool,
    ) -> Result<Duration, AcquireError> {
        let mut waited = Duration::ZERO;
        loop {
            let (acquired, retry_after) = self.acquire_token(cost);
            if acquired {
                return Ok(waited);
            }
            if fail_fast {
                return Err(AcquireError::Denied);
            }

            #[cfg(feature = "tracing")]
            tracing::trace!(
                limiter = %self.config.name,
                wait_ms = retry_after.as_millis() as u64,
                "waiting for send token"
            );

            sleep_or_cancel(retry_after, cancel)
                .await
                .map_err(|_| AcquireError::Canceled)?;
            waited += retry_after;
        }
    }

    /// Acquires send tokens and returns a reservation that reports the
    /// attempt's throttle signal back to this controller when settled.
    pub async fn reserve(
        &self,
        cost: usize,
        cancel: &CancellationToken,
        fail_fast: bool,
    ) -> Result<Reservation, AcquireError> {
        self.acquire(cost, cancel, fail_fast).await?;
        Ok(Reservation::send(self.clone()))
    }

    /// Feeds back the outcome of one attempt.
    pub fn update(&self, throttled: bool) {
        let now = self.now();
        let mut state = self.lock();
        let before = state.calculated_rate;
        state.update(&self.config, throttled, now);
        let fill_rate = state.fill_rate;
        let after = state.calculated_rate;
        drop(state);

        #[cfg(feature = "tracing")]
        if throttled {
            tracing::debug!(
                limiter = %self.config.name,
                from = before,
                to = after,
                fill_rate,
                "throttle observed, send rate reduced"
            );
        }
        #[cfg(not(feature = "tracing"))]
        let _ = (before, after);

        #[cfg(feature = "metrics")]
        gauge!("adaptive_send_rate", "limiter" => self.config.name.clone()).set(fill_rate);
        #[cfg(not(feature = "metrics"))]
        let _ = fill_rate;
    }

    /// The target rate computed by the last update, in tokens per second.
    pub fn calculated_rate(&self) -> f64 {
        self.lock().calculated_rate
    }

    /// The rate the send bucket currently refills at.
    pub fn fill_rate(&self) -> f64 {
        self.lock().fill_rate
    }

    /// The smoothed observed send rate.
    pub fn measured_tx_rate(&self) -> f64 {
        self.lock().measured_tx_rate
    }

    /// Whether sending is gated (a throttle has been observed).
    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }
}

impl Default for AdaptiveRateController {
    fn default() -> Self {
        Self::new(AdaptiveRateConfig::default())
    }
}
