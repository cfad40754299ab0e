use crate::adaptive::AdaptiveRateController;
use crate::quota::RetryQuota;
use std::fmt;

/// How the attempt a reservation paid for turned out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The attempt succeeded.
    Succeeded,
    /// The attempt failed for a reason other than throttling.
    Failed,
    /// The attempt failed because the service asked the client to slow down.
    Throttled,
}

impl Outcome {
    /// Returns `true` for [`Outcome::Succeeded`].
    pub fn is_success(self) -> bool {
        matches!(self, Outcome::Succeeded)
    }
}

/// A claim on a shared pool that is committed or paid back once the outcome
/// of an attempt is known.
///
/// A reservation is settled exactly once; [`settle`](Self::settle) consumes
/// it. Dropping it unsettled (for example when the operation is canceled)
/// refunds nothing, which leaves the pools slightly conservative until later
/// successes top them up.
#[must_use = "a reservation does nothing unless settled"]
pub struct Reservation {
    kind: Kind,
}

enum Kind {
    Noop,
    Quota {
        quota: RetryQuota,
        refund_on_success: usize,
    },
    Send {
        controller: AdaptiveRateController,
    },
}

impl Reservation {
    /// A reservation with nothing attached.
    pub fn noop() -> Self {
        Self { kind: Kind::Noop }
    }

    pub(crate) fn quota(quota: RetryQuota, refund_on_success: usize) -> Self {
        Self {
            kind: Kind::Quota {
                quota,
                refund_on_success,
            },
        }
    }

    pub(crate) fn send(controller: AdaptiveRateController) -> Self {
        Self {
            kind: Kind::Send { controller },
        }
    }

    /// Returns `true` if settling this reservation has no effect.
    pub fn is_noop(&self) -> bool {
        matches!(self.kind, Kind::Noop)
    }

    /// Commits the reservation against the attempt's outcome.
    ///
    /// - quota reservations give tokens back only on success;
    /// - send reservations feed the throttle signal to the rate controller.
    pub fn settle(self, outcome: Outcome) {
        match self.kind {
            Kind::Noop => {}
            Kind::Quota {
                quota,
                refund_on_success,
            } => {
                if outcome.is_success() {
                    quota.add_tokens(refund_on_success);
                }
            }
            Kind::Send { controller } => {
                controller.update(outcome == Outcome::Throttled);
            }
        }
    }
}

impl Default for Reservation {
    fn default() -> Self {
        Self::noop()
    }
}

impl fmt::Debug for Reservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Kind::Noop => f.write_str("Reservation::Noop"),
            Kind::Quota {
                refund_on_success, ..
            } => f
                .debug_struct("Reservation::Quota")
                .field("refund_on_success", refund_on_success)
                .finish(),
            Kind::Send { .. } => f.write_str("Reservation::Send"),
        }
    }
}
