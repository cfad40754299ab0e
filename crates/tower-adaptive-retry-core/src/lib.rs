//! Core infrastructure for tower-adaptive-retry.
//!
//! This crate provides the pieces shared by the rate limiting and retry crates:
//! - [`Ternary`] verdicts for classifier chains
//! - Event system for observability
//! - [`RetryError`], the single error an operation surfaces to its caller
//! - Cancellable waits built on [`CancellationToken`]

pub mod error;
pub mod events;
pub mod ternary;
pub mod wait;

pub use error::RetryError;
pub use events::{EngineEvent, EventListener, EventListeners, FnListener};
pub use ternary::Ternary;
pub use tokio_util::sync::CancellationToken;
pub use wait::{sleep_or_cancel, Canceled};
