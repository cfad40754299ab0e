use std::sync::{Mutex, MutexGuard, PoisonError};

/// A fixed-capacity pool of integer tokens.
///
/// Tokens are taken with [`retrieve`](Self::retrieve) and given back with
/// [`refund`](Self::refund). The pool never goes below zero and never grows
/// past its maximum, no matter how calls interleave across threads.
#[derive(Debug)]
pub struct TokenBucket {
    state: Mutex<BucketState>,
}

#[derive(Debug, Clone, Copy)]
struct BucketState {
    capacity: usize,
    max_capacity: usize,
}

impl TokenBucket {
    /// Creates a full bucket holding `max_capacity` tokens.
    pub fn new(max_capacity: usize) -> Self {
        Self {
            state: Mutex::new(BucketState {
                capacity: max_capacity,
                max_capacity,
            }),
        }
    }

    // The state is two integers updated together; a panic elsewhere cannot
    // leave it half-written.
    fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes `amount` tokens.
    ///
    /// Returns the tokens left and `true` on success. If the bucket holds
    /// fewer than `amount`, nothing is taken and the current capacity is
    /// returned with `false`.
    pub fn retrieve(&self, amount: usize) -> (usize, bool) {
        let mut state = self.lock();
        if amount > state.capacity {
            return (state.capacity, false);
        }
        state.capacity -= amount;
        (state.capacity, true)
    }

    /// Gives back `amount` tokens, clamped to the maximum capacity.
    /// Returns the new capacity.
    pub fn refund(&self, amount: usize) -> usize {
        let mut state = self.lock();
        state.capacity = state.capacity.saturating_add(amount).min(state.max_capacity);
        state.capacity
    }

    /// Tokens currently available.
    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    /// Maximum number of tokens the bucket can hold.
    pub fn max_capacity(&self) -> usize {
        self.lock().max_capacity
    }

    /// Tokens missing from a full bucket.
    pub fn remaining(&self) -> usize {
        let state = self.lock();
        state.max_capacity - state.capacity
    }

    /// Changes the maximum capacity, trimming the current capacity to fit.
    pub fn resize(&self, max_capacity: usize) {
        let mut state = self.lock();
        state.max_capacity = max_capacity;
        state.capacity = state.capacity.min(max_capacity);
    }
}
