//! Three-valued verdicts.
//!
//! Classifier chains need to tell "no" apart from "no opinion": a classifier
//! that cannot say anything about an error returns [`Ternary::Unknown`] so the
//! next classifier in the chain gets a chance to decide.

use std::fmt;

/// A tri-state verdict: `True`, `False`, or `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Ternary {
    /// No opinion; a later classifier decides.
    #[default]
    Unknown,
    /// Affirmative verdict.
    True,
    /// Negative verdict.
    False,
}

impl Ternary {
    /// Collapses the verdict to a boolean. `Unknown` is treated as `false`.
    pub fn bool(self) -> bool {
        matches!(self, Ternary::True)
    }

    /// Returns `true` unless the verdict is `Unknown`.
    pub fn is_known(self) -> bool {
        !matches!(self, Ternary::Unknown)
    }

    /// Returns `self` if known, otherwise evaluates `f`.
    ///
    /// ```
    /// use tower_adaptive_retry_core::Ternary;
    ///
    /// assert_eq!(Ternary::Unknown.or_else(|| Ternary::True), Ternary::True);
    /// assert_eq!(Ternary::False.or_else(|| Ternary::True), Ternary::False);
    /// ```
    pub fn or_else<F>(self, f: F) -> Ternary
    where
        F: FnOnce() -> Ternary,
    {
        if self.is_known() {
            self
        } else {
            f()
        }
    }
}

impl From<bool> for Ternary {
    fn from(value: bool) -> Self {
        if value {
            Ternary::True
        } else {
            Ternary::False
        }
    }
}

impl From<Option<bool>> for Ternary {
    fn from(value: Option<bool>) -> Self {
        value.map_or(Ternary::Unknown, Ternary::from)
    }
}

impl fmt::Display for Ternary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ternary::True => write!(f, "true"),
            Ternary::False => write!(f, "false"),
            Ternary::Unknown => write!(f, "unknown"),
        }
    }
}
