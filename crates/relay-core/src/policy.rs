//! Failure policy for calls into external infrastructure.
//!
//! Each call site into an external store declares its policy as a constant
//! next to the operation, so the open/closed decision is auditable in one
//! place instead of being inferred from error-handling bodies.

/// What to do when an infrastructure call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Proceed as if the check passed. Used where blocking on a flaky store
    /// would drop business events (idempotency checks).
    FailOpen,
    /// Treat the failure as a failure and let retry machinery act. Used
    /// where the alternative is losing work (delivery).
    FailClosed,
}

impl FailurePolicy {
    pub fn fails_open(self) -> bool {
        matches!(self, Self::FailOpen)
    }

    /// Resolve a failed boolean check to the value this policy dictates.
    ///
    /// `open_value` is what the caller proceeds with when failing open;
    /// failing closed yields its negation.
    pub fn on_error(self, open_value: bool) -> bool {
        match self {
            Self::FailOpen => open_value,
            Self::FailClosed => !open_value,
        }
    }
}
