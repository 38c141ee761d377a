//! Error types shared by stores and the engine.

use thiserror::Error;

/// Result type alias for order operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by stores, transitions, and drive loops.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// No order exists with the given ID.
    #[error("order '{order_id}' not found")]
    NotFound { order_id: String },

    /// A conditional update found a different current state than expected.
    ///
    /// Routine under concurrency: another worker advanced the order first,
    /// or the caller's view is stale. Callers re-read and re-decide rather
    /// than retrying the same write.
    #[error("order '{order_id}' is no longer in state '{expected}'")]
    StateConflict { order_id: String, expected: String },

    /// The persisted state is not one the transition table recognizes.
    #[error("order '{order_id}' has unknown state '{state}'")]
    UnknownState { order_id: String, state: String },

    /// The store could not be reached; safe to retry with backoff.
    #[error("store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    /// The store stayed unreachable past the retry limit.
    #[error("store unavailable after {attempts} attempts for order '{order_id}': {reason}")]
    StoreError {
        order_id: String,
        attempts: u32,
        reason: String,
    },

    /// Repeated conflicts exhausted the drive loop's budget.
    #[error("order '{order_id}' still contended after {conflicts} conflicts (last seen '{last_state}')")]
    Contended {
        order_id: String,
        conflicts: u32,
        last_state: String,
    },

    /// An action's side effect failed.
    #[error("action '{action}' failed for order '{order_id}' in state '{state}': {reason}")]
    ActionFailed {
        order_id: String,
        action: String,
        state: String,
        reason: String,
    },

    /// A transition table failed validation.
    #[error("invalid transition table: {reason}")]
    InvalidTable { reason: String },
}

impl Error {
    /// Create a not found error.
    pub fn not_found(order_id: impl Into<String>) -> Self {
        Self::NotFound {
            order_id: order_id.into(),
        }
    }

    /// Create a state conflict error.
    pub fn state_conflict(order_id: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::StateConflict {
            order_id: order_id.into(),
            expected: expected.into(),
        }
    }

    /// Create an unknown state error.
    pub fn unknown_state(order_id: impl Into<String>, state: impl Into<String>) -> Self {
        Self::UnknownState {
            order_id: order_id.into(),
            state: state.into(),
        }
    }

    /// Create a store unavailable error.
    pub fn store_unavailable(reason: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a store error after exhausted retries.
    pub fn store_error(
        order_id: impl Into<String>,
        attempts: u32,
        reason: impl Into<String>,
    ) -> Self {
        Self::StoreError {
            order_id: order_id.into(),
            attempts,
            reason: reason.into(),
        }
    }

    /// Create a contended error.
    pub fn contended(
        order_id: impl Into<String>,
        conflicts: u32,
        last_state: impl Into<String>,
    ) -> Self {
        Self::Contended {
            order_id: order_id.into(),
            conflicts,
            last_state: last_state.into(),
        }
    }

    /// Create an action failed error.
    pub fn action_failed(
        order_id: impl Into<String>,
        action: impl Into<String>,
        state: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::ActionFailed {
            order_id: order_id.into(),
            action: action.into(),
            state: state.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid table error.
    pub fn invalid_table(reason: impl Into<String>) -> Self {
        Self::InvalidTable {
            reason: reason.into(),
        }
    }

    /// Check if this is a conditional-update conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::StateConflict { .. })
    }

    /// Check if this error is safe to retry with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::state_conflict("01ABC", "validated");
        assert!(err.to_string().contains("01ABC"));
        assert!(err.to_string().contains("validated"));
    }

    #[test]
    fn test_action_failed_display() {
        let err = Error::action_failed("01ABC", "broadcast", "broadcast_started", "refused");
        let msg = err.to_string();
        assert!(msg.contains("broadcast"));
        assert!(msg.contains("refused"));
    }

    #[test]
    fn test_is_conflict() {
        assert!(Error::state_conflict("id", "created").is_conflict());
        assert!(!Error::not_found("id").is_conflict());
        assert!(!Error::store_unavailable("down").is_conflict());
    }

    #[test]
    fn test_is_transient() {
        assert!(Error::store_unavailable("down").is_transient());
        assert!(!Error::store_error("id", 3, "down").is_transient());
        assert!(!Error::state_conflict("id", "created").is_transient());
    }
}
