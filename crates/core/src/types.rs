//! Core types for the order state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(Ulid);

impl OrderId {
    /// Create a new random order ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Create from a ULID.
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Get the inner ULID.
    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order lifecycle state.
///
/// Stable states are rest points where no worker is mutating the order.
/// Transitional states mark an action that has begun but not yet durably
/// completed; an order observed in one is locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    /// Order exists but has not been validated.
    Created,
    /// Validation is in flight.
    ValidationStarted,
    /// Validation succeeded.
    Validated,
    /// Broadcast is in flight.
    BroadcastStarted,
    /// Broadcast succeeded.
    Broadcasted,
    /// Processing finished; the order is never mutated again.
    Complete,
}

impl OrderState {
    /// All states, in pipeline order.
    pub const ALL: [Self; 6] = [
        Self::Created,
        Self::ValidationStarted,
        Self::Validated,
        Self::BroadcastStarted,
        Self::Broadcasted,
        Self::Complete,
    ];

    /// Check if this is a stable state (a valid rest point).
    pub fn is_stable(&self) -> bool {
        matches!(
            self,
            Self::Created | Self::Validated | Self::Broadcasted | Self::Complete
        )
    }

    /// Check if this is a transitional state (an action in flight).
    pub fn is_transitional(&self) -> bool {
        matches!(self, Self::ValidationStarted | Self::BroadcastStarted)
    }

    /// Check if this is the terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete)
    }

    /// Whether an order observed in this state is locked against new work.
    ///
    /// Transitional states double as locks: the worker that wrote one owns
    /// the order until it finishes or the recovery scanner reclaims it.
    pub fn locked(&self) -> bool {
        self.is_transitional()
    }

    /// The canonical string form persisted by stores.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::ValidationStarted => "validation_started",
            Self::Validated => "validated",
            Self::BroadcastStarted => "broadcast_started",
            Self::Broadcasted => "broadcasted",
            Self::Complete => "complete",
        }
    }

    /// Parse the canonical string form. Returns `None` for anything else.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "validation_started" => Some(Self::ValidationStarted),
            "validated" => Some(Self::Validated),
            "broadcast_started" => Some(Self::BroadcastStarted),
            "broadcasted" => Some(Self::Broadcasted),
            "complete" => Some(Self::Complete),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A persisted order as returned by a store.
///
/// The state is kept in its raw string form: a store may hold records
/// written under a newer schema than this build knows, and those must stay
/// readable so callers can surface them as unknown instead of failing the
/// whole read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    /// Unique order identifier, assigned at creation.
    pub id: OrderId,
    /// Raw state value as persisted.
    pub state: String,
    /// When the state was last written.
    pub updated_at: DateTime<Utc>,
}

impl OrderRecord {
    /// Parse the persisted state into the closed state enum.
    pub fn parsed_state(&self) -> Option<OrderState> {
        OrderState::parse(&self.state)
    }

    /// Whether the order is locked by an in-flight action.
    ///
    /// Unknown states are not locks; they surface as errors elsewhere.
    pub fn locked(&self) -> bool {
        self.parsed_state().map_or(false, |s| s.locked())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_id_unique() {
        let id1 = OrderId::new();
        let id2 = OrderId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_order_id_display_roundtrip() {
        let id = OrderId::new();
        assert_eq!(id.to_string(), id.as_ulid().to_string());
    }

    #[test]
    fn test_state_string_roundtrip() {
        for state in OrderState::ALL {
            assert_eq!(OrderState::parse(state.as_str()), Some(state));
        }
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert_eq!(OrderState::parse("bogus"), None);
        assert_eq!(OrderState::parse(""), None);
        assert_eq!(OrderState::parse("Created"), None);
    }

    #[test]
    fn test_stable_transitional_partition() {
        for state in OrderState::ALL {
            assert_ne!(state.is_stable(), state.is_transitional());
        }
    }

    #[test]
    fn test_terminal_is_complete_only() {
        assert!(OrderState::Complete.is_terminal());
        let others = OrderState::ALL.iter().filter(|s| s.is_terminal()).count();
        assert_eq!(others, 1);
    }

    #[test]
    fn test_locked_is_transitional() {
        assert!(OrderState::ValidationStarted.locked());
        assert!(OrderState::BroadcastStarted.locked());
        assert!(!OrderState::Created.locked());
        assert!(!OrderState::Complete.locked());
    }

    #[test]
    fn test_record_locked() {
        let record = OrderRecord {
            id: OrderId::new(),
            state: "broadcast_started".to_string(),
            updated_at: Utc::now(),
        };
        assert!(record.locked());

        let resting = OrderRecord {
            state: "validated".to_string(),
            ..record.clone()
        };
        assert!(!resting.locked());

        let unknown = OrderRecord {
            state: "bogus".to_string(),
            ..record
        };
        assert!(!unknown.locked());
        assert_eq!(unknown.parsed_state(), None);
    }

    #[test]
    fn test_state_serde_uses_wire_strings() {
        let json = serde_json::to_string(&OrderState::BroadcastStarted).unwrap_or_default();
        assert_eq!(json, "\"broadcast_started\"");
    }

    #[test]
    fn test_record_serde_roundtrip() {
        let record = OrderRecord {
            id: OrderId::new(),
            state: "created".to_string(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&record).unwrap_or_default();
        let back: Option<OrderRecord> = serde_json::from_str(&json).ok();
        assert_eq!(back.map(|r| r.id), Some(record.id));
    }
}
