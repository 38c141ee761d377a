//! Action contract and stock implementations.

use std::time::Duration;

use async_trait::async_trait;
use lockstep_core::{Error, OrderRecord, Result};

/// Staleness threshold used by actions that do not supply their own.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(300);

/// The side effect performed while an order sits in a transitional state.
///
/// An action owns more than its effect. Because a worker can die between
/// writing the transitional state and recording the outcome, recovery has
/// to ask action-specific questions: how long an in-flight marker may sit
/// before it counts as abandoned (`stale_after`), and whether the effect
/// actually happened (`confirmed`). Both answers live here because only
/// the action knows its own latency and its own durable evidence.
#[async_trait]
pub trait Action: Send + Sync {
    /// Short name used in logs and error messages.
    fn name(&self) -> &str;

    /// Perform the side effect for `record`.
    ///
    /// Runs while the order is already in the transitional state, so a
    /// crash here leaves a marker the recovery scanner can find.
    ///
    /// # Errors
    ///
    /// Any error fails the drive; the order keeps its transitional state.
    async fn effect(&self, record: &OrderRecord) -> Result<()>;

    /// Whether the effect has durably happened for `record`.
    ///
    /// Must be answerable from persistent evidence (a ledger row, an
    /// acknowledgement, a downstream record), not from worker memory.
    /// When in doubt, answer `false`: re-running an idempotent effect is
    /// safe, skipping a missing one is not.
    ///
    /// # Errors
    ///
    /// Returns an error if the evidence cannot be checked right now.
    async fn confirmed(&self, record: &OrderRecord) -> Result<bool>;

    /// How long an order may sit in this action's transitional state
    /// before the recovery scanner treats it as abandoned.
    fn stale_after(&self) -> Duration {
        DEFAULT_STALE_AFTER
    }
}

/// Action with no side effect. Suits hops that only need the state walk.
pub struct NoOpAction {
    name: String,
    stale_after: Duration,
}

impl NoOpAction {
    /// Create a no-op action with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    /// Override the staleness threshold.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }
}

#[async_trait]
impl Action for NoOpAction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn effect(&self, _record: &OrderRecord) -> Result<()> {
        Ok(())
    }

    async fn confirmed(&self, _record: &OrderRecord) -> Result<bool> {
        // Nothing to do means nothing can be half-done.
        Ok(true)
    }

    fn stale_after(&self) -> Duration {
        self.stale_after
    }
}

/// Action that always fails. Test double for drive-failure paths.
pub struct FailingAction {
    name: String,
    reason: String,
}

impl FailingAction {
    /// Create a failing action with the given name and failure reason.
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Action for FailingAction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn effect(&self, record: &OrderRecord) -> Result<()> {
        Err(Error::action_failed(
            record.id.to_string(),
            &self.name,
            record.state.clone(),
            &self.reason,
        ))
    }

    async fn confirmed(&self, _record: &OrderRecord) -> Result<bool> {
        Ok(false)
    }
}

type EffectFn = dyn Fn(&OrderRecord) -> Result<()> + Send + Sync;
type ConfirmFn = dyn Fn(&OrderRecord) -> Result<bool> + Send + Sync;

/// Action built from closures. Keeps tests and small pipelines from
/// declaring a struct per step.
pub struct FnAction {
    name: String,
    effect: Box<EffectFn>,
    confirmed: Box<ConfirmFn>,
    stale_after: Duration,
}

impl FnAction {
    /// Create an action from an effect closure.
    ///
    /// Until `with_confirmed` is set, the action reports its effect as
    /// unconfirmed, which makes recovery roll back rather than forward.
    pub fn new(
        name: impl Into<String>,
        effect: impl Fn(&OrderRecord) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            effect: Box::new(effect),
            confirmed: Box::new(|_| Ok(false)),
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    /// Set the confirmation probe.
    pub fn with_confirmed(
        mut self,
        confirmed: impl Fn(&OrderRecord) -> Result<bool> + Send + Sync + 'static,
    ) -> Self {
        self.confirmed = Box::new(confirmed);
        self
    }

    /// Override the staleness threshold.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }
}

#[async_trait]
impl Action for FnAction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn effect(&self, record: &OrderRecord) -> Result<()> {
        (self.effect)(record)
    }

    async fn confirmed(&self, record: &OrderRecord) -> Result<bool> {
        (self.confirmed)(record)
    }

    fn stale_after(&self) -> Duration {
        self.stale_after
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use chrono::Utc;
    use lockstep_core::OrderId;

    use super::*;

    fn record() -> OrderRecord {
        OrderRecord {
            id: OrderId::new(),
            state: "validation_started".to_string(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_noop_action_succeeds_and_confirms() {
        let action = NoOpAction::new("finalize");
        assert_eq!(action.name(), "finalize");
        assert!(action.effect(&record()).await.is_ok());
        assert!(action.confirmed(&record()).await.unwrap());
        assert_eq!(action.stale_after(), DEFAULT_STALE_AFTER);
    }

    #[tokio::test]
    async fn test_noop_stale_after_override() {
        let action = NoOpAction::new("finalize").with_stale_after(Duration::from_secs(5));
        assert_eq!(action.stale_after(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_failing_action_carries_context() {
        let action = FailingAction::new("validate", "downstream rejected");
        let result = action.effect(&record()).await;
        let message = result.err().map(|e| e.to_string()).unwrap_or_default();
        assert!(message.contains("validate"));
        assert!(message.contains("downstream rejected"));
        assert!(message.contains("validation_started"));
    }

    #[tokio::test]
    async fn test_fn_action_runs_closures() {
        let action = FnAction::new("broadcast", |_| Ok(()))
            .with_confirmed(|_| Ok(true))
            .with_stale_after(Duration::from_millis(50));
        assert!(action.effect(&record()).await.is_ok());
        assert!(action.confirmed(&record()).await.unwrap());
        assert_eq!(action.stale_after(), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_fn_action_defaults_to_unconfirmed() {
        let action = FnAction::new("broadcast", |_| Ok(()));
        assert!(!action.confirmed(&record()).await.unwrap());
    }
}
