//! Drive loop: advance one order until terminal, cancelled, or failed.

use std::sync::Arc;
use std::time::Duration;

use lockstep_core::{Error, OrderId, OrderState, OrderStore, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::executor::{RetryPolicy, TransitionExecutor};
use crate::shutdown::ShutdownSignal;
use crate::table::TransitionTable;

/// Tuning for a [`Driver`].
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Consecutive conflicts tolerated before the drive gives up with
    /// `Contended`. Conflicts are routine; an unbroken run of them means
    /// the order is hot enough that backing off entirely is kinder.
    pub conflict_budget: u32,
    /// Pause between re-reads after a conflict or a locked read.
    pub conflict_backoff: Duration,
    /// Retry policy for transient store failures.
    pub retry: RetryPolicy,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            conflict_budget: 8,
            conflict_backoff: Duration::from_millis(50),
            retry: RetryPolicy::default(),
        }
    }
}

/// How a drive ended, for drives that ended well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveOutcome {
    /// The order reached the terminal state.
    Completed,
    /// Shutdown was signalled between iterations.
    Cancelled,
}

/// Summary of a finished drive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveReport {
    /// The order that was driven.
    pub order_id: OrderId,
    /// Whether the drive completed or was cancelled.
    pub outcome: DriveOutcome,
    /// The last state observed or written.
    pub final_state: OrderState,
    /// Transitions this drive executed itself.
    pub steps: u32,
    /// Conflicts and locked reads absorbed along the way.
    pub conflicts: u32,
}

/// Advances orders through the transition table one step at a time.
///
/// The loop never carries state between iterations: every pass re-reads
/// the order, so whatever other workers did in the meantime is seen, not
/// fought. A conflict or a locked read just means someone else is making
/// progress; the driver waits briefly and looks again.
pub struct Driver {
    table: Arc<TransitionTable>,
    executor: TransitionExecutor,
    config: DriverConfig,
}

impl Driver {
    /// Create a driver with default tuning.
    pub fn new(table: Arc<TransitionTable>, store: Arc<dyn OrderStore>) -> Self {
        Self::with_config(table, store, DriverConfig::default())
    }

    /// Create a driver with explicit tuning.
    pub fn with_config(
        table: Arc<TransitionTable>,
        store: Arc<dyn OrderStore>,
        config: DriverConfig,
    ) -> Self {
        let executor = TransitionExecutor::new(store).with_retry(config.retry.clone());
        Self {
            table,
            executor,
            config,
        }
    }

    /// Drive `id` until it reaches the terminal state.
    ///
    /// # Errors
    ///
    /// See [`Driver::run_with_shutdown`].
    pub async fn run(&self, id: OrderId) -> Result<DriveReport> {
        self.run_with_shutdown(id, ShutdownSignal::never()).await
    }

    /// Drive `id` until terminal, checking `shutdown` between iterations.
    ///
    /// # Errors
    ///
    /// Returns `UnknownState` when the stored state is outside the schema,
    /// `Contended` when consecutive conflicts exhaust the budget,
    /// `ActionFailed` when an action's effect fails, and `StoreError` when
    /// the store stays unreachable. None of these roll anything back; the
    /// order rests wherever it last durably was.
    pub async fn run_with_shutdown(
        &self,
        id: OrderId,
        shutdown: ShutdownSignal,
    ) -> Result<DriveReport> {
        info!(order_id = %id, "Driving order");
        let mut steps = 0;
        let mut conflicts = 0;
        let mut streak = 0;

        loop {
            let record = self.executor.fetch(id).await?;
            let state = record
                .parsed_state()
                .ok_or_else(|| Error::unknown_state(id.to_string(), record.state.clone()))?;

            if state.is_terminal() {
                info!(order_id = %id, steps = steps, "Order complete");
                return Ok(DriveReport {
                    order_id: id,
                    outcome: DriveOutcome::Completed,
                    final_state: state,
                    steps,
                    conflicts,
                });
            }

            if shutdown.is_shutdown() {
                info!(order_id = %id, state = %state, "Drive cancelled");
                return Ok(DriveReport {
                    order_id: id,
                    outcome: DriveOutcome::Cancelled,
                    final_state: state,
                    steps,
                    conflicts,
                });
            }

            if state.locked() {
                // Another worker holds this order. Wait briefly for it to
                // finish; a crashed holder is the scanner's problem.
                conflicts += 1;
                streak += 1;
                if streak > self.config.conflict_budget {
                    return Err(Error::contended(id.to_string(), streak, state.to_string()));
                }
                debug!(order_id = %id, state = %state, "Order locked; waiting");
                tokio::time::sleep(self.config.conflict_backoff).await;
                continue;
            }

            let transition = match self.table.for_state(state) {
                Some(t) => t,
                None => return Err(Error::unknown_state(id.to_string(), state.to_string())),
            };

            match transition.run(&self.executor, &record).await {
                Ok(true) => {
                    steps += 1;
                    info!(order_id = %id, steps = steps, "Order complete");
                    return Ok(DriveReport {
                        order_id: id,
                        outcome: DriveOutcome::Completed,
                        final_state: transition.to,
                        steps,
                        conflicts,
                    });
                }
                Ok(false) => {
                    steps += 1;
                    streak = 0;
                }
                Err(e) if e.is_conflict() => {
                    conflicts += 1;
                    streak += 1;
                    if streak > self.config.conflict_budget {
                        return Err(Error::contended(id.to_string(), streak, state.to_string()));
                    }
                    debug!(order_id = %id, state = %state, "Conflict; re-reading");
                    tokio::time::sleep(self.config.conflict_backoff).await;
                }
                Err(e) => {
                    warn!(order_id = %id, state = %state, error = %e, "Drive failed");
                    return Err(e);
                }
            }
        }
    }
}
