//! Recovery scanner: reclaims orders abandoned mid-transition.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use lockstep_core::{OrderRecord, OrderStore, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::executor::{RetryPolicy, TransitionExecutor};
use crate::shutdown::ShutdownSignal;
use crate::table::TransitionTable;

/// Tuning for a [`RecoveryScanner`].
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Pause between sweeps.
    pub interval: std::time::Duration,
    /// Retry policy for transient store failures.
    pub retry: RetryPolicy,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            interval: std::time::Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    /// Candidates the store returned.
    pub scanned: usize,
    /// Orders moved on to their transition's target state.
    pub rolled_forward: usize,
    /// Orders returned to their transition's source state.
    pub rolled_back: usize,
    /// Candidates looked at and left alone.
    pub skipped: usize,
}

/// Sweeps the store for orders stuck in a transitional state longer than
/// their action allows, and resolves each to a stable state.
///
/// A stuck order gets exactly one of two treatments, decided by asking
/// the action whether its effect durably happened: confirmed effects are
/// rolled forward to the target state, unconfirmed ones are rolled back
/// to the source. Both writes go through the same conditional update as
/// live workers, expecting the transitional state, so a worker that is
/// merely slow wins every race; the scanner holds no special privilege.
pub struct RecoveryScanner {
    table: Arc<TransitionTable>,
    store: Arc<dyn OrderStore>,
    executor: TransitionExecutor,
    config: ScannerConfig,
}

impl RecoveryScanner {
    /// Create a scanner with default tuning.
    pub fn new(table: Arc<TransitionTable>, store: Arc<dyn OrderStore>) -> Self {
        Self::with_config(table, store, ScannerConfig::default())
    }

    /// Create a scanner with explicit tuning.
    pub fn with_config(
        table: Arc<TransitionTable>,
        store: Arc<dyn OrderStore>,
        config: ScannerConfig,
    ) -> Self {
        let executor = TransitionExecutor::new(store.clone()).with_retry(config.retry.clone());
        Self {
            table,
            store,
            executor,
            config,
        }
    }

    /// Run a single sweep over the store.
    ///
    /// The candidate cutoff uses the tightest `stale_after` in the table;
    /// each candidate is then re-checked against its own action's
    /// threshold, so actions with slower effects keep their longer grace.
    ///
    /// # Errors
    ///
    /// Returns the store's error if listing fails, or an executor error
    /// other than a lost race. A partial sweep is fine; the next tick
    /// starts over.
    pub async fn scan_once(&self) -> Result<ScanReport> {
        let min_stale = match self.table.min_stale_after() {
            Some(d) => d,
            // No row leaves an in-flight marker, so nothing can be stuck.
            None => return Ok(ScanReport::default()),
        };

        let now = Utc::now();
        let delta = chrono::Duration::from_std(min_stale)
            .unwrap_or_else(|_| chrono::Duration::days(365_000));
        let cutoff = now.checked_sub_signed(delta).unwrap_or(DateTime::<Utc>::MIN_UTC);

        let candidates = self.store.list_updated_before(cutoff).await?;
        let mut report = ScanReport::default();
        for record in candidates {
            report.scanned += 1;
            self.resolve(&record, now, &mut report).await?;
        }
        Ok(report)
    }

    async fn resolve(
        &self,
        record: &OrderRecord,
        now: DateTime<Utc>,
        report: &mut ScanReport,
    ) -> Result<()> {
        let id = record.id;
        let state = match record.parsed_state() {
            Some(s) => s,
            None => {
                warn!(order_id = %id, state = %record.state, "Unrecognized state during sweep; leaving untouched");
                report.skipped += 1;
                return Ok(());
            }
        };

        if !state.is_transitional() {
            // Old but resting; nothing to reclaim.
            return Ok(());
        }

        let transition = match self.table.for_transitional(state) {
            Some(t) => t,
            None => {
                warn!(order_id = %id, state = %state, "No table row holds this state; leaving untouched");
                report.skipped += 1;
                return Ok(());
            }
        };

        let age = now.signed_duration_since(record.updated_at);
        let threshold = chrono::Duration::from_std(transition.action.stale_after())
            .unwrap_or_else(|_| chrono::Duration::days(365_000));
        if age < threshold {
            debug!(order_id = %id, state = %state, "In-flight but not yet stale for its action");
            report.skipped += 1;
            return Ok(());
        }

        let confirmed = match transition.action.confirmed(record).await {
            Ok(c) => c,
            Err(e) => {
                warn!(order_id = %id, action = transition.action.name(), error = %e, "Could not confirm effect; will retry next sweep");
                report.skipped += 1;
                return Ok(());
            }
        };

        let target = if confirmed {
            transition.to
        } else {
            transition.from
        };
        match self.executor.transition(id, state, target).await {
            Ok(()) => {
                info!(
                    order_id = %id,
                    from = %state,
                    to = %target,
                    confirmed = confirmed,
                    "Reclaimed abandoned order"
                );
                if confirmed {
                    report.rolled_forward += 1;
                } else {
                    report.rolled_back += 1;
                }
                Ok(())
            }
            Err(e) if e.is_conflict() => {
                debug!(order_id = %id, state = %state, "Lost reclaim race to a live worker");
                report.skipped += 1;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Sweep on a fixed interval until shutdown.
    pub async fn run(&self, mut shutdown: ShutdownSignal) {
        let mut ticker = tokio::time::interval(self.config.interval);
        // First tick completes immediately
        ticker.tick().await;
        info!(interval = ?self.config.interval, "Recovery scanner started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.scan_once().await {
                        Ok(report) => {
                            debug!(
                                scanned = report.scanned,
                                rolled_forward = report.rolled_forward,
                                rolled_back = report.rolled_back,
                                skipped = report.skipped,
                                "Sweep complete"
                            );
                        }
                        Err(e) => {
                            error!(error = %e, "Sweep failed");
                        }
                    }
                }
                _ = shutdown.wait() => {
                    info!("Recovery scanner stopped");
                    return;
                }
            }
        }
    }

    /// Run the periodic sweep on its own task.
    pub fn spawn(self, shutdown: ShutdownSignal) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown).await;
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use lockstep_core::{MemoryStore, OrderState};

    use crate::action::NoOpAction;
    use crate::table::Transition;

    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ScannerConfig::default();
        assert_eq!(config.interval, std::time::Duration::from_secs(30));
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[tokio::test]
    async fn test_scan_without_inflight_rows_is_empty() {
        // A table of direct hops leaves no markers, so even ancient
        // records give the scanner nothing to do.
        let table = Arc::new(
            TransitionTable::new(vec![
                Transition::direct(
                    OrderState::Created,
                    OrderState::Validated,
                    Arc::new(NoOpAction::new("validate")),
                ),
                Transition::direct(
                    OrderState::Validated,
                    OrderState::Broadcasted,
                    Arc::new(NoOpAction::new("broadcast")),
                ),
                Transition::direct(
                    OrderState::Broadcasted,
                    OrderState::Complete,
                    Arc::new(NoOpAction::new("finalize")),
                ),
            ])
            .unwrap(),
        );
        let store = Arc::new(MemoryStore::new());
        let id = store.create(OrderState::Created).await.unwrap();
        store
            .backdate(id, std::time::Duration::from_secs(86_400))
            .await
            .unwrap();

        let scanner = RecoveryScanner::new(table, store);
        let report = scanner.scan_once().await.unwrap();
        assert_eq!(report, ScanReport::default());
    }
}
