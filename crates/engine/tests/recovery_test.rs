//! Recovery scanner behavior: reclaiming orders whose worker died
//! between the claim write and the release write.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lockstep_core::{MemoryStore, OrderId, OrderRecord, OrderState, OrderStore, Result};
use lockstep_engine::{
    shutdown_channel, Action, Driver, FnAction, NoOpAction, RecoveryScanner, ScannerConfig,
    Transition, TransitionTable,
};

const STALE: Duration = Duration::from_millis(50);

/// Table whose broadcast action reports the given confirmation answer.
fn table_with_broadcast_confirmed(confirmed: bool) -> Arc<TransitionTable> {
    let validate = Arc::new(NoOpAction::new("validate").with_stale_after(STALE));
    let broadcast = Arc::new(
        FnAction::new("broadcast", |_| Ok(()))
            .with_confirmed(move |_| Ok(confirmed))
            .with_stale_after(STALE),
    );
    Arc::new(TransitionTable::standard(validate, broadcast).unwrap())
}

/// Plant an order that looks abandoned mid-broadcast: claimed, then
/// nothing, and old enough to count as stale.
async fn abandoned_mid_broadcast(store: &MemoryStore) -> OrderId {
    let id = store.create(OrderState::Validated).await.unwrap();
    store
        .conditional_update(id, OrderState::Validated, OrderState::BroadcastStarted)
        .await
        .unwrap();
    store.backdate(id, Duration::from_millis(200)).await.unwrap();
    id
}

#[tokio::test]
async fn test_rolls_back_when_effect_unconfirmed() {
    let store = Arc::new(MemoryStore::new());
    let id = abandoned_mid_broadcast(&store).await;

    let scanner = RecoveryScanner::new(table_with_broadcast_confirmed(false), store.clone());
    let report = scanner.scan_once().await.unwrap();

    assert_eq!(report.scanned, 1);
    assert_eq!(report.rolled_back, 1);
    assert_eq!(report.rolled_forward, 0);
    assert_eq!(store.get(id).await.unwrap().state, "validated");
}

#[tokio::test]
async fn test_rolls_forward_when_effect_confirmed() {
    let store = Arc::new(MemoryStore::new());
    let id = abandoned_mid_broadcast(&store).await;

    let table = table_with_broadcast_confirmed(true);
    let scanner = RecoveryScanner::new(table.clone(), store.clone());
    let report = scanner.scan_once().await.unwrap();

    assert_eq!(report.rolled_forward, 1);
    assert_eq!(report.rolled_back, 0);
    assert_eq!(store.get(id).await.unwrap().state, "broadcasted");

    // The reclaimed order is an ordinary stable order again; any driver
    // can finish it.
    let driver = Driver::new(table, store.clone());
    let drive = driver.run(id).await.unwrap();
    assert_eq!(drive.final_state, OrderState::Complete);
}

#[tokio::test]
async fn test_fresh_inflight_orders_are_left_alone() {
    let store = Arc::new(MemoryStore::new());
    let id = store.create(OrderState::Validated).await.unwrap();
    store
        .conditional_update(id, OrderState::Validated, OrderState::BroadcastStarted)
        .await
        .unwrap();

    let scanner = RecoveryScanner::new(table_with_broadcast_confirmed(false), store.clone());
    let report = scanner.scan_once().await.unwrap();

    // Not old enough to make the candidate list at all.
    assert_eq!(report.scanned, 0);
    assert_eq!(store.get(id).await.unwrap().state, "broadcast_started");
}

#[tokio::test]
async fn test_per_action_thresholds_respected() {
    let store = Arc::new(MemoryStore::new());
    // Validation is allowed an hour in flight; broadcast only 50ms.
    let validate = Arc::new(NoOpAction::new("validate").with_stale_after(Duration::from_secs(3600)));
    let broadcast = Arc::new(NoOpAction::new("broadcast").with_stale_after(STALE));
    let table = Arc::new(TransitionTable::standard(validate, broadcast).unwrap());

    let id = store.create(OrderState::Created).await.unwrap();
    store
        .conditional_update(id, OrderState::Created, OrderState::ValidationStarted)
        .await
        .unwrap();
    store.backdate(id, Duration::from_millis(200)).await.unwrap();

    let scanner = RecoveryScanner::new(table, store.clone());
    let report = scanner.scan_once().await.unwrap();

    // Past the global cutoff, but within its own action's grace.
    assert_eq!(report.scanned, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.rolled_back, 0);
    assert_eq!(store.get(id).await.unwrap().state, "validation_started");
}

/// Broadcast action whose confirmation probe races the scanner: while
/// the scanner is deciding, the live worker's release write lands.
struct RacingBroadcast {
    store: Arc<MemoryStore>,
}

#[async_trait]
impl Action for RacingBroadcast {
    fn name(&self) -> &str {
        "broadcast"
    }

    async fn effect(&self, _record: &OrderRecord) -> Result<()> {
        Ok(())
    }

    async fn confirmed(&self, record: &OrderRecord) -> Result<bool> {
        // The worker was only slow, not dead. Its release lands now.
        let _ = self
            .store
            .conditional_update(
                record.id,
                OrderState::BroadcastStarted,
                OrderState::Broadcasted,
            )
            .await;
        Ok(false)
    }

    fn stale_after(&self) -> Duration {
        STALE
    }
}

#[tokio::test]
async fn test_live_worker_beats_scanner() {
    let store = Arc::new(MemoryStore::new());
    let id = abandoned_mid_broadcast(&store).await;

    let validate = Arc::new(NoOpAction::new("validate").with_stale_after(STALE));
    let broadcast = Arc::new(RacingBroadcast {
        store: store.clone(),
    });
    let table = Arc::new(TransitionTable::standard(validate, broadcast).unwrap());

    let scanner = RecoveryScanner::new(table, store.clone());
    let report = scanner.scan_once().await.unwrap();

    // The scanner's rollback expected broadcast_started and lost.
    assert_eq!(report.skipped, 1);
    assert_eq!(report.rolled_back, 0);
    assert_eq!(store.get(id).await.unwrap().state, "broadcasted");
}

#[tokio::test]
async fn test_scanner_ignores_unknown_states() {
    let store = Arc::new(MemoryStore::new());
    let id = store.create(OrderState::Created).await.unwrap();
    store.force_state(id, "bogus").await.unwrap();
    store.backdate(id, Duration::from_millis(200)).await.unwrap();

    let scanner = RecoveryScanner::new(table_with_broadcast_confirmed(false), store.clone());
    let report = scanner.scan_once().await.unwrap();

    assert_eq!(report.scanned, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(store.get(id).await.unwrap().state, "bogus");
}

#[tokio::test]
async fn test_unclaimed_transitional_marker_is_skipped() {
    let store = Arc::new(MemoryStore::new());
    // This table never writes broadcast_started, so a record carrying it
    // has no row to resolve against.
    let table = Arc::new(
        TransitionTable::new(vec![
            Transition::new(
                OrderState::Created,
                OrderState::ValidationStarted,
                OrderState::Validated,
                Arc::new(NoOpAction::new("validate").with_stale_after(STALE)),
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

    let id = store.create(OrderState::Created).await.unwrap();
    store.force_state(id, "broadcast_started").await.unwrap();
    store.backdate(id, Duration::from_millis(200)).await.unwrap();

    let scanner = RecoveryScanner::new(table, store.clone());
    let report = scanner.scan_once().await.unwrap();

    assert_eq!(report.skipped, 1);
    assert_eq!(store.get(id).await.unwrap().state, "broadcast_started");
}

#[tokio::test]
async fn test_periodic_scanner_runs_until_shutdown() {
    let store = Arc::new(MemoryStore::new());
    let id = abandoned_mid_broadcast(&store).await;

    let config = ScannerConfig {
        interval: Duration::from_millis(10),
        ..ScannerConfig::default()
    };
    let scanner = RecoveryScanner::with_config(
        table_with_broadcast_confirmed(false),
        store.clone(),
        config,
    );

    let (handle, signal) = shutdown_channel();
    let task = scanner.spawn(signal);

    tokio::time::sleep(Duration::from_millis(60)).await;
    handle.shutdown();
    let joined = tokio::time::timeout(Duration::from_secs(1), task).await;
    assert!(joined.is_ok(), "scanner should stop on shutdown");

    assert_eq!(store.get(id).await.unwrap().state, "validated");
}

#[tokio::test]
async fn test_crashed_worker_order_resolves_then_completes() {
    let store = Arc::new(MemoryStore::new());
    // A worker claimed the broadcast, died before the effect, and the
    // marker sat long enough to go stale.
    let id = abandoned_mid_broadcast(&store).await;

    let table = table_with_broadcast_confirmed(false);
    let scanner = RecoveryScanner::new(table.clone(), store.clone());
    scanner.scan_once().await.unwrap();

    // Recovery resolved the marker to exactly one adjacent stable state.
    let resolved = store.get(id).await.unwrap().state;
    assert!(resolved == "validated" || resolved == "broadcasted");
    assert_eq!(resolved, "validated");

    // An ordinary drive now finishes the job.
    let report = Driver::new(table, store.clone()).run(id).await.unwrap();
    assert_eq!(report.final_state, OrderState::Complete);
    assert_eq!(store.get(id).await.unwrap().state, "complete");
}
