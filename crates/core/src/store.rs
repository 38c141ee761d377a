//! Store contract and in-memory implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::types::{OrderId, OrderRecord, OrderState};

/// Persistence contract for orders.
///
/// The one hard requirement on a backend is `conditional_update`: the
/// state comparison and the write must be a single atomic operation. Every
/// concurrency guarantee the engine makes rests on that. Read-modify-write
/// against a store that cannot do this is unsound no matter what the
/// callers do.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persist a new order in `initial` state and return its ID.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the backend cannot be reached.
    async fn create(&self, initial: OrderState) -> Result<OrderId>;

    /// Fetch the current record for an order.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such order exists.
    async fn get(&self, id: OrderId) -> Result<OrderRecord>;

    /// Atomically set the order's state to `next`, but only if its current
    /// state equals `expected`.
    ///
    /// # Errors
    ///
    /// Returns `StateConflict` if the current state did not match
    /// `expected`, `NotFound` if the order does not exist, and
    /// `StoreUnavailable` on backend trouble. A conflict means another
    /// writer got there first; callers re-read and reassess rather than
    /// retrying the same write.
    async fn conditional_update(
        &self,
        id: OrderId,
        expected: OrderState,
        next: OrderState,
    ) -> Result<()>;

    /// List orders whose last state write is at or before `cutoff`.
    ///
    /// The recovery scanner uses this to find candidates that may have been
    /// abandoned mid-transition.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the backend cannot be reached.
    async fn list_updated_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<OrderRecord>>;
}

/// In-memory store backed by a `HashMap`.
///
/// The compare and the write in `conditional_update` happen under one
/// write lock, which gives the same atomicity a production backend
/// provides with a conditional put. Also records every state ever written
/// per order, which the tests use to assert on exact histories.
#[derive(Default)]
pub struct MemoryStore {
    orders: RwLock<HashMap<OrderId, OrderRecord>>,
    history: RwLock<HashMap<OrderId, Vec<String>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every state written for `id`, oldest first. Empty if unknown.
    pub async fn history(&self, id: OrderId) -> Vec<String> {
        self.history
            .read()
            .await
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    /// Overwrite an order's state unconditionally, bypassing the
    /// compare-and-set contract. Accepts raw strings so tests can plant
    /// states the schema does not know.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the order does not exist.
    pub async fn force_state(&self, id: OrderId, state: &str) -> Result<()> {
        let mut orders = self.orders.write().await;
        let record = orders
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(id.to_string()))?;
        record.state = state.to_string();
        record.updated_at = Utc::now();
        // Lock order is always orders before history.
        self.history
            .write()
            .await
            .entry(id)
            .or_default()
            .push(state.to_string());
        Ok(())
    }

    /// Shift an order's `updated_at` into the past by `by`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the order does not exist.
    pub async fn backdate(&self, id: OrderId, by: std::time::Duration) -> Result<()> {
        let delta =
            chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::days(365_000));
        let mut orders = self.orders.write().await;
        let record = orders
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(id.to_string()))?;
        record.updated_at = record
            .updated_at
            .checked_sub_signed(delta)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Ok(())
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn create(&self, initial: OrderState) -> Result<OrderId> {
        let id = OrderId::new();
        let record = OrderRecord {
            id,
            state: initial.as_str().to_string(),
            updated_at: Utc::now(),
        };
        let mut orders = self.orders.write().await;
        orders.insert(id, record);
        self.history
            .write()
            .await
            .entry(id)
            .or_default()
            .push(initial.as_str().to_string());
        Ok(id)
    }

    async fn get(&self, id: OrderId) -> Result<OrderRecord> {
        self.orders
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(id.to_string()))
    }

    async fn conditional_update(
        &self,
        id: OrderId,
        expected: OrderState,
        next: OrderState,
    ) -> Result<()> {
        let mut orders = self.orders.write().await;
        let record = orders
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(id.to_string()))?;
        if record.state != expected.as_str() {
            return Err(Error::state_conflict(id.to_string(), expected.as_str()));
        }
        record.state = next.as_str().to_string();
        record.updated_at = Utc::now();
        self.history
            .write()
            .await
            .entry(id)
            .or_default()
            .push(next.as_str().to_string());
        Ok(())
    }

    async fn list_updated_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<OrderRecord>> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .filter(|r| r.updated_at <= cutoff)
            .cloned()
            .collect_vec())
    }
}
