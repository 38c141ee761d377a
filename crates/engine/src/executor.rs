//! Transition executor: the one gate through which order state changes.

use std::sync::Arc;
use std::time::Duration;

use lockstep_core::{Error, OrderId, OrderRecord, OrderState, OrderStore, Result};
use tracing::{debug, warn};

/// Retry settings for transient store failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts before a transient failure becomes a hard `StoreError`.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each attempt after.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Applies state changes through the store's conditional update.
///
/// Every mutation goes through `transition`, which writes only when the
/// stored state still equals `expected`. Transient store outages are
/// retried with backoff; a `StateConflict` is never retried here, because
/// by definition the premise of the write is gone. The caller re-reads
/// and reassesses.
pub struct TransitionExecutor {
    store: Arc<dyn OrderStore>,
    retry: RetryPolicy,
}

impl TransitionExecutor {
    /// Create an executor with the default retry policy.
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Move an order from `expected` to `next`.
    ///
    /// # Errors
    ///
    /// Returns `StateConflict` when another writer moved the order first;
    /// re-read before deciding anything else. Returns `StoreError` once
    /// transient outages exhaust the retry budget, `NotFound` if the
    /// order vanished.
    pub async fn transition(
        &self,
        id: OrderId,
        expected: OrderState,
        next: OrderState,
    ) -> Result<()> {
        let mut attempt = 1;
        loop {
            match self.store.conditional_update(id, expected, next).await {
                Ok(()) => {
                    debug!(order_id = %id, from = %expected, to = %next, "State updated");
                    return Ok(());
                }
                Err(e) if e.is_transient() => {
                    warn!(order_id = %id, attempt = attempt, error = %e, "Store unavailable during update");
                    if attempt >= self.retry.max_attempts {
                        return Err(Error::store_error(id.to_string(), attempt, e.to_string()));
                    }
                    tokio::time::sleep(self.retry.delay(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Read an order's current record, retrying transient outages.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown orders and `StoreError` once
    /// transient outages exhaust the retry budget.
    pub async fn fetch(&self, id: OrderId) -> Result<OrderRecord> {
        let mut attempt = 1;
        loop {
            match self.store.get(id).await {
                Ok(record) => return Ok(record),
                Err(e) if e.is_transient() => {
                    warn!(order_id = %id, attempt = attempt, error = %e, "Store unavailable during read");
                    if attempt >= self.retry.max_attempts {
                        return Err(Error::store_error(id.to_string(), attempt, e.to_string()));
                    }
                    tokio::time::sleep(self.retry.delay(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
