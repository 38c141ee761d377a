//! Transition table: which action moves an order out of each stable state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use lockstep_core::{Error, OrderRecord, OrderState, Result};
use tracing::{info, warn};

use crate::action::{Action, NoOpAction};
use crate::executor::TransitionExecutor;

/// One row of the table: from a stable state, through an optional
/// transitional marker, to the next stable state.
#[derive(Clone)]
pub struct Transition {
    /// Stable state this row fires from.
    pub from: OrderState,
    /// Transitional state held while the action runs. Rows without one
    /// write `from` to `to` in a single step and leave no marker for the
    /// recovery scanner, so they only suit effect-free hops.
    pub via: Option<OrderState>,
    /// Stable state written once the action is done.
    pub to: OrderState,
    /// The work performed between `from` and `to`.
    pub action: Arc<dyn Action>,
}

impl Transition {
    /// Row that parks the order in `via` while `action` runs.
    pub fn new(
        from: OrderState,
        via: OrderState,
        to: OrderState,
        action: Arc<dyn Action>,
    ) -> Self {
        Self {
            from,
            via: Some(via),
            to,
            action,
        }
    }

    /// Row that moves `from` to `to` in one write, with no in-flight
    /// marker. Only for actions with no effect to lose.
    pub fn direct(from: OrderState, to: OrderState, action: Arc<dyn Action>) -> Self {
        Self {
            from,
            via: None,
            to,
            action,
        }
    }

    /// Execute this row for `record`: claim, act, release.
    ///
    /// Returns whether the state written is terminal.
    ///
    /// # Errors
    ///
    /// Returns `StateConflict` if another writer moved the order at either
    /// conditional write, or the action's own error if the effect fails.
    /// An effect failure leaves the order in `via` for recovery to find.
    pub async fn run(&self, executor: &TransitionExecutor, record: &OrderRecord) -> Result<bool> {
        let id = record.id;
        if let Some(via) = self.via {
            executor.transition(id, self.from, via).await?;
            if let Err(e) = self.action.effect(record).await {
                warn!(
                    order_id = %id,
                    action = self.action.name(),
                    state = %via,
                    error = %e,
                    "Action effect failed; order left in-flight for recovery"
                );
                return Err(e);
            }
            executor.transition(id, via, self.to).await?;
        } else {
            self.action.effect(record).await?;
            executor.transition(id, self.from, self.to).await?;
        }
        info!(
            order_id = %id,
            action = self.action.name(),
            from = %self.from,
            to = %self.to,
            "Transition complete"
        );
        Ok(self.to.is_terminal())
    }
}

/// Immutable map from stable states to the transition that advances them.
///
/// Built once at startup, validated, then shared by reference. Extending
/// the pipeline means adding a row and an action here; the drive loop and
/// the recovery scanner never change.
pub struct TransitionTable {
    rows: Vec<Transition>,
    by_from: HashMap<OrderState, usize>,
    by_via: HashMap<OrderState, usize>,
}

impl TransitionTable {
    /// Build a table from rows, validating its shape.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTable` when a row starts from a non-stable or
    /// terminal state, targets a non-stable state, loops onto itself,
    /// claims a non-transitional `via`, duplicates a `from` or `via`, or
    /// when some non-terminal stable state has no row at all.
    pub fn new(rows: Vec<Transition>) -> Result<Self> {
        let mut by_from = HashMap::new();
        let mut by_via = HashMap::new();

        for (index, row) in rows.iter().enumerate() {
            if !row.from.is_stable() || row.from.is_terminal() {
                return Err(Error::invalid_table(format!(
                    "'{}' cannot be the source of a transition",
                    row.from
                )));
            }
            if !row.to.is_stable() {
                return Err(Error::invalid_table(format!(
                    "'{}' is not a stable state",
                    row.to
                )));
            }
            if row.to == row.from {
                return Err(Error::invalid_table(format!(
                    "transition from '{}' does not change state",
                    row.from
                )));
            }
            if by_from.insert(row.from, index).is_some() {
                return Err(Error::invalid_table(format!(
                    "duplicate transition from '{}'",
                    row.from
                )));
            }
            if let Some(via) = row.via {
                if !via.is_transitional() {
                    return Err(Error::invalid_table(format!(
                        "'{via}' is not a transitional state"
                    )));
                }
                if by_via.insert(via, index).is_some() {
                    return Err(Error::invalid_table(format!(
                        "transitional state '{via}' is claimed twice"
                    )));
                }
            }
        }

        // Every non-terminal stable state needs a way forward, or orders
        // strand there with no error to show for it.
        for state in OrderState::ALL {
            if state.is_stable() && !state.is_terminal() && !by_from.contains_key(&state) {
                return Err(Error::invalid_table(format!(
                    "no transition defined from '{state}'"
                )));
            }
        }

        Ok(Self {
            rows,
            by_from,
            by_via,
        })
    }

    /// The stock order pipeline: validate, broadcast, finalize.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTable` if the rows fail validation, which for this
    /// fixed shape they do not.
    pub fn standard(validate: Arc<dyn Action>, broadcast: Arc<dyn Action>) -> Result<Self> {
        Self::new(vec![
            Transition::new(
                OrderState::Created,
                OrderState::ValidationStarted,
                OrderState::Validated,
                validate,
            ),
            Transition::new(
                OrderState::Validated,
                OrderState::BroadcastStarted,
                OrderState::Broadcasted,
                broadcast,
            ),
            Transition::direct(
                OrderState::Broadcasted,
                OrderState::Complete,
                Arc::new(NoOpAction::new("finalize")),
            ),
        ])
    }

    /// The transition that fires from stable state `state`, if any.
    pub fn for_state(&self, state: OrderState) -> Option<&Transition> {
        self.by_from.get(&state).and_then(|&i| self.rows.get(i))
    }

    /// The transition whose in-flight marker is `state`, if any.
    pub fn for_transitional(&self, state: OrderState) -> Option<&Transition> {
        self.by_via.get(&state).and_then(|&i| self.rows.get(i))
    }

    /// The tightest staleness threshold across rows that leave in-flight
    /// markers. `None` when no row does, in which case there is nothing
    /// for the recovery scanner to reclaim.
    pub fn min_stale_after(&self) -> Option<Duration> {
        self.rows
            .iter()
            .filter(|r| r.via.is_some())
            .map(|r| r.action.stale_after())
            .min()
    }
}
