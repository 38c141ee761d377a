//! # Lockstep Engine
//!
//! Advances orders through a fixed pipeline of stable states, safely
//! shared by any number of crash-prone workers. All coordination runs
//! through the store's conditional update: transitional states double as
//! locks, so workers never need to talk to each other.
//!
//! ## Components
//!
//! - **Transition table**: one row per stable state, mapping it to an
//!   action and the next stable state. Immutable after construction.
//! - **Actions**: the side effects performed between states, plus the
//!   staleness threshold and confirmation probe recovery needs.
//! - **Transition executor**: the single gate for state writes; retries
//!   transient store outages, surfaces conflicts untouched.
//! - **Driver**: re-read, step, repeat until terminal; conflicts mean
//!   another worker is winning, which is fine.
//! - **Recovery scanner**: finds orders abandoned mid-transition and
//!   rolls each forward or back depending on whether its effect stuck.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use lockstep_core::{MemoryStore, OrderState, OrderStore};
//! use lockstep_engine::{Driver, NoOpAction, TransitionTable};
//!
//! #[tokio::main]
//! async fn main() -> lockstep_core::Result<()> {
//!     let store = Arc::new(MemoryStore::new());
//!     let table = Arc::new(TransitionTable::standard(
//!         Arc::new(NoOpAction::new("validate")),
//!         Arc::new(NoOpAction::new("broadcast")),
//!     )?);
//!
//!     let id = store.create(OrderState::Created).await?;
//!     let report = Driver::new(table, store).run(id).await?;
//!     println!("{} finished in {} steps", report.order_id, report.steps);
//!     Ok(())
//! }
//! ```

pub mod action;
pub mod driver;
pub mod executor;
pub mod scanner;
pub mod shutdown;
pub mod table;

// Re-export main types
pub use action::{Action, FailingAction, FnAction, NoOpAction, DEFAULT_STALE_AFTER};
pub use driver::{DriveOutcome, DriveReport, Driver, DriverConfig};
pub use executor::{RetryPolicy, TransitionExecutor};
pub use scanner::{RecoveryScanner, ScanReport, ScannerConfig};
pub use shutdown::{shutdown_channel, ShutdownHandle, ShutdownSignal};
pub use table::{Transition, TransitionTable};
