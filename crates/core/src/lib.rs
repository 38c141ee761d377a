//! Shared foundation for the order pipeline: lifecycle states, persisted
//! records, the error taxonomy, and the store contract with an in-memory
//! implementation for tests and local runs.

pub mod error;
pub mod store;
pub mod types;

// Re-export main types
pub use error::{Error, Result};
pub use store::{MemoryStore, OrderStore};
pub use types::{OrderId, OrderRecord, OrderState};
