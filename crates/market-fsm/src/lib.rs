//! Persistent per-deal finite state machines.
//!
//! A deal is a record with a status field. The engine drives one logical
//! actor per deal: events are applied one at a time (guard, mutation,
//! persist, notify), then the new state's entry function runs to completion
//! before the next event is processed. Separate deals run in parallel.
//!
//! The engine survives restarts: records are rehydrated from the record
//! store and each deal re-enters its current state exactly once, so entry
//! functions are written to be idempotent.

pub mod error;
pub mod group;
pub mod machine;
pub mod store;

pub use error::{FsmError, Result};
pub use group::{StateGroup, SubscriptionId};
pub use machine::{Context, DealSpec};
pub use store::{MemoryRecordStore, RecordStore};
