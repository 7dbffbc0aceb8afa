//! Job store implementations: in-memory and (feature `sqlite`) SQLite.

mod memory;

#[cfg(feature = "sqlite")]
mod sqlite;

pub use display_types::{JobFilter, JobRecord, JobStore, StoreError, Transition};
pub use memory::InMemoryJobStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteJobStore;
