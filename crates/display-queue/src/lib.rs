//! Broker adapters implementing [`QueueAdapter`]: in-memory and (feature `sqlite`) durable SQLite.

mod config;
mod memory;

#[cfg(feature = "sqlite")]
mod sqlite;

pub use config::BrokerConfig;
pub use display_types::{AckHandle, Delivery, QueueAdapter, QueueError, QueueMessage};
pub use memory::InMemoryBroker;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteQueue;
