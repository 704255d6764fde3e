//! finchat storage crate: user-scoped persistence for conversation state.
//!
//! Provides the [`KeyValueStore`] abstraction with in-memory and SQLite
//! implementations, and the [`PersistenceGateway`] that serializes the
//! message history and session id under per-user keys.

pub mod gateway;
pub mod kv;
pub mod sqlite;

pub use gateway::PersistenceGateway;
pub use kv::{KeyValueStore, MemoryStore};
pub use sqlite::SqliteStore;
