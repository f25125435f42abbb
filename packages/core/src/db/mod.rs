//! Backing Store Layer
//!
//! Durable persistence behind the session layer:
//!
//! - [`NodeStore`] - the async store abstraction the sessions talk to
//! - [`SqliteStore`] - embedded libsql/SQLite adapter (the default)
//! - [`MemoryStore`] - in-process adapter for tests and scratch repositories
//!
//! Sessions never hold a connection across calls; adapters own their
//! connection handling and expose whole-batch writes.

pub mod error;
pub mod memory_store;
pub mod node_store;
pub mod sqlite_store;

pub use error::DatabaseError;
pub use memory_store::MemoryStore;
pub use node_store::{InvalidationRecord, NodeStore, WriteBatch};
pub use sqlite_store::SqliteStore;
