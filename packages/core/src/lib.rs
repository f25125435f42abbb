//! Canopy Core Storage Layer
//!
//! This crate provides the transactional storage core of the Canopy document
//! repository: hierarchical typed documents, session caches with write-back,
//! versioning and proxies, locks and ACLs, all over an embedded libsql
//! database.
//!
//! # Architecture
//!
//! - **Sessions as transactions**: reads are cached, writes accumulate, and
//!   everything flushes in one batch on `save()`
//! - **Two-tier invalidation**: sibling sessions exchange invalidations
//!   through in-process inboxes; cluster nodes exchange them through a
//!   durable queue in the backing store
//! - **Frozen versions**: check-in deep-copies a subtree into a parentless,
//!   immutable version; proxies place a version (or the live document)
//!   elsewhere in the hierarchy
//! - **libsql/SQLite**: embedded backing store; an in-memory store backs
//!   tests and scratch repositories
//!
//! # Modules
//!
//! - [`models`] - Data structures (Node, property values, schemas)
//! - [`session`] - Sessions, invalidation protocol, pooling
//! - [`repository`] - The shared repository root object
//! - [`db`] - Backing store layer with libsql integration
//! - [`blob`] - Content-addressed binary storage
//! - [`events`] - Commit event broadcasting
//! - [`config`] - Repository tunables

pub mod blob;
pub mod config;
pub mod db;
pub mod events;
pub mod models;
pub mod repository;
pub mod session;

// Re-export commonly used types
pub use blob::{BinaryStore, BinaryStoreStatus, BlobError, LocalBinaryStore};
pub use config::{ClusterConfig, PoolConfig, RepositoryConfig};
pub use db::{DatabaseError, MemoryStore, NodeStore, SqliteStore, WriteBatch};
pub use events::RepositoryEvent;
pub use models::{
    AclEntry, BinaryRef, LockInfo, Node, NodeId, PropertyError, PropertyValue, ProxyInfo,
    ScalarValue, SchemaRegistry, ValidationError, VersionInfo,
};
pub use repository::Repository;
pub use session::{PooledSession, Session, SessionError, SessionPool};

/// Installs a global tracing subscriber reading `RUST_LOG`, defaulting to
/// `info`. Call once from the hosting binary; a second call is a no-op.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
