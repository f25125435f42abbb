//! NodeStore Trait - Backing Store Abstraction
//!
//! This module defines the `NodeStore` trait that abstracts durable record
//! I/O for the session layer. The trait enables multiple backend
//! implementations (embedded libsql, in-memory) without changing session
//! logic.
//!
//! # Design Decisions
//!
//! 1. **Async-First**: all methods are async to support embedded and network
//!    backends alike.
//! 2. **Batched writes**: `save()` flushes a whole [`WriteBatch`] at once;
//!    creates are ordered so rows referenced by later rows land first.
//! 3. **Durable invalidation queue**: the cluster tier of the invalidation
//!    protocol persists records here and polls them by sequence number.
//! 4. **Tolerated races**: concurrent same-(parent, name) creations from
//!    different sessions may both persist; readers see a single stable winner
//!    (ordered by position then id). The store never rejects them.

use crate::db::error::DatabaseError;
use crate::models::{Node, NodeId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Pending mutations flushed in one `save()`.
///
/// `creates` are in creation order; `deletes` list descendants before their
/// ancestors so unrelated subtree removals succeed regardless of batch
/// interleaving.
#[derive(Debug, Default, Clone)]
pub struct WriteBatch {
    pub creates: Vec<Node>,
    pub updates: Vec<Node>,
    pub deletes: Vec<NodeId>,
    pub soft_deletes: Vec<(NodeId, DateTime<Utc>)>,
}

impl WriteBatch {
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty()
            && self.updates.is_empty()
            && self.deletes.is_empty()
            && self.soft_deletes.is_empty()
    }

    /// Total number of row-level operations in the batch.
    pub fn row_count(&self) -> usize {
        self.creates.len() + self.updates.len() + self.deletes.len() + self.soft_deletes.len()
    }
}

/// One persisted entry of the cluster invalidation queue.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidationRecord {
    /// Monotonic sequence number assigned by the store on append.
    pub seq: i64,
    /// Identity of the cluster node that produced the record.
    pub origin: String,
    /// Ids whose cached state must be dropped.
    pub modified: Vec<NodeId>,
    /// Parent ids whose cached child lists must be dropped.
    pub parents: Vec<NodeId>,
}

/// Abstraction layer for durable node persistence and the cluster
/// invalidation queue.
///
/// Implementations must be `Send + Sync`; they are shared by every session of
/// a repository.
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Reads one node row by id.
    ///
    /// Soft-deleted rows are returned (they stay addressable internally);
    /// the session layer decides visibility.
    async fn read_node(&self, id: &NodeId) -> Result<Option<Node>, DatabaseError>;

    /// Reads the non-deleted children of a parent, ordered by (pos, id).
    async fn read_children(&self, parent_id: &NodeId) -> Result<Vec<Node>, DatabaseError>;

    /// Reads the non-deleted versions of a series, ordered by creation time.
    async fn read_versions(&self, series_id: &NodeId) -> Result<Vec<Node>, DatabaseError>;

    /// Reads the non-deleted proxies keyed by versionable series.
    async fn read_proxies(&self, series_id: &NodeId) -> Result<Vec<Node>, DatabaseError>;

    /// Applies a whole batch atomically (as far as the backend allows).
    async fn write_batch(&self, batch: WriteBatch) -> Result<(), DatabaseError>;

    /// Appends an invalidation record to the durable queue, returning its
    /// sequence number.
    async fn append_invalidations(
        &self,
        origin: &str,
        modified: &[NodeId],
        parents: &[NodeId],
    ) -> Result<i64, DatabaseError>;

    /// Returns all queue records with `seq > since`, oldest first.
    async fn poll_invalidations_since(
        &self,
        since: i64,
    ) -> Result<Vec<InvalidationRecord>, DatabaseError>;

    /// The highest sequence number currently in the queue (0 when empty).
    ///
    /// A cluster node joining later starts polling from here so it does not
    /// replay history it never cached.
    async fn latest_invalidation_seq(&self) -> Result<i64, DatabaseError>;

    /// Physically removes soft-deleted rows, oldest first, bounded by an
    /// optional row count and an optional cutoff date (only rows deleted at
    /// or before the cutoff are purged). Returns the number of purged rows.
    async fn purge_soft_deleted(
        &self,
        max_count: Option<usize>,
        cutoff: Option<DateTime<Utc>>,
    ) -> Result<usize, DatabaseError>;

    /// All binary digests referenced by any persisted node.
    ///
    /// This is the mark phase input of the binary garbage collector.
    async fn read_binary_digests(&self) -> Result<Vec<String>, DatabaseError>;
}
