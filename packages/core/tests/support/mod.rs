//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use canopy_core::db::{InvalidationRecord, NodeStore, WriteBatch};
use canopy_core::models::{FieldDef, FieldKind, Node, NodeId};
use canopy_core::{DatabaseError, MemoryStore, Repository, RepositoryConfig, SchemaRegistry};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Registry with a small document-management flavored type system.
pub fn registry() -> SchemaRegistry {
    SchemaRegistry::builder()
        .schema(
            "dublincore",
            [
                ("title", FieldDef::scalar(FieldKind::String)),
                ("description", FieldDef::scalar(FieldKind::String)),
                ("subjects", FieldDef::multi(FieldKind::String)),
                ("modified", FieldDef::scalar(FieldKind::DateTime)),
            ],
        )
        .schema("file", [("content", FieldDef::scalar(FieldKind::Binary))])
        .schema("counters", [("hits", FieldDef::scalar(FieldKind::Long))])
        .document_type("folder", ["dublincore"])
        .document_type("note", ["dublincore", "counters"])
        .document_type("file", ["dublincore", "file"])
        .build()
}

/// In-memory repository with default config.
pub async fn memory_repo() -> Arc<Repository> {
    memory_repo_with(RepositoryConfig::default()).await
}

pub async fn memory_repo_with(config: RepositoryConfig) -> Arc<Repository> {
    Repository::new(Arc::new(MemoryStore::new()), registry(), config)
        .await
        .expect("repository init")
}

/// Two repository instances over one shared store, configured as cluster
/// nodes `a` and `b`.
pub async fn cluster_pair(delay_ms: u64) -> (Arc<Repository>, Arc<Repository>) {
    let store = Arc::new(MemoryStore::new());
    let a = Repository::new(
        Arc::clone(&store) as Arc<dyn NodeStore>,
        registry(),
        RepositoryConfig::clustered("a", delay_ms),
    )
    .await
    .expect("repository init");
    let b = Repository::new(
        store as Arc<dyn NodeStore>,
        registry(),
        RepositoryConfig::clustered("b", delay_ms),
    )
    .await
    .expect("repository init");
    (a, b)
}

/// Store wrapper counting `write_batch` calls, to assert that no-op saves
/// reach the store zero times.
pub struct CountingStore {
    inner: MemoryStore,
    writes: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Self {
        CountingStore {
            inner: MemoryStore::new(),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NodeStore for CountingStore {
    async fn read_node(&self, id: &NodeId) -> Result<Option<Node>, DatabaseError> {
        self.inner.read_node(id).await
    }

    async fn read_children(&self, parent_id: &NodeId) -> Result<Vec<Node>, DatabaseError> {
        self.inner.read_children(parent_id).await
    }

    async fn read_versions(&self, series_id: &NodeId) -> Result<Vec<Node>, DatabaseError> {
        self.inner.read_versions(series_id).await
    }

    async fn read_proxies(&self, series_id: &NodeId) -> Result<Vec<Node>, DatabaseError> {
        self.inner.read_proxies(series_id).await
    }

    async fn write_batch(&self, batch: WriteBatch) -> Result<(), DatabaseError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write_batch(batch).await
    }

    async fn append_invalidations(
        &self,
        origin: &str,
        modified: &[NodeId],
        parents: &[NodeId],
    ) -> Result<i64, DatabaseError> {
        self.inner
            .append_invalidations(origin, modified, parents)
            .await
    }

    async fn poll_invalidations_since(
        &self,
        since: i64,
    ) -> Result<Vec<InvalidationRecord>, DatabaseError> {
        self.inner.poll_invalidations_since(since).await
    }

    async fn latest_invalidation_seq(&self) -> Result<i64, DatabaseError> {
        self.inner.latest_invalidation_seq().await
    }

    async fn purge_soft_deleted(
        &self,
        max_count: Option<usize>,
        cutoff: Option<DateTime<Utc>>,
    ) -> Result<usize, DatabaseError> {
        self.inner.purge_soft_deleted(max_count, cutoff).await
    }

    async fn read_binary_digests(&self) -> Result<Vec<String>, DatabaseError> {
        self.inner.read_binary_digests().await
    }
}

/// Repository over a counting store; returns both.
pub async fn counting_repo() -> (Arc<Repository>, Arc<CountingStore>) {
    let store = Arc::new(CountingStore::new());
    let repo = Repository::new(
        Arc::clone(&store) as Arc<dyn NodeStore>,
        registry(),
        RepositoryConfig::default(),
    )
    .await
    .expect("repository init");
    (repo, store)
}
